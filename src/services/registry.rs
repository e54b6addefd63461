//! Actor and proxy registries.
//!
//! Process-global in the original design; here both live inside the
//! container value and are threaded through constructors.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::domain::errors::{LatticeError, LatticeResult};
use crate::domain::models::Id;
use crate::domain::ports::TopicProducer;
use crate::services::kernel::actor::ActorHandle;
use crate::services::proxy::{Proxy, ProxyType, RemoteProxy};

/// Name -> handle map of the actors in this container. Read-mostly.
#[derive(Default)]
pub struct ActorRegistry {
    actors: Mutex<HashMap<String, ActorHandle>>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: ActorHandle) {
        self.actors
            .lock()
            .unwrap()
            .insert(handle.name().to_string(), handle);
    }

    pub fn unregister(&self, name: &str) {
        self.actors.lock().unwrap().remove(name);
    }

    pub fn get(&self, name: &str) -> Option<ActorHandle> {
        self.actors.lock().unwrap().get(name).cloned()
    }

    pub fn get_by_guid(&self, guid: Id) -> Option<ActorHandle> {
        self.actors
            .lock()
            .unwrap()
            .values()
            .find(|h| h.guid() == guid)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.actors.lock().unwrap().keys().cloned().collect()
    }

    pub fn handles(&self) -> Vec<ActorHandle> {
        self.actors.lock().unwrap().values().cloned().collect()
    }
}

/// `(protocol, actor name) -> proxy` map.
///
/// Unknown names fall back to a remote proxy for the equally named topic,
/// so callback topics of peers outside this container always resolve.
pub struct ProxyRegistry {
    proxies: Mutex<HashMap<(ProxyType, String), Arc<dyn Proxy>>>,
    producer: Arc<dyn TopicProducer>,
}

impl ProxyRegistry {
    pub fn new(producer: Arc<dyn TopicProducer>) -> Self {
        Self {
            proxies: Mutex::new(HashMap::new()),
            producer,
        }
    }

    pub fn register(&self, proxy_type: ProxyType, name: impl Into<String>, proxy: Arc<dyn Proxy>) {
        self.proxies
            .lock()
            .unwrap()
            .insert((proxy_type, name.into()), proxy);
    }

    pub fn get(&self, proxy_type: ProxyType, name: &str) -> LatticeResult<Arc<dyn Proxy>> {
        self.proxies
            .lock()
            .unwrap()
            .get(&(proxy_type, name.to_string()))
            .cloned()
            .ok_or_else(|| LatticeError::NoSuchActor(name.to_string()))
    }

    /// Preferred route to a peer: the local proxy when the peer is in this
    /// container, a remote topic proxy otherwise.
    pub fn route(&self, name: &str) -> Arc<dyn Proxy> {
        if let Ok(local) = self.get(ProxyType::Local, name) {
            return local;
        }
        if let Ok(remote) = self.get(ProxyType::Remote, name) {
            return remote;
        }
        Arc::new(RemoteProxy::new(name, self.producer.clone()))
    }
}

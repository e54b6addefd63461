//! The container: shared registries, clock, RPC manager, and actor
//! lifecycle for one process.
//!
//! Built once at startup and threaded through constructors; there is no
//! process-global mutable state.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;

use async_trait::async_trait;

use crate::adapters::handler::NoopHandler;
use crate::adapters::sqlite::{create_pool, run_migrations, stores_for_actor, SqliteContainerStore};
use crate::domain::errors::{LatticeError, LatticeResult};
use crate::domain::models::{
    ActorClock, ActorConfig, AuthToken, Config, RpcEnvelope, RpcKind, RpcPayload,
};
use crate::domain::ports::{
    ActorRecord, ConfigurationHandler, ContainerStore, MessageTransport, Policy, TopicProducer,
};
use crate::services::kernel::{Actor, ActorHandle};
use crate::services::policy::{PolicyRegistry, PolicyStats};
use crate::services::proxy::{spawn_consumer, LocalProxy, ProxyType};
use crate::services::registry::{ActorRegistry, ProxyRegistry};
use crate::services::rpc::{RpcManager, RpcManagerConfig};

const CLOCK_MISC_KEY: &str = "container.clock";

/// Producer view over the full transport, for the proxy registry.
struct TransportProducer(Arc<dyn MessageTransport>);

#[async_trait]
impl TopicProducer for TransportProducer {
    async fn produce(&self, topic: &str, payload: Vec<u8>) -> LatticeResult<()> {
        self.0.produce(topic, payload).await
    }
}

/// One process hosting a set of actors.
pub struct Container {
    clock: ActorClock,
    pool: SqlitePool,
    transport: Arc<dyn MessageTransport>,
    registry: Arc<ActorRegistry>,
    proxies: Arc<ProxyRegistry>,
    rpc: Arc<RpcManager>,
    policies: PolicyRegistry,
    container_store: Arc<dyn ContainerStore>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Container {
    /// Build a container from config: open the store, run migrations, and
    /// restore (or persist) the container clock.
    pub async fn new(config: &Config, transport: Arc<dyn MessageTransport>) -> anyhow::Result<Self> {
        let url = format!("sqlite:{}", config.database.path);
        let pool = create_pool(&url, None)
            .await
            .context("opening container database")?;
        Self::with_pool(config, transport, pool).await
    }

    /// Build a container over an existing pool (tests, shared databases).
    pub async fn with_pool(
        config: &Config,
        transport: Arc<dyn MessageTransport>,
        pool: SqlitePool,
    ) -> anyhow::Result<Self> {
        run_migrations(&pool).await.context("running migrations")?;
        let container_store: Arc<dyn ContainerStore> = Arc::new(SqliteContainerStore::new(pool.clone()));

        // Clock parameters survive restarts: the stored copy wins so cycle
        // numbering stays stable across the container's lifetime.
        let clock = match container_store.get_misc(CLOCK_MISC_KEY).await? {
            Some(stored) => serde_json::from_str(&stored).context("decoding stored clock")?,
            None => {
                let mut clock = ActorClock::new(
                    config.time.beginning_of_time,
                    config.time.cycle_millis,
                    config.time.manual,
                );
                if clock.beginning_of_time == 0 && !clock.manual {
                    clock.beginning_of_time = Utc::now().timestamp_millis();
                }
                container_store
                    .set_misc(CLOCK_MISC_KEY, &serde_json::to_string(&clock)?)
                    .await?;
                clock
            }
        };

        let registry = Arc::new(ActorRegistry::new());
        let producer: Arc<dyn TopicProducer> = Arc::new(TransportProducer(transport.clone()));
        let proxies = Arc::new(ProxyRegistry::new(producer));
        let rpc = RpcManager::new(
            registry.clone(),
            RpcManagerConfig {
                timeout: Duration::from_secs(config.rpc.timeout_seconds),
                produce_retry_window: Duration::from_secs(2),
            },
        );

        Ok(Self {
            clock,
            pool,
            transport,
            registry,
            proxies,
            rpc,
            policies: PolicyRegistry::builtin(),
            container_store,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn clock(&self) -> ActorClock {
        self.clock
    }

    pub fn registry(&self) -> &Arc<ActorRegistry> {
        &self.registry
    }

    pub fn rpc(&self) -> &Arc<RpcManager> {
        &self.rpc
    }

    pub fn policies_mut(&mut self) -> &mut PolicyRegistry {
        &mut self.policies
    }

    /// Add an actor with the registered policy for its config token and the
    /// no-op configuration handler.
    pub async fn add_actor(
        &self,
        config: &ActorConfig,
    ) -> LatticeResult<(ActorHandle, Arc<PolicyStats>)> {
        self.add_actor_with_handler(config, Arc::new(NoopHandler::new())).await
    }

    /// Add an actor with a custom configuration handler.
    pub async fn add_actor_with_handler(
        &self,
        config: &ActorConfig,
        handler: Arc<dyn ConfigurationHandler>,
    ) -> LatticeResult<(ActorHandle, Arc<PolicyStats>)> {
        let stats: Arc<PolicyStats> = Arc::default();
        let policy = self
            .policies
            .build(&config.policy, config.role, &self.clock, stats.clone())?;
        let handle = self.add_actor_custom(config, policy, handler).await?;
        Ok((handle, stats))
    }

    /// Add an actor with explicit policy and handler instances.
    pub async fn add_actor_custom(
        &self,
        config: &ActorConfig,
        policy: Box<dyn Policy>,
        handler: Arc<dyn ConfigurationHandler>,
    ) -> LatticeResult<ActorHandle> {
        // Reuse the guid of a previously registered actor with this name so
        // its persisted state is found on recovery.
        let guid = self
            .container_store
            .get_actors()
            .await?
            .into_iter()
            .find(|record| record.name == config.name)
            .map(|record| record.guid)
            .unwrap_or_default();

        self.container_store
            .add_actor(&ActorRecord {
                guid,
                name: config.name.clone(),
                role: config.role.as_str().to_string(),
            })
            .await?;

        let identity = AuthToken::new(config.name.clone(), guid);
        let stores = stores_for_actor(&self.pool, guid);
        let (actor, handle, events_rx, timers_rx) = Actor::new(
            identity,
            config.role,
            self.clock,
            policy,
            stores,
            handler,
            self.proxies.clone(),
            self.rpc.clone(),
        )?;

        self.registry.register(handle.clone());
        self.proxies.register(
            ProxyType::Local,
            config.name.clone(),
            Arc::new(LocalProxy::new(handle.clone(), self.rpc.clone())),
        );

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(tokio::spawn(actor.run(events_rx, timers_rx)));
        tasks.push(spawn_consumer(config.name.clone(), &self.transport, self.rpc.clone())?);

        Ok(handle)
    }

    /// Tick every hosted actor to the given cycle.
    pub fn external_tick(&self, cycle: u64) -> LatticeResult<()> {
        for handle in self.registry.handles() {
            handle.tick(cycle)?;
        }
        Ok(())
    }

    /// Query a hosted or remote actor and wait for the paired result.
    pub async fn query(
        &self,
        origin: &AuthToken,
        target: &str,
        properties: BTreeMap<String, String>,
    ) -> LatticeResult<BTreeMap<String, String>> {
        let envelope = RpcEnvelope::request(
            RpcKind::Query,
            origin.name.clone(),
            origin.clone(),
            RpcPayload::Query(properties),
        );
        let proxy = self.proxies.route(target);
        self.rpc.query(&origin.name, proxy, envelope).await
    }

    /// Stop every hosted actor and abort the consumer tasks.
    pub async fn stop(&self) {
        for handle in self.registry.handles() {
            handle.stop().await;
            self.registry.unregister(handle.name());
        }
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    /// Remove an actor from the registries without stopping it (tests).
    pub fn unregister_actor(&self, name: &str) -> LatticeResult<()> {
        if self.registry.get(name).is_none() {
            return Err(LatticeError::NoSuchActor(name.to_string()));
        }
        self.registry.unregister(name);
        Ok(())
    }
}

//! Event vocabulary of the actor loop.
//!
//! Every unit of work an actor performs arrives as one of these events on
//! its queue; the loop is the single thread of mutation.

use crate::domain::models::RpcEnvelope;
use crate::domain::ports::ConfigComplete;

use super::actor::Actor;

/// Closure executed on the actor task with exclusive access to its state.
pub type ActorFn = Box<dyn FnOnce(&mut Actor) + Send>;

/// A unit of work queued onto an actor.
pub enum ActorEvent {
    /// External monotonic time signal.
    Tick { cycle: u64 },
    /// Inbound protocol message (request, update, or failed-rpc).
    Incoming(Box<RpcEnvelope>),
    /// A configuration action on a unit completed.
    ConfigComplete(ConfigComplete),
    /// Synchronous call-in from another task.
    Invoke(ActorFn),
    /// Drain and exit the loop.
    Stop,
}

impl std::fmt::Debug for ActorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tick { cycle } => write!(f, "Tick({cycle})"),
            Self::Incoming(envelope) => {
                write!(f, "Incoming({}, {})", envelope.kind, envelope.message_id)
            }
            Self::ConfigComplete(c) => {
                write!(f, "ConfigComplete({}, {})", c.action.as_str(), c.unit_id)
            }
            Self::Invoke(_) => write!(f, "Invoke"),
            Self::Stop => write!(f, "Stop"),
        }
    }
}

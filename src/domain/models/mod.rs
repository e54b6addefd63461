//! Domain models
//!
//! Pure entities of the leasing protocol: identifiers, identities, terms,
//! slices, resource sets, reservations, delegations, units, and the logical
//! message set.

pub mod auth;
pub mod clock;
pub mod config;
pub mod delegation;
pub mod id;
pub mod message;
pub mod notice;
pub mod reservation;
pub mod resource_set;
pub mod slice;
pub mod term;
pub mod unit;

pub use auth::AuthToken;
pub use clock::ActorClock;
pub use config::{ActorConfig, ActorRole, Config, DatabaseConfig, LoggingConfig, RpcConfig, TimeConfig};
pub use delegation::{Delegation, DelegationState};
pub use id::{Id, ResourceType};
pub use message::{
    DelegationWire, FailedRpcInfo, FailureKind, ReservationWire, RpcEnvelope, RpcKind, RpcPayload,
    UpdateData,
};
pub use notice::Notice;
pub use reservation::{
    PendingState, Reservation, ReservationCategory, ReservationSet, ReservationState, Sequences,
};
pub use resource_set::{ConcreteSet, ResourceSet, Ticket};
pub use slice::{Slice, SliceKind};
pub use term::Term;
pub use unit::{ConfigAction, Unit, UnitSet, UnitState};

//! Domain ports (interfaces) for the lattice control framework.

pub mod handler;
pub mod policy;
pub mod store;
pub mod transport;

pub use handler::{ConfigComplete, ConfigSink, ConfigurationHandler};
pub use policy::Policy;
pub use store::{
    ActorRecord, ClientRecord, ContainerStore, DelegationStore, ReservationStore, SliceStore,
    Stores, UnitStore,
};
pub use transport::{MessageTransport, TopicProducer};

//! Persistence ports consumed by the actor kernel.
//!
//! One port per entity, bundled by [`Stores`] which binds the owning actor's
//! guid so kernel code never threads it explicitly. All writes are atomic
//! per entity; reads within an event batch observe writes from earlier
//! batches.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::errors::LatticeResult;
use crate::domain::models::{
    Delegation, Id, Reservation, ReservationCategory, ReservationState, ResourceType, Slice,
    SliceKind, Unit,
};

/// Record of an actor registered with the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorRecord {
    pub guid: Id,
    pub name: String,
    pub role: String,
}

/// Record of a known downstream client (brokers and authorities keep these).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub guid: Id,
    pub name: String,
    /// Topic the client listens on for updates.
    pub topic: String,
}

/// Slice persistence.
#[async_trait]
pub trait SliceStore: Send + Sync {
    async fn add_slice(&self, actor_id: Id, slice: &Slice) -> LatticeResult<()>;

    async fn update_slice(&self, actor_id: Id, slice: &Slice) -> LatticeResult<()>;

    async fn remove_slice(&self, actor_id: Id, slice_id: Id) -> LatticeResult<()>;

    async fn get_slice(&self, actor_id: Id, slice_id: Id) -> LatticeResult<Option<Slice>>;

    async fn get_slices(&self, actor_id: Id) -> LatticeResult<Vec<Slice>>;

    async fn get_slices_by_kind(&self, actor_id: Id, kind: SliceKind) -> LatticeResult<Vec<Slice>>;

    async fn get_slices_by_resource_type(
        &self,
        actor_id: Id,
        rtype: &ResourceType,
    ) -> LatticeResult<Vec<Slice>>;
}

/// Reservation persistence.
///
/// The stored blob is the serialized reservation; round-tripping an
/// unmutated reservation must yield a byte-identical blob.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn add_reservation(&self, actor_id: Id, reservation: &Reservation) -> LatticeResult<()>;

    async fn update_reservation(&self, actor_id: Id, reservation: &Reservation) -> LatticeResult<()>;

    async fn remove_reservation(&self, actor_id: Id, rid: Id) -> LatticeResult<()>;

    async fn get_reservation(&self, actor_id: Id, rid: Id) -> LatticeResult<Option<Reservation>>;

    async fn get_reservations_by_slice(&self, actor_id: Id, slice_id: Id) -> LatticeResult<Vec<Reservation>>;

    async fn get_reservations_by_state(
        &self,
        actor_id: Id,
        state: ReservationState,
    ) -> LatticeResult<Vec<Reservation>>;

    async fn get_reservations_by_category(
        &self,
        actor_id: Id,
        category: ReservationCategory,
    ) -> LatticeResult<Vec<Reservation>>;

    /// Raw stored blob, for round-trip verification.
    async fn get_reservation_blob(&self, actor_id: Id, rid: Id) -> LatticeResult<Option<String>>;
}

/// Delegation persistence.
#[async_trait]
pub trait DelegationStore: Send + Sync {
    async fn add_delegation(&self, actor_id: Id, delegation: &Delegation) -> LatticeResult<()>;

    async fn update_delegation(&self, actor_id: Id, delegation: &Delegation) -> LatticeResult<()>;

    async fn remove_delegation(&self, actor_id: Id, did: Id) -> LatticeResult<()>;

    async fn get_delegation(&self, actor_id: Id, did: Id) -> LatticeResult<Option<Delegation>>;

    async fn get_delegations_by_slice(&self, actor_id: Id, slice_id: Id) -> LatticeResult<Vec<Delegation>>;
}

/// Unit persistence.
#[async_trait]
pub trait UnitStore: Send + Sync {
    /// Insert a unit. Fails if the id already exists under the actor unless
    /// `is_recovery` is set.
    async fn add_unit(&self, actor_id: Id, unit: &Unit, is_recovery: bool) -> LatticeResult<()>;

    async fn update_unit(&self, actor_id: Id, unit: &Unit) -> LatticeResult<()>;

    async fn remove_unit(&self, actor_id: Id, unit_id: Id) -> LatticeResult<()>;

    async fn get_unit(&self, actor_id: Id, unit_id: Id) -> LatticeResult<Option<Unit>>;

    async fn get_units_by_reservation(&self, actor_id: Id, rid: Id) -> LatticeResult<Vec<Unit>>;
}

/// Container-level actor table plus miscellaneous key/value state
/// (clock parameters and the like).
#[async_trait]
pub trait ContainerStore: Send + Sync {
    async fn add_actor(&self, record: &ActorRecord) -> LatticeResult<()>;

    async fn get_actors(&self) -> LatticeResult<Vec<ActorRecord>>;

    async fn remove_actor(&self, guid: Id) -> LatticeResult<()>;

    async fn add_client(&self, actor_id: Id, client: &ClientRecord) -> LatticeResult<()>;

    async fn get_client(&self, actor_id: Id, guid: Id) -> LatticeResult<Option<ClientRecord>>;

    async fn remove_client(&self, actor_id: Id, guid: Id) -> LatticeResult<()>;

    async fn set_misc(&self, key: &str, value: &str) -> LatticeResult<()>;

    async fn get_misc(&self, key: &str) -> LatticeResult<Option<String>>;
}

/// The store bundle handed to one actor, bound to its guid.
#[derive(Clone)]
pub struct Stores {
    pub actor_id: Id,
    pub slices: Arc<dyn SliceStore>,
    pub reservations: Arc<dyn ReservationStore>,
    pub delegations: Arc<dyn DelegationStore>,
    pub units: Arc<dyn UnitStore>,
    pub container: Arc<dyn ContainerStore>,
}

impl Stores {
    pub async fn add_slice(&self, slice: &Slice) -> LatticeResult<()> {
        self.slices.add_slice(self.actor_id, slice).await
    }

    pub async fn update_slice(&self, slice: &Slice) -> LatticeResult<()> {
        self.slices.update_slice(self.actor_id, slice).await
    }

    pub async fn remove_slice(&self, slice_id: Id) -> LatticeResult<()> {
        self.slices.remove_slice(self.actor_id, slice_id).await
    }

    pub async fn get_slices_by_kind(&self, kind: SliceKind) -> LatticeResult<Vec<Slice>> {
        self.slices.get_slices_by_kind(self.actor_id, kind).await
    }

    pub async fn add_reservation(&self, reservation: &Reservation) -> LatticeResult<()> {
        self.reservations.add_reservation(self.actor_id, reservation).await
    }

    pub async fn update_reservation(&self, reservation: &Reservation) -> LatticeResult<()> {
        self.reservations.update_reservation(self.actor_id, reservation).await
    }

    pub async fn remove_reservation(&self, rid: Id) -> LatticeResult<()> {
        self.reservations.remove_reservation(self.actor_id, rid).await
    }

    pub async fn get_reservations_by_slice(&self, slice_id: Id) -> LatticeResult<Vec<Reservation>> {
        self.reservations.get_reservations_by_slice(self.actor_id, slice_id).await
    }

    pub async fn add_delegation(&self, delegation: &Delegation) -> LatticeResult<()> {
        self.delegations.add_delegation(self.actor_id, delegation).await
    }

    pub async fn update_delegation(&self, delegation: &Delegation) -> LatticeResult<()> {
        self.delegations.update_delegation(self.actor_id, delegation).await
    }

    pub async fn get_delegations_by_slice(&self, slice_id: Id) -> LatticeResult<Vec<Delegation>> {
        self.delegations.get_delegations_by_slice(self.actor_id, slice_id).await
    }

    pub async fn add_unit(&self, unit: &Unit, is_recovery: bool) -> LatticeResult<()> {
        self.units.add_unit(self.actor_id, unit, is_recovery).await
    }

    pub async fn update_unit(&self, unit: &Unit) -> LatticeResult<()> {
        self.units.update_unit(self.actor_id, unit).await
    }

    pub async fn get_units_by_reservation(&self, rid: Id) -> LatticeResult<Vec<Unit>> {
        self.units.get_units_by_reservation(self.actor_id, rid).await
    }
}

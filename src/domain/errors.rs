//! Domain errors for the lattice control framework.

use thiserror::Error;

use crate::domain::models::id::Id;

/// Domain-level errors. Every kind maps to a stable negative wire code via
/// [`LatticeError::result_code`]; code 0 is success.
#[derive(Debug, Error)]
pub enum LatticeError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Invalid actor: {0}")]
    InvalidActor(String),

    #[error("Invalid reservation: {0}")]
    InvalidReservation(String),

    #[error("Invalid slice: {0}")]
    InvalidSlice(String),

    #[error("Slice not found: {0}")]
    NoSuchSlice(Id),

    #[error("Reservation not found: {0}")]
    NoSuchReservation(Id),

    #[error("Delegation not found: {0}")]
    NoSuchDelegation(Id),

    #[error("Broker not found: {0}")]
    NoSuchBroker(String),

    #[error("Actor not found: {0}")]
    NoSuchActor(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Transport timeout: {0}")]
    TransportTimeout(String),

    #[error("Reservation {0} has a pending operation")]
    ReservationHasPendingOperation(Id),

    #[error("Invalid extension: {0}")]
    InvalidExtend(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type LatticeResult<T> = Result<T, LatticeError>;

impl LatticeError {
    /// Stable negative code carried in update messages.
    pub fn result_code(&self) -> i32 {
        match self {
            Self::InvalidArguments(_) => -1,
            Self::InvalidActor(_) => -2,
            Self::InvalidReservation(_) => -3,
            Self::InvalidSlice(_) => -4,
            Self::NoSuchSlice(_) => -5,
            Self::NoSuchReservation(_) => -6,
            Self::NoSuchDelegation(_) => -7,
            Self::NoSuchBroker(_) => -8,
            Self::NoSuchActor(_) => -9,
            Self::DatabaseError(_) => -10,
            Self::TransportFailure(_) => -11,
            Self::TransportTimeout(_) => -12,
            Self::ReservationHasPendingOperation(_) => -13,
            Self::InvalidExtend(_) => -14,
            Self::InternalError(_) => -15,
        }
    }
}

impl From<sqlx::Error> for LatticeError {
    fn from(err: sqlx::Error) -> Self {
        LatticeError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for LatticeError {
    fn from(err: serde_json::Error) -> Self {
        LatticeError::DatabaseError(format!("serialization: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_codes_are_distinct_and_negative() {
        let errors = [
            LatticeError::InvalidArguments(String::new()),
            LatticeError::InvalidActor(String::new()),
            LatticeError::InvalidReservation(String::new()),
            LatticeError::InvalidSlice(String::new()),
            LatticeError::NoSuchSlice(Id::new()),
            LatticeError::NoSuchReservation(Id::new()),
            LatticeError::NoSuchDelegation(Id::new()),
            LatticeError::NoSuchBroker(String::new()),
            LatticeError::NoSuchActor(String::new()),
            LatticeError::DatabaseError(String::new()),
            LatticeError::TransportFailure(String::new()),
            LatticeError::TransportTimeout(String::new()),
            LatticeError::ReservationHasPendingOperation(Id::new()),
            LatticeError::InvalidExtend(String::new()),
            LatticeError::InternalError(String::new()),
        ];
        let mut codes: Vec<i32> = errors.iter().map(LatticeError::result_code).collect();
        assert!(codes.iter().all(|c| *c < 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}

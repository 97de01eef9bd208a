use thiserror::Error;

use crate::state_machine::FarmoutEvent;
use crate::status::FarmoutStatus;

/// Errors raised by a reservation store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("reservation not found: {0}")]
    NotFound(String),

    /// The commit precondition no longer held when the write was attempted.
    #[error("reservation {reservation_id} changed underneath the write (now {})", display_status(.actual_status))]
    PreconditionFailed {
        reservation_id: String,
        actual_status: Option<FarmoutStatus>,
        actual_offer: Option<uuid::Uuid>,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store lock poisoned")]
    LockPoisoned,
}

/// Errors returned by farm-out transition entry points.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("cannot {event} reservation {reservation_id} while it is {}", display_status(.from))]
    InvalidTransition {
        reservation_id: String,
        event: FarmoutEvent,
        from: Option<FarmoutStatus>,
    },

    #[error("driver {0} is not available")]
    DriverUnavailable(String),

    #[error("reservation {0} already has an active offer")]
    OfferAlreadyActive(String),

    #[error("reservation {0} has no active offer")]
    NoActiveOffer(String),

    #[error("the offer on reservation {reservation_id} was not sent to driver {driver_id}")]
    OfferNotForDriver {
        reservation_id: String,
        driver_id: String,
    },

    #[error("driver and vehicle must be assigned together")]
    IncompleteAssignment,

    #[error("reservation not found: {0}")]
    ReservationNotFound(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// Errors a timer or automation caller loses a race with and should treat
    /// as a no-op.
    pub fn is_benign_race(&self) -> bool {
        matches!(
            self,
            DispatchError::InvalidTransition { .. }
                | DispatchError::NoActiveOffer(_)
                | DispatchError::OfferAlreadyActive(_)
        )
    }
}

pub type Result<T> = core::result::Result<T, DispatchError>;

fn display_status(status: &Option<FarmoutStatus>) -> &'static str {
    status.map_or("not farmed out", FarmoutStatus::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_display() {
        let err = DispatchError::InvalidTransition {
            reservation_id: "r-1".into(),
            event: FarmoutEvent::SendOffer,
            from: Some(FarmoutStatus::Assigned),
        };
        assert_eq!(
            err.to_string(),
            "cannot send_offer reservation r-1 while it is assigned"
        );

        let err = DispatchError::InvalidTransition {
            reservation_id: "r-2".into(),
            event: FarmoutEvent::SwitchToInHouse,
            from: None,
        };
        assert_eq!(
            err.to_string(),
            "cannot switch_to_in_house reservation r-2 while it is not farmed out"
        );
    }

    #[test]
    fn benign_race_classification() {
        assert!(DispatchError::NoActiveOffer("r".into()).is_benign_race());
        assert!(DispatchError::OfferAlreadyActive("r".into()).is_benign_race());
        assert!(!DispatchError::DriverUnavailable("d".into()).is_benign_race());
        assert!(
            !DispatchError::Store(StoreError::Unavailable("timeout".into())).is_benign_race()
        );
    }

    #[test]
    fn store_error_converts() {
        let err: DispatchError = StoreError::LockPoisoned.into();
        assert!(matches!(err, DispatchError::Store(StoreError::LockPoisoned)));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DispatchError>();
    }
}

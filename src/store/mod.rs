//! Persistence boundary for reservations and the driver roster.
//!
//! The dispatch engine never touches storage directly; it goes through
//! [`ReservationStore`]. Writes are partial ([`ReservationPatch`]) and carry a
//! [`Precondition`] the store checks atomically with the write, so a
//! transition validated against a stale read fails instead of overwriting a
//! newer state.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::state_machine::{Assignment, CurrentOffer, Driver, Reservation};
use crate::status::{FarmoutMode, FarmoutStatus};

pub use memory::InMemoryStore;

/// What the writer expects the record to look like at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Precondition {
    pub status: Option<FarmoutStatus>,
    pub offer_id: Option<Uuid>,
}

impl Precondition {
    /// Snapshot of the fields a transition was validated against.
    pub fn observed(reservation: &Reservation) -> Self {
        Self {
            status: reservation.farmout_status,
            offer_id: reservation.current_offer.as_ref().map(|o| o.offer_id),
        }
    }

    pub fn holds_for(&self, reservation: &Reservation) -> bool {
        *self == Self::observed(reservation)
    }
}

/// A partial update. `None` leaves a field untouched; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationPatch {
    pub precondition: Option<Precondition>,
    pub farmout_status: Option<Option<FarmoutStatus>>,
    pub farmout_mode: Option<FarmoutMode>,
    pub assignment: Option<Option<Assignment>>,
    pub current_offer: Option<Option<CurrentOffer>>,
}

impl ReservationPatch {
    pub fn guarded(precondition: Precondition) -> Self {
        Self {
            precondition: Some(precondition),
            ..Self::default()
        }
    }

    pub fn status(mut self, status: Option<FarmoutStatus>) -> Self {
        self.farmout_status = Some(status);
        self
    }

    pub fn mode(mut self, mode: FarmoutMode) -> Self {
        self.farmout_mode = Some(mode);
        self
    }

    pub fn assignment(mut self, assignment: Option<Assignment>) -> Self {
        self.assignment = Some(assignment);
        self
    }

    pub fn offer(mut self, offer: Option<CurrentOffer>) -> Self {
        self.current_offer = Some(offer);
        self
    }

    /// Writes every listed field onto `reservation`. Precondition checking is
    /// the caller's job.
    pub fn apply_to(&self, reservation: &mut Reservation, now: DateTime<Utc>) {
        if let Some(status) = self.farmout_status {
            reservation.farmout_status = status;
        }
        if let Some(mode) = self.farmout_mode {
            reservation.farmout_mode = mode;
        }
        if let Some(assignment) = &self.assignment {
            let (driver, vehicle) = match assignment {
                Some(a) => (Some(a.driver_id.clone()), Some(a.vehicle_id.clone())),
                None => (None, None),
            };
            reservation.assigned_driver_id = driver;
            reservation.assigned_vehicle_id = vehicle;
        }
        if let Some(offer) = &self.current_offer {
            reservation.current_offer.clone_from(offer);
        }
        reservation.updated_at = now;
    }
}

/// Narrows `list_reservations`. The default matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub status: Option<FarmoutStatus>,
    pub mode: Option<FarmoutMode>,
    /// Skip reservations dispatched in-house.
    pub farmout_only: bool,
}

impl ReservationFilter {
    pub fn farmout() -> Self {
        Self {
            farmout_only: true,
            ..Self::default()
        }
    }

    pub fn with_status(status: FarmoutStatus) -> Self {
        Self {
            status: Some(status),
            farmout_only: true,
            ..Self::default()
        }
    }

    pub fn matches(&self, reservation: &Reservation) -> bool {
        if self.farmout_only && !reservation.is_farmed_out() {
            return false;
        }
        if let Some(status) = self.status
            && reservation.farmout_status != Some(status)
        {
            return false;
        }
        if let Some(mode) = self.mode
            && reservation.farmout_mode != mode
        {
            return false;
        }
        true
    }
}

/// Storage for reservations and the driver roster.
///
/// `update_reservation_fields` is atomic per call: the precondition check and
/// every listed field land together or not at all. Updates to one
/// reservation are last-write-wins per field; different reservations are
/// independent.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Returns `None` if the reservation does not exist.
    async fn get_reservation(&self, id: &str) -> Result<Option<Reservation>, StoreError>;

    async fn list_reservations(
        &self,
        filter: &ReservationFilter,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// Applies `patch` and returns the record as written.
    ///
    /// Fails with [`StoreError::PreconditionFailed`] if the patch carries a
    /// precondition that no longer holds.
    async fn update_reservation_fields(
        &self,
        id: &str,
        patch: ReservationPatch,
    ) -> Result<Reservation, StoreError>;

    async fn list_available_drivers(&self) -> Result<Vec<Driver>, StoreError>;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn patch_sets_and_clears_fields() {
        let mut r = Reservation::new("r-1");
        let offer = CurrentOffer::new("d-1", Duration::from_secs(60), Utc::now());
        ReservationPatch::default()
            .status(Some(FarmoutStatus::Offered))
            .offer(Some(offer.clone()))
            .apply_to(&mut r, Utc::now());
        assert_eq!(r.farmout_status, Some(FarmoutStatus::Offered));
        assert_eq!(r.current_offer, Some(offer));

        let assignment = Assignment::new("d-1", "v-1").unwrap();
        ReservationPatch::default()
            .status(Some(FarmoutStatus::Assigned))
            .offer(None)
            .assignment(Some(assignment))
            .apply_to(&mut r, Utc::now());
        assert!(r.current_offer.is_none());
        assert_eq!(r.assigned_driver_id.as_deref(), Some("d-1"));
        assert_eq!(r.assigned_vehicle_id.as_deref(), Some("v-1"));
        assert!(r.check_invariants().is_ok());
    }

    #[test]
    fn untouched_fields_survive() {
        let mut r = Reservation::new("r-1");
        r.farmout_mode = FarmoutMode::Automatic;
        ReservationPatch::default()
            .status(Some(FarmoutStatus::Declined))
            .apply_to(&mut r, Utc::now());
        assert_eq!(r.farmout_mode, FarmoutMode::Automatic);
    }

    #[test]
    fn precondition_tracks_offer_identity() {
        let mut r = Reservation::new("r-1");
        r.farmout_status = Some(FarmoutStatus::Offered);
        r.current_offer = Some(CurrentOffer::new("d-1", Duration::from_secs(5), Utc::now()));
        let seen = Precondition::observed(&r);
        assert!(seen.holds_for(&r));

        r.current_offer = Some(CurrentOffer::new("d-1", Duration::from_secs(5), Utc::now()));
        assert!(!seen.holds_for(&r));
    }

    #[test]
    fn filter_matching() {
        let farmed = Reservation::new("r-1");
        let in_house = Reservation::in_house("r-2");
        assert!(ReservationFilter::default().matches(&in_house));
        assert!(!ReservationFilter::farmout().matches(&in_house));
        assert!(ReservationFilter::farmout().matches(&farmed));
        assert!(ReservationFilter::with_status(FarmoutStatus::Unassigned).matches(&farmed));
        assert!(!ReservationFilter::with_status(FarmoutStatus::Offered).matches(&farmed));

        let filter = ReservationFilter {
            mode: Some(FarmoutMode::Automatic),
            ..ReservationFilter::default()
        };
        assert!(!filter.matches(&farmed));
    }
}

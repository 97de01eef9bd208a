//! In-memory [`ReservationStore`] for tests and the demo binary.
//!
//! Not durable. Two knobs make races and outages reproducible: a fixed
//! latency slept before every call, and a count of upcoming updates to fail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{Precondition, ReservationFilter, ReservationPatch, ReservationStore};
use crate::error::StoreError;
use crate::state_machine::{Driver, DriverAvailability, Reservation};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    reservations: RwLock<HashMap<String, Reservation>>,
    drivers: RwLock<Vec<Driver>>,
    latency: Option<Duration>,
    failing_updates: AtomicU32,
}

fn poison_err<T>(_: PoisonError<T>) -> StoreError {
    StoreError::LockPoisoned
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `latency` before touching state, so concurrent
    /// callers interleave at each store call.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub fn insert_reservation(&self, reservation: Reservation) -> Result<(), StoreError> {
        let mut reservations = self.reservations.write().map_err(poison_err)?;
        reservations.insert(reservation.id.clone(), reservation);
        Ok(())
    }

    pub fn insert_driver(&self, driver: Driver) -> Result<(), StoreError> {
        let mut drivers = self.drivers.write().map_err(poison_err)?;
        drivers.retain(|d| d.id != driver.id);
        drivers.push(driver);
        Ok(())
    }

    pub fn set_driver_availability(
        &self,
        driver_id: &str,
        availability: DriverAvailability,
    ) -> Result<(), StoreError> {
        let mut drivers = self.drivers.write().map_err(poison_err)?;
        if let Some(driver) = drivers.iter_mut().find(|d| d.id == driver_id) {
            driver.availability = availability;
        }
        Ok(())
    }

    /// The next `count` calls to `update_reservation_fields` fail with
    /// [`StoreError::Unavailable`] without writing anything.
    pub fn fail_next_updates(&self, count: u32) {
        self.failing_updates.store(count, Ordering::SeqCst);
    }

    /// Reads a record without simulated latency.
    pub fn snapshot(&self, id: &str) -> Result<Option<Reservation>, StoreError> {
        let reservations = self.reservations.read().map_err(poison_err)?;
        Ok(reservations.get(id).cloned())
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn get_reservation(&self, id: &str) -> Result<Option<Reservation>, StoreError> {
        self.simulate_latency().await;
        self.snapshot(id)
    }

    async fn list_reservations(
        &self,
        filter: &ReservationFilter,
    ) -> Result<Vec<Reservation>, StoreError> {
        self.simulate_latency().await;
        let mut matching: Vec<Reservation> = {
            let reservations = self.reservations.read().map_err(poison_err)?;
            reservations
                .values()
                .filter(|r| filter.matches(r))
                .cloned()
                .collect()
        };
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching)
    }

    async fn update_reservation_fields(
        &self,
        id: &str,
        patch: ReservationPatch,
    ) -> Result<Reservation, StoreError> {
        self.simulate_latency().await;
        if self.take_injected_failure() {
            return Err(StoreError::Unavailable("injected update failure".into()));
        }

        let mut reservations = self.reservations.write().map_err(poison_err)?;
        let Some(reservation) = reservations.get_mut(id) else {
            return Err(StoreError::NotFound(id.to_string()));
        };

        if let Some(expected) = patch.precondition
            && !expected.holds_for(reservation)
        {
            let actual = Precondition::observed(reservation);
            return Err(StoreError::PreconditionFailed {
                reservation_id: id.to_string(),
                actual_status: actual.status,
                actual_offer: actual.offer_id,
            });
        }

        patch.apply_to(reservation, Utc::now());
        Ok(reservation.clone())
    }

    async fn list_available_drivers(&self) -> Result<Vec<Driver>, StoreError> {
        self.simulate_latency().await;
        let drivers = self.drivers.read().map_err(poison_err)?;
        Ok(drivers.iter().filter(|d| d.is_available()).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::FarmoutStatus;

    fn store_with(reservation: Reservation) -> InMemoryStore {
        let store = InMemoryStore::new();
        store.insert_reservation(reservation).unwrap();
        store
    }

    #[tokio::test]
    async fn get_missing_reservation_is_none() {
        let store = InMemoryStore::new();
        assert_eq!(store.get_reservation("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn update_applies_patch() {
        let store = store_with(Reservation::new("r-1"));
        let written = store
            .update_reservation_fields(
                "r-1",
                ReservationPatch::default().status(Some(FarmoutStatus::Declined)),
            )
            .await
            .unwrap();
        assert_eq!(written.farmout_status, Some(FarmoutStatus::Declined));
        let stored = store.snapshot("r-1").unwrap().unwrap();
        assert_eq!(stored, written);
    }

    #[tokio::test]
    async fn stale_precondition_is_rejected_without_writing() {
        let store = store_with(Reservation::new("r-1"));
        let seen = Precondition::observed(&store.snapshot("r-1").unwrap().unwrap());

        store
            .update_reservation_fields(
                "r-1",
                ReservationPatch::guarded(seen).status(Some(FarmoutStatus::Declined)),
            )
            .await
            .unwrap();

        let err = store
            .update_reservation_fields(
                "r-1",
                ReservationPatch::guarded(seen).status(Some(FarmoutStatus::Cancelled)),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::PreconditionFailed {
                reservation_id: "r-1".into(),
                actual_status: Some(FarmoutStatus::Declined),
                actual_offer: None,
            }
        );
        assert_eq!(
            store.snapshot("r-1").unwrap().unwrap().farmout_status,
            Some(FarmoutStatus::Declined)
        );
    }

    #[tokio::test]
    async fn injected_failures_write_nothing() {
        let store = store_with(Reservation::new("r-1"));
        store.fail_next_updates(1);
        let err = store
            .update_reservation_fields(
                "r-1",
                ReservationPatch::default().status(Some(FarmoutStatus::Cancelled)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(
            store.snapshot("r-1").unwrap().unwrap().farmout_status,
            Some(FarmoutStatus::Unassigned)
        );

        // Only one failure was injected.
        store
            .update_reservation_fields(
                "r-1",
                ReservationPatch::default().status(Some(FarmoutStatus::Cancelled)),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn update_missing_reservation() {
        let store = InMemoryStore::new();
        let err = store
            .update_reservation_fields("ghost", ReservationPatch::default())
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound("ghost".into()));
    }

    #[tokio::test]
    async fn lists_only_available_drivers() {
        let store = InMemoryStore::new();
        store.insert_driver(Driver::new("d-1", "Ana")).unwrap();
        store.insert_driver(Driver::new("d-2", "Ben")).unwrap();
        store
            .set_driver_availability("d-2", DriverAvailability::Unavailable)
            .unwrap();
        let drivers = store.list_available_drivers().await.unwrap();
        assert_eq!(drivers.len(), 1);
        assert_eq!(drivers[0].id, "d-1");
    }

    #[tokio::test]
    async fn list_filters_and_sorts() {
        let store = InMemoryStore::new();
        store.insert_reservation(Reservation::new("r-2")).unwrap();
        store.insert_reservation(Reservation::new("r-1")).unwrap();
        store.insert_reservation(Reservation::in_house("r-3")).unwrap();

        let all = store
            .list_reservations(&ReservationFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let farmed: Vec<_> = store
            .list_reservations(&ReservationFilter::farmout())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(farmed, vec!["r-1", "r-2"]);
    }
}

use super::Dispatcher;
use crate::error::Result;
use crate::state_machine::{Assignment, FarmoutEvent, Reservation};
use crate::store::ReservationPatch;

impl Dispatcher {
    /// Assigns a driver and vehicle directly, with or without a preceding
    /// offer. Any outstanding offer is dropped in the same write.
    ///
    /// Allowed from `unassigned`, `offered` and `declined`. Both ids are
    /// required; a blank one is rejected before anything is read.
    pub async fn assign(
        &self,
        reservation_id: &str,
        driver_id: &str,
        vehicle_id: &str,
    ) -> Result<Reservation> {
        let assignment = Assignment::new(driver_id, vehicle_id)?;
        let seen = self.load(reservation_id).await?;
        let transition = self.plan(&seen, FarmoutEvent::Assign)?;
        let detail = match &seen.current_offer {
            Some(offer) if offer.driver_id != driver_id => format!(
                "assigned driver {driver_id} with vehicle {vehicle_id}, offer to driver {} withdrawn",
                offer.driver_id
            ),
            _ => format!("assigned driver {driver_id} with vehicle {vehicle_id}"),
        };
        self.commit(
            &seen,
            transition,
            ReservationPatch::default()
                .offer(None)
                .assignment(Some(assignment)),
            detail,
        )
        .await
    }

    /// Drops the driver and vehicle and puts the reservation back to
    /// `unassigned`. Allowed from `assigned` through `passenger_onboard`.
    pub async fn clear_assignment(&self, reservation_id: &str) -> Result<Reservation> {
        let seen = self.load(reservation_id).await?;
        let transition = self.plan(&seen, FarmoutEvent::ClearAssignment)?;
        let detail = match seen.assignment() {
            Some(previous) => format!(
                "driver {} and vehicle {} unassigned",
                previous.driver_id, previous.vehicle_id
            ),
            None => "assignment cleared".to_string(),
        };
        self.commit(
            &seen,
            transition,
            ReservationPatch::default().assignment(None),
            detail,
        )
        .await
    }
}

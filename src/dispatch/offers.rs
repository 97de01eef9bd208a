//! Offer lifecycle: send, expire, cancel, resend, accept and decline.
//!
//! A reservation holds at most one offer. Every offer gets a fresh
//! `offer_id`; expiry is keyed on it, so a countdown armed for an old offer
//! can never expire the one that replaced it.

use std::time::Duration;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::Dispatcher;
use crate::error::{DispatchError, Result};
use crate::state_machine::{Assignment, CurrentOffer, FarmoutEvent, Reservation};
use crate::status::FarmoutStatus;
use crate::store::ReservationPatch;

impl Dispatcher {
    /// Offers the trip to `driver_id` until `ttl` elapses.
    ///
    /// Allowed from `unassigned` and `declined`. Fails with
    /// `OfferAlreadyActive` while another offer is outstanding and with
    /// `DriverUnavailable` if the roster does not list the driver as
    /// available; neither writes anything.
    pub async fn send_offer(
        &self,
        reservation_id: &str,
        driver_id: &str,
        ttl: Duration,
    ) -> Result<Reservation> {
        let seen = self.load(reservation_id).await?;
        let transition = self
            .plan(&seen, FarmoutEvent::SendOffer)
            .map_err(offer_conflict)?;
        self.ensure_driver_available(driver_id).await?;

        let offer = CurrentOffer::new(driver_id, ttl, Utc::now());
        let detail = format!(
            "offer sent to driver {driver_id}, expires {}",
            offer.expires_at.format("%H:%M:%S")
        );
        let written = self
            .commit(
                &seen,
                transition,
                ReservationPatch::default().offer(Some(offer.clone())),
                detail,
            )
            .await
            .map_err(offer_conflict)?;
        self.arm_countdown(reservation_id, &offer);
        Ok(written)
    }

    /// Withdraws the outstanding offer and returns the reservation to
    /// `unassigned`.
    pub async fn cancel_offer(&self, reservation_id: &str) -> Result<Reservation> {
        let seen = self.load(reservation_id).await?;
        let transition = self
            .plan(&seen, FarmoutEvent::CancelOffer)
            .map_err(offer_conflict)?;
        let driver_id = offer_driver(&seen);
        self.commit(
            &seen,
            transition,
            ReservationPatch::default().offer(None),
            format!("offer to driver {driver_id} cancelled"),
        )
        .await
        .map_err(offer_conflict)
    }

    /// Cancels the outstanding offer and immediately sends a fresh one, to
    /// `driver_id` or, when `None`, to the same driver.
    ///
    /// Both halves land in a single write, so no observer ever sees the
    /// reservation `unassigned` in between.
    pub async fn resend_offer(
        &self,
        reservation_id: &str,
        driver_id: Option<&str>,
        ttl: Duration,
    ) -> Result<Reservation> {
        let seen = self.load(reservation_id).await?;
        let transition = self
            .plan(&seen, FarmoutEvent::ResendOffer)
            .map_err(offer_conflict)?;
        let previous_driver = offer_driver(&seen);
        let driver_id = driver_id.unwrap_or(previous_driver);
        self.ensure_driver_available(driver_id).await?;

        let offer = CurrentOffer::new(driver_id, ttl, Utc::now());
        let detail = format!(
            "offer to driver {previous_driver} withdrawn, resent to driver {driver_id}, expires {}",
            offer.expires_at.format("%H:%M:%S")
        );
        let written = self
            .commit(
                &seen,
                transition,
                ReservationPatch::default().offer(Some(offer.clone())),
                detail,
            )
            .await
            .map_err(offer_conflict)?;
        self.arm_countdown(reservation_id, &offer);
        Ok(written)
    }

    /// Expires the offer identified by `offer_id`. Normally invoked by the
    /// countdown; a replaced or resolved offer yields `NoActiveOffer`.
    pub async fn expire_offer(&self, reservation_id: &str, offer_id: Uuid) -> Result<Reservation> {
        let seen = self.load(reservation_id).await?;
        let current = seen.current_offer.as_ref().map(|o| o.offer_id);
        if current != Some(offer_id) {
            return Err(DispatchError::NoActiveOffer(reservation_id.to_string()));
        }
        let transition = self
            .plan(&seen, FarmoutEvent::OfferExpires)
            .map_err(offer_conflict)?;
        let driver_id = offer_driver(&seen);
        info!(reservation_id, driver_id, "offer expired");
        self.commit(
            &seen,
            transition,
            ReservationPatch::default().offer(None),
            format!("offer to driver {driver_id} expired without a response"),
        )
        .await
        .map_err(offer_conflict)
    }

    /// The offered driver takes the trip with `vehicle_id`.
    pub async fn driver_accepts(
        &self,
        reservation_id: &str,
        driver_id: &str,
        vehicle_id: &str,
    ) -> Result<Reservation> {
        let assignment = Assignment::new(driver_id, vehicle_id)?;
        let seen = self.load(reservation_id).await?;
        let transition = self
            .plan(&seen, FarmoutEvent::DriverAccepts)
            .map_err(offer_conflict)?;
        ensure_offered_to(&seen, driver_id)?;
        self.commit(
            &seen,
            transition,
            ReservationPatch::default()
                .offer(None)
                .assignment(Some(assignment)),
            format!("driver {driver_id} accepted with vehicle {vehicle_id}"),
        )
        .await
        .map_err(offer_conflict)
    }

    /// The offered driver turns the trip down.
    pub async fn driver_declines(&self, reservation_id: &str, driver_id: &str) -> Result<Reservation> {
        let seen = self.load(reservation_id).await?;
        let transition = self
            .plan(&seen, FarmoutEvent::DriverDeclines)
            .map_err(offer_conflict)?;
        ensure_offered_to(&seen, driver_id)?;
        self.commit(
            &seen,
            transition,
            ReservationPatch::default().offer(None),
            format!("driver {driver_id} declined"),
        )
        .await
        .map_err(offer_conflict)
    }

    async fn ensure_driver_available(&self, driver_id: &str) -> Result<()> {
        let drivers = self.inner.store.list_available_drivers().await?;
        if drivers.iter().any(|d| d.id == driver_id && d.is_available()) {
            Ok(())
        } else {
            Err(DispatchError::DriverUnavailable(driver_id.to_string()))
        }
    }
}

fn offer_driver(reservation: &Reservation) -> &str {
    reservation
        .current_offer
        .as_ref()
        .map_or("unknown", |offer| offer.driver_id.as_str())
}

fn ensure_offered_to(reservation: &Reservation, driver_id: &str) -> Result<()> {
    match &reservation.current_offer {
        Some(offer) if offer.driver_id == driver_id => Ok(()),
        Some(_) => Err(DispatchError::OfferNotForDriver {
            reservation_id: reservation.id.clone(),
            driver_id: driver_id.to_string(),
        }),
        None => Err(DispatchError::NoActiveOffer(reservation.id.clone())),
    }
}

/// Narrows a rejected offer event to the offer-specific error callers expect.
fn offer_conflict(err: DispatchError) -> DispatchError {
    match err {
        DispatchError::InvalidTransition {
            reservation_id,
            event: FarmoutEvent::SendOffer,
            from: Some(FarmoutStatus::Offered),
        } => DispatchError::OfferAlreadyActive(reservation_id),
        DispatchError::InvalidTransition {
            reservation_id,
            event,
            from,
        } if needs_offer(event) && from != Some(FarmoutStatus::Offered) => {
            DispatchError::NoActiveOffer(reservation_id)
        }
        other => other,
    }
}

fn needs_offer(event: FarmoutEvent) -> bool {
    matches!(
        event,
        FarmoutEvent::CancelOffer
            | FarmoutEvent::ResendOffer
            | FarmoutEvent::OfferExpires
            | FarmoutEvent::DriverAccepts
            | FarmoutEvent::DriverDeclines
    )
}

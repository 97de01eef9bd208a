//! The farm-out controller.
//!
//! [`Dispatcher`] is the only thing allowed to mutate a reservation's farm-out
//! facet. Every entry point follows the same read-check-write discipline:
//!
//! 1. read the reservation fresh from the store,
//! 2. look the event up in [`StateMachine`],
//! 3. write the patch together with a [`Precondition`] built from what was
//!    read, so a commit based on a stale read fails instead of clobbering a
//!    newer state,
//! 4. only after the write lands, append the activity entry, disarm or arm
//!    countdowns and consult the automation gate.
//!
//! No lock is held across a store call. Offer entry points live in
//! [`offers`](self::offers), assignment in [`assignment`](self::assignment).

mod assignment;
mod automation;
mod offers;
mod timers;


use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::activity::ActivityLog;
use crate::config::DispatchConfig;
use crate::error::{DispatchError, Result, StoreError};
use crate::state_machine::{FarmoutEvent, ProgressStep, Reservation, StateMachine, Transition};
use crate::status::{CanonicalStatus, FarmoutMode, FarmoutStatus};
use crate::store::{Precondition, ReservationFilter, ReservationPatch, ReservationStore};

pub use automation::{AutomationTrigger, NoopAutomation};

use automation::AutomationGate;
use timers::OfferTimers;

/// Countdown state of a reservation's current offer, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfferCountdown {
    pub reservation_id: String,
    pub driver_id: String,
    pub sent_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remaining: Duration,
}

/// Farm-out state machine controller. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn ReservationStore>,
    automation: Arc<dyn AutomationTrigger>,
    activity: ActivityLog,
    gate: Mutex<AutomationGate>,
    timers: OfferTimers,
    expiry_retry: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        automation: Arc<dyn AutomationTrigger>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                automation,
                activity: ActivityLog::new(config.activity_display_limit),
                gate: Mutex::new(AutomationGate::default()),
                timers: OfferTimers::default(),
                expiry_retry: config.expiry_retry(),
            }),
        }
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.inner.activity
    }

    pub fn store(&self) -> &Arc<dyn ReservationStore> {
        &self.inner.store
    }

    // ── Read model ──

    pub async fn reservation(&self, id: &str) -> Result<Reservation> {
        self.load(id).await
    }

    pub async fn canonical_status(&self, id: &str) -> Result<CanonicalStatus> {
        Ok(self.load(id).await?.farmout_status.into())
    }

    /// Reservations shown on farm-out screens. In-house reservations are
    /// never included.
    pub async fn farmout_view(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>> {
        let filter = ReservationFilter {
            farmout_only: true,
            ..filter.clone()
        };
        Ok(self.inner.store.list_reservations(&filter).await?)
    }

    pub async fn offer_countdown(&self, id: &str) -> Result<Option<OfferCountdown>> {
        let reservation = self.load(id).await?;
        let now = Utc::now();
        Ok(reservation.current_offer.map(|offer| OfferCountdown {
            reservation_id: reservation.id,
            remaining: offer.remaining(now),
            driver_id: offer.driver_id,
            sent_at: offer.sent_at,
            expires_at: offer.expires_at,
        }))
    }

    /// Whether a countdown is currently armed for the reservation.
    pub fn has_armed_countdown(&self, id: &str) -> bool {
        self.inner.timers.is_armed(id)
    }

    // ── Workflow membership ──

    /// Moves an in-house reservation into the farm-out workflow as `unassigned`.
    pub async fn switch_to_farm_out(&self, id: &str) -> Result<Reservation> {
        let seen = self.load(id).await?;
        let transition = self.plan(&seen, FarmoutEvent::SwitchToFarmOut)?;
        let patch = ReservationPatch::default().offer(None).assignment(None);
        self.commit(&seen, transition, patch, "moved to farm-out".to_string())
            .await
    }

    /// Takes a reservation out of the farm-out workflow, dropping any offer
    /// and assignment.
    pub async fn switch_to_in_house(&self, id: &str) -> Result<Reservation> {
        let seen = self.load(id).await?;
        let transition = self.plan(&seen, FarmoutEvent::SwitchToInHouse)?;
        let patch = ReservationPatch::default().offer(None).assignment(None);
        self.commit(&seen, transition, patch, "returned to in-house dispatch".to_string())
            .await
    }

    // ── Mode ──

    /// Switches between manual and automatic dispatch.
    ///
    /// Never changes the status. Switching to automatic while the reservation
    /// is waiting for a driver hands it to the automation trigger; switching
    /// to manual withdraws it from automation.
    pub async fn set_mode(&self, id: &str, mode: FarmoutMode) -> Result<Reservation> {
        let seen = self.load(id).await?;
        if seen.farmout_mode == mode {
            return Ok(seen);
        }
        let written = self
            .inner
            .store
            .update_reservation_fields(id, ReservationPatch::default().mode(mode))
            .await
            .inspect_err(|err| warn!(reservation_id = id, error = %err, "mode switch failed"))?;
        info!(reservation_id = id, from = %seen.farmout_mode, to = %mode, "dispatch mode switched");
        self.inner.activity.record_note(
            id,
            format!("dispatch mode {} -> {}", seen.farmout_mode, mode),
        );
        self.after_commit(&written);
        Ok(written)
    }

    // ── Trip progress ──

    /// Advances trip progress by exactly one step.
    pub async fn advance(&self, id: &str, step: ProgressStep) -> Result<Reservation> {
        let seen = self.load(id).await?;
        let transition = self.plan(&seen, step.event())?;
        let detail = format!("trip {}", step.status().label().to_lowercase());
        self.commit(&seen, transition, ReservationPatch::default(), detail)
            .await
    }

    /// Cancels the trip from any non-terminal state.
    pub async fn cancel_trip(&self, id: &str) -> Result<Reservation> {
        let seen = self.load(id).await?;
        let transition = self.plan(&seen, FarmoutEvent::CancelTrip)?;
        let patch = ReservationPatch::default().offer(None).assignment(None);
        self.commit(&seen, transition, patch, "trip cancelled".to_string())
            .await
    }

    pub async fn mark_no_show(&self, id: &str) -> Result<Reservation> {
        let seen = self.load(id).await?;
        let transition = self.plan(&seen, FarmoutEvent::MarkNoShow)?;
        let patch = ReservationPatch::default().assignment(None);
        self.commit(&seen, transition, patch, "passenger did not show".to_string())
            .await
    }

    // ── Recovery ──

    /// Re-arms countdowns for every persisted `offered` reservation, e.g.
    /// after a restart. Offers whose deadline already passed expire at once.
    /// Automatic reservations still waiting for a driver go back to the
    /// automation gate. Returns the number of countdowns armed.
    pub async fn restore_timers(&self) -> Result<usize> {
        let offered = self
            .inner
            .store
            .list_reservations(&ReservationFilter::with_status(FarmoutStatus::Offered))
            .await?;
        let mut armed = 0;
        for reservation in offered {
            match &reservation.current_offer {
                Some(offer) => {
                    self.arm_countdown(&reservation.id, offer);
                    armed += 1;
                }
                None => warn!(
                    reservation_id = %reservation.id,
                    "offered reservation has no offer; countdown not restored"
                ),
            }
        }
        info!(count = armed, "offer countdowns restored");

        let automatic = ReservationFilter {
            mode: Some(FarmoutMode::Automatic),
            ..ReservationFilter::farmout()
        };
        let waiting: Vec<Reservation> = self
            .inner
            .store
            .list_reservations(&automatic)
            .await?
            .into_iter()
            .filter(Reservation::is_automation_eligible)
            .collect();
        for reservation in &waiting {
            self.update_automation(reservation);
        }
        if !waiting.is_empty() {
            info!(count = waiting.len(), "automatic dispatch restored");
        }
        Ok(armed)
    }

    // ── Commit discipline ──

    async fn load(&self, id: &str) -> Result<Reservation> {
        self.inner
            .store
            .get_reservation(id)
            .await?
            .ok_or_else(|| DispatchError::ReservationNotFound(id.to_string()))
    }

    /// Looks `event` up for the freshly read reservation.
    fn plan(&self, seen: &Reservation, event: FarmoutEvent) -> Result<Transition> {
        StateMachine::next(seen.farmout_status, event)
            .ok_or_else(|| reject(&seen.id, event, seen.farmout_status))
    }

    /// Writes `patch` plus the transition's destination, guarded by what was
    /// read. Nothing else happens unless the write lands.
    async fn commit(
        &self,
        seen: &Reservation,
        transition: Transition,
        patch: ReservationPatch,
        detail: String,
    ) -> Result<Reservation> {
        let patch = ReservationPatch {
            precondition: Some(Precondition::observed(seen)),
            farmout_status: Some(transition.to),
            ..patch
        };

        let written = match self
            .inner
            .store
            .update_reservation_fields(&seen.id, patch)
            .await
        {
            Ok(written) => written,
            Err(StoreError::PreconditionFailed { actual_status, .. }) => {
                return Err(reject(&seen.id, transition.event, actual_status));
            }
            Err(err) => {
                warn!(
                    reservation_id = %seen.id,
                    event = %transition.event,
                    error = %err,
                    "store write failed; transition not applied"
                );
                return Err(err.into());
            }
        };

        info!(
            reservation_id = %seen.id,
            event = %transition.event,
            from = ?transition.from,
            to = ?transition.to,
            "farm-out transition committed"
        );
        self.inner
            .activity
            .record_transition(&seen.id, transition, format!("{transition}: {detail}"));
        self.after_commit(&written);
        Ok(written)
    }

    /// Side effects that follow every successful write.
    fn after_commit(&self, written: &Reservation) {
        if written.current_offer.is_none() && self.inner.timers.disarm(&written.id) {
            debug!(reservation_id = %written.id, "offer countdown stopped");
        }
        self.update_automation(written);
    }

    fn gate(&self) -> MutexGuard<'_, AutomationGate> {
        self.inner.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builds the rejection for an event that is not legal from `from`.
fn reject(id: &str, event: FarmoutEvent, from: Option<FarmoutStatus>) -> DispatchError {
    warn!(
        reservation_id = id,
        event = %event,
        from = ?from,
        "farm-out transition rejected"
    );
    DispatchError::InvalidTransition {
        reservation_id: id.to_string(),
        event,
        from,
    }
}

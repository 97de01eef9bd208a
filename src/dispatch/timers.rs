use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};
use uuid::Uuid;

use super::Dispatcher;
use crate::error::DispatchError;
use crate::state_machine::CurrentOffer;

#[derive(Debug)]
struct ArmedCountdown {
    offer_id: Uuid,
    sent_at: DateTime<Utc>,
    handle: AbortHandle,
}

/// One countdown task per reservation with an outstanding offer.
#[derive(Debug, Default)]
pub(crate) struct OfferTimers {
    armed: Mutex<HashMap<String, ArmedCountdown>>,
}

impl OfferTimers {
    /// Spawns a countdown for the offer sent at `sent_at`, replacing and
    /// aborting an older one for the reservation. A countdown for a newer
    /// offer is left alone and nothing is spawned; returns whether it armed.
    ///
    /// The map stays locked while spawning so the task cannot finish before
    /// it is registered.
    pub(crate) fn arm(
        &self,
        reservation_id: &str,
        offer_id: Uuid,
        sent_at: DateTime<Utc>,
        spawn: impl FnOnce() -> JoinHandle<()>,
    ) -> bool {
        let mut armed = self.lock();
        if let Some(current) = armed.get(reservation_id)
            && current.offer_id != offer_id
            && current.sent_at > sent_at
        {
            return false;
        }
        let handle = spawn().abort_handle();
        let countdown = ArmedCountdown {
            offer_id,
            sent_at,
            handle,
        };
        if let Some(previous) = armed.insert(reservation_id.to_string(), countdown) {
            previous.handle.abort();
        }
        true
    }

    /// Stops the reservation's countdown. Returns whether one was armed.
    pub(crate) fn disarm(&self, reservation_id: &str) -> bool {
        match self.lock().remove(reservation_id) {
            Some(countdown) => {
                countdown.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Called by a countdown when its deadline passes. Unregisters it and
    /// reports whether it is still the current countdown for the reservation.
    pub(crate) fn claim(&self, reservation_id: &str, offer_id: Uuid) -> bool {
        let mut armed = self.lock();
        match armed.get(reservation_id) {
            Some(countdown) if countdown.offer_id == offer_id => {
                armed.remove(reservation_id);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn is_armed(&self, reservation_id: &str) -> bool {
        self.lock().contains_key(reservation_id)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ArmedCountdown>> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Dispatcher {
    /// Arms the countdown for `offer`. The wait is recomputed from the
    /// persisted deadline, so this also restores countdowns after a reload.
    pub(super) fn arm_countdown(&self, reservation_id: &str, offer: &CurrentOffer) {
        let this = self.clone();
        let id = reservation_id.to_string();
        let offer_id = offer.offer_id;
        let expires_at = offer.expires_at;
        let armed = self.inner.timers.arm(reservation_id, offer_id, offer.sent_at, move || {
            tokio::spawn(async move { this.run_countdown(id, offer_id, expires_at).await })
        });
        if !armed {
            debug!(reservation_id, %offer_id, "newer offer already counting down");
            return;
        }
        debug!(
            reservation_id,
            %offer_id,
            %expires_at,
            "offer countdown armed"
        );
    }

    async fn run_countdown(self, id: String, offer_id: Uuid, expires_at: DateTime<Utc>) {
        let remaining = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(remaining).await;

        if !self.inner.timers.claim(&id, offer_id) {
            return;
        }

        loop {
            match self.expire_offer(&id, offer_id).await {
                Ok(_) => return,
                Err(err) if err.is_benign_race() => {
                    debug!(reservation_id = %id, error = %err, "offer resolved before expiry");
                    return;
                }
                Err(DispatchError::ReservationNotFound(_)) => {
                    warn!(reservation_id = %id, "reservation vanished before its offer expired");
                    return;
                }
                Err(err) => {
                    warn!(
                        reservation_id = %id,
                        error = %err,
                        retry_in_ms = self.inner.expiry_retry.as_millis() as u64,
                        "offer expiry failed; retrying"
                    );
                    tokio::time::sleep(self.inner.expiry_retry).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_task() -> JoinHandle<()> {
        tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        })
    }

    #[tokio::test]
    async fn arming_replaces_previous_countdown() {
        let timers = OfferTimers::default();
        let now = Utc::now();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        assert!(timers.arm("r-1", first, now, idle_task));
        assert!(timers.arm("r-1", second, now + chrono::Duration::seconds(1), idle_task));

        assert!(!timers.claim("r-1", first));
        assert!(timers.claim("r-1", second));
        assert!(!timers.is_armed("r-1"));
    }

    #[tokio::test]
    async fn late_arm_for_older_offer_keeps_newer_countdown() {
        let timers = OfferTimers::default();
        let now = Utc::now();
        let older = Uuid::new_v4();
        let newer = Uuid::new_v4();
        assert!(timers.arm("r-1", newer, now, idle_task));

        let mut spawned = false;
        let armed = timers.arm("r-1", older, now - chrono::Duration::seconds(5), || {
            spawned = true;
            idle_task()
        });

        assert!(!armed);
        assert!(!spawned);
        assert!(!timers.claim("r-1", older));
        assert!(timers.claim("r-1", newer));
    }

    #[tokio::test]
    async fn disarm_reports_whether_armed() {
        let timers = OfferTimers::default();
        assert!(!timers.disarm("r-1"));
        timers.arm("r-1", Uuid::new_v4(), Utc::now(), idle_task);
        assert!(timers.is_armed("r-1"));
        assert!(timers.disarm("r-1"));
        assert!(!timers.is_armed("r-1"));
    }
}

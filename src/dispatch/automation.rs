use std::collections::VecDeque;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::Dispatcher;
use crate::state_machine::Reservation;
use crate::status::{FarmoutMode, FarmoutStatus};

/// Policy that picks the next driver for a reservation in automatic mode.
///
/// Called fire-and-forget when a reservation becomes eligible. The policy
/// acts through the same [`Dispatcher`] entry points as everyone else, so it
/// must expect `InvalidTransition` when a dispatcher got there first.
#[async_trait]
pub trait AutomationTrigger: Send + Sync {
    async fn reservation_eligible(
        &self,
        reservation_id: &str,
        mode: FarmoutMode,
    ) -> anyhow::Result<()>;
}

/// Trigger that does nothing. For deployments without automatic dispatch.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAutomation;

#[async_trait]
impl AutomationTrigger for NoopAutomation {
    async fn reservation_eligible(
        &self,
        _reservation_id: &str,
        _mode: FarmoutMode,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GateDecision {
    Fire,
    Queued,
    AlreadyQueued,
}

/// Keeps a single reservation as the active automation target. Others wait
/// in arrival order.
#[derive(Debug, Default)]
pub(crate) struct AutomationGate {
    active: Option<String>,
    waiting: VecDeque<String>,
}

impl AutomationGate {
    pub(crate) fn request(&mut self, id: &str) -> GateDecision {
        match &self.active {
            None => {
                self.active = Some(id.to_string());
                GateDecision::Fire
            }
            Some(active) if active == id => GateDecision::Fire,
            Some(_) if self.waiting.iter().any(|w| w == id) => GateDecision::AlreadyQueued,
            Some(_) => {
                self.waiting.push_back(id.to_string());
                GateDecision::Queued
            }
        }
    }

    /// Withdraws `id`. If it was the active target, the next waiting
    /// reservation becomes active and is returned.
    pub(crate) fn release(&mut self, id: &str) -> Option<String> {
        self.waiting.retain(|w| w != id);
        if self.active.as_deref() != Some(id) {
            return None;
        }
        self.active = self.waiting.pop_front();
        self.active.clone()
    }

    pub(crate) fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }
}

impl Dispatcher {
    /// The reservation automation is currently working on, if any.
    pub fn active_automation_target(&self) -> Option<String> {
        self.gate().active().map(str::to_string)
    }

    /// Decides whether a freshly written reservation enters, stays in or
    /// leaves automatic dispatch.
    pub(super) fn update_automation(&self, written: &Reservation) {
        if written.is_automation_eligible() {
            let decision = self.gate().request(&written.id);
            match decision {
                GateDecision::Fire => self.fire_trigger(&written.id, written.farmout_mode),
                GateDecision::Queued => {
                    info!(reservation_id = %written.id, "waiting for automatic dispatch");
                    self.inner
                        .activity
                        .record_note(&written.id, "queued for automatic dispatch");
                }
                GateDecision::AlreadyQueued => {}
            }
            return;
        }

        // An outstanding offer keeps the reservation as the active target.
        let offer_in_flight = written.farmout_mode == FarmoutMode::Automatic
            && written.farmout_status == Some(FarmoutStatus::Offered);
        if offer_in_flight {
            return;
        }

        self.release_automation(&written.id);
    }

    /// Gives up the automation slot held by `reservation_id`, for a policy
    /// that could not act on it. The next waiting reservation is handed the
    /// slot; this one re-enters automatic dispatch on its next commit.
    pub fn release_automation(&self, reservation_id: &str) {
        let next = self.gate().release(reservation_id);
        if next.is_some() {
            self.hand_off(next);
        }
    }

    fn fire_trigger(&self, id: &str, mode: FarmoutMode) {
        info!(reservation_id = id, "automatic dispatch requested");
        self.inner
            .activity
            .record_note(id, format!("automatic dispatch requested ({mode})"));
        let this = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            if let Err(err) = this.inner.automation.reservation_eligible(&id, mode).await {
                warn!(reservation_id = %id, error = %err, "automation trigger failed");
                this.inner
                    .activity
                    .record_note(&id, format!("automatic dispatch failed: {err}"));
                this.release_automation(&id);
            }
        });
    }

    /// Promotes waiting reservations until one is still eligible.
    fn hand_off(&self, mut next: Option<String>) {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(id) = next.take() {
                match this.inner.store.get_reservation(&id).await {
                    Ok(Some(reservation)) if reservation.is_automation_eligible() => {
                        this.fire_trigger(&reservation.id, reservation.farmout_mode);
                    }
                    Ok(_) => {
                        debug!(reservation_id = %id, "no longer eligible for automatic dispatch");
                        next = this.gate().release(&id);
                    }
                    Err(err) => {
                        warn!(reservation_id = %id, error = %err, "could not load next automation target");
                        next = this.gate().release(&id);
                    }
                }
            }
        });
    }
}

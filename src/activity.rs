//! Append-only audit trail of farm-out transitions.
//!
//! Entries are appended in commit order and never mutated. Dispatcher views
//! read the most recent [`ActivityLog::display_limit`] entries or subscribe to
//! new ones as they are committed.

use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::state_machine::Transition;

const SUBSCRIBER_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: Uuid,
    pub reservation_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Set for entries produced by a committed transition.
    #[serde(default)]
    pub transition: Option<Transition>,
}

#[derive(Debug)]
pub struct ActivityLog {
    entries: RwLock<Vec<ActivityLogEntry>>,
    display_limit: usize,
    sender: broadcast::Sender<ActivityLogEntry>,
}

impl ActivityLog {
    pub fn new(display_limit: usize) -> Self {
        let (sender, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            entries: RwLock::new(Vec::new()),
            display_limit,
            sender,
        }
    }

    pub fn display_limit(&self) -> usize {
        self.display_limit
    }

    /// Records a committed transition.
    pub fn record_transition(
        &self,
        reservation_id: &str,
        transition: Transition,
        message: impl Into<String>,
    ) -> ActivityLogEntry {
        self.push(reservation_id, message.into(), Some(transition))
    }

    /// Records a note that is not itself a transition, such as an automation
    /// hand-off.
    pub fn record_note(&self, reservation_id: &str, message: impl Into<String>) -> ActivityLogEntry {
        self.push(reservation_id, message.into(), None)
    }

    fn push(
        &self,
        reservation_id: &str,
        message: String,
        transition: Option<Transition>,
    ) -> ActivityLogEntry {
        let entry = ActivityLogEntry {
            id: Uuid::new_v4(),
            reservation_id: reservation_id.to_string(),
            message,
            timestamp: Utc::now(),
            transition,
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        // No subscribers is fine.
        let _ = self.sender.send(entry.clone());
        entry
    }

    /// New entries as they are appended.
    pub fn subscribe(&self) -> broadcast::Receiver<ActivityLogEntry> {
        self.sender.subscribe()
    }

    /// The most recent entries up to the display limit, oldest first.
    pub fn recent(&self) -> Vec<ActivityLogEntry> {
        let entries = self.read();
        let skip = entries.len().saturating_sub(self.display_limit);
        entries[skip..].to_vec()
    }

    /// Every entry for one reservation, ordered by timestamp.
    pub fn for_reservation(&self, reservation_id: &str) -> Vec<ActivityLogEntry> {
        let mut matching: Vec<ActivityLogEntry> = self
            .read()
            .iter()
            .filter(|e| e.reservation_id == reservation_id)
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.timestamp);
        matching
    }

    /// Every entry, ordered by timestamp.
    pub fn all(&self) -> Vec<ActivityLogEntry> {
        let mut entries = self.read().clone();
        entries.sort_by_key(|e| e.timestamp);
        entries
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<ActivityLogEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{FarmoutEvent, StateMachine};
    use crate::status::FarmoutStatus;

    fn offer_transition() -> Transition {
        StateMachine::next(Some(FarmoutStatus::Unassigned), FarmoutEvent::SendOffer).unwrap()
    }

    #[test]
    fn entries_are_kept_in_commit_order() {
        let log = ActivityLog::new(10);
        log.record_transition("r-1", offer_transition(), "offer sent");
        log.record_note("r-2", "queued for automation");
        log.record_note("r-1", "second");

        let r1: Vec<_> = log
            .for_reservation("r-1")
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(r1, vec!["offer sent", "second"]);
        assert_eq!(log.len(), 3);
        assert_eq!(log.all()[1].reservation_id, "r-2");
    }

    #[test]
    fn recent_is_capped_to_display_limit() {
        let log = ActivityLog::new(2);
        for i in 0..5 {
            log.record_note("r-1", format!("entry {i}"));
        }
        let recent: Vec<_> = log.recent().into_iter().map(|e| e.message).collect();
        assert_eq!(recent, vec!["entry 3", "entry 4"]);
        assert_eq!(log.all().len(), 5);
    }

    #[test]
    fn transition_entries_carry_the_transition() {
        let log = ActivityLog::default();
        let entry = log.record_transition("r-1", offer_transition(), "offer sent");
        assert_eq!(entry.transition, Some(offer_transition()));
        assert!(log.record_note("r-1", "note").transition.is_none());
    }

    #[tokio::test]
    async fn subscribers_see_new_entries() {
        let log = ActivityLog::default();
        let mut rx = log.subscribe();
        log.record_note("r-1", "hello");
        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.message, "hello");
    }

    #[test]
    fn empty_log() {
        let log = ActivityLog::default();
        assert!(log.is_empty());
        assert!(log.recent().is_empty());
        assert!(log.for_reservation("r-1").is_empty());
    }
}

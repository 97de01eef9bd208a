use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::status::{FarmoutMode, FarmoutStatus, canonicalize_status};

/// Whether a driver can currently take an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverAvailability {
    Available,
    Unavailable,
}

/// A driver from the roster. Read-only to the dispatch engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Driver {
    pub id: String,
    pub name: String,
    pub availability: DriverAvailability,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Driver {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            availability: DriverAvailability::Available,
            phone: None,
            email: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.availability == DriverAvailability::Available
    }
}

/// A driver and vehicle pair. Construction rejects a half-filled pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub driver_id: String,
    pub vehicle_id: String,
}

impl Assignment {
    pub fn new(
        driver_id: impl Into<String>,
        vehicle_id: impl Into<String>,
    ) -> Result<Self, DispatchError> {
        let driver_id = driver_id.into();
        let vehicle_id = vehicle_id.into();
        if driver_id.trim().is_empty() || vehicle_id.trim().is_empty() {
            return Err(DispatchError::IncompleteAssignment);
        }
        Ok(Self {
            driver_id,
            vehicle_id,
        })
    }
}

/// The single time-boxed offer a reservation may carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentOffer {
    /// Distinguishes a resent offer from the one it replaced.
    pub offer_id: Uuid,
    pub driver_id: String,
    pub sent_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CurrentOffer {
    pub fn new(driver_id: impl Into<String>, ttl: Duration, now: DateTime<Utc>) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            offer_id: Uuid::new_v4(),
            driver_id: driver_id.into(),
            sent_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// The farm-out facet of a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    /// `None` while the reservation is dispatched in-house.
    #[serde(default, deserialize_with = "lenient_status")]
    pub farmout_status: Option<FarmoutStatus>,
    #[serde(default)]
    pub farmout_mode: FarmoutMode,
    #[serde(default)]
    pub assigned_driver_id: Option<String>,
    #[serde(default)]
    pub assigned_vehicle_id: Option<String>,
    #[serde(default)]
    pub current_offer: Option<CurrentOffer>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// A fresh farm-out reservation: `unassigned`, manual mode.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            farmout_status: Some(FarmoutStatus::Unassigned),
            farmout_mode: FarmoutMode::Manual,
            assigned_driver_id: None,
            assigned_vehicle_id: None,
            current_offer: None,
            updated_at: Utc::now(),
        }
    }

    /// A reservation dispatched in-house, outside the farm-out workflow.
    pub fn in_house(id: impl Into<String>) -> Self {
        Self {
            farmout_status: None,
            ..Self::new(id)
        }
    }

    pub fn with_mode(mut self, mode: FarmoutMode) -> Self {
        self.farmout_mode = mode;
        self
    }

    pub fn assignment(&self) -> Option<Assignment> {
        match (&self.assigned_driver_id, &self.assigned_vehicle_id) {
            (Some(driver_id), Some(vehicle_id)) => Some(Assignment {
                driver_id: driver_id.clone(),
                vehicle_id: vehicle_id.clone(),
            }),
            _ => None,
        }
    }

    pub fn is_farmed_out(&self) -> bool {
        self.farmout_status.is_some()
    }

    /// Eligible for the automation trigger: automatic mode and waiting for a
    /// driver.
    pub fn is_automation_eligible(&self) -> bool {
        self.farmout_mode == FarmoutMode::Automatic
            && matches!(
                self.farmout_status,
                Some(FarmoutStatus::Unassigned | FarmoutStatus::Declined)
            )
    }

    /// Derives the status the record's facts support.
    ///
    /// An assignment outranks an offer, and an offer outranks a bare
    /// `unassigned`. A stored status that needs facts the record lacks falls
    /// back to `unassigned`. Mode never changes the derived status.
    pub fn derive_status(&self) -> Option<FarmoutStatus> {
        let stored = self.farmout_status;
        if self.assignment().is_some() {
            return match stored {
                Some(status) if status.requires_assignment() => Some(status),
                _ => Some(FarmoutStatus::Assigned),
            };
        }
        if self.current_offer.is_some() {
            return Some(FarmoutStatus::Offered);
        }
        match stored {
            Some(status) if status.requires_assignment() || status.requires_offer() => {
                Some(FarmoutStatus::Unassigned)
            }
            other => other,
        }
    }

    /// Checks the offer and assignment invariants.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.assigned_driver_id.is_some() != self.assigned_vehicle_id.is_some() {
            return Err(InvariantViolation::HalfAssignment);
        }
        let status = self.farmout_status;
        let offer_expected = status.is_some_and(FarmoutStatus::requires_offer);
        if offer_expected != self.current_offer.is_some() {
            return Err(InvariantViolation::OfferMismatch {
                status,
                has_offer: self.current_offer.is_some(),
            });
        }
        let assignment_expected = status.is_some_and(FarmoutStatus::requires_assignment);
        if assignment_expected != self.assigned_driver_id.is_some() {
            return Err(InvariantViolation::AssignmentMismatch {
                status,
                has_assignment: self.assigned_driver_id.is_some(),
            });
        }
        Ok(())
    }
}

/// A broken farm-out invariant found on a stored record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("driver and vehicle are not both set or both cleared")]
    HalfAssignment,

    #[error("status {status:?} does not match offer presence ({has_offer})")]
    OfferMismatch {
        status: Option<FarmoutStatus>,
        has_offer: bool,
    },

    #[error("status {status:?} does not match assignment presence ({has_assignment})")]
    AssignmentMismatch {
        status: Option<FarmoutStatus>,
        has_assignment: bool,
    },
}

/// Accepts any historical spelling; empty and in-house markers read as `None`.
fn lenient_status<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<FarmoutStatus>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    let canonical = canonicalize_status(&raw);
    if canonical.is_empty() {
        return Ok(None);
    }
    canonical.farmout_status().map(Some).ok_or_else(|| {
        serde::de::Error::custom(format!("unknown farm-out status {:?}", canonical.as_str()))
    })
}

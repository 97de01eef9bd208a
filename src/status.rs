//! Canonical farm-out status and dispatch-mode vocabulary.
//!
//! Reservation records carry status and mode strings written by several
//! generations of the booking screens (`"farm_out_unassigned"`,
//! `"Created-FarmOut-Unassigned"`, `"En Route"`, ...). Everything in this
//! module folds those spellings onto [`FarmoutStatus`] and [`FarmoutMode`] and
//! renders them back as display labels. All functions are pure and total.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The fixed set of farm-out states a reservation can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FarmoutStatus {
    Unassigned,
    /// Also spelled `searching` by older records.
    Offered,
    Assigned,
    Declined,
    Enroute,
    Arrived,
    PassengerOnboard,
    Completed,
    Cancelled,
    NoShow,
}

impl FarmoutStatus {
    pub const ALL: [FarmoutStatus; 10] = [
        FarmoutStatus::Unassigned,
        FarmoutStatus::Offered,
        FarmoutStatus::Assigned,
        FarmoutStatus::Declined,
        FarmoutStatus::Enroute,
        FarmoutStatus::Arrived,
        FarmoutStatus::PassengerOnboard,
        FarmoutStatus::Completed,
        FarmoutStatus::Cancelled,
        FarmoutStatus::NoShow,
    ];

    /// The canonical wire token exchanged with the reservation store.
    pub const fn as_str(self) -> &'static str {
        match self {
            FarmoutStatus::Unassigned => "unassigned",
            FarmoutStatus::Offered => "offered",
            FarmoutStatus::Assigned => "assigned",
            FarmoutStatus::Declined => "declined",
            FarmoutStatus::Enroute => "enroute",
            FarmoutStatus::Arrived => "arrived",
            FarmoutStatus::PassengerOnboard => "passenger_onboard",
            FarmoutStatus::Completed => "completed",
            FarmoutStatus::Cancelled => "cancelled",
            FarmoutStatus::NoShow => "no_show",
        }
    }

    /// Human-readable label shown on dispatcher screens.
    pub const fn label(self) -> &'static str {
        match self {
            FarmoutStatus::Unassigned => "Unassigned",
            FarmoutStatus::Offered => "Offered",
            FarmoutStatus::Assigned => "Assigned",
            FarmoutStatus::Declined => "Declined",
            FarmoutStatus::Enroute => "En Route",
            FarmoutStatus::Arrived => "Arrived",
            FarmoutStatus::PassengerOnboard => "Passenger On Board",
            FarmoutStatus::Completed => "Completed",
            FarmoutStatus::Cancelled => "Cancelled",
            FarmoutStatus::NoShow => "No Show",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            FarmoutStatus::Completed | FarmoutStatus::Cancelled | FarmoutStatus::NoShow
        )
    }

    /// States in which a reservation must carry a current offer.
    pub const fn requires_offer(self) -> bool {
        matches!(self, FarmoutStatus::Offered)
    }

    /// States in which a reservation must carry a driver and vehicle.
    pub const fn requires_assignment(self) -> bool {
        matches!(
            self,
            FarmoutStatus::Assigned
                | FarmoutStatus::Enroute
                | FarmoutStatus::Arrived
                | FarmoutStatus::PassengerOnboard
                | FarmoutStatus::Completed
        )
    }
}

impl fmt::Display for FarmoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FarmoutStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FarmoutStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match canonicalize_status(&raw) {
            CanonicalStatus::Known(status) => Ok(status),
            other => Err(serde::de::Error::custom(format!(
                "not a farm-out status: {raw:?} (normalized to {other:?})"
            ))),
        }
    }
}

/// Manual dispatch (a human picks the driver) or automatic dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FarmoutMode {
    #[default]
    Manual,
    Automatic,
}

impl FarmoutMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            FarmoutMode::Manual => "manual",
            FarmoutMode::Automatic => "automatic",
        }
    }
}

impl fmt::Display for FarmoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FarmoutMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FarmoutMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(canonicalize_mode(&raw))
    }
}

/// Result of normalizing a raw status string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CanonicalStatus {
    /// Empty input, or a marker meaning the reservation is dispatched in-house.
    Empty,
    Known(FarmoutStatus),
    /// A normalized token with no alias entry. Passed through so that newer
    /// statuses survive a round trip through older code.
    Unrecognized(String),
}

impl CanonicalStatus {
    pub fn as_str(&self) -> &str {
        match self {
            CanonicalStatus::Empty => "",
            CanonicalStatus::Known(status) => status.as_str(),
            CanonicalStatus::Unrecognized(token) => token,
        }
    }

    pub fn farmout_status(&self) -> Option<FarmoutStatus> {
        match self {
            CanonicalStatus::Known(status) => Some(*status),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CanonicalStatus::Empty)
    }
}

impl From<Option<FarmoutStatus>> for CanonicalStatus {
    fn from(status: Option<FarmoutStatus>) -> Self {
        status.map_or(CanonicalStatus::Empty, CanonicalStatus::Known)
    }
}

impl fmt::Display for CanonicalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized spellings mapped onto canonical statuses. Every canonical token
/// maps to itself so that normalization is idempotent.
const STATUS_ALIASES: &[(&str, FarmoutStatus)] = &[
    ("unassigned", FarmoutStatus::Unassigned),
    ("farm_out_unassigned", FarmoutStatus::Unassigned),
    ("farmout_unassigned", FarmoutStatus::Unassigned),
    ("created_farm_out_unassigned", FarmoutStatus::Unassigned),
    ("created_farmout_unassigned", FarmoutStatus::Unassigned),
    ("not_assigned", FarmoutStatus::Unassigned),
    ("offered", FarmoutStatus::Offered),
    ("searching", FarmoutStatus::Offered),
    ("offer_sent", FarmoutStatus::Offered),
    ("assigned", FarmoutStatus::Assigned),
    ("declined", FarmoutStatus::Declined),
    ("offer_declined", FarmoutStatus::Declined),
    ("enroute", FarmoutStatus::Enroute),
    ("en_route", FarmoutStatus::Enroute),
    ("arrived", FarmoutStatus::Arrived),
    ("on_location", FarmoutStatus::Arrived),
    ("passenger_onboard", FarmoutStatus::PassengerOnboard),
    ("passenger_on_board", FarmoutStatus::PassengerOnboard),
    ("passengeronboard", FarmoutStatus::PassengerOnboard),
    ("passenger_onboarded", FarmoutStatus::PassengerOnboard),
    ("pob", FarmoutStatus::PassengerOnboard),
    ("completed", FarmoutStatus::Completed),
    ("complete", FarmoutStatus::Completed),
    ("done", FarmoutStatus::Completed),
    ("cancelled", FarmoutStatus::Cancelled),
    ("canceled", FarmoutStatus::Cancelled),
    ("no_show", FarmoutStatus::NoShow),
    ("noshow", FarmoutStatus::NoShow),
];

/// Tokens meaning "not in the farm-out workflow".
const IN_HOUSE_MARKERS: &[&str] = &["in_house", "inhouse", "in_house_dispatch"];

/// Legacy prefixes, longest first.
const LEGACY_PREFIXES: &[&str] = &[
    "created_farm_out_",
    "created_farmout_",
    "farm_out_",
    "farmout_",
];

const AUTOMATIC_MODE_ALIASES: &[&str] = &[
    "automatic",
    "auto",
    "auto_dispatch",
    "automatic_dispatch",
    "autodispatch",
];

/// Lower-cases ASCII letters, collapses every run of other characters into a
/// single `_`, and drops separators at either end.
pub fn normalize_token(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_separator = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }
    out
}

fn lookup_status(token: &str) -> Option<CanonicalStatus> {
    if IN_HOUSE_MARKERS.contains(&token) {
        return Some(CanonicalStatus::Empty);
    }
    STATUS_ALIASES
        .iter()
        .find(|(alias, _)| *alias == token)
        .map(|(_, status)| CanonicalStatus::Known(*status))
}

/// Folds a raw status string onto the canonical vocabulary.
///
/// Unknown non-empty input comes back as [`CanonicalStatus::Unrecognized`]
/// holding the normalized token; empty input is [`CanonicalStatus::Empty`].
pub fn canonicalize_status(raw: &str) -> CanonicalStatus {
    let token = normalize_token(raw);
    if token.is_empty() {
        return CanonicalStatus::Empty;
    }
    if let Some(found) = lookup_status(&token) {
        return found;
    }
    LEGACY_PREFIXES
        .iter()
        .filter_map(|prefix| token.strip_prefix(prefix))
        .find_map(lookup_status)
        .unwrap_or(CanonicalStatus::Unrecognized(token))
}

/// Folds a raw mode string onto [`FarmoutMode`]. Anything unrecognized is manual.
pub fn canonicalize_mode(raw: &str) -> FarmoutMode {
    let token = normalize_token(raw);
    let stripped = LEGACY_PREFIXES
        .iter()
        .find_map(|prefix| token.strip_prefix(prefix))
        .unwrap_or(token.as_str());
    if AUTOMATIC_MODE_ALIASES.contains(&token.as_str())
        || AUTOMATIC_MODE_ALIASES.contains(&stripped)
    {
        FarmoutMode::Automatic
    } else {
        FarmoutMode::Manual
    }
}

/// Display label for a canonical status. Tokens without a fixed label are
/// title-cased word by word.
pub fn format_status_label(status: &CanonicalStatus) -> String {
    match status {
        CanonicalStatus::Empty => String::new(),
        CanonicalStatus::Known(known) => known.label().to_string(),
        CanonicalStatus::Unrecognized(token) => title_case(token),
    }
}

fn title_case(token: &str) -> String {
    token
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_unassigned_spellings() {
        for raw in [
            "farm_out_unassigned",
            "farmout_unassigned",
            "created_farm_out_unassigned",
            "Created-FarmOut-Unassigned",
            "  UNASSIGNED  ",
        ] {
            assert_eq!(
                canonicalize_status(raw),
                CanonicalStatus::Known(FarmoutStatus::Unassigned),
                "{raw}"
            );
        }
    }

    #[test]
    fn aliases_fold_onto_canonical_tokens() {
        assert_eq!(canonicalize_status("done").as_str(), "completed");
        assert_eq!(canonicalize_status("En Route").as_str(), "enroute");
        assert_eq!(canonicalize_status("enroute").as_str(), "enroute");
        assert_eq!(
            canonicalize_status("Passenger On Board").as_str(),
            "passenger_onboard"
        );
        assert_eq!(
            canonicalize_status("passenger-on-board").as_str(),
            "passenger_onboard"
        );
        assert_eq!(canonicalize_status("Searching").as_str(), "offered");
        assert_eq!(canonicalize_status("farm_out_assigned").as_str(), "assigned");
        assert_eq!(canonicalize_status("No-Show").as_str(), "no_show");
    }

    #[test]
    fn unknown_status_passes_through_normalized() {
        assert_eq!(
            canonicalize_status("Awaiting--Affiliate  Review"),
            CanonicalStatus::Unrecognized("awaiting_affiliate_review".into())
        );
    }

    #[test]
    fn empty_and_in_house_mean_not_in_workflow() {
        assert_eq!(canonicalize_status(""), CanonicalStatus::Empty);
        assert_eq!(canonicalize_status(" -_- "), CanonicalStatus::Empty);
        assert_eq!(canonicalize_status("In-House"), CanonicalStatus::Empty);
    }

    #[test]
    fn normalization_is_idempotent() {
        let corpus = [
            "",
            "farm_out_unassigned",
            "Created-FarmOut-Unassigned",
            "done",
            "__Passenger__on__Board__",
            "something new",
            "farm_out_something_new",
            "in_house",
            "ÜBER café",
            "searching",
            "farmout_farmout_unassigned",
        ];
        for raw in corpus {
            let once = canonicalize_status(raw);
            let twice = canonicalize_status(once.as_str());
            assert_eq!(once, twice, "{raw}");
        }
        for status in FarmoutStatus::ALL {
            assert_eq!(
                canonicalize_status(status.as_str()),
                CanonicalStatus::Known(status)
            );
        }
    }

    #[test]
    fn labels_are_lossy_but_reparse_stably() {
        let status = canonicalize_status("passenger_on_board");
        let label = format_status_label(&status);
        assert_eq!(label, "Passenger On Board");
        let reparsed = canonicalize_status(&label);
        assert_eq!(canonicalize_status(reparsed.as_str()), reparsed);
    }

    #[test]
    fn label_fallback_title_cases() {
        let status = canonicalize_status("awaiting_affiliate_review");
        assert_eq!(format_status_label(&status), "Awaiting Affiliate Review");
        assert_eq!(format_status_label(&CanonicalStatus::Empty), "");
        assert_eq!(
            format_status_label(&CanonicalStatus::Known(FarmoutStatus::Enroute)),
            "En Route"
        );
    }

    #[test]
    fn mode_aliases() {
        assert_eq!(canonicalize_mode("auto"), FarmoutMode::Automatic);
        assert_eq!(canonicalize_mode("Auto-Dispatch"), FarmoutMode::Automatic);
        assert_eq!(canonicalize_mode("AUTOMATIC_DISPATCH"), FarmoutMode::Automatic);
        assert_eq!(canonicalize_mode("farmout_auto"), FarmoutMode::Automatic);
        assert_eq!(canonicalize_mode("manual"), FarmoutMode::Manual);
        assert_eq!(canonicalize_mode(""), FarmoutMode::Manual);
        assert_eq!(canonicalize_mode("whatever"), FarmoutMode::Manual);
    }

    #[test]
    fn status_serde_uses_canonical_tokens() {
        let json = serde_json::to_string(&FarmoutStatus::PassengerOnboard).unwrap();
        assert_eq!(json, r#""passenger_onboard""#);

        let parsed: FarmoutStatus = serde_json::from_str(r#""Farm-Out Searching""#).unwrap();
        assert_eq!(parsed, FarmoutStatus::Offered);

        assert!(serde_json::from_str::<FarmoutStatus>(r#""in_review""#).is_err());
    }

    #[test]
    fn mode_serde_is_lenient() {
        let parsed: FarmoutMode = serde_json::from_str(r#""auto_dispatch""#).unwrap();
        assert_eq!(parsed, FarmoutMode::Automatic);
        let parsed: FarmoutMode = serde_json::from_str(r#""??""#).unwrap();
        assert_eq!(parsed, FarmoutMode::Manual);
    }

    #[test]
    fn invariant_helpers() {
        assert!(FarmoutStatus::Offered.requires_offer());
        assert!(!FarmoutStatus::Declined.requires_offer());
        assert!(FarmoutStatus::Completed.requires_assignment());
        assert!(!FarmoutStatus::NoShow.requires_assignment());
        assert!(FarmoutStatus::NoShow.is_terminal());
        assert!(!FarmoutStatus::Declined.is_terminal());
    }
}

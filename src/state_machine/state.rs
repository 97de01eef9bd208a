use std::fmt;

use serde::{Deserialize, Serialize};

use crate::status::FarmoutStatus;

/// Everything that can happen to a reservation's farm-out facet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FarmoutEvent {
    SwitchToFarmOut,
    SwitchToInHouse,
    SendOffer,
    OfferExpires,
    CancelOffer,
    ResendOffer,
    DriverAccepts,
    DriverDeclines,
    Assign,
    ClearAssignment,
    MarkEnroute,
    MarkArrived,
    MarkPassengerOnboard,
    MarkCompleted,
    CancelTrip,
    MarkNoShow,
}

impl FarmoutEvent {
    pub const fn as_str(self) -> &'static str {
        match self {
            FarmoutEvent::SwitchToFarmOut => "switch_to_farm_out",
            FarmoutEvent::SwitchToInHouse => "switch_to_in_house",
            FarmoutEvent::SendOffer => "send_offer",
            FarmoutEvent::OfferExpires => "offer_expires",
            FarmoutEvent::CancelOffer => "cancel_offer",
            FarmoutEvent::ResendOffer => "resend_offer",
            FarmoutEvent::DriverAccepts => "driver_accepts",
            FarmoutEvent::DriverDeclines => "driver_declines",
            FarmoutEvent::Assign => "assign",
            FarmoutEvent::ClearAssignment => "clear_assignment",
            FarmoutEvent::MarkEnroute => "mark_enroute",
            FarmoutEvent::MarkArrived => "mark_arrived",
            FarmoutEvent::MarkPassengerOnboard => "mark_passenger_onboard",
            FarmoutEvent::MarkCompleted => "mark_completed",
            FarmoutEvent::CancelTrip => "cancel_trip",
            FarmoutEvent::MarkNoShow => "mark_no_show",
        }
    }
}

impl fmt::Display for FarmoutEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trip progress after assignment. Steps must be taken in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStep {
    Enroute,
    Arrived,
    PassengerOnboard,
    Completed,
}

impl ProgressStep {
    pub const fn event(self) -> FarmoutEvent {
        match self {
            ProgressStep::Enroute => FarmoutEvent::MarkEnroute,
            ProgressStep::Arrived => FarmoutEvent::MarkArrived,
            ProgressStep::PassengerOnboard => FarmoutEvent::MarkPassengerOnboard,
            ProgressStep::Completed => FarmoutEvent::MarkCompleted,
        }
    }

    pub const fn status(self) -> FarmoutStatus {
        match self {
            ProgressStep::Enroute => FarmoutStatus::Enroute,
            ProgressStep::Arrived => FarmoutStatus::Arrived,
            ProgressStep::PassengerOnboard => FarmoutStatus::PassengerOnboard,
            ProgressStep::Completed => FarmoutStatus::Completed,
        }
    }

    /// The only status this step may be taken from.
    pub const fn predecessor(self) -> FarmoutStatus {
        match self {
            ProgressStep::Enroute => FarmoutStatus::Assigned,
            ProgressStep::Arrived => FarmoutStatus::Enroute,
            ProgressStep::PassengerOnboard => FarmoutStatus::Arrived,
            ProgressStep::Completed => FarmoutStatus::PassengerOnboard,
        }
    }
}

/// A validated move from one status to another. `None` means the reservation
/// is outside the farm-out workflow (dispatched in-house).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: Option<FarmoutStatus>,
    pub event: FarmoutEvent,
    pub to: Option<FarmoutStatus>,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let from = self.from.map_or("in_house", FarmoutStatus::as_str);
        let to = self.to.map_or("in_house", FarmoutStatus::as_str);
        write!(f, "{from} --{}--> {to}", self.event)
    }
}

/// The farm-out transition table.
pub struct StateMachine;

impl StateMachine {
    /// Computes the transition `event` causes from `from`, or `None` when the
    /// event is not legal there.
    ///
    /// - Offers may be sent from `unassigned` or `declined`; expiry,
    ///   cancellation, resend, accept and decline need `offered`.
    /// - Assignment is allowed from `unassigned`, `offered` and `declined`.
    /// - Progress is strictly `assigned → enroute → arrived →
    ///   passenger_onboard → completed`.
    /// - Terminal states only accept `switch_to_in_house`.
    pub fn next(from: Option<FarmoutStatus>, event: FarmoutEvent) -> Option<Transition> {
        use FarmoutStatus as S;

        let to = match (from, event) {
            (None, FarmoutEvent::SwitchToFarmOut) => Some(S::Unassigned),
            (Some(_), FarmoutEvent::SwitchToInHouse) => None,

            (Some(S::Unassigned | S::Declined), FarmoutEvent::SendOffer) => Some(S::Offered),
            (Some(S::Offered), FarmoutEvent::OfferExpires | FarmoutEvent::CancelOffer) => {
                Some(S::Unassigned)
            }
            (Some(S::Offered), FarmoutEvent::ResendOffer) => Some(S::Offered),
            (Some(S::Offered), FarmoutEvent::DriverAccepts) => Some(S::Assigned),
            (Some(S::Offered), FarmoutEvent::DriverDeclines) => Some(S::Declined),
            (Some(S::Unassigned | S::Offered | S::Declined), FarmoutEvent::Assign) => {
                Some(S::Assigned)
            }
            (
                Some(S::Assigned | S::Enroute | S::Arrived | S::PassengerOnboard),
                FarmoutEvent::ClearAssignment,
            ) => Some(S::Unassigned),

            (Some(S::Assigned), FarmoutEvent::MarkEnroute) => Some(S::Enroute),
            (Some(S::Enroute), FarmoutEvent::MarkArrived) => Some(S::Arrived),
            (Some(S::Arrived), FarmoutEvent::MarkPassengerOnboard) => Some(S::PassengerOnboard),
            (Some(S::PassengerOnboard), FarmoutEvent::MarkCompleted) => Some(S::Completed),

            (Some(status), FarmoutEvent::CancelTrip) if !status.is_terminal() => {
                Some(S::Cancelled)
            }
            (Some(S::Arrived | S::PassengerOnboard), FarmoutEvent::MarkNoShow) => Some(S::NoShow),

            _ => return None,
        };

        Some(Transition { from, event, to })
    }

    /// Events that are legal from `from`, in declaration order.
    pub fn allowed_events(from: Option<FarmoutStatus>) -> Vec<FarmoutEvent> {
        ALL_EVENTS
            .iter()
            .copied()
            .filter(|event| Self::next(from, *event).is_some())
            .collect()
    }
}

const ALL_EVENTS: [FarmoutEvent; 16] = [
    FarmoutEvent::SwitchToFarmOut,
    FarmoutEvent::SwitchToInHouse,
    FarmoutEvent::SendOffer,
    FarmoutEvent::OfferExpires,
    FarmoutEvent::CancelOffer,
    FarmoutEvent::ResendOffer,
    FarmoutEvent::DriverAccepts,
    FarmoutEvent::DriverDeclines,
    FarmoutEvent::Assign,
    FarmoutEvent::ClearAssignment,
    FarmoutEvent::MarkEnroute,
    FarmoutEvent::MarkArrived,
    FarmoutEvent::MarkPassengerOnboard,
    FarmoutEvent::MarkCompleted,
    FarmoutEvent::CancelTrip,
    FarmoutEvent::MarkNoShow,
];

#[cfg(test)]
mod tests {
    use super::*;
    use FarmoutStatus as S;

    fn to(from: Option<FarmoutStatus>, event: FarmoutEvent) -> Option<Option<FarmoutStatus>> {
        StateMachine::next(from, event).map(|t| t.to)
    }

    #[test]
    fn happy_path_walks_offer_to_completion() {
        let mut status = to(None, FarmoutEvent::SwitchToFarmOut).unwrap();
        assert_eq!(status, Some(S::Unassigned));

        for (event, expected) in [
            (FarmoutEvent::SendOffer, S::Offered),
            (FarmoutEvent::DriverAccepts, S::Assigned),
            (FarmoutEvent::MarkEnroute, S::Enroute),
            (FarmoutEvent::MarkArrived, S::Arrived),
            (FarmoutEvent::MarkPassengerOnboard, S::PassengerOnboard),
            (FarmoutEvent::MarkCompleted, S::Completed),
        ] {
            status = to(status, event).unwrap();
            assert_eq!(status, Some(expected), "{event}");
        }

        assert!(S::Completed.is_terminal());
        assert_eq!(to(status, FarmoutEvent::CancelTrip), None);
    }

    #[test]
    fn offers_only_from_unassigned_or_declined() {
        assert_eq!(to(Some(S::Declined), FarmoutEvent::SendOffer), Some(Some(S::Offered)));
        assert_eq!(to(Some(S::Assigned), FarmoutEvent::SendOffer), None);
        assert_eq!(to(Some(S::Offered), FarmoutEvent::SendOffer), None);
        assert_eq!(to(None, FarmoutEvent::SendOffer), None);
    }

    #[test]
    fn offer_resolution() {
        assert_eq!(to(Some(S::Offered), FarmoutEvent::OfferExpires), Some(Some(S::Unassigned)));
        assert_eq!(to(Some(S::Offered), FarmoutEvent::CancelOffer), Some(Some(S::Unassigned)));
        assert_eq!(to(Some(S::Offered), FarmoutEvent::DriverDeclines), Some(Some(S::Declined)));
        assert_eq!(to(Some(S::Unassigned), FarmoutEvent::CancelOffer), None);
        assert_eq!(to(Some(S::Unassigned), FarmoutEvent::DriverAccepts), None);
    }

    #[test]
    fn progress_cannot_skip_ahead() {
        assert_eq!(to(Some(S::Assigned), FarmoutEvent::MarkArrived), None);
        assert_eq!(to(Some(S::Enroute), FarmoutEvent::MarkCompleted), None);
        assert_eq!(to(Some(S::Arrived), FarmoutEvent::MarkEnroute), None);
        for step in [
            ProgressStep::Enroute,
            ProgressStep::Arrived,
            ProgressStep::PassengerOnboard,
            ProgressStep::Completed,
        ] {
            assert_eq!(
                to(Some(step.predecessor()), step.event()),
                Some(Some(step.status()))
            );
        }
    }

    #[test]
    fn clear_assignment_from_assigned_and_later() {
        for from in [S::Assigned, S::Enroute, S::Arrived, S::PassengerOnboard] {
            assert_eq!(to(Some(from), FarmoutEvent::ClearAssignment), Some(Some(S::Unassigned)));
        }
        assert_eq!(to(Some(S::Unassigned), FarmoutEvent::ClearAssignment), None);
        assert_eq!(to(Some(S::Completed), FarmoutEvent::ClearAssignment), None);
    }

    #[test]
    fn no_show_only_on_location() {
        assert_eq!(to(Some(S::Arrived), FarmoutEvent::MarkNoShow), Some(Some(S::NoShow)));
        assert_eq!(to(Some(S::PassengerOnboard), FarmoutEvent::MarkNoShow), Some(Some(S::NoShow)));
        assert_eq!(to(Some(S::Enroute), FarmoutEvent::MarkNoShow), None);
    }

    #[test]
    fn in_house_switches() {
        for status in FarmoutStatus::ALL {
            assert_eq!(to(Some(status), FarmoutEvent::SwitchToInHouse), Some(None));
            assert_eq!(to(Some(status), FarmoutEvent::SwitchToFarmOut), None);
        }
        assert_eq!(to(None, FarmoutEvent::SwitchToInHouse), None);
    }

    #[test]
    fn terminal_states_only_leave_the_workflow() {
        for status in [S::Completed, S::Cancelled, S::NoShow] {
            assert_eq!(
                StateMachine::allowed_events(Some(status)),
                vec![FarmoutEvent::SwitchToInHouse]
            );
        }
    }

    #[test]
    fn transition_display() {
        let t = StateMachine::next(Some(S::Offered), FarmoutEvent::OfferExpires).unwrap();
        assert_eq!(t.to_string(), "offered --offer_expires--> unassigned");
        let t = StateMachine::next(Some(S::Arrived), FarmoutEvent::SwitchToInHouse).unwrap();
        assert_eq!(t.to_string(), "arrived --switch_to_in_house--> in_house");
    }
}

mod reservation;
mod state;

pub use reservation::{
    Assignment, CurrentOffer, Driver, DriverAvailability, InvariantViolation, Reservation,
};
pub use state::{FarmoutEvent, ProgressStep, StateMachine, Transition};

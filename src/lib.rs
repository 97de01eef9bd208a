//! Farm-out dispatch workflow for ground-transportation reservations.
//!
//! A reservation handed to an outside operator moves through offers,
//! assignment and trip progress under [`dispatch::Dispatcher`], which checks
//! every change against [`state_machine::StateMachine`] and records it in the
//! [`activity::ActivityLog`].

pub mod activity;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod state_machine;
pub mod status;
pub mod store;

pub use dispatch::{AutomationTrigger, Dispatcher, NoopAutomation};
pub use error::{DispatchError, StoreError};

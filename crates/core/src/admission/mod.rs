//! Backpressure for task admission.
//!
//! Tasks in flight (admitted but not yet completed or failed) are counted per
//! tenant and globally. Below the high water mark submissions are allowed,
//! between the high and hard marks they are delayed, and at the hard mark
//! they are rejected with a capacity error.

mod config;
mod controller;
mod types;

pub use config::AdmissionConfig;
pub use controller::{AdmissionPermit, BackpressureController};
pub use types::{Admission, AdmissionStatus, CapacityError};

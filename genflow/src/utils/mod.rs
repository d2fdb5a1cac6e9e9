//! Utility types shared across the crate.

pub mod clock;

pub use clock::{format_ms, Clock, ManualClock, SystemClock};

//! Process-wide tracing/logging setup.
//!
//! Call [`init`] once at the top of every binary; library crates only emit
//! events through `tracing` macros.

pub mod tracing;

pub use crate::tracing::{DEFAULT_FILTER, init, init_with_default};

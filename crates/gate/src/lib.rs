//! Deterministic admission gate for processed items.
//!
//! Every item that reaches assembly has passed the full battery in
//! [`checks::CHECKS`] and the cross-item diversity cap.

pub mod checks;
pub mod gate;
pub mod reason;

pub use checks::{CHECKS, Check, CheckContext};
pub use gate::{GateOutcome, GateVerdict, QualityGate};
pub use reason::{CheckFamily, ReasonCode};

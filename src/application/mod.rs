//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain logic and manages runtime behavior:
//! - Admission controller (decision making and persistence)
//! - Visit observer (visit log and suspicion diagnostics)
//! - Countdown ticker (periodic re-checks while blocked)
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod controller;
pub mod metrics;
pub mod observer;
pub mod persistence;
pub mod ports;

#[cfg(feature = "async")]
pub mod ticker;

//! The single localhost HTTP surface for intentd (§6 EXTERNAL INTERFACES).
//!
//! Split into a library so both the `intentd` binary and this crate's
//! integration tests can build an [`axum::Router`] without booting a real
//! process.

pub mod metrics;
pub mod routes;
pub mod state;

//! API server for AppForge.
//!
//! Exposes builds over HTTP and wires the configured backends into the
//! build orchestrator.

pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;

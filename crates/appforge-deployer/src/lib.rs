//! Sandbox deployment backends for AppForge.
//!
//! Available backends:
//! - `webhook`: notifies a deployment service over HTTP

pub mod webhook;

pub use webhook::WebhookDeployer;

//! Build orchestration for AppForge.
//!
//! - [`ActionLog`]: step lifecycle and per-step log lines
//! - [`BuildOrchestrator`]: drives a build through generation, packaging,
//!   remote image build and source publication
//! - [`Reconciler`]: periodic sweep over outstanding image builds

pub mod action_log;
pub mod orchestrator;
pub mod reconciler;

pub use action_log::{ActionLog, StepContext};
pub use orchestrator::{Backends, BuildOrchestrator, OrchestratorConfig, SubmittedBuild};
pub use reconciler::Reconciler;

//! Core domain types and traits for the AppForge build pipeline.
//!
//! This crate contains:
//! - Typed identifiers and the shared error type
//! - Builds, actions, steps and log lines, plus the derived build status
//! - Collaborator traits consumed by the orchestrator (generator, artifact
//!   store, image builder, source publisher, sandbox deployer, application
//!   facade)

pub mod action;
pub mod application;
pub mod artifact;
pub mod build;
pub mod deployer;
pub mod error;
pub mod generator;
pub mod id;
pub mod image;
pub mod publisher;

pub use action::{Action, LogLevel, LogLine, Step, StepName, StepStatus};
pub use build::{Build, BuildFilter, BuildRequest, BuildStatus};
pub use error::{Error, Result};
pub use id::{ActionId, AppId, BuildId, EntityId, LogLineId, RoleId, StepId};

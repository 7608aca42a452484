//! Source publishing backends for AppForge.
//!
//! Available backends:
//! - `github`: pushes generated modules as a branch and pull request through
//!   the GitHub REST API

pub mod github;

pub use github::{GitHubError, GitHubPublisher};

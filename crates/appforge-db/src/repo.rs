//! Repository traits and implementations.

pub mod action;
pub mod application;
pub mod build;
pub mod memory;

pub use action::{ActionRepo, PgActionRepo};
pub use application::PgApplicationRepo;
pub use build::{BuildRepo, NewBuild, PgBuildRepo};
pub use memory::{MemoryApplications, MemoryRepo, SyncReport};

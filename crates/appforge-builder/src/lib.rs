//! Image build backends for AppForge.
//!
//! Available backends:
//! - `http`: JSON/HTTP client for a remote image build service

pub mod http;

pub use http::{HttpImageBuilder, ImageBuildError};

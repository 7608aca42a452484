//! Code generator backends for AppForge.
//!
//! Available backends:
//! - `process`: runs an external generator executable speaking JSON lines

pub mod process;

pub use process::{GeneratorEvent, ProcessGenerator};

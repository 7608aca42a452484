//! Artifact packaging and storage for AppForge.
//!
//! Generated modules are packed into a zip archive (for download) and a
//! gzipped tar archive (the image build context). Both are deterministic:
//! the same modules always produce the same bytes.

pub mod error;
pub mod local;
pub mod memory;
pub mod packager;

pub use error::ArchiveError;
pub use local::LocalArtifactStore;
pub use memory::MemoryArtifactStore;
pub use packager::{ArtifactInfo, PackagedArtifacts, build_tar_gz, build_zip, package, unpack_zip};

//! Deterministic packaging of generated modules.

use appforge_core::artifact::{ArtifactStore, tar_gz_path, zip_path};
use appforge_core::generator::Module;
use appforge_core::{BuildId, Result};
use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read, Write};
use tracing::debug;
use zip::write::SimpleFileOptions;

use crate::ArchiveError;

const FILE_MODE: u32 = 0o644;

/// A stored archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    /// Path within the artifact store.
    pub path: String,
    /// Hex encoded SHA-256 of the archive bytes.
    pub sha256: String,
    pub size: u64,
}

impl ArtifactInfo {
    fn describe(path: String, data: &[u8]) -> Self {
        Self {
            path,
            sha256: hex::encode(Sha256::digest(data)),
            size: data.len() as u64,
        }
    }
}

/// Both archives of one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArtifacts {
    pub zip: ArtifactInfo,
    pub tar_gz: ArtifactInfo,
}

/// Pack modules into a zip archive with fixed timestamps.
pub fn build_zip(modules: &[Module]) -> std::result::Result<Vec<u8>, ArchiveError> {
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(FILE_MODE);

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for module in modules {
        writer.start_file(module.path.as_str(), options)?;
        writer.write_all(module.code.as_bytes())?;
    }
    Ok(writer.finish()?.into_inner())
}

/// Pack modules into a gzipped tar archive with zeroed mtimes and owners.
pub fn build_tar_gz(modules: &[Module]) -> std::result::Result<Vec<u8>, ArchiveError> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.mode(tar::HeaderMode::Deterministic);

    for module in modules {
        let data = module.code.as_bytes();
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(FILE_MODE);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_entry_type(tar::EntryType::Regular);
        builder.append_data(&mut header, &module.path, data)?;
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

/// Read modules back out of a zip archive, in archive order.
pub fn unpack_zip(data: &[u8]) -> std::result::Result<Vec<Module>, ArchiveError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))?;
    let mut modules = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        if file.is_dir() {
            continue;
        }
        let mut code = String::new();
        file.read_to_string(&mut code)?;
        modules.push(Module {
            path: file.name().to_string(),
            code,
        });
    }
    Ok(modules)
}

/// Build both archives and write them to `store`.
///
/// Archiving runs on the blocking pool; the two writes run concurrently and
/// both have completed when this returns.
pub async fn package(
    store: &dyn ArtifactStore,
    build_id: &BuildId,
    modules: Vec<Module>,
) -> Result<PackagedArtifacts> {
    let (zip_bytes, tar_bytes) = tokio::task::spawn_blocking(move || {
        let zip_bytes = build_zip(&modules)?;
        let tar_bytes = build_tar_gz(&modules)?;
        Ok::<_, ArchiveError>((zip_bytes, tar_bytes))
    })
    .await
    .map_err(ArchiveError::from)??;

    let zip = ArtifactInfo::describe(zip_path(build_id), &zip_bytes);
    let tar_gz = ArtifactInfo::describe(tar_gz_path(build_id), &tar_bytes);

    tokio::try_join!(
        store.put(&zip.path, Bytes::from(zip_bytes)),
        store.put(&tar_gz.path, Bytes::from(tar_bytes)),
    )?;

    debug!(
        build_id = %build_id,
        zip_size = zip.size,
        tar_gz_size = tar_gz.size,
        "Stored build artifacts"
    );

    Ok(PackagedArtifacts { zip, tar_gz })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryArtifactStore;

    fn modules() -> Vec<Module> {
        vec![
            Module {
                path: "src/index.ts".to_string(),
                code: "export const app = 1;\n".to_string(),
            },
            Module {
                path: "src/entities/customer.ts".to_string(),
                code: "export class Customer {}\n".to_string(),
            },
        ]
    }

    #[test]
    fn test_zip_is_deterministic() {
        let first = build_zip(&modules()).unwrap();
        let second = build_zip(&modules()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_tar_gz_is_deterministic() {
        let first = build_tar_gz(&modules()).unwrap();
        let second = build_tar_gz(&modules()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_zip_contains_modules() {
        let bytes = build_zip(&modules()).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);

        let mut file = archive.by_name("src/entities/customer.ts").unwrap();
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        assert_eq!(content, "export class Customer {}\n");
    }

    #[test]
    fn test_unpack_zip_restores_modules_in_order() {
        let bytes = build_zip(&modules()).unwrap();
        assert_eq!(unpack_zip(&bytes).unwrap(), modules());
    }

    #[test]
    fn test_tar_gz_entries_have_fixed_metadata() {
        let bytes = build_tar_gz(&modules()).unwrap();
        let decoder = flate2::read::GzDecoder::new(Cursor::new(bytes));
        let mut archive = tar::Archive::new(decoder);

        let mut paths = Vec::new();
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            let header = entry.header();
            assert_eq!(header.mode().unwrap(), 0o644);
            assert_eq!(header.mtime().unwrap(), 0);
            paths.push(entry.path().unwrap().to_string_lossy().into_owned());
        }
        assert_eq!(paths, vec!["src/index.ts", "src/entities/customer.ts"]);
    }

    #[tokio::test]
    async fn test_package_writes_both_archives() {
        let store = MemoryArtifactStore::new();
        let build_id = BuildId::new();

        let packaged = package(&store, &build_id, modules()).await.unwrap();

        assert_eq!(packaged.zip.path, zip_path(&build_id));
        assert_eq!(packaged.tar_gz.path, tar_gz_path(&build_id));
        assert_eq!(packaged.zip.sha256.len(), 64);
        assert!(store.exists(&packaged.zip.path).await.unwrap());
        assert!(store.exists(&packaged.tar_gz.path).await.unwrap());

        let stored = store.get_bytes(&packaged.zip.path).unwrap();
        assert_eq!(stored.len() as u64, packaged.zip.size);
        assert_eq!(stored.as_ref(), build_zip(&modules()).unwrap().as_slice());
    }
}

//! Transfer engine boundary for blob staging operations.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use skiff_sas::ContainerSas;
use skiff_types::{FaultKind, FaultRecord};
use tracing::debug;

/// Moves bytes between the local filesystem and the staging container.
///
/// The router never talks to blob storage credentials directly: it obtains
/// a [`ContainerSas`] from the policy cache and hands it to the transfer.
#[async_trait]
pub trait BlobTransfer: Send + Sync {
    async fn upload_file(
        &self,
        sas: &ContainerSas,
        path: &Path,
        blob: &str,
    ) -> Result<(), FaultRecord>;

    async fn download_file(
        &self,
        sas: &ContainerSas,
        blob: &str,
        path: &Path,
    ) -> Result<(), FaultRecord>;

    /// Upload every file under `path` as `prefix/<relative path>`.
    async fn upload_directory(
        &self,
        sas: &ContainerSas,
        path: &Path,
        prefix: &str,
    ) -> Result<(), FaultRecord>;

    /// Download every blob under `prefix` into `path`.
    async fn download_directory(
        &self,
        sas: &ContainerSas,
        prefix: &str,
        path: &Path,
    ) -> Result<(), FaultRecord>;
}

/// Directory-backed [`BlobTransfer`] for tests and single-host setups.
///
/// Each container maps to `{root}/{container}` and blob names map to
/// relative paths inside it.
pub struct DirTransfer {
    root: PathBuf,
}

impl DirTransfer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, sas: &ContainerSas, blob: &str) -> PathBuf {
        self.root.join(&sas.container).join(blob)
    }

    fn io_fault(context: &str, e: std::io::Error) -> FaultRecord {
        FaultRecord::with_cause(FaultKind::CommunicationFailure, context, &e)
    }
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<u64> {
    std::fs::create_dir_all(to)?;
    let mut copied = 0;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copied += copy_tree(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[async_trait]
impl BlobTransfer for DirTransfer {
    async fn upload_file(
        &self,
        sas: &ContainerSas,
        path: &Path,
        blob: &str,
    ) -> Result<(), FaultRecord> {
        let dest = self.blob_path(sas, blob);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::io_fault("could not prepare blob destination", e))?;
        }
        tokio::fs::copy(path, &dest)
            .await
            .map_err(|e| Self::io_fault("upload to staging container failed", e))?;
        debug!(container = %sas.container, blob, "uploaded file");
        Ok(())
    }

    async fn download_file(
        &self,
        sas: &ContainerSas,
        blob: &str,
        path: &Path,
    ) -> Result<(), FaultRecord> {
        let src = self.blob_path(sas, blob);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::io_fault("could not prepare download destination", e))?;
        }
        tokio::fs::copy(&src, path)
            .await
            .map_err(|e| Self::io_fault("download from staging container failed", e))?;
        debug!(container = %sas.container, blob, "downloaded file");
        Ok(())
    }

    async fn upload_directory(
        &self,
        sas: &ContainerSas,
        path: &Path,
        prefix: &str,
    ) -> Result<(), FaultRecord> {
        let from = path.to_path_buf();
        let to = self.blob_path(sas, prefix);
        let copied = tokio::task::spawn_blocking(move || copy_tree(&from, &to))
            .await
            .map_err(|e| {
                FaultRecord::with_cause(FaultKind::InternalServerError, "transfer task failed", &e)
            })?
            .map_err(|e| Self::io_fault("directory upload failed", e))?;
        debug!(container = %sas.container, prefix, copied, "uploaded directory");
        Ok(())
    }

    async fn download_directory(
        &self,
        sas: &ContainerSas,
        prefix: &str,
        path: &Path,
    ) -> Result<(), FaultRecord> {
        let from = self.blob_path(sas, prefix);
        let to = path.to_path_buf();
        let copied = tokio::task::spawn_blocking(move || copy_tree(&from, &to))
            .await
            .map_err(|e| {
                FaultRecord::with_cause(FaultKind::InternalServerError, "transfer task failed", &e)
            })?
            .map_err(|e| Self::io_fault("directory download failed", e))?;
        debug!(container = %sas.container, prefix, copied, "downloaded directory");
        Ok(())
    }
}

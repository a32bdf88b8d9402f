//! Local execution of file operations on a worker node.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use skiff_net::{FileOp, OpReply, ReadSpan, WireResponse};
use skiff_sas::{SasPermissions, SasPolicyCache};
use skiff_tail::{ScanOptions, TailError, copy_head, copy_tail};
use skiff_types::{AccessRights, FaultKind, FaultRecord, FileEntry, RouteHeaders, UserIdentity};
use tracing::{debug, warn};

use crate::auth::Authenticator;
use crate::blob::BlobTransfer;

/// Cluster identity of the node, used to derive staging container names.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub cluster: String,
    pub deployment: String,
}

/// Executes file operations against the local filesystem and the staging
/// container. Every failure is flattened into a [`FaultRecord`]; raw
/// `io::Error` values never leave this module.
pub struct LocalExecutor {
    config: ExecutorConfig,
    authenticator: Arc<dyn Authenticator>,
    sas: Arc<SasPolicyCache>,
    transfer: Arc<dyn BlobTransfer>,
}

impl LocalExecutor {
    pub fn new(
        config: ExecutorConfig,
        authenticator: Arc<dyn Authenticator>,
        sas: Arc<SasPolicyCache>,
        transfer: Arc<dyn BlobTransfer>,
    ) -> Self {
        Self {
            config,
            authenticator,
            sas,
            transfer,
        }
    }

    /// Run one operation for the identity carried in `headers`.
    pub async fn execute(&self, headers: &RouteHeaders, op: &FileOp) -> WireResponse {
        // KeepAlive refreshes the connection and nothing else.
        if matches!(op, FileOp::KeepAlive) {
            return Ok(OpReply::Done);
        }

        let user = UserIdentity::new(headers.user.clone(), headers.is_admin);
        if let Some((path, rights)) = required_rights(op) {
            self.authenticator
                .check_file_permissions(&user, path, rights)
                .await?;
        }

        debug!(user = %user.name, ?op, "executing locally");
        match op {
            FileOp::ReadFile { path, span } => self.read_file(path, *span).await,
            FileOp::WriteFile {
                path,
                data,
                overwrite,
            } => self.write_file(path, data.clone(), *overwrite).await,
            FileOp::DeleteFile { path } => self.delete_file(path).await,
            FileOp::GetFiles { path, pattern } => {
                self.enumerate(path, pattern.as_deref(), false).await
            }
            FileOp::GetDirectories { path } => self.enumerate(path, None, true).await,
            FileOp::DeleteDirectory { path, recursive } => {
                self.delete_directory(path, *recursive).await
            }
            FileOp::CopyFileToBlob { path, blob } => {
                let sas = self
                    .container_sas(&user, SasPermissions {
                        write: true,
                        ..Default::default()
                    })
                    .await?;
                self.transfer.upload_file(&sas, Path::new(path), blob).await?;
                Ok(OpReply::Done)
            }
            FileOp::CopyFileFromBlob { path, blob } => {
                let sas = self.container_sas(&user, SasPermissions::READ).await?;
                self.transfer
                    .download_file(&sas, blob, Path::new(path))
                    .await?;
                Ok(OpReply::Done)
            }
            FileOp::CopyDirectoryToBlob { path, prefix } => {
                let sas = self
                    .container_sas(&user, SasPermissions {
                        write: true,
                        list: true,
                        ..Default::default()
                    })
                    .await?;
                self.transfer
                    .upload_directory(&sas, Path::new(path), prefix)
                    .await?;
                Ok(OpReply::Done)
            }
            FileOp::CopyDirectoryFromBlob { path, prefix } => {
                let sas = self
                    .container_sas(&user, SasPermissions {
                        read: true,
                        list: true,
                        ..Default::default()
                    })
                    .await?;
                self.transfer
                    .download_directory(&sas, prefix, Path::new(path))
                    .await?;
                Ok(OpReply::Done)
            }
            FileOp::KeepAlive => Ok(OpReply::Done),
        }
    }

    async fn container_sas(
        &self,
        user: &UserIdentity,
        permissions: SasPermissions,
    ) -> Result<skiff_sas::ContainerSas, FaultRecord> {
        self.sas
            .get_container_sas(
                &self.config.cluster,
                &self.config.deployment,
                &user.name,
                permissions,
            )
            .await
            .map_err(|e| e.to_fault())
    }

    async fn read_file(&self, path: &str, span: ReadSpan) -> WireResponse {
        let path = PathBuf::from(path);
        // Tail and head scans are seek-heavy, so the whole read runs on the
        // blocking pool.
        let result = tokio::task::spawn_blocking(move || match span {
            ReadSpan::All => std::fs::read(&path).map_err(TailError::Io),
            ReadSpan::Tail(lines) => {
                let mut file = std::fs::File::open(&path)?;
                let mut out = Vec::new();
                copy_tail(&mut file, &mut out, lines, &ScanOptions::default())?;
                Ok(out)
            }
            ReadSpan::Head(lines) => {
                let mut file = std::fs::File::open(&path)?;
                let mut out = Vec::new();
                copy_head(&mut file, &mut out, lines, &ScanOptions::default())?;
                Ok(out)
            }
        })
        .await
        .map_err(|e| {
            FaultRecord::with_cause(FaultKind::InternalServerError, "read task failed", &e)
        })?;

        match result {
            Ok(data) => Ok(OpReply::Data(data)),
            Err(TailError::Io(e)) => Err(io_fault("could not read file", e)),
            Err(e) => Err(FaultRecord::with_cause(
                FaultKind::TargetIoFailure,
                "file content could not be scanned",
                &e,
            )),
        }
    }

    /// Replace-in-place with recovery: the previous content is renamed
    /// aside before the new content lands, and restored if anything fails.
    async fn write_file(&self, path: &str, data: Vec<u8>, overwrite: bool) -> WireResponse {
        let path = PathBuf::from(path);

        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_fault("could not inspect target path", e))?;
        if exists && !overwrite {
            return Err(FaultRecord::new(
                FaultKind::TargetExists,
                format!("{} already exists", path.display()),
            ));
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_fault("could not create parent directory", e))?;
        }

        let aside = aside_path(&path);
        if exists {
            tokio::fs::rename(&path, &aside)
                .await
                .map_err(|e| io_fault("could not set aside existing file", e))?;
        }

        match write_atomic(&path, &data).await {
            Ok(()) => {
                if exists && let Err(e) = tokio::fs::remove_file(&aside).await {
                    // Stale aside files are harmless but worth noticing.
                    warn!(path = %aside.display(), error = %e, "could not remove set-aside file");
                }
                debug!(path = %path.display(), size = data.len(), "wrote file");
                Ok(OpReply::Done)
            }
            Err(e) => {
                let fault = io_fault("could not write file", e);
                if exists {
                    let _ = tokio::fs::remove_file(&path).await;
                    if let Err(e) = tokio::fs::rename(&aside, &path).await {
                        // The original error is what the caller needs; the
                        // failed restore only gets logged.
                        warn!(path = %path.display(), error = %e, "could not restore original file");
                    }
                }
                Err(fault)
            }
        }
    }

    async fn delete_file(&self, path: &str) -> WireResponse {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| io_fault("could not delete file", e))?;
        Ok(OpReply::Done)
    }

    async fn delete_directory(&self, path: &str, recursive: bool) -> WireResponse {
        let result = if recursive {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_dir(path).await
        };
        result.map_err(|e| io_fault("could not delete directory", e))?;
        Ok(OpReply::Done)
    }

    async fn enumerate(&self, path: &str, pattern: Option<&str>, dirs: bool) -> WireResponse {
        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(path)
            .await
            .map_err(|e| io_fault("could not enumerate directory", e))?;

        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| io_fault("could not enumerate directory", e))?
        {
            let meta = entry
                .metadata()
                .await
                .map_err(|e| io_fault("could not stat directory entry", e))?;
            if meta.is_dir() != dirs {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(pattern) = pattern
                && !wildcard_match(pattern, &name)
            {
                continue;
            }
            entries.push(FileEntry {
                name,
                is_dir: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
                modified: meta.modified().ok(),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(OpReply::Entries(entries))
    }
}

/// Sibling path the previous content is parked at during a replace.
fn aside_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".replaced");
    path.with_file_name(name)
}

/// Sibling path new content is staged at before the rename into place.
/// The suffix is appended, not substituted, so `a.log` and `a.txt` never
/// share a staging path and a real file named `a.tmp` is left alone.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".skiff-tmp");
    path.with_file_name(name)
}

/// Atomic write: temp file in the same directory, then rename into place.
async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = staging_path(path);
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Which permission a local operation needs on which path, if any.
fn required_rights(op: &FileOp) -> Option<(&str, AccessRights)> {
    match op {
        FileOp::ReadFile { path, .. }
        | FileOp::GetFiles { path, .. }
        | FileOp::GetDirectories { path }
        | FileOp::CopyFileToBlob { path, .. }
        | FileOp::CopyDirectoryToBlob { path, .. } => Some((path, AccessRights::Read)),
        FileOp::WriteFile { path, .. }
        | FileOp::CopyFileFromBlob { path, .. }
        | FileOp::CopyDirectoryFromBlob { path, .. } => Some((path, AccessRights::Write)),
        FileOp::DeleteFile { path } | FileOp::DeleteDirectory { path, .. } => {
            Some((path, AccessRights::Delete))
        }
        FileOp::KeepAlive => None,
    }
}

/// Glob-lite matching: `*` matches any run of characters, `?` exactly one.
///
/// Iterative two-pointer scan with single-point backtracking to the most
/// recent `*`, so patterns arriving over the wire cannot blow the stack or
/// go exponential.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    let (p, n) = (pattern.as_bytes(), name.as_bytes());
    let (mut pi, mut ni) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ni < n.len() {
        if pi < p.len() && (p[pi] == b'?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == b'*' {
            star = Some((pi, ni));
            pi += 1;
        } else if let Some((sp, sn)) = star {
            // Let the last star absorb one more name byte and retry.
            pi = sp + 1;
            ni = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

fn io_fault(context: &str, e: std::io::Error) -> FaultRecord {
    let kind = match e.kind() {
        std::io::ErrorKind::AlreadyExists => FaultKind::TargetExists,
        std::io::ErrorKind::PermissionDenied => FaultKind::NotAuthorized,
        _ => FaultKind::TargetIoFailure,
    };
    FaultRecord::with_cause(kind, context, &e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*.log", "job42.log"));
        assert!(wildcard_match("job?.log", "job1.log"));
        assert!(!wildcard_match("job?.log", "job12.log"));
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("*a*", "xax"));
        assert!(wildcard_match("a*b*c", "a-b-b-c"));
        assert!(wildcard_match("exact.txt", "exact.txt"));
        assert!(!wildcard_match("*.log", "notes.txt"));
        assert!(!wildcard_match("", "x"));
        assert!(wildcard_match("", ""));
    }

    #[test]
    fn test_wildcard_match_degenerate_pattern_stays_fast() {
        // Would take longer than the heat death of the universe on a
        // backtracking matcher; here it must fail in linear-ish time.
        let pattern = "*a".repeat(24) + "b";
        let name = "a".repeat(120);
        assert!(!wildcard_match(&pattern, &name));

        let pattern = "*a".repeat(24);
        assert!(wildcard_match(&pattern, &name));
    }

    #[test]
    fn test_aside_path_keeps_directory() {
        let aside = aside_path(Path::new("/data/out.log"));
        assert_eq!(aside, Path::new("/data/out.log.replaced"));
    }

    #[test]
    fn test_staging_path_appends_suffix() {
        // Appending keeps targets with different extensions apart.
        let a = staging_path(Path::new("/data/a.log"));
        let b = staging_path(Path::new("/data/a.txt"));
        assert_eq!(a, Path::new("/data/a.log.skiff-tmp"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_write_atomic_spares_unrelated_tmp_file() {
        let dir = tempfile::tempdir().unwrap();
        let bystander = dir.path().join("a.tmp");
        std::fs::write(&bystander, b"user data").unwrap();

        let target = dir.path().join("a.log");
        write_atomic(&target, b"log line\r\n").await.unwrap();

        assert_eq!(std::fs::read(&bystander).unwrap(), b"user data");
        assert_eq!(std::fs::read(&target).unwrap(), b"log line\r\n");
    }

    #[test]
    fn test_io_fault_kinds() {
        let exists = std::io::Error::new(std::io::ErrorKind::AlreadyExists, "exists");
        assert_eq!(io_fault("x", exists).kind, FaultKind::TargetExists);
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(io_fault("x", denied).kind, FaultKind::NotAuthorized);
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(io_fault("x", missing).kind, FaultKind::TargetIoFailure);
    }
}

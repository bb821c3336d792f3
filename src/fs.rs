//! Filesystem operations tailored to `thrifty`.
//!
//! Inside this module, we refer to `std::fs` or `tokio::fs` by its fully
//! qualified path to make it maximally clear what we are using.

#![allow(
    clippy::disallowed_methods,
    reason = "The methods are disallowed elsewhere, but we need them here!"
)]

use std::fmt::Debug as StdDebug;

use color_eyre::{Result, eyre::Context};
use futures::{Stream, channel::mpsc, executor::block_on};
use tap::TapFallible;
use tokio::task::spawn_blocking;
use tracing::{error, instrument, trace};

use crate::path::{AbsDirPath, AbsFilePath};

/// Create the directory and all its parents, if they don't already exist.
#[instrument]
pub async fn create_dir_all(dir: &AbsDirPath) -> Result<()> {
    tokio::fs::create_dir_all(dir.as_std_path())
        .await
        .with_context(|| format!("create dir: {dir:?}"))
        .tap_ok(|_| trace!(?dir, "create directory"))
}

/// Walk files in a directory recursively.
///
/// Only emits regular files; symbolic links and directories are not emitted
/// in the stream. Does not apply any ignore-file filtering of its own —
/// callers that need `.dockerignore`-style exclusion compose this with
/// [`crate::ignore::IgnoreMatcher`].
#[instrument]
pub fn walk_files(root: &AbsDirPath) -> impl Stream<Item = Result<AbsFilePath>> + Unpin {
    let (mut tx, rx) = mpsc::channel::<Result<AbsFilePath>>(0);
    let root = root.clone();

    spawn_blocking(move || {
        let walker = ignore::WalkBuilder::new(root.as_std_path()).standard_filters(false).build();

        for entry in walker {
            let entry = match entry.with_context(|| format!("walk files in {root:?}")) {
                Ok(entry) => entry,
                Err(err) => {
                    if block_on(tx.send(Err(err))).is_err() {
                        error!("unable to walk files: receiver dropped");
                        return;
                    }
                    continue;
                }
            };

            if !entry.file_type().is_some_and(|kind| kind.is_file()) {
                continue;
            }

            let path = match AbsFilePath::try_from(entry.path()) {
                Ok(path) => path,
                Err(err) => {
                    if block_on(tx.send(Err(err))).is_err() {
                        error!("unable to walk files: receiver dropped");
                        return;
                    }
                    continue;
                }
            };

            if block_on(tx.send(Ok(path))).is_err() {
                error!("unable to walk files: receiver dropped");
                return;
            }
        }
    });

    rx
}

/// Return whether the path represents a directory.
///
/// Returns `false` if the directory doesn't exist or if there is an error
/// checking the metadata; to differentiate this case use [`metadata`].
#[instrument]
pub async fn is_dir(path: impl AsRef<std::path::Path> + StdDebug) -> bool {
    metadata(path).await.is_ok_and(|m| m.is_some_and(|m| m.is_dir()))
}

/// Return whether the path represents a normal file.
///
/// Returns `false` if the file doesn't exist; or if there is an error
/// checking the metadata; to differentiate this case use [`metadata`].
#[instrument]
pub async fn is_file(path: impl AsRef<std::path::Path> + StdDebug) -> bool {
    metadata(path).await.is_ok_and(|m| m.is_some_and(|m| m.is_file()))
}

/// Get the standard metadata for the file.
#[instrument]
pub async fn metadata(path: impl AsRef<std::path::Path> + StdDebug) -> Result<Option<std::fs::Metadata>> {
    let path = path.as_ref();
    match tokio::fs::metadata(path).await {
        Ok(metadata) => {
            trace!(?path, ?metadata, "stat metadata");
            Ok(Some(metadata))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).context(format!("stat metadata: {path:?}")),
    }
}

/// Buffer the file content from disk.
#[instrument]
pub async fn read_buffered(path: &AbsFilePath) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path.as_std_path()).await {
        Ok(buf) => {
            trace!(?path, bytes = buf.len(), "read file");
            Ok(Some(buf))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).context(format!("read file: {path:?}")),
    }
}

/// Buffer the file content from disk and parse it as UTF8.
/// Returns an error if the file doesn't exist.
#[instrument]
pub async fn must_read_buffered_utf8(path: &AbsFilePath) -> Result<String> {
    tokio::fs::read_to_string(path.as_std_path())
        .await
        .with_context(|| format!("read file: {path:?}"))
}

/// Write the provided file content to disk.
#[instrument(skip(content))]
pub async fn write(path: &AbsFilePath, content: impl AsRef<[u8]>) -> Result<()> {
    let content = content.as_ref();
    if let Some(parent) = path.parent() {
        create_dir_all(&parent).await.context("create parent directory")?;
    }
    tokio::fs::write(path.as_std_path(), content)
        .await
        .with_context(|| format!("write file: {path:?}"))
        .tap_ok(|_| trace!(?path, bytes = content.len(), "write file"))
}

/// Read the lower nine permission bits (owner/group/other rwx) of a path,
/// formatted as a decimal string, matching `chmod`-style octal-to-decimal
/// textual output used as a fingerprint input.
#[instrument]
pub async fn mode_bits(path: impl AsRef<std::path::Path> + StdDebug) -> Result<u32> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        let meta = tokio::fs::metadata(path.as_ref())
            .await
            .with_context(|| format!("stat {:?}", path.as_ref()))?;
        Ok(meta.permissions().mode() & 0o777)
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(0o644)
    }
}

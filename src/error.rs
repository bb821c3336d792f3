//! The error taxonomy for `thrifty`.
//!
//! Every fallible operation in the core (configuration construction,
//! planning, publishing, store access) surfaces one of these variants. The
//! binary composes them into [`color_eyre::Report`] at the process boundary;
//! library code should prefer `Result<T, ThriftyError>` so callers can match
//! on the kind of failure instead of parsing error strings.

use thiserror::Error;

use crate::model::Identifier;

/// The error taxonomy for the core build/fingerprint/publish pipeline.
#[derive(Debug, Error)]
pub enum ThriftyError {
    /// A build configuration was missing a `FROM` instruction, or its
    /// identifier was empty or malformed. Fatal at construction; the
    /// configuration never enters a [`crate::model::ConfigurationContainer`].
    #[error("invalid build configuration for {identifier}: {reason}")]
    InvalidBuildConfiguration {
        identifier: String,
        reason: String,
    },

    /// The planner was asked to build, or permit the build of, a
    /// configuration that is not present in the container.
    #[error("{identifier} is not a managed build configuration")]
    UnmanagedBuild { identifier: Identifier },

    /// A configuration's parent appears on the current build stack.
    #[error("circular dependency detected while building {identifier}: {stack:?}")]
    CircularDependency {
        identifier: Identifier,
        stack: Vec<Identifier>,
    },

    /// The build backend failed to build an image for a reason other than a
    /// Dockerfile parse error or a specific step failure.
    #[error("build failed for {identifier}: {message}")]
    BuildFailed { identifier: Identifier, message: String },

    /// The build backend rejected the Dockerfile itself.
    #[error("invalid dockerfile for {identifier}: {message}")]
    InvalidDockerfile { identifier: Identifier, message: String },

    /// A single build step failed with a known exit code.
    #[error("build step failed for {identifier} (exit {exit_code}): {message}")]
    BuildStep {
        identifier: Identifier,
        exit_code: i64,
        message: String,
    },

    /// A registry push event stream reported an error other than "image does
    /// not exist".
    #[error("upload error for {identifier} tag {tag}: {message}")]
    UploadError {
        identifier: Identifier,
        tag: String,
        message: String,
    },

    /// A registry push (or pull, for always-publish retagging) reported that
    /// the image does not exist.
    #[error("image not found: {identifier} tag {tag}")]
    ImageNotFound { identifier: Identifier, tag: String },

    /// The checksum storage JSON seeded via stdin could not be parsed.
    #[error("unreadable checksum storage on stdin: {0}")]
    UnreadableChecksumStorage(String),

    /// A fingerprint store backend was selected in configuration, but the
    /// optional dependency it requires (e.g. a KV store client) could not be
    /// constructed.
    #[error("missing optional dependency for {backend}: {reason}")]
    MissingOptionalDependency { backend: String, reason: String },

    /// Fingerprint computation or fingerprint store access failed for a
    /// reason rooted in I/O or serialization rather than the taxonomy above
    /// (a filesystem read failing, a KV request erroring out mid-planning).
    #[error("{0}")]
    StoreAccess(String),

    /// The command line arguments were not valid in combination (not part of
    /// the taxonomy carried over from the original, but needed at the CLI
    /// boundary).
    #[error("invalid command line arguments: {0}")]
    InvalidCliArgument(String),
}

impl ThriftyError {
    /// Whether this error should be reported for one registry without
    /// aborting attempts against the other configured registries.
    ///
    /// Per-registry publish errors are independent; everything else is fatal
    /// to the whole planner/publisher call.
    pub fn is_per_registry(&self) -> bool {
        matches!(self, ThriftyError::UploadError { .. } | ThriftyError::ImageNotFound { .. })
    }
}

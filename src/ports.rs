//! The external collaborator contracts: abstractions over the container
//! daemon and the registry protocol that the planner and publisher build
//! against, without caring which concrete client implements them.

use async_trait::async_trait;

use crate::{error::ThriftyError, model::BuildConfiguration};

/// The result of a successful build.
#[derive(Clone, Debug)]
pub struct BuildOutcome {
    /// The backend-assigned id of the built image (e.g. a Docker image ID).
    pub image_id: String,
}

/// Builds container images from a [`BuildConfiguration`].
///
/// Implementations are assumed to tolerate serial use from one caller; the
/// planner never calls `build` concurrently against the same backend.
#[async_trait]
pub trait BuildBackend: Send + Sync {
    /// Build the image described by `configuration`.
    ///
    /// Errors are reported as [`ThriftyError::BuildFailed`],
    /// [`ThriftyError::InvalidDockerfile`], or [`ThriftyError::BuildStep`],
    /// depending on what the backend can tell us about the failure.
    async fn build(&self, configuration: &BuildConfiguration) -> Result<BuildOutcome, ThriftyError>;
}

/// One line of a registry push event stream.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct PushEvent {
    /// A human-readable error message, present only on failed lines.
    pub error: Option<String>,
}

impl PushEvent {
    /// Classify this event per the publisher's error mapping: a line whose
    /// `error` field mentions "image does not exist" is an
    /// [`ThriftyError::ImageNotFound`]; any other `error` is an
    /// [`ThriftyError::UploadError`].
    pub fn into_error(self, identifier: &crate::model::Identifier, tag: &str) -> Option<ThriftyError> {
        let message = self.error?;
        if message.to_lowercase().contains("image does not exist") {
            Some(ThriftyError::ImageNotFound {
                identifier: identifier.clone(),
                tag: tag.to_string(),
            })
        } else {
            Some(ThriftyError::UploadError {
                identifier: identifier.clone(),
                tag: tag.to_string(),
                message,
            })
        }
    }
}

/// Tags, pushes, and (for always-publish retagging) pulls images against one
/// registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Tag the local image built for `identifier` as
    /// `<registry>/<name>:<tag>` and push it, decoding the push event
    /// stream. The first event carrying an `error` field is surfaced as a
    /// [`ThriftyError`] per [`PushEvent::into_error`].
    async fn tag_and_push(
        &self,
        registry_url: &str,
        identifier: &crate::model::Identifier,
        tag: &str,
    ) -> Result<(), ThriftyError>;

    /// Pull `<registry>/<name>:<tag>` and retag it locally as `identifier`,
    /// so that an always-publish configuration that was not just rebuilt can
    /// still be republished to other registries.
    async fn pull_for_retag(
        &self,
        registry_url: &str,
        identifier: &crate::model::Identifier,
        tag: &str,
    ) -> Result<(), ThriftyError>;
}

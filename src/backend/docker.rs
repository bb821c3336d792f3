//! The Docker daemon backend (C12): a single `bollard` client implementing
//! both [`BuildBackend`] and [`RegistryClient`], mirroring the reference
//! implementation's single `docker.from_env()` client doing both jobs.

use async_trait::async_trait;
use bollard::{
    Docker,
    auth::DockerCredentials,
    image::{BuildImageOptions, PushImageOptions, TagImageOptions},
    models::BuildInfoAux,
};
use flate2::{Compression, write::GzEncoder};
use futures::StreamExt;
use tracing::{instrument, warn};

use crate::{
    error::ThriftyError,
    ignore::IgnoreMatcher,
    model::BuildConfiguration,
    path::RelativeTo,
    ports::{BuildBackend, BuildOutcome, PushEvent, RegistryClient},
};

/// A [`BuildBackend`]/[`RegistryClient`] pair backed by one Docker daemon
/// connection.
pub struct DockerDaemonBackend {
    docker: Docker,
}

impl DockerDaemonBackend {
    /// Connect to the local Docker daemon using its platform default
    /// transport (Unix socket on Linux/macOS, named pipe on Windows).
    pub fn connect_local() -> Result<Self, ThriftyError> {
        let docker = Docker::connect_with_local_defaults().map_err(|err| ThriftyError::MissingOptionalDependency {
            backend: "docker".into(),
            reason: err.to_string(),
        })?;
        Ok(Self { docker })
    }
}

/// Build a gzip-compressed tar of `context_path`, skipping anything the
/// ignore matcher excludes.
#[instrument(skip(ignore))]
async fn build_context_tar(configuration: &BuildConfiguration, ignore: &IgnoreMatcher) -> Result<Vec<u8>, ThriftyError> {
    let context_path = configuration.context_path.clone();
    let mut files = crate::fs::walk_files(&context_path);
    let mut relative_paths = Vec::new();
    while let Some(file) = files.next().await {
        let file = file.map_err(|err| ThriftyError::BuildFailed {
            identifier: configuration.identifier.clone(),
            message: format!("walk build context: {err}"),
        })?;
        if ignore.is_ignored(&file, &context_path).map_err(|err| ThriftyError::BuildFailed {
            identifier: configuration.identifier.clone(),
            message: format!("evaluate ignore rules: {err}"),
        })? {
            continue;
        }
        relative_paths.push(file);
    }

    let identifier = configuration.identifier.clone();
    tokio::task::spawn_blocking(move || {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut archive = tar::Builder::new(encoder);
        for file in &relative_paths {
            let relative = file
                .relative_to(&context_path)
                .map_err(|err| ThriftyError::BuildFailed {
                    identifier: identifier.clone(),
                    message: format!("compute context-relative path: {err}"),
                })?;
            archive
                .append_path_with_name(file.as_std_path(), relative.as_std_path())
                .map_err(|err| ThriftyError::BuildFailed {
                    identifier: identifier.clone(),
                    message: format!("append {} to build context tar: {err}", file.as_std_path().display()),
                })?;
        }
        let encoder = archive.into_inner().map_err(|err| ThriftyError::BuildFailed {
            identifier: identifier.clone(),
            message: format!("finalize build context tar: {err}"),
        })?;
        encoder.finish().map_err(|err| ThriftyError::BuildFailed {
            identifier,
            message: format!("finalize build context gzip: {err}"),
        })
    })
    .await
    .map_err(|err| ThriftyError::BuildFailed {
        identifier: configuration.identifier.clone(),
        message: format!("build context tar task panicked: {err}"),
    })?
}

#[async_trait]
impl BuildBackend for DockerDaemonBackend {
    #[instrument(skip(self, configuration))]
    async fn build(&self, configuration: &BuildConfiguration) -> Result<BuildOutcome, ThriftyError> {
        let ignore = IgnoreMatcher::load(&configuration.context_path).map_err(|err| ThriftyError::BuildFailed {
            identifier: configuration.identifier.clone(),
            message: format!("load ignore file: {err}"),
        })?;
        let tar = build_context_tar(configuration, &ignore).await?;

        let dockerfile_name = configuration
            .dockerfile_path
            .relative_to(&configuration.context_path)
            .map(|p| p.as_str_lossy().into_owned())
            .unwrap_or_else(|_| "Dockerfile".to_string());

        let options = BuildImageOptions {
            t: configuration.identifier.as_str().to_string(),
            dockerfile: dockerfile_name,
            rm: true,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(tar.into()));
        let mut image_id = None;
        while let Some(event) = stream.next().await {
            let info = event.map_err(|err| ThriftyError::BuildFailed {
                identifier: configuration.identifier.clone(),
                message: err.to_string(),
            })?;

            if let Some(message) = info.error {
                let exit_code = info.error_detail.as_ref().and_then(|detail| detail.code);
                return Err(classify_build_error(configuration.identifier.clone(), message, exit_code));
            }

            if let Some(BuildInfoAux::Default(id)) = info.aux {
                if let Some(id) = id.id {
                    image_id = Some(id);
                }
            }
        }

        Ok(BuildOutcome {
            image_id: image_id.unwrap_or_else(|| configuration.identifier.as_str().to_string()),
        })
    }
}

#[async_trait]
impl RegistryClient for DockerDaemonBackend {
    #[instrument(skip(self))]
    async fn tag_and_push(&self, registry_url: &str, identifier: &crate::model::Identifier, tag: &str) -> Result<(), ThriftyError> {
        let remote = format!("{registry_url}/{}:{tag}", identifier.name());

        self.docker
            .tag_image(
                identifier.as_str(),
                Some(TagImageOptions {
                    repo: format!("{registry_url}/{}", identifier.name()),
                    tag: tag.to_string(),
                }),
            )
            .await
            .map_err(|err| ThriftyError::UploadError {
                identifier: identifier.clone(),
                tag: tag.to_string(),
                message: format!("tag {remote}: {err}"),
            })?;

        let mut stream = self.docker.push_image(
            &format!("{registry_url}/{}", identifier.name()),
            Some(PushImageOptions { tag: tag.to_string() }),
            credentials_placeholder(),
        );

        while let Some(event) = stream.next().await {
            let info = event.map_err(|err| ThriftyError::UploadError {
                identifier: identifier.clone(),
                tag: tag.to_string(),
                message: err.to_string(),
            })?;
            let push_event = PushEvent { error: info.error };
            if let Some(error) = push_event.into_error(identifier, tag) {
                return Err(error);
            }
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn pull_for_retag(&self, registry_url: &str, identifier: &crate::model::Identifier, tag: &str) -> Result<(), ThriftyError> {
        let remote = format!("{registry_url}/{}", identifier.name());
        let mut stream = self.docker.create_image(
            Some(bollard::image::CreateImageOptions {
                from_image: remote.clone(),
                tag: tag.to_string(),
                ..Default::default()
            }),
            None,
            credentials_placeholder(),
        );

        while let Some(event) = stream.next().await {
            let info = event.map_err(|err| ThriftyError::ImageNotFound {
                identifier: identifier.clone(),
                tag: tag.to_string(),
            })?;
            if let Some(message) = info.error {
                warn!(%identifier, %remote, %message, "pull for retag reported error");
                return Err(ThriftyError::ImageNotFound {
                    identifier: identifier.clone(),
                    tag: tag.to_string(),
                });
            }
        }

        self.docker
            .tag_image(
                &format!("{remote}:{tag}"),
                Some(TagImageOptions {
                    repo: identifier.name().to_string(),
                    tag: identifier.tag().to_string(),
                }),
            )
            .await
            .map_err(|err| ThriftyError::UploadError {
                identifier: identifier.clone(),
                tag: tag.to_string(),
                message: format!("retag pulled image: {err}"),
            })
    }
}

/// Docker credential resolution (registry auth configs) is wired in by the
/// CLI's configuration loader; the backend accepts `None` here and relies on
/// the daemon's own stored credential helper for public operation in tests.
fn credentials_placeholder() -> Option<DockerCredentials> {
    None
}

/// Classify one `{"error": ...}` build event into the taxonomy.
fn classify_build_error(identifier: crate::model::Identifier, message: String, exit_code: Option<i64>) -> ThriftyError {
    match exit_code {
        Some(code) => ThriftyError::BuildStep {
            identifier,
            exit_code: code,
            message,
        },
        None if message.to_lowercase().contains("dockerfile parse error") => ThriftyError::InvalidDockerfile { identifier, message },
        None => ThriftyError::BuildFailed { identifier, message },
    }
}

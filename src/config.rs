//! The configuration loader (C10): YAML + environment-variable templating,
//! path resolution, and the container/registry/checksum-storage shape it
//! produces.

use std::collections::BTreeMap;

use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use regex::Regex;
use serde::Deserialize;
use tera::{Context as TeraContext, Tera};
use tracing::instrument;

use crate::{
    dockerfile::Dockerfile,
    model::{BuildConfiguration, ConfigurationContainer, Identifier},
    path::{AbsDirPath, AbsFilePath},
    secret::Secret,
};

#[derive(Deserialize)]
struct RawImage {
    name: String,
    dockerfile: String,
    context: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    always_upload: bool,
}

#[derive(Deserialize)]
struct RawRegistry {
    url: String,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
struct RawDocker {
    images: Vec<RawImage>,
    #[serde(default)]
    registries: Vec<RawRegistry>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawChecksumStorage {
    Stdio,
    Local {
        path: String,
    },
    Consul {
        url: Option<String>,
        token: Option<String>,
        key: String,
        lock: String,
    },
}

#[derive(Deserialize)]
struct RawConfig {
    docker: RawDocker,
    checksum_storage: RawChecksumStorage,
}

/// One configured registry, as parsed from `docker.registries[]`.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<Secret>,
}

/// The checksum storage backend named by configuration, before a live
/// [`crate::store::FingerprintStore`] is constructed for it (construction is
/// deferred to the CLI, since the `stdio` kind also needs to consult stdin).
#[derive(Clone, Debug)]
pub enum ChecksumStorageConfig {
    Stdio,
    Local { path: AbsFilePath },
    Consul {
        url: Option<String>,
        token: Option<Secret>,
        key: String,
        lock: String,
    },
}

/// The fully resolved result of loading a configuration file.
pub struct Configuration {
    pub images: ConfigurationContainer,
    pub registries: Vec<RegistryConfig>,
    pub checksum_storage: ChecksumStorageConfig,
}

/// Load and resolve a configuration file at `path`.
///
/// Renders `{{ env['VAR'] }}` substitutions against the process environment,
/// parses the result as YAML, and resolves every relative path against
/// `path`'s parent directory.
#[instrument]
pub async fn load_configuration(path: &AbsFilePath) -> Result<Configuration> {
    let raw_text = crate::fs::must_read_buffered_utf8(path).await?;
    let rendered = render_env_template(&raw_text)?;
    let raw: RawConfig = serde_yaml::from_str(&rendered).context("parse configuration YAML")?;

    let base_dir = path.parent().ok_or_else(|| eyre!("configuration path {path} has no parent directory"))?;

    let mut images = ConfigurationContainer::new();
    for image in raw.docker.images {
        let identifier = Identifier::parse(image.name)?;
        let dockerfile_path = resolve_file(&base_dir, &image.dockerfile)?;
        let context_path = match image.context {
            Some(context) => resolve_dir(&base_dir, &context)?,
            None => dockerfile_path
                .parent()
                .ok_or_else(|| eyre!("dockerfile path {dockerfile_path} has no parent directory"))?,
        };
        let source = crate::fs::must_read_buffered_utf8(&dockerfile_path).await?;
        let dockerfile = Dockerfile::parse(&source)?;
        let configuration = BuildConfiguration::new(identifier, dockerfile_path, context_path, dockerfile, image.tags, image.always_upload)?;
        images.add(configuration);
    }

    let registries = raw
        .docker
        .registries
        .into_iter()
        .map(|registry| RegistryConfig {
            url: registry.url,
            username: registry.username,
            password: registry.password.map(Secret::new),
        })
        .collect();

    let checksum_storage = match raw.checksum_storage {
        RawChecksumStorage::Stdio => ChecksumStorageConfig::Stdio,
        RawChecksumStorage::Local { path } => ChecksumStorageConfig::Local {
            path: resolve_file(&base_dir, &path)?,
        },
        RawChecksumStorage::Consul { url, token, key, lock } => ChecksumStorageConfig::Consul {
            url,
            token: token.map(Secret::new),
            key,
            lock,
        },
    };

    Ok(Configuration {
        images,
        registries,
        checksum_storage,
    })
}

fn resolve_file(base_dir: &AbsDirPath, raw: &str) -> Result<AbsFilePath> {
    if std::path::Path::new(raw).is_absolute() {
        AbsFilePath::try_from(raw)
    } else {
        base_dir.try_join_file(raw)
    }
}

fn resolve_dir(base_dir: &AbsDirPath, raw: &str) -> Result<AbsDirPath> {
    if std::path::Path::new(raw).is_absolute() {
        AbsDirPath::try_from(raw)
    } else {
        base_dir.try_join_dir(raw)
    }
}

/// Render `{{ env['VAR'] }}` substitutions, mirroring
/// `jinja2.Template(...).render(env=os.environ)`: an unset variable renders
/// as an empty string rather than erroring.
///
/// Tera errors on an index into a missing map key, so rather than exposing
/// the whole process environment we first scan for the variable names the
/// template actually references and populate only those, defaulting unset
/// ones to `""`.
fn render_env_template(source: &str) -> Result<String> {
    let pattern = Regex::new(r#"env\[\s*['"]([A-Za-z_][A-Za-z0-9_]*)['"]\s*\]"#).context("compile env template pattern")?;

    let mut env: BTreeMap<String, String> = BTreeMap::new();
    for capture in pattern.captures_iter(source) {
        let name = capture[1].to_string();
        let value = std::env::var(&name).unwrap_or_default();
        env.insert(name, value);
    }

    let mut context = TeraContext::new();
    context.insert("env", &env);
    Tera::one_off(source, &context, false).context("render configuration template")
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn loads_minimal_configuration() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM alpine\n").unwrap();
        let config_text = "docker:\n  images:\n    - name: a:1\n      dockerfile: Dockerfile\n  registries: []\nchecksum_storage:\n  type: stdio\n";
        let config_path = dir.path().join("thrifty.yaml");
        std::fs::write(&config_path, config_text).unwrap();

        let path = AbsFilePath::try_from(config_path).unwrap();
        let configuration = load_configuration(&path).await.unwrap();
        assert_eq!(configuration.images.len(), 1);
        assert!(matches!(configuration.checksum_storage, ChecksumStorageConfig::Stdio));
    }

    #[tokio::test]
    async fn resolves_relative_dockerfile_and_context() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("images")).unwrap();
        std::fs::write(dir.path().join("images/Dockerfile"), "FROM alpine\n").unwrap();
        let config_text =
            "docker:\n  images:\n    - name: a:1\n      dockerfile: images/Dockerfile\n      context: images\nchecksum_storage:\n  type: stdio\n";
        let config_path = dir.path().join("thrifty.yaml");
        std::fs::write(&config_path, config_text).unwrap();

        let path = AbsFilePath::try_from(config_path).unwrap();
        let configuration = load_configuration(&path).await.unwrap();
        let id = Identifier::parse("a:1").unwrap();
        let cfg = configuration.images.get(&id).unwrap();
        assert_eq!(cfg.context_path.as_std_path(), dir.path().join("images"));
    }

    #[tokio::test]
    async fn env_template_substitutes_and_defaults_to_empty() {
        unsafe {
            std::env::set_var("THRIFTY_TEST_REGISTRY", "registry.example");
        }
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM alpine\n").unwrap();
        let config_text = "docker:\n  images:\n    - name: a:1\n      dockerfile: Dockerfile\n  registries:\n    - url: \"{{ env['THRIFTY_TEST_REGISTRY'] }}\"\n      password: \"{{ env['THRIFTY_TEST_MISSING'] }}\"\nchecksum_storage:\n  type: stdio\n";
        let config_path = dir.path().join("thrifty.yaml");
        std::fs::write(&config_path, config_text).unwrap();

        let path = AbsFilePath::try_from(config_path).unwrap();
        let configuration = load_configuration(&path).await.unwrap();
        assert_eq!(configuration.registries[0].url, "registry.example");
        assert_eq!(configuration.registries[0].password.as_ref().unwrap().expose(), "");
        unsafe {
            std::env::remove_var("THRIFTY_TEST_REGISTRY");
        }
    }

    #[tokio::test]
    async fn missing_from_instruction_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "RUN echo hi\n").unwrap();
        let config_text = "docker:\n  images:\n    - name: a:1\n      dockerfile: Dockerfile\nchecksum_storage:\n  type: stdio\n";
        let config_path = dir.path().join("thrifty.yaml");
        std::fs::write(&config_path, config_text).unwrap();

        let path = AbsFilePath::try_from(config_path).unwrap();
        assert!(load_configuration(&path).await.is_err());
    }
}

//! The core data model: image identifiers, build configurations, and the
//! ordered container that holds them.

use std::collections::BTreeSet;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    dockerfile::{Dockerfile, Instruction},
    error::ThriftyError,
    ignore::IgnoreMatcher,
    path::{AbsDirPath, AbsFilePath},
};

/// The default tag applied to an identifier with no explicit tag, mirroring
/// the container ecosystem convention.
pub const DEFAULT_TAG: &str = "latest";

/// An image identifier of the form `name[:tag]`.
///
/// `name` is opaque to the core; it is whatever the build backend and
/// registry accept. The colon separator is significant but a trailing colon
/// with an empty tag is rejected at construction.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display, Serialize, Deserialize)]
#[display("{raw}")]
#[serde(transparent)]
pub struct Identifier {
    raw: String,
}

impl std::fmt::Debug for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Identifier({})", self.raw)
    }
}

impl Identifier {
    /// Parse an identifier, rejecting an empty string or a trailing colon
    /// with no tag.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ThriftyError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ThriftyError::InvalidBuildConfiguration {
                identifier: raw,
                reason: "identifier is empty".into(),
            });
        }
        if let Some((_, tag)) = raw.rsplit_once(':') {
            if tag.is_empty() {
                return Err(ThriftyError::InvalidBuildConfiguration {
                    identifier: raw,
                    reason: "identifier has a trailing colon with no tag".into(),
                });
            }
        }
        Ok(Self { raw })
    }

    /// The raw `name[:tag]` string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The `name` portion, without any tag.
    pub fn name(&self) -> &str {
        self.raw.rsplit_once(':').map(|(name, _)| name).unwrap_or(&self.raw)
    }

    /// The `tag` portion, or the default tag if none was given.
    pub fn tag(&self) -> &str {
        self.raw.rsplit_once(':').map(|(_, tag)| tag).unwrap_or(DEFAULT_TAG)
    }
}

impl TryFrom<String> for Identifier {
    type Error = ThriftyError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}

impl TryFrom<&str> for Identifier {
    type Error = ThriftyError;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}

/// An immutable descriptor of one image build.
///
/// Constructed once from parsed user configuration and used read-only
/// thereafter; the planner and fingerprint engine never mutate one of these.
#[derive(Clone, Debug)]
pub struct BuildConfiguration {
    /// Uniquely keys the configuration within a [`ConfigurationContainer`].
    pub identifier: Identifier,

    /// Absolute path to the Dockerfile.
    pub dockerfile_path: AbsFilePath,

    /// Absolute path to the build context directory.
    pub context_path: AbsDirPath,

    /// Ordered, parsed Dockerfile instructions.
    pub instructions: Vec<Instruction>,

    /// The argument of the single `FROM` instruction.
    pub parent_reference: Identifier,

    /// Tag strings to publish under; always contains the identifier's own
    /// tag (or the default tag, if the identifier had none).
    pub tags: BTreeSet<String>,

    /// When true, the image is published even if its fingerprint matched the
    /// persisted store.
    pub always_publish: bool,
}

impl BuildConfiguration {
    /// Construct a build configuration from an identifier, a parsed
    /// Dockerfile, a context directory, and optional extra tags.
    ///
    /// Fails with [`ThriftyError::InvalidBuildConfiguration`] if the
    /// Dockerfile has no `FROM` instruction, or if `parent_reference` is
    /// empty or equal to `identifier` (a self-referential cycle, rejected
    /// here rather than deferred to planning).
    pub fn new(
        identifier: Identifier,
        dockerfile_path: AbsFilePath,
        context_path: AbsDirPath,
        dockerfile: Dockerfile,
        extra_tags: impl IntoIterator<Item = String>,
        always_publish: bool,
    ) -> Result<Self, ThriftyError> {
        let parent_raw = dockerfile.from_target().ok_or_else(|| ThriftyError::InvalidBuildConfiguration {
            identifier: identifier.as_str().to_string(),
            reason: "dockerfile has no FROM instruction".into(),
        })?;
        let parent_reference = Identifier::parse(parent_raw)?;
        if parent_reference == identifier {
            return Err(ThriftyError::InvalidBuildConfiguration {
                identifier: identifier.as_str().to_string(),
                reason: "FROM refers to itself".into(),
            });
        }

        let mut tags: BTreeSet<String> = extra_tags.into_iter().collect();
        tags.insert(identifier.tag().to_string());

        Ok(Self {
            identifier,
            dockerfile_path,
            context_path,
            instructions: dockerfile.into_instructions(),
            parent_reference,
            tags,
            always_publish,
        })
    }

    /// The identifiers this configuration requires to be built first.
    ///
    /// Currently always a single-element list (the parent); kept as a list
    /// for forward compatibility with multi-stage builds.
    pub fn required_identifiers(&self) -> Vec<&Identifier> {
        vec![&self.parent_reference]
    }

    /// The concrete set of context entries referenced by `ADD`/`COPY` source
    /// patterns, minus anything matched by the ignore file.
    ///
    /// Directories are expanded to their recursive regular-file descendants
    /// *and* kept in the set themselves (so that an empty directory, or a
    /// directory's mode, still contributes to the fingerprint); URL-form
    /// sources are skipped; symbolic links are not followed.
    #[instrument(skip(self, ignore))]
    pub async fn used_files(&self, ignore: &IgnoreMatcher) -> color_eyre::Result<BTreeSet<UsedEntry>> {
        let mut out = BTreeSet::new();
        for instruction in &self.instructions {
            let Some(sources) = instruction.copy_like_sources() else {
                continue;
            };
            for source in sources {
                if source.contains("://") {
                    // URL-form sources are fetched by the backend, not read locally.
                    continue;
                }
                let dir_candidate = self.context_path.try_join_dir(source)?;
                if crate::fs::is_dir(dir_candidate.as_std_path()).await {
                    if !ignore.is_ignored_dir(&dir_candidate, &self.context_path)? {
                        out.insert(UsedEntry::Dir(dir_candidate.clone()));
                    }
                    let mut files = crate::fs::walk_files(&dir_candidate);
                    use futures::TryStreamExt;
                    while let Some(file) = files.try_next().await? {
                        if !ignore.is_ignored(&file, &self.context_path)? {
                            out.insert(UsedEntry::File(file));
                        }
                    }
                    continue;
                }
                let file_candidate = self.context_path.try_join_file(source)?;
                if crate::fs::is_file(file_candidate.as_std_path()).await
                    && !ignore.is_ignored(&file_candidate, &self.context_path)?
                {
                    out.insert(UsedEntry::File(file_candidate));
                }
            }
        }
        Ok(out)
    }
}

/// One entry in a build configuration's resolved context, as returned by
/// [`BuildConfiguration::used_files`].
///
/// Ordered lexicographically on the absolute path, matching the fingerprint
/// engine's iteration order requirement.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UsedEntry {
    File(AbsFilePath),
    Dir(AbsDirPath),
}

impl UsedEntry {
    /// The absolute path of this entry, regardless of kind.
    pub fn as_std_path(&self) -> &std::path::Path {
        match self {
            UsedEntry::File(path) => path.as_std_path(),
            UsedEntry::Dir(path) => path.as_std_path(),
        }
    }

    /// Make this entry's path relative to `context_path`.
    pub fn relative_to(&self, context_path: &AbsDirPath) -> color_eyre::Result<std::path::PathBuf> {
        use crate::path::RelativeTo;
        Ok(match self {
            UsedEntry::File(path) => path.relative_to(context_path)?.into(),
            UsedEntry::Dir(path) => path.relative_to(context_path)?.into(),
        })
    }

    /// Whether this entry is a regular file (as opposed to a directory).
    pub fn is_file(&self) -> bool {
        matches!(self, UsedEntry::File(_))
    }
}

impl Ord for UsedEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_std_path().cmp(other.as_std_path())
    }
}

impl PartialOrd for UsedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// An ordered mapping from identifier to build configuration.
///
/// Iteration yields configurations in insertion order; adding a
/// configuration whose identifier already exists replaces the prior entry
/// and moves it to the end (re-dating its position).
#[derive(Clone, Debug, Default)]
pub struct ConfigurationContainer {
    order: Vec<Identifier>,
    entries: std::collections::HashMap<Identifier, BuildConfiguration>,
}

impl ConfigurationContainer {
    /// Create an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a configuration, replacing and re-dating any prior entry with
    /// the same identifier.
    pub fn add(&mut self, configuration: BuildConfiguration) {
        let id = configuration.identifier.clone();
        if self.entries.remove(&id).is_some() {
            self.order.retain(|existing| existing != &id);
        }
        self.order.push(id.clone());
        self.entries.insert(id, configuration);
    }

    /// Insert all the given configurations, in order.
    pub fn add_all(&mut self, configurations: impl IntoIterator<Item = BuildConfiguration>) {
        for configuration in configurations {
            self.add(configuration);
        }
    }

    /// Remove a configuration by identifier.
    ///
    /// Errors if the identifier is not present.
    pub fn remove(&mut self, identifier: &Identifier) -> Result<BuildConfiguration, ThriftyError> {
        let configuration = self.entries.remove(identifier).ok_or_else(|| ThriftyError::UnmanagedBuild {
            identifier: identifier.clone(),
        })?;
        self.order.retain(|existing| existing != identifier);
        Ok(configuration)
    }

    /// Look up a configuration by identifier.
    pub fn get(&self, identifier: &Identifier) -> Option<&BuildConfiguration> {
        self.entries.get(identifier)
    }

    /// Whether the container holds a configuration with this identifier.
    pub fn contains(&self, identifier: &Identifier) -> bool {
        self.entries.contains_key(identifier)
    }

    /// The number of managed configurations.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the container holds no configurations.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterate configurations in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &BuildConfiguration> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }
}

impl std::ops::Index<&Identifier> for ConfigurationContainer {
    type Output = BuildConfiguration;

    fn index(&self, identifier: &Identifier) -> &Self::Output {
        self.entries.get(identifier).expect("identifier is managed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Identifier {
        Identifier::parse(s).unwrap()
    }

    #[test]
    fn identifier_splits_name_and_tag() {
        let id = parse("alpine:3.19");
        assert_eq!(id.name(), "alpine");
        assert_eq!(id.tag(), "3.19");
    }

    #[test]
    fn identifier_defaults_tag() {
        let id = parse("alpine");
        assert_eq!(id.name(), "alpine");
        assert_eq!(id.tag(), DEFAULT_TAG);
    }

    #[test]
    fn identifier_rejects_empty() {
        assert!(Identifier::parse("").is_err());
    }

    #[test]
    fn identifier_rejects_trailing_colon() {
        assert!(Identifier::parse("alpine:").is_err());
    }

    #[test]
    fn container_replaces_and_redates_on_add() {
        let mut container = ConfigurationContainer::new();
        let a = parse("a:1");
        let b = parse("b:1");

        container.add(make_config(a.clone(), "alpine"));
        container.add(make_config(b.clone(), "alpine"));
        container.add(make_config(a.clone(), "debian"));

        let order: Vec<_> = container.iter().map(|c| c.identifier.clone()).collect();
        assert_eq!(order, vec![b, a.clone()]);
        assert_eq!(container.get(&a).unwrap().parent_reference.as_str(), "debian");
    }

    fn make_config(identifier: Identifier, from: &str) -> BuildConfiguration {
        let dockerfile = Dockerfile::parse(&format!("FROM {from}\n")).unwrap();
        BuildConfiguration::new(
            identifier,
            AbsFilePath::try_from("/tmp/Dockerfile").unwrap(),
            AbsDirPath::try_from("/tmp").unwrap(),
            dockerfile,
            [],
            false,
        )
        .unwrap()
    }
}

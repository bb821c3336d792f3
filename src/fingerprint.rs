//! The fingerprint engine (C6): deterministic content-addressed hashing of a
//! build configuration's Dockerfile, context inputs, and managed parent.

use std::{collections::HashMap, sync::Arc};

use color_eyre::Result;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::{
    hash::{Digest, Hasher},
    ignore::IgnoreMatcher,
    model::{ConfigurationContainer, Identifier},
};

/// Computes and memoizes fingerprints over a [`ConfigurationContainer`].
///
/// An engine is scoped to one planner invocation: its cache assumes the
/// container and the filesystem do not change underneath it, per the
/// fingerprint lifecycle in the data model.
pub struct FingerprintEngine {
    hasher: Arc<dyn Hasher>,
    cache: Mutex<HashMap<Identifier, Digest>>,
}

impl FingerprintEngine {
    /// Create a new engine using the given hasher factory.
    pub fn new(hasher: Arc<dyn Hasher>) -> Self {
        Self {
            hasher,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Compute (or return the cached) fingerprint for the configuration
    /// named by `identifier` within `container`.
    #[instrument(skip(self, container))]
    pub async fn fingerprint(&self, container: &ConfigurationContainer, identifier: &Identifier) -> Result<Digest> {
        if let Some(cached) = self.cache.lock().await.get(identifier).cloned() {
            return Ok(cached);
        }

        let configuration = container
            .get(identifier)
            .ok_or_else(|| color_eyre::eyre::eyre!("{identifier} is not managed"))?;

        let instruction_hash = {
            let mut acc = self.hasher.accumulator();
            for instruction in &configuration.instructions {
                acc.update(instruction.original.as_bytes());
            }
            acc.finalize()
        };

        let context_hash = {
            let ignore = IgnoreMatcher::load(&configuration.context_path)?;
            let used_files = configuration.used_files(&ignore).await?;
            let mut acc = self.hasher.accumulator();
            for entry in &used_files {
                if entry.is_file() {
                    let bytes = tokio::fs::read(entry.as_std_path()).await?;
                    acc.update(&bytes);
                }
                let relative = entry.relative_to(&configuration.context_path)?;
                acc.update(relative.to_string_lossy().as_bytes());
                let mode = crate::fs::mode_bits(entry.as_std_path()).await?;
                acc.update(mode.to_string().as_bytes());
            }
            acc.finalize()
        };

        let parent_hash = if container.contains(&configuration.parent_reference) {
            Box::pin(self.fingerprint(container, &configuration.parent_reference)).await?
        } else {
            Digest::empty()
        };

        let fingerprint = {
            let mut acc = self.hasher.accumulator();
            acc.update(instruction_hash.as_ref());
            acc.update(context_hash.as_ref());
            acc.update(parent_hash.as_ref());
            acc.finalize()
        };

        self.cache.lock().await.insert(identifier.clone(), fingerprint.clone());
        Ok(fingerprint)
    }

    /// Drop a single cached fingerprint, forcing recomputation on next
    /// access. Used by the planner after a rebuild so that dependents see
    /// the freshly built configuration's fingerprint.
    pub async fn invalidate(&self, identifier: &Identifier) {
        self.cache.lock().await.remove(identifier);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;
    use crate::{
        dockerfile::Dockerfile,
        hash::Blake3Hasher,
        model::{BuildConfiguration, Identifier},
        path::{AbsDirPath, AbsFilePath},
    };

    async fn engine() -> FingerprintEngine {
        FingerprintEngine::new(Arc::new(Blake3Hasher))
    }

    fn config(identifier: &str, from: &str, context: &AbsDirPath) -> BuildConfiguration {
        let dockerfile = Dockerfile::parse(&format!("FROM {from}\nCOPY f dest/\n")).unwrap();
        BuildConfiguration::new(
            Identifier::parse(identifier).unwrap(),
            context.try_join_file("Dockerfile").unwrap(),
            context.clone(),
            dockerfile,
            [],
            false,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn deterministic_for_fixed_content() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        let context = AbsDirPath::try_from(dir.path().to_path_buf()).unwrap();

        let mut container = ConfigurationContainer::new();
        container.add(config("a:1", "alpine", &context));
        let id = Identifier::parse("a:1").unwrap();

        let engine = engine().await;
        let first = engine.fingerprint(&container, &id).await.unwrap();
        let second = engine.fingerprint(&container, &id).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn file_content_change_changes_fingerprint() {
        let dir = tempdir().unwrap();
        let file_path: AbsFilePath = AbsFilePath::try_from(dir.path().join("f")).unwrap();
        std::fs::write(file_path.as_std_path(), b"x").unwrap();
        let context = AbsDirPath::try_from(dir.path().to_path_buf()).unwrap();

        let mut container = ConfigurationContainer::new();
        container.add(config("a:1", "alpine", &context));
        let id = Identifier::parse("a:1").unwrap();

        let engine = engine().await;
        let before = engine.fingerprint(&container, &id).await.unwrap();

        std::fs::write(file_path.as_std_path(), b"y").unwrap();
        let engine = FingerprintEngine::new(Arc::new(Blake3Hasher));
        let after = engine.fingerprint(&container, &id).await.unwrap();

        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn parent_fingerprint_change_propagates() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        let context = AbsDirPath::try_from(dir.path().to_path_buf()).unwrap();

        let mut container = ConfigurationContainer::new();
        container.add(config("base:1", "alpine", &context));
        container.add(config("child:1", "base:1", &context));
        let child = Identifier::parse("child:1").unwrap();

        let engine = engine().await;
        let before = engine.fingerprint(&container, &child).await.unwrap();

        let mut container2 = ConfigurationContainer::new();
        let dockerfile = Dockerfile::parse("FROM alpine\nRUN echo changed\n").unwrap();
        container2.add(
            BuildConfiguration::new(
                Identifier::parse("base:1").unwrap(),
                context.try_join_file("Dockerfile").unwrap(),
                context.clone(),
                dockerfile,
                [],
                false,
            )
            .unwrap(),
        );
        container2.add(config("child:1", "base:1", &context));

        let engine2 = FingerprintEngine::new(Arc::new(Blake3Hasher));
        let after = engine2.fingerprint(&container2, &child).await.unwrap();

        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn unmanaged_parent_yields_empty_parent_hash() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        let context = AbsDirPath::try_from(dir.path().to_path_buf()).unwrap();

        let mut container = ConfigurationContainer::new();
        container.add(config("a:1", "some/external:latest", &context));
        let id = Identifier::parse("a:1").unwrap();

        let engine = engine().await;
        // Should not error even though `some/external:latest` is unmanaged.
        engine.fingerprint(&container, &id).await.unwrap();
    }
}

//! The publisher (C9): tags and pushes each just-built (or always-publish)
//! image to each configured registry, then records its fingerprint.
//!
//! The sequence is build -> publish -> record. Recording only after a
//! successful publish is what makes the fingerprint store's invariant hold:
//! it never names an identifier that was not actually published.

use std::{collections::BTreeMap, sync::Arc};

use tracing::{instrument, warn};

use crate::{
    error::ThriftyError,
    fingerprint::FingerprintEngine,
    model::{ConfigurationContainer, Identifier},
    ports::{BuildOutcome, RegistryClient},
    store::FingerprintStore,
};

/// One registry to publish to, paired with the client that talks to it.
pub struct RegistryTarget {
    pub url: String,
    pub client: Arc<dyn RegistryClient>,
}

/// The outcome of one [`Publisher::publish`] call.
#[derive(Default, Debug)]
pub struct PublishReport {
    /// Configurations whose fingerprint was recorded to the store because
    /// every tag pushed to at least one registry.
    pub recorded: Vec<Identifier>,
    /// Configurations skipped outright: not just built, not always-publish,
    /// or an always-publish retag fetch failed against every registry.
    pub skipped: Vec<Identifier>,
    /// Per-registry push/pull failures that did not abort the whole run.
    pub registry_errors: Vec<(Identifier, String, ThriftyError)>,
}

/// Publishes managed configurations to a set of registries.
pub struct Publisher<'a> {
    container: &'a ConfigurationContainer,
    engine: &'a FingerprintEngine,
    store: &'a dyn FingerprintStore,
    registries: &'a [RegistryTarget],
}

impl<'a> Publisher<'a> {
    pub fn new(
        container: &'a ConfigurationContainer,
        engine: &'a FingerprintEngine,
        store: &'a dyn FingerprintStore,
        registries: &'a [RegistryTarget],
    ) -> Self {
        Self {
            container,
            engine,
            store,
            registries,
        }
    }

    /// Publish every managed configuration that is in `just_built` or
    /// carries `always_publish`, per the algorithm in the data model.
    #[instrument(skip(self, just_built))]
    pub async fn publish(&self, just_built: &BTreeMap<Identifier, BuildOutcome>) -> Result<PublishReport, ThriftyError> {
        let mut report = PublishReport::default();

        for configuration in self.container.iter() {
            let identifier = &configuration.identifier;
            let was_built = just_built.contains_key(identifier);
            if !was_built && !configuration.always_publish {
                continue;
            }

            if !was_built && configuration.always_publish {
                let source_tag = identifier.tag();
                let mut fetched = false;
                for registry in self.registries {
                    match registry.client.pull_for_retag(&registry.url, identifier, source_tag).await {
                        Ok(()) => {
                            fetched = true;
                            break;
                        }
                        Err(err) => {
                            warn!(%identifier, registry = %registry.url, %err, "retag fetch failed");
                        }
                    }
                }
                if !fetched {
                    report.skipped.push(identifier.clone());
                    continue;
                }
            }

            let mut published_to_any = false;
            for registry in self.registries {
                let mut all_tags_pushed = true;
                for tag in &configuration.tags {
                    match registry.client.tag_and_push(&registry.url, identifier, tag).await {
                        Ok(()) => {}
                        Err(err) if err.is_per_registry() => {
                            all_tags_pushed = false;
                            report.registry_errors.push((identifier.clone(), registry.url.clone(), err));
                            break;
                        }
                        Err(err) => return Err(err),
                    }
                }
                if all_tags_pushed {
                    published_to_any = true;
                }
            }

            if published_to_any {
                let fingerprint = self
                    .engine
                    .fingerprint(self.container, identifier)
                    .await
                    .map_err(|err| ThriftyError::StoreAccess(err.to_string()))?;
                self.store
                    .set(identifier, fingerprint)
                    .await
                    .map_err(|err| ThriftyError::StoreAccess(err.to_string()))?;
                report.recorded.push(identifier.clone());
            } else {
                report.skipped.push(identifier.clone());
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tempfile::tempdir;
    use tokio::sync::Mutex;

    use super::*;
    use crate::{
        dockerfile::Dockerfile,
        hash::Blake3Hasher,
        model::BuildConfiguration,
        path::AbsDirPath,
        store::MemoryStore,
    };

    struct FakeRegistry {
        fail_push: bool,
        fail_pull: bool,
        pushes: Mutex<Vec<(Identifier, String)>>,
    }

    impl FakeRegistry {
        fn new(fail_push: bool, fail_pull: bool) -> Self {
            Self {
                fail_push,
                fail_pull,
                pushes: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RegistryClient for FakeRegistry {
        async fn tag_and_push(&self, _registry_url: &str, identifier: &Identifier, tag: &str) -> Result<(), ThriftyError> {
            if self.fail_push {
                return Err(ThriftyError::UploadError {
                    identifier: identifier.clone(),
                    tag: tag.to_string(),
                    message: "connection reset".into(),
                });
            }
            self.pushes.lock().await.push((identifier.clone(), tag.to_string()));
            Ok(())
        }

        async fn pull_for_retag(&self, _registry_url: &str, identifier: &Identifier, tag: &str) -> Result<(), ThriftyError> {
            if self.fail_pull {
                return Err(ThriftyError::ImageNotFound {
                    identifier: identifier.clone(),
                    tag: tag.to_string(),
                });
            }
            Ok(())
        }
    }

    fn config(identifier: &str, always_publish: bool, context: &AbsDirPath) -> BuildConfiguration {
        let dockerfile = Dockerfile::parse("FROM alpine\n").unwrap();
        BuildConfiguration::new(
            Identifier::parse(identifier).unwrap(),
            context.try_join_file("Dockerfile").unwrap(),
            context.clone(),
            dockerfile,
            [],
            always_publish,
        )
        .unwrap()
    }

    fn context() -> AbsDirPath {
        let dir = tempdir().unwrap();
        let path = AbsDirPath::try_from(dir.path().to_path_buf()).unwrap();
        std::mem::forget(dir);
        path
    }

    #[tokio::test]
    async fn just_built_configuration_is_published_and_recorded() {
        let context = context();
        let mut container = ConfigurationContainer::new();
        container.add(config("a:1", false, &context));
        let id = Identifier::parse("a:1").unwrap();

        let engine = FingerprintEngine::new(Arc::new(Blake3Hasher));
        let store = MemoryStore::new();
        let registry = Arc::new(FakeRegistry::new(false, false));
        let targets = [RegistryTarget {
            url: "registry.example".into(),
            client: registry.clone(),
        }];
        let publisher = Publisher::new(&container, &engine, &store, &targets);

        let mut just_built = BTreeMap::new();
        just_built.insert(id.clone(), BuildOutcome { image_id: "sha256:abc".into() });

        let report = publisher.publish(&just_built).await.unwrap();
        assert_eq!(report.recorded, vec![id.clone()]);
        assert!(store.get(&id).await.unwrap().is_some());
        assert_eq!(registry.pushes.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn not_built_and_not_always_publish_is_skipped_without_pushing() {
        let context = context();
        let mut container = ConfigurationContainer::new();
        container.add(config("a:1", false, &context));

        let engine = FingerprintEngine::new(Arc::new(Blake3Hasher));
        let store = MemoryStore::new();
        let registry = Arc::new(FakeRegistry::new(false, false));
        let targets = [RegistryTarget {
            url: "registry.example".into(),
            client: registry.clone(),
        }];
        let publisher = Publisher::new(&container, &engine, &store, &targets);

        let report = publisher.publish(&BTreeMap::new()).await.unwrap();
        assert!(report.recorded.is_empty());
        assert!(registry.pushes.lock().await.is_empty());
    }

    #[tokio::test]
    async fn always_publish_retags_when_not_just_built() {
        let context = context();
        let mut container = ConfigurationContainer::new();
        container.add(config("a:1", true, &context));
        let id = Identifier::parse("a:1").unwrap();

        let engine = FingerprintEngine::new(Arc::new(Blake3Hasher));
        let store = MemoryStore::new();
        let registry = Arc::new(FakeRegistry::new(false, false));
        let targets = [RegistryTarget {
            url: "registry.example".into(),
            client: registry.clone(),
        }];
        let publisher = Publisher::new(&container, &engine, &store, &targets);

        let report = publisher.publish(&BTreeMap::new()).await.unwrap();
        assert_eq!(report.recorded, vec![id]);
    }

    #[tokio::test]
    async fn always_publish_skipped_when_retag_fetch_fails_everywhere() {
        let context = context();
        let mut container = ConfigurationContainer::new();
        container.add(config("a:1", true, &context));
        let id = Identifier::parse("a:1").unwrap();

        let engine = FingerprintEngine::new(Arc::new(Blake3Hasher));
        let store = MemoryStore::new();
        let registry = Arc::new(FakeRegistry::new(false, true));
        let targets = [RegistryTarget {
            url: "registry.example".into(),
            client: registry.clone(),
        }];
        let publisher = Publisher::new(&container, &engine, &store, &targets);

        let report = publisher.publish(&BTreeMap::new()).await.unwrap();
        assert_eq!(report.skipped, vec![id.clone()]);
        assert!(store.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn push_failure_is_per_registry_and_configuration_is_not_recorded() {
        let context = context();
        let mut container = ConfigurationContainer::new();
        container.add(config("a:1", false, &context));
        let id = Identifier::parse("a:1").unwrap();

        let engine = FingerprintEngine::new(Arc::new(Blake3Hasher));
        let store = MemoryStore::new();
        let registry = Arc::new(FakeRegistry::new(true, false));
        let targets = [RegistryTarget {
            url: "registry.example".into(),
            client: registry.clone(),
        }];
        let publisher = Publisher::new(&container, &engine, &store, &targets);

        let mut just_built = BTreeMap::new();
        just_built.insert(id.clone(), BuildOutcome { image_id: "sha256:abc".into() });

        let report = publisher.publish(&just_built).await.unwrap();
        assert!(report.recorded.is_empty());
        assert_eq!(report.skipped, vec![id]);
        assert_eq!(report.registry_errors.len(), 1);
    }
}

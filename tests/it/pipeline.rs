//! End-to-end coverage of the glue the binary wires together: load a real
//! YAML configuration, plan and build against a fake backend, publish to a
//! fake registry, and persist through a real [`FileStore`] on disk.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use thrifty::{
    config,
    error::ThriftyError,
    fingerprint::FingerprintEngine,
    hash::Blake3Hasher,
    model::Identifier,
    path::AbsFilePath,
    planner::Planner,
    ports::{BuildBackend, BuildOutcome, RegistryClient},
    publisher::{Publisher, RegistryTarget},
    store::FileStore,
};
use tokio::sync::Mutex;

use crate::temporary_directory;

struct FakeBackend {
    built: Mutex<Vec<Identifier>>,
}

impl FakeBackend {
    fn new() -> Self {
        Self { built: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl BuildBackend for FakeBackend {
    async fn build(&self, configuration: &thrifty::model::BuildConfiguration) -> Result<BuildOutcome, ThriftyError> {
        self.built.lock().await.push(configuration.identifier.clone());
        Ok(BuildOutcome {
            image_id: configuration.identifier.as_str().to_string(),
        })
    }
}

struct FakeRegistry {
    pushes: Mutex<Vec<Identifier>>,
}

impl FakeRegistry {
    fn new() -> Self {
        Self { pushes: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    async fn tag_and_push(&self, _registry_url: &str, identifier: &Identifier, _tag: &str) -> Result<(), ThriftyError> {
        self.pushes.lock().await.push(identifier.clone());
        Ok(())
    }

    async fn pull_for_retag(&self, _registry_url: &str, _identifier: &Identifier, _tag: &str) -> Result<(), ThriftyError> {
        Ok(())
    }
}

async fn run_once(
    config_path: &AbsFilePath,
    store_path: &AbsFilePath,
    backend: Arc<FakeBackend>,
    registry: Arc<FakeRegistry>,
) -> (BTreeMap<Identifier, BuildOutcome>, usize) {
    let configuration = config::load_configuration(config_path).await.unwrap();
    let store = Arc::new(FileStore::new(store_path.clone()));

    let build_engine = FingerprintEngine::new(Arc::new(Blake3Hasher));
    let planner = Planner::new(&configuration.images, build_engine, store, backend.clone() as Arc<dyn BuildBackend>);

    let built = planner.build_all().await.unwrap();

    let targets: Vec<RegistryTarget> = configuration
        .registries
        .iter()
        .map(|r| RegistryTarget {
            url: r.url.clone(),
            client: registry.clone() as Arc<dyn RegistryClient>,
        })
        .collect();

    let publish_engine = FingerprintEngine::new(Arc::new(Blake3Hasher));
    let publisher = Publisher::new(&configuration.images, &publish_engine, planner.store(), &targets);
    let report = publisher.publish(&built).await.unwrap();
    planner.store().flush().await.unwrap();

    (built, report.recorded.len())
}

#[tokio::test]
async fn unchanged_rebuild_is_a_no_op_across_separate_runs() {
    let (_dir, root) = temporary_directory();
    std::fs::write(root.as_std_path().join("Dockerfile"), "FROM alpine\nCOPY f /f\n").unwrap();
    std::fs::write(root.as_std_path().join("f"), "x").unwrap();
    std::fs::write(
        root.as_std_path().join("thrifty.yaml"),
        "docker:\n  images:\n    - name: a:1\n      dockerfile: Dockerfile\n  registries:\n    - url: registry.example\nchecksum_storage:\n  type: local\n  path: checksums.json\n",
    )
    .unwrap();

    let config_path = AbsFilePath::try_from(root.as_std_path().join("thrifty.yaml")).unwrap();
    let store_path = AbsFilePath::try_from(root.as_std_path().join("checksums.json")).unwrap();

    let backend = Arc::new(FakeBackend::new());
    let registry = Arc::new(FakeRegistry::new());

    let (built, recorded) = run_once(&config_path, &store_path, backend.clone(), registry.clone()).await;
    assert_eq!(built.len(), 1);
    assert_eq!(recorded, 1);
    assert_eq!(backend.built.lock().await.len(), 1);
    assert_eq!(registry.pushes.lock().await.len(), 1);

    let (built_again, recorded_again) = run_once(&config_path, &store_path, backend.clone(), registry.clone()).await;
    assert!(built_again.is_empty());
    assert_eq!(recorded_again, 0);
    assert_eq!(backend.built.lock().await.len(), 1, "second run must not invoke the backend again");
}

#[tokio::test]
async fn context_file_change_triggers_rebuild_on_next_run() {
    let (_dir, root) = temporary_directory();
    std::fs::write(root.as_std_path().join("Dockerfile"), "FROM alpine\nCOPY f /f\n").unwrap();
    std::fs::write(root.as_std_path().join("f"), "x").unwrap();
    std::fs::write(
        root.as_std_path().join("thrifty.yaml"),
        "docker:\n  images:\n    - name: a:1\n      dockerfile: Dockerfile\n  registries:\n    - url: registry.example\nchecksum_storage:\n  type: local\n  path: checksums.json\n",
    )
    .unwrap();

    let config_path = AbsFilePath::try_from(root.as_std_path().join("thrifty.yaml")).unwrap();
    let store_path = AbsFilePath::try_from(root.as_std_path().join("checksums.json")).unwrap();

    let backend = Arc::new(FakeBackend::new());
    let registry = Arc::new(FakeRegistry::new());
    run_once(&config_path, &store_path, backend.clone(), registry.clone()).await;

    std::fs::write(root.as_std_path().join("f"), "y").unwrap();

    let (built, recorded) = run_once(&config_path, &store_path, backend.clone(), registry.clone()).await;
    assert_eq!(built.len(), 1);
    assert_eq!(recorded, 1);
    assert_eq!(backend.built.lock().await.len(), 2);
}

//! The binary entrypoint for `thrifty`, the Dockerfile-fingerprinting image
//! builder.

use std::{collections::BTreeMap, io::IsTerminal, path::PathBuf, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use thrifty::{
    backend::DockerDaemonBackend,
    config::{self, ChecksumStorageConfig, Configuration},
    error::ThriftyError,
    fingerprint::FingerprintEngine,
    hash::Blake3Hasher,
    model::Identifier,
    path::{AbsDirPath, AbsFilePath},
    planner::Planner,
    ports::BuildBackend,
    publisher::{Publisher, RegistryTarget},
    store::{FileStore, FingerprintStore, MemoryStore, build_kv_lock_store},
};
use tracing::{info, instrument};
use tracing_subscriber::util::SubscriberInitExt;
use url::Url;

mod log;

const DEFAULT_CONSUL_URL: &str = "http://127.0.0.1:8500";

/// Build container images described by a configuration file, skipping any
/// whose content fingerprint already matches what was last published.
#[derive(Clone, Debug, Parser)]
#[command(name = "thrifty", version, about = "Thrifty image builder")]
struct Cli {
    /// Path to the YAML configuration file.
    configuration_location: PathBuf,

    /// Increase log verbosity (repeatable).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease log verbosity (repeatable).
    #[arg(short = 'q', long = "quiet", action = clap::ArgAction::Count)]
    quiet: u8,

    /// Force the `local` checksum storage backend at this path, overriding
    /// the configuration file.
    #[arg(long)]
    checksums_from_path: Option<PathBuf>,

    /// Force the `consul` checksum storage backend using this data key,
    /// overriding the configuration file.
    #[arg(long)]
    checksums_from_consul_key: Option<String>,

    /// Print only just-built images' fingerprints, instead of every managed
    /// image's fingerprint.
    #[arg(long, default_value_t = false)]
    built_only: bool,

    /// When to colorize log output.
    #[arg(long, value_enum, default_value_t = log::WhenColor::Auto)]
    color: log::WhenColor,
}

#[instrument]
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let verbosity = i8::try_from(cli.verbose).unwrap_or(i8::MAX) - i8::try_from(cli.quiet).unwrap_or(i8::MAX);
    log::make_logger(std::io::stderr, verbosity, cli.color)?.init();

    if cli.checksums_from_path.is_some() && cli.checksums_from_consul_key.is_some() {
        return Err(ThriftyError::InvalidCliArgument(
            "--checksums-from-path and --checksums-from-consul-key are mutually exclusive".into(),
        )
        .into());
    }

    let config_path = resolve_abs_file(&cli.configuration_location)?;
    let configuration = config::load_configuration(&config_path).await?;

    let storage_config = resolve_checksum_storage(&cli, &configuration)?;
    let store: Arc<dyn FingerprintStore> = build_store(storage_config).await?;

    let backend = Arc::new(DockerDaemonBackend::connect_local()?);
    let build_engine = FingerprintEngine::new(Arc::new(Blake3Hasher));
    let planner = Planner::new(&configuration.images, build_engine, store.clone(), Arc::clone(&backend) as Arc<dyn BuildBackend>);

    let built = planner.build_all().await?;
    info!(count = built.len(), "build complete");

    let registry_targets: Vec<RegistryTarget> = configuration
        .registries
        .iter()
        .map(|registry| RegistryTarget {
            url: registry.url.clone(),
            client: Arc::clone(&backend) as Arc<dyn thrifty::ports::RegistryClient>,
        })
        .collect();

    let publish_engine = FingerprintEngine::new(Arc::new(Blake3Hasher));
    let publisher = Publisher::new(&configuration.images, &publish_engine, planner.store(), &registry_targets);
    let report = publisher.publish(&built).await?;
    info!(recorded = report.recorded.len(), skipped = report.skipped.len(), "publish complete");

    planner.store().flush().await?;

    let selected: Vec<&Identifier> = if cli.built_only {
        built.keys().collect()
    } else {
        configuration.images.iter().map(|cfg| &cfg.identifier).collect()
    };

    let mut fingerprints = BTreeMap::new();
    for identifier in selected {
        let digest = publish_engine.fingerprint(&configuration.images, identifier).await?;
        fingerprints.insert(identifier.clone(), digest);
    }

    println!("{}", serde_json::to_string(&fingerprints).context("serialize final fingerprint report")?);

    Ok(())
}

fn resolve_abs_file(path: &std::path::Path) -> Result<AbsFilePath> {
    if path.is_absolute() {
        AbsFilePath::try_from(path)
    } else {
        let cwd = AbsDirPath::current()?;
        cwd.try_join_file(path.to_string_lossy())
    }
}

fn resolve_checksum_storage(cli: &Cli, configuration: &Configuration) -> Result<ChecksumStorageConfig> {
    if let Some(path) = &cli.checksums_from_path {
        return Ok(ChecksumStorageConfig::Local {
            path: resolve_abs_file(path)?,
        });
    }

    if let Some(key) = &cli.checksums_from_consul_key {
        let (url, token, lock) = match &configuration.checksum_storage {
            ChecksumStorageConfig::Consul { url, token, lock, .. } => (url.clone(), token.clone(), lock.clone()),
            _ => (None, None, format!("{key}.lock")),
        };
        return Ok(ChecksumStorageConfig::Consul {
            url,
            token,
            key: key.clone(),
            lock,
        });
    }

    Ok(configuration.checksum_storage.clone())
}

async fn build_store(config: ChecksumStorageConfig) -> Result<Arc<dyn FingerprintStore>> {
    match config {
        ChecksumStorageConfig::Stdio => {
            let store = if std::io::stdin().is_terminal() {
                MemoryStore::new()
            } else {
                let mut raw = String::new();
                std::io::Read::read_to_string(&mut std::io::stdin(), &mut raw)
                    .map_err(|err| ThriftyError::UnreadableChecksumStorage(err.to_string()))?;
                let raw = raw.trim();
                if raw.is_empty() {
                    MemoryStore::new()
                } else {
                    let entries = serde_json::from_str(raw).map_err(|err| ThriftyError::UnreadableChecksumStorage(err.to_string()))?;
                    MemoryStore::seeded(entries)
                }
            };
            Ok(Arc::new(store))
        }
        ChecksumStorageConfig::Local { path } => Ok(Arc::new(FileStore::new(path))),
        ChecksumStorageConfig::Consul { url, token, key, lock } => {
            let url = Url::parse(url.as_deref().unwrap_or(DEFAULT_CONSUL_URL)).map_err(|err| eyre!("parse consul url: {err}"))?;
            let store = build_kv_lock_store(url, key, lock, token)?;
            Ok(Arc::new(store))
        }
    }
}

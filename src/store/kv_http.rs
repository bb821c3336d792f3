//! The distributed, lock-coordinated fingerprint store: a single JSON blob
//! held at one key of a Consul-like HTTP KV store, with every write guarded
//! by a named distributed lock.
//!
//! This is the only backend safe for cross-process sharing: mutations are
//! serialized by the lock session, and reads observe the last committed
//! blob.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use serde::Deserialize;
use tracing::{instrument, warn};
use url::Url;

use super::FingerprintStore;
use crate::{error::ThriftyError, hash::Digest, model::Identifier, secret::Secret};

/// The environment variable consulted for the KV token when none is passed
/// explicitly, mirroring Consul's own CLI/SDK convention.
pub const TOKEN_ENV_VAR: &str = "CONSUL_HTTP_TOKEN";

/// Default session TTL for the distributed lock, so a crashed holder cannot
/// block forever.
const DEFAULT_LOCK_TTL_SECS: u64 = 120;

#[derive(Deserialize)]
struct KvEntry {
    #[serde(rename = "Value")]
    value: Option<String>,
}

#[derive(Deserialize)]
struct SessionCreateResponse {
    #[serde(rename = "ID")]
    id: String,
}

/// A [`FingerprintStore`] backed by a Consul-like KV-with-lock HTTP API.
pub struct KvLockStore {
    http: reqwest::Client,
    base_url: Url,
    token: Option<Secret>,
    data_key: String,
    lock_key: String,
}

impl KvLockStore {
    /// Construct a store talking to `base_url`, storing the blob at
    /// `data_key` and coordinating writes via a session held on `lock_key`.
    ///
    /// If `token` is `None`, falls back to the `CONSUL_HTTP_TOKEN`
    /// environment variable; a [`ThriftyError::MissingOptionalDependency`]
    /// is *not* raised here even if no token is available, since many KV
    /// deployments allow anonymous reads/writes on a private network.
    pub fn new(base_url: Url, data_key: impl Into<String>, lock_key: impl Into<String>, token: Option<Secret>) -> Result<Self> {
        let token = token.or_else(|| std::env::var(TOKEN_ENV_VAR).ok().map(Secret::new));
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| eyre!("build KV http client: {err}"))?;
        Ok(Self {
            http,
            base_url,
            token,
            data_key: data_key.into(),
            lock_key: lock_key.into(),
        })
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.header("X-Consul-Token", token.expose()),
            None => builder,
        }
    }

    #[instrument(skip(self))]
    async fn read_blob(&self) -> Result<BTreeMap<Identifier, Digest>> {
        let url = self
            .base_url
            .join(&format!("v1/kv/{}", self.data_key))
            .context("build KV read url")?;
        let response = self.authed(self.http.get(url)).send().await.context("GET kv entry")?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(BTreeMap::new());
        }
        let entries: Vec<KvEntry> = response
            .error_for_status()
            .context("GET kv entry status")?
            .json()
            .await
            .context("parse kv entry list")?;
        let Some(entry) = entries.into_iter().next() else {
            return Ok(BTreeMap::new());
        };
        let Some(encoded) = entry.value else {
            return Ok(BTreeMap::new());
        };
        let decoded = BASE64.decode(encoded).context("base64-decode kv value")?;
        serde_json::from_slice(&decoded).context("parse fingerprint store JSON")
    }

    #[instrument(skip(self, entries))]
    async fn write_blob(&self, entries: &BTreeMap<Identifier, Digest>) -> Result<()> {
        let url = self
            .base_url
            .join(&format!("v1/kv/{}", self.data_key))
            .context("build KV write url")?;
        let body = serde_json::to_vec(entries).context("serialize fingerprint store JSON")?;
        self.authed(self.http.put(url))
            .body(body)
            .send()
            .await
            .context("PUT kv entry")?
            .error_for_status()
            .context("PUT kv entry status")?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn acquire_lock(&self) -> Result<String> {
        let session_url = self
            .base_url
            .join("v1/session/create")
            .context("build session create url")?;
        let response: SessionCreateResponse = self
            .authed(self.http.put(session_url))
            .json(&serde_json::json!({ "TTL": format!("{DEFAULT_LOCK_TTL_SECS}s") }))
            .send()
            .await
            .context("create session")?
            .error_for_status()
            .context("create session status")?
            .json()
            .await
            .context("parse session create response")?;

        let acquire_url = self
            .base_url
            .join(&format!("v1/kv/{}?acquire={}", self.lock_key, response.id))
            .context("build lock acquire url")?;
        let acquired: bool = self
            .authed(self.http.put(acquire_url))
            .send()
            .await
            .context("acquire lock")?
            .error_for_status()
            .context("acquire lock status")?
            .json()
            .await
            .context("parse lock acquire response")?;

        if !acquired {
            return Err(eyre!("could not acquire lock {}", self.lock_key));
        }
        Ok(response.id)
    }

    #[instrument(skip(self))]
    async fn release_lock(&self, session_id: &str) {
        let release_url = match self.base_url.join(&format!("v1/kv/{}?release={session_id}", self.lock_key)) {
            Ok(url) => url,
            Err(err) => {
                warn!(%err, "build lock release url");
                return;
            }
        };
        if let Err(err) = self.authed(self.http.put(release_url)).send().await {
            warn!(%err, "release lock");
        }
    }
}

/// Construct a [`KvLockStore`] and map construction failures onto
/// [`ThriftyError::MissingOptionalDependency`], for use at store
/// construction time when `checksum_storage.type = consul`.
pub fn build(base_url: Url, data_key: impl Into<String>, lock_key: impl Into<String>, token: Option<Secret>) -> Result<KvLockStore, ThriftyError> {
    KvLockStore::new(base_url, data_key, lock_key, token).map_err(|err| ThriftyError::MissingOptionalDependency {
        backend: "consul".into(),
        reason: err.to_string(),
    })
}

#[async_trait]
impl FingerprintStore for KvLockStore {
    async fn get(&self, id: &Identifier) -> Result<Option<Digest>> {
        Ok(self.read_blob().await?.get(id).cloned())
    }

    async fn get_all(&self) -> Result<BTreeMap<Identifier, Digest>> {
        self.read_blob().await
    }

    async fn set(&self, id: &Identifier, fingerprint: Digest) -> Result<()> {
        let mut one = BTreeMap::new();
        one.insert(id.clone(), fingerprint);
        self.set_all(one).await
    }

    async fn set_all(&self, incoming: BTreeMap<Identifier, Digest>) -> Result<()> {
        let session_id = self.acquire_lock().await?;
        let result: Result<()> = async {
            let mut current = self.read_blob().await?;
            current.extend(incoming);
            self.write_blob(&current).await
        }
        .await;
        self.release_lock(&session_id).await;
        result
    }
}

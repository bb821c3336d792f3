//! The fingerprint store (C7): a typed mapping from identifier to
//! fingerprint, with three interchangeable backends.

mod file;
mod kv_http;
mod layered;
mod memory;

pub use file::FileStore;
pub use kv_http::{KvLockStore, build as build_kv_lock_store};
pub use layered::LayeredStore;
pub use memory::MemoryStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use color_eyre::Result;

use crate::{hash::Digest, model::Identifier};

/// Persistent mapping from identifier to fingerprint.
///
/// `set`/`set_all` semantics are last-writer-wins per key, merged with
/// whatever keys already exist; no backend supports deleting an entry,
/// matching the invariant that the store never records an identifier that
/// was not successfully published.
#[async_trait]
pub trait FingerprintStore: Send + Sync {
    /// Look up the fingerprint for `id`, if the store has one.
    async fn get(&self, id: &Identifier) -> Result<Option<Digest>>;

    /// Every entry currently in the store.
    async fn get_all(&self) -> Result<BTreeMap<Identifier, Digest>>;

    /// Record a single fingerprint.
    async fn set(&self, id: &Identifier, fingerprint: Digest) -> Result<()>;

    /// Record multiple fingerprints at once.
    async fn set_all(&self, entries: BTreeMap<Identifier, Digest>) -> Result<()>;
}

/// The JSON serialization of `store.get_all()` with sorted keys.
///
/// `BTreeMap` already iterates in key order and `serde_json` preserves map
/// iteration order, so this is just a named entry point for the
/// "`str(store)`" behavior used for equality checks and debugging.
pub async fn to_sorted_json(store: &dyn FingerprintStore) -> Result<String> {
    let all = store.get_all().await?;
    Ok(serde_json::to_string(&all)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sorted_json_is_stable_regardless_of_insertion_order() {
        let a = MemoryStore::new();
        a.set(&Identifier::parse("b:1").unwrap(), Digest::empty()).await.unwrap();
        a.set(&Identifier::parse("a:1").unwrap(), Digest::empty()).await.unwrap();

        let b = MemoryStore::new();
        b.set(&Identifier::parse("a:1").unwrap(), Digest::empty()).await.unwrap();
        b.set(&Identifier::parse("b:1").unwrap(), Digest::empty()).await.unwrap();

        assert_eq!(to_sorted_json(&a).await.unwrap(), to_sorted_json(&b).await.unwrap());
    }
}

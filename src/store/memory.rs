//! The in-memory fingerprint store: a trivial map, no durability.

use std::collections::BTreeMap;

use async_trait::async_trait;
use color_eyre::Result;
use tokio::sync::RwLock;

use super::FingerprintStore;
use crate::{hash::Digest, model::Identifier};

/// An in-memory [`FingerprintStore`].
///
/// Useful as the `stdio` checksum storage backend (seeded from stdin) and as
/// the overlay half of [`super::LayeredStore`].
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Identifier, Digest>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with the given entries, e.g. from a
    /// stdin-seeded JSON object.
    pub fn seeded(entries: BTreeMap<Identifier, Digest>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }
}

#[async_trait]
impl FingerprintStore for MemoryStore {
    async fn get(&self, id: &Identifier) -> Result<Option<Digest>> {
        Ok(self.entries.read().await.get(id).cloned())
    }

    async fn get_all(&self) -> Result<BTreeMap<Identifier, Digest>> {
        Ok(self.entries.read().await.clone())
    }

    async fn set(&self, id: &Identifier, fingerprint: Digest) -> Result<()> {
        self.entries.write().await.insert(id.clone(), fingerprint);
        Ok(())
    }

    async fn set_all(&self, entries: BTreeMap<Identifier, Digest>) -> Result<()> {
        self.entries.write().await.extend(entries);
        Ok(())
    }
}

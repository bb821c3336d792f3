//! The layered store: an in-memory overlay on top of a persistent store,
//! used during one planner invocation so that a child's fingerprint
//! computation sees its just-built parent's state before the persistent
//! store is ever touched.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use color_eyre::Result;
use tokio::sync::RwLock;

use super::{FingerprintStore, MemoryStore};
use crate::{hash::Digest, model::Identifier};

/// Two stores queried in order: an in-memory overlay, then a persistent
/// store.
///
/// The overlay itself has two parts. [`LayeredStore::stage`] writes a
/// fingerprint so later reads in this planner invocation see it (a rebuilt
/// parent must be visible to its child's fingerprint computation before
/// anything has been published), but does *not* mark it for commit: the
/// planner stages a parent's fingerprint purely to keep build ordering
/// self-consistent, long before the publisher has pushed anything for it.
/// The [`FingerprintStore::set`]/`set_all` trait methods, which the publisher
/// calls once a configuration has actually been published, additionally add
/// the entry to the commit set. Only the commit set is written to the
/// persistent store by [`LayeredStore::flush`] — so a rebuilt image that was
/// never (or not yet) published can never be mistaken for an up-to-date one
/// on the next invocation.
pub struct LayeredStore {
    overlay: MemoryStore,
    committed: RwLock<BTreeMap<Identifier, Digest>>,
    persistent: Arc<dyn FingerprintStore>,
}

impl LayeredStore {
    /// Wrap `persistent` with a fresh, empty overlay.
    pub fn new(persistent: Arc<dyn FingerprintStore>) -> Self {
        Self {
            overlay: MemoryStore::new(),
            committed: RwLock::new(BTreeMap::new()),
            persistent,
        }
    }

    /// Write `fingerprint` into the read-through overlay only, without
    /// marking it for commit. Used by the planner to record a just-built
    /// parent's fingerprint so sibling fingerprint computations see it,
    /// ahead of and independent from whether that parent is ever published.
    pub async fn stage(&self, id: &Identifier, fingerprint: Digest) -> Result<()> {
        self.overlay.set(id, fingerprint).await
    }

    /// Write every entry in the commit set to the persistent store, then
    /// clear it. Staged-but-uncommitted entries are left untouched.
    pub async fn flush(&self) -> Result<()> {
        let pending = std::mem::take(&mut *self.committed.write().await);
        if pending.is_empty() {
            return Ok(());
        }
        self.persistent.set_all(pending).await
    }
}

#[async_trait]
impl FingerprintStore for LayeredStore {
    async fn get(&self, id: &Identifier) -> Result<Option<Digest>> {
        if let Some(value) = self.overlay.get(id).await? {
            return Ok(Some(value));
        }
        self.persistent.get(id).await
    }

    async fn get_all(&self) -> Result<BTreeMap<Identifier, Digest>> {
        let mut merged = self.persistent.get_all().await?;
        merged.extend(self.overlay.get_all().await?);
        Ok(merged)
    }

    async fn set(&self, id: &Identifier, fingerprint: Digest) -> Result<()> {
        self.overlay.set(id, fingerprint).await?;
        self.committed.write().await.insert(id.clone(), fingerprint);
        Ok(())
    }

    async fn set_all(&self, entries: BTreeMap<Identifier, Digest>) -> Result<()> {
        self.overlay.set_all(entries.clone()).await?;
        self.committed.write().await.extend(entries);
        Ok(())
    }
}

//! The file-backed fingerprint store: a JSON object persisted to a single
//! path. Each `set` reads, mutates, and rewrites the whole file.
//!
//! Concurrent access across processes is *not* safe, by contract: two
//! processes racing a read-modify-write cycle can clobber each other's
//! writes. Within one process, writes are serialized by an internal lock.

use std::collections::BTreeMap;

use async_trait::async_trait;
use color_eyre::{Result, eyre::Context};
use tokio::sync::Mutex;
use tracing::instrument;

use super::FingerprintStore;
use crate::{
    hash::Digest,
    model::Identifier,
    path::AbsFilePath,
};

/// A [`FingerprintStore`] backed by a single JSON file.
pub struct FileStore {
    path: AbsFilePath,
    // Guards the read-modify-write cycle within this process; the backend
    // contract explicitly does not extend this guarantee across processes.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (but do not yet create) a file store at `path`.
    pub fn new(path: AbsFilePath) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    #[instrument(skip(self))]
    async fn read(&self) -> Result<BTreeMap<Identifier, Digest>> {
        match crate::fs::read_buffered(&self.path).await? {
            Some(bytes) => serde_json::from_slice(&bytes).context("parse fingerprint store JSON"),
            None => Ok(BTreeMap::new()),
        }
    }

    #[instrument(skip(self, entries))]
    async fn write(&self, entries: &BTreeMap<Identifier, Digest>) -> Result<()> {
        let json = serde_json::to_vec_pretty(entries).context("serialize fingerprint store JSON")?;
        crate::fs::write(&self.path, json).await
    }
}

#[async_trait]
impl FingerprintStore for FileStore {
    async fn get(&self, id: &Identifier) -> Result<Option<Digest>> {
        Ok(self.read().await?.get(id).cloned())
    }

    async fn get_all(&self) -> Result<BTreeMap<Identifier, Digest>> {
        self.read().await
    }

    async fn set(&self, id: &Identifier, fingerprint: Digest) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read().await?;
        entries.insert(id.clone(), fingerprint);
        self.write(&entries).await
    }

    async fn set_all(&self, incoming: BTreeMap<Identifier, Digest>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read().await?;
        entries.extend(incoming);
        self.write(&entries).await
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let path = AbsFilePath::try_from(dir.path().join("checksums.json")).unwrap();
        let store = FileStore::new(path);
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let path = AbsFilePath::try_from(dir.path().join("checksums.json")).unwrap();
        let store = FileStore::new(path);
        let id = Identifier::parse("a:1").unwrap();

        store.set(&id, Digest::empty()).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), Some(Digest::empty()));
    }

    #[tokio::test]
    async fn reopening_sees_persisted_entries() {
        let dir = tempdir().unwrap();
        let path = AbsFilePath::try_from(dir.path().join("checksums.json")).unwrap();
        let id = Identifier::parse("a:1").unwrap();

        FileStore::new(path.clone()).set(&id, Digest::empty()).await.unwrap();

        let reopened = FileStore::new(path);
        assert_eq!(reopened.get(&id).await.unwrap(), Some(Digest::empty()));
    }
}

//! The build planner/executor (C8): orders builds via the dependency graph
//! rooted at `FROM` edges, prunes already-up-to-date subtrees, detects
//! cycles, and invokes the [`BuildBackend`].

use std::{collections::BTreeMap, sync::Arc};

use tracing::{info, instrument};

use crate::{
    error::ThriftyError,
    fingerprint::FingerprintEngine,
    model::{ConfigurationContainer, Identifier},
    ports::{BuildBackend, BuildOutcome},
    store::{FingerprintStore, LayeredStore},
};

/// Orders and executes builds over a [`ConfigurationContainer`].
///
/// A planner is scoped to one invocation: it owns a [`FingerprintEngine`]
/// (whose cache assumes the container and filesystem are stable for the
/// planner's lifetime) and a [`LayeredStore`] overlaying the persistent
/// fingerprint store passed at construction.
pub struct Planner<'a> {
    container: &'a ConfigurationContainer,
    engine: FingerprintEngine,
    store: LayeredStore,
    backend: Arc<dyn BuildBackend>,
}

impl<'a> Planner<'a> {
    /// Construct a planner over `container`, reading through to
    /// `persistent_store` and invoking `backend` to build images.
    pub fn new(
        container: &'a ConfigurationContainer,
        engine: FingerprintEngine,
        persistent_store: Arc<dyn FingerprintStore>,
        backend: Arc<dyn BuildBackend>,
    ) -> Self {
        Self {
            container,
            engine,
            store: LayeredStore::new(persistent_store),
            backend,
        }
    }

    /// The layered store this planner has been writing to. Exposed so the
    /// publisher can flush it to the persistent store after a successful
    /// publish.
    pub fn store(&self) -> &LayeredStore {
        &self.store
    }

    /// Whether `identifier`'s current fingerprint matches what the
    /// read-through store has on file. A missing store entry is never
    /// considered up to date.
    #[instrument(skip(self))]
    async fn up_to_date(&self, identifier: &Identifier) -> Result<bool, ThriftyError> {
        let current = self.engine.fingerprint(self.container, identifier).await.map_err(store_error)?;
        let stored = self.store.get(identifier).await.map_err(store_error)?;
        Ok(stored.as_ref() == Some(&current))
    }

    /// Build `identifier` and every managed, allowed dependency it
    /// transitively requires that is not already up to date.
    ///
    /// `allowed` defaults to every managed configuration when `None`;
    /// `identifier` is always implicitly allowed. Returns the map of
    /// configurations actually built, in the order they were built.
    #[instrument(skip(self, allowed))]
    pub async fn build(
        &self,
        identifier: &Identifier,
        allowed: Option<&std::collections::HashSet<Identifier>>,
    ) -> Result<BTreeMap<Identifier, BuildOutcome>, ThriftyError> {
        if !self.container.contains(identifier) {
            return Err(ThriftyError::UnmanagedBuild {
                identifier: identifier.clone(),
            });
        }

        let mut allowed_set = match allowed {
            Some(set) => set.clone(),
            None => self.container.iter().map(|cfg| cfg.identifier.clone()).collect(),
        };
        allowed_set.insert(identifier.clone());

        let mut results = BTreeMap::new();
        let mut stack = Vec::new();
        self.build_recursive(identifier, &allowed_set, &mut stack, &mut results).await?;
        Ok(results)
    }

    #[instrument(skip(self, allowed, stack, results))]
    async fn build_recursive(
        &self,
        identifier: &Identifier,
        allowed: &std::collections::HashSet<Identifier>,
        stack: &mut Vec<Identifier>,
        results: &mut BTreeMap<Identifier, BuildOutcome>,
    ) -> Result<(), ThriftyError> {
        if self.up_to_date(identifier).await? {
            return Ok(());
        }

        let configuration = &self.container[identifier];
        for parent in configuration.required_identifiers() {
            let parent = parent.clone();
            if !self.container.contains(&parent) || !allowed.contains(&parent) {
                continue;
            }
            if self.up_to_date(&parent).await? {
                continue;
            }
            if stack.contains(&parent) {
                return Err(ThriftyError::CircularDependency {
                    identifier: parent,
                    stack: stack.clone(),
                });
            }

            stack.push(parent.clone());
            Box::pin(self.build_recursive(&parent, allowed, stack, results)).await?;
            stack.pop();

            // Stage (not commit) the just-built parent's fresh fingerprint:
            // visible to `identifier`'s own fingerprint computation below,
            // but not written to the persistent store until the publisher
            // has actually pushed the parent somewhere.
            let parent_fingerprint = self.engine.fingerprint(self.container, &parent).await.map_err(store_error)?;
            self.store.stage(&parent, parent_fingerprint).await.map_err(store_error)?;
        }

        info!(%identifier, "building image");
        let outcome = self.backend.build(configuration).await?;
        results.insert(identifier.clone(), outcome);
        Ok(())
    }

    /// Repeatedly build an arbitrary not-yet-built managed configuration
    /// until every managed configuration has either been built or was
    /// already up to date at entry. Propagates the first error encountered.
    #[instrument(skip(self))]
    pub async fn build_all(&self) -> Result<BTreeMap<Identifier, BuildOutcome>, ThriftyError> {
        let mut remaining: std::collections::HashSet<Identifier> =
            self.container.iter().map(|cfg| cfg.identifier.clone()).collect();
        let mut results = BTreeMap::new();

        while let Some(next) = remaining.iter().next().cloned() {
            let built = self.build(&next, Some(&remaining)).await?;
            for id in built.keys() {
                remaining.remove(id);
            }
            remaining.remove(&next);
            results.extend(built);
        }

        Ok(results)
    }
}

fn store_error(err: color_eyre::Report) -> ThriftyError {
    ThriftyError::StoreAccess(err.to_string())
}

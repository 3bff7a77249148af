use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::environments::environment_models::{
    EnvironmentDocument, FeatureState, FeatureTypeIndex, IdentityOverride,
};

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

/// Everything cached for one environment key. Built once per document change and
/// swapped in as a unit, so a reader holding an `Arc<CachedEnvironment>` always sees a
/// document together with the indices derived from that same document.
#[derive(Debug)]
pub struct CachedEnvironment {
    /// Unique per build, so results computed from this exact document can be told
    /// apart from results computed from its predecessor.
    pub version: u64,
    pub document: Arc<EnvironmentDocument>,
    pub feature_types: Arc<FeatureTypeIndex>,
    identity_overrides: HashMap<String, Vec<FeatureState>>,
}

impl CachedEnvironment {
    fn build(document: EnvironmentDocument) -> Self {
        let feature_types = Arc::new(document.build_feature_types());
        let identity_overrides = document.build_identity_overrides();
        Self {
            version: NEXT_VERSION.fetch_add(1, Ordering::Relaxed),
            document: Arc::new(document),
            feature_types,
            identity_overrides,
        }
    }

    pub fn identity_override(&self, environment_key: &str, identifier: &str) -> IdentityOverride {
        match self.identity_overrides.get(identifier) {
            Some(features) => IdentityOverride {
                environment_api_key: environment_key.to_string(),
                identifier: identifier.to_string(),
                identity_features: features.clone(),
            },
            None => IdentityOverride::empty(environment_key, identifier),
        }
    }
}

/// In-memory store of environment documents keyed by client-side key.
///
/// Writes replace a key's entry atomically; there is no lock spanning more than one key,
/// so a put for one environment never blocks reads of another. No I/O happens here.
#[derive(Debug, Default)]
pub struct EnvironmentStore {
    environments: DashMap<String, Arc<CachedEnvironment>>,
}

impl EnvironmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `document` under `key` if it differs structurally from the cached one.
    ///
    /// Returns `true` when the entry was replaced (derived indices recomputed) and `false`
    /// when the cached document is equal, in which case nothing is touched. This is the
    /// only signal callers should use to invalidate memoized evaluations.
    pub fn put(&self, key: &str, document: EnvironmentDocument) -> bool {
        if self
            .get_entry(key)
            .is_some_and(|current| *current.document == document)
        {
            return false;
        }

        // Derived indices are built before the shard is locked.
        let built = Arc::new(CachedEnvironment::build(document));
        match self.environments.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                // a concurrent put may have stored the same document meanwhile
                if occupied.get().document == built.document {
                    return false;
                }
                occupied.insert(built);
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(built);
                true
            }
        }
    }

    /// Consistent snapshot of one environment: document plus derived indices.
    pub fn get_entry(&self, key: &str) -> Option<Arc<CachedEnvironment>> {
        self.environments.get(key).map(|entry| entry.value().clone())
    }

    pub fn get(&self, key: &str) -> Option<Arc<EnvironmentDocument>> {
        self.get_entry(key).map(|entry| entry.document.clone())
    }

    pub fn get_feature_types(&self, key: &str) -> Option<Arc<FeatureTypeIndex>> {
        self.get_entry(key).map(|entry| entry.feature_types.clone())
    }

    pub fn get_identity_override(&self, key: &str, identifier: &str) -> IdentityOverride {
        match self.get_entry(key) {
            Some(entry) => entry.identity_override(key, identifier),
            None => IdentityOverride::empty(key, identifier),
        }
    }

    pub fn len(&self) -> usize {
        self.environments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }
}

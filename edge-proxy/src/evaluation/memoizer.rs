use std::sync::Arc;

use moka::sync::Cache;

use crate::environments::environment_models::IdentityOverride;
use crate::environments::environment_store::CachedEnvironment;
use crate::evaluation::engine::{EvaluationEngine, FlagResult, Trait};
use crate::metrics::consts::{MEMOIZER_HIT_COUNTER, MEMOIZER_INVALIDATION_COUNTER, MEMOIZER_MISS_COUNTER};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FlagsCacheKey {
    environment_key: String,
    version: u64,
    feature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IdentityCacheKey {
    environment_key: String,
    version: u64,
    identifier: String,
    traits_fingerprint: TraitsFingerprint,
}

type EvaluationCache<K> = Cache<K, Arc<Vec<FlagResult>>>;

/// Trait keys paired with their JSON-encoded values, in request order.
pub type TraitsFingerprint = Vec<(String, String)>;

/// Identity cache key part for a trait list. Keys and values stay separate fields, so
/// two different trait lists never share a fingerprint.
pub fn traits_fingerprint(traits: &[Trait]) -> TraitsFingerprint {
    traits
        .iter()
        .map(|t| (t.trait_key.clone(), t.trait_value.to_string()))
        .collect()
}

/// Size-bounded memoization in front of an [`EvaluationEngine`].
///
/// Each of the two entry points has its own optional cache; with no cache configured
/// the call goes straight to the engine. There is no TTL. Entries for an environment
/// are dropped in bulk by [`EvaluationMemoizer::invalidate_environment`], which the
/// refresh loop calls only when a document actually changed. Keys also carry the
/// document version they were computed from, so a result racing with a refresh can
/// never be served for the newer document.
pub struct EvaluationMemoizer {
    engine: Arc<dyn EvaluationEngine>,
    flags_cache: Option<EvaluationCache<FlagsCacheKey>>,
    identities_cache: Option<EvaluationCache<IdentityCacheKey>>,
}

fn build_cache<K>(max_size: u64) -> EvaluationCache<K>
where
    K: std::hash::Hash + Eq + Send + Sync + 'static,
{
    Cache::builder()
        .max_capacity(max_size)
        .support_invalidation_closures()
        .build()
}

impl EvaluationMemoizer {
    pub fn new(
        engine: Arc<dyn EvaluationEngine>,
        flags_cache_size: Option<u64>,
        identities_cache_size: Option<u64>,
    ) -> Self {
        Self {
            engine,
            flags_cache: flags_cache_size.map(build_cache),
            identities_cache: identities_cache_size.map(build_cache),
        }
    }

    /// No caching on either entry point.
    pub fn passthrough(engine: Arc<dyn EvaluationEngine>) -> Self {
        Self::new(engine, None, None)
    }

    pub fn evaluate_environment(
        &self,
        environment_key: &str,
        environment: &CachedEnvironment,
        feature: Option<&str>,
    ) -> Arc<Vec<FlagResult>> {
        let compute = || Arc::new(self.engine.evaluate_environment(&environment.document, feature));

        let Some(cache) = &self.flags_cache else {
            return compute();
        };

        let key = FlagsCacheKey {
            environment_key: environment_key.to_string(),
            version: environment.version,
            feature: feature.map(str::to_string),
        };
        if let Some(cached) = cache.get(&key) {
            metrics::counter!(MEMOIZER_HIT_COUNTER, "cache" => "flags").increment(1);
            return cached;
        }
        metrics::counter!(MEMOIZER_MISS_COUNTER, "cache" => "flags").increment(1);
        cache.get_with(key, compute)
    }

    pub fn evaluate_identity(
        &self,
        environment_key: &str,
        environment: &CachedEnvironment,
        identifier: &str,
        traits: &[Trait],
    ) -> Arc<Vec<FlagResult>> {
        let compute = || {
            let identity_override: IdentityOverride =
                environment.identity_override(environment_key, identifier);
            Arc::new(self.engine.evaluate_identity(
                &environment.document,
                identifier,
                traits,
                &identity_override,
            ))
        };

        let Some(cache) = &self.identities_cache else {
            return compute();
        };

        let key = IdentityCacheKey {
            environment_key: environment_key.to_string(),
            version: environment.version,
            identifier: identifier.to_string(),
            traits_fingerprint: traits_fingerprint(traits),
        };
        if let Some(cached) = cache.get(&key) {
            metrics::counter!(MEMOIZER_HIT_COUNTER, "cache" => "identities").increment(1);
            return cached;
        }
        metrics::counter!(MEMOIZER_MISS_COUNTER, "cache" => "identities").increment(1);
        cache.get_with(key, compute)
    }

    /// Drops every memoized result for `environment_key`.
    pub fn invalidate_environment(&self, environment_key: &str) {
        if let Some(cache) = &self.flags_cache {
            let target = environment_key.to_string();
            if let Err(e) = cache.invalidate_entries_if(move |k, _| k.environment_key == target) {
                tracing::error!(error = %e, "failed to invalidate flags cache");
            }
        }
        if let Some(cache) = &self.identities_cache {
            let target = environment_key.to_string();
            if let Err(e) = cache.invalidate_entries_if(move |k, _| k.environment_key == target) {
                tracing::error!(error = %e, "failed to invalidate identities cache");
            }
        }
        metrics::counter!(MEMOIZER_INVALIDATION_COUNTER).increment(1);
        tracing::debug!(client_side_key = %environment_key, "memoized evaluations invalidated");
    }

    pub fn is_caching_flags(&self) -> bool {
        self.flags_cache.is_some()
    }

    pub fn is_caching_identities(&self) -> bool {
        self.identities_cache.is_some()
    }
}

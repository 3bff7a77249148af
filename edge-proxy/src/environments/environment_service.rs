use std::sync::Arc;

use serde_json::Value;

use crate::api::errors::ProxyError;
use crate::api::types::{FlagsResponse, IdentityWithTraits};
use crate::config::{EnvironmentKeyPairs, SERVER_API_KEY_PREFIX};
use crate::environments::environment_store::{CachedEnvironment, EnvironmentStore};
use crate::evaluation::engine::Trait;
use crate::evaluation::mappers::{
    filter_client_visible, is_hidden, is_server_key_only, map_flag_result_to_response,
    map_flag_results_to_response, IdentityResponse,
};
use crate::evaluation::memoizer::EvaluationMemoizer;
use crate::metrics::consts::{FLAG_REQUESTS_COUNTER, IDENTITY_REQUESTS_COUNTER, UNKNOWN_KEY_COUNTER};

/// An environment key from a request, resolved against the configured pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKey {
    pub client_side_key: String,
    pub is_server_key: bool,
}

impl ResolvedKey {
    fn key_type(&self) -> &'static str {
        if self.is_server_key {
            "server"
        } else {
            "client"
        }
    }
}

/// Serves flag and identity reads from the local store.
///
/// Server-side keys are mapped to their client-side key and skip the client
/// visibility filters; everything else is looked up as a client-side key.
pub struct EnvironmentService {
    key_pairs: EnvironmentKeyPairs,
    store: Arc<EnvironmentStore>,
    memoizer: Arc<EvaluationMemoizer>,
    max_trait_value_length: usize,
}

impl EnvironmentService {
    pub fn new(
        key_pairs: EnvironmentKeyPairs,
        store: Arc<EnvironmentStore>,
        memoizer: Arc<EvaluationMemoizer>,
        max_trait_value_length: usize,
    ) -> Self {
        Self {
            key_pairs,
            store,
            memoizer,
            max_trait_value_length,
        }
    }

    pub fn resolve_key(&self, environment_key: Option<&str>) -> Result<ResolvedKey, ProxyError> {
        let unknown = |key: &str| {
            metrics::counter!(UNKNOWN_KEY_COUNTER).increment(1);
            ProxyError::UnknownEnvironmentKey(key.to_string())
        };

        let key = environment_key.ok_or_else(|| unknown(""))?;
        if key.starts_with(SERVER_API_KEY_PREFIX) {
            let client_side_key = self
                .key_pairs
                .client_key_for_server_key(key)
                .ok_or_else(|| unknown(key))?;
            return Ok(ResolvedKey {
                client_side_key: client_side_key.to_string(),
                is_server_key: true,
            });
        }
        Ok(ResolvedKey {
            client_side_key: key.to_string(),
            is_server_key: false,
        })
    }

    fn environment(
        &self,
        environment_key: Option<&str>,
    ) -> Result<(ResolvedKey, Arc<CachedEnvironment>), ProxyError> {
        let resolved = self.resolve_key(environment_key)?;
        match self.store.get_entry(&resolved.client_side_key) {
            Some(entry) => Ok((resolved, entry)),
            None => {
                metrics::counter!(UNKNOWN_KEY_COUNTER).increment(1);
                Err(ProxyError::UnknownEnvironmentKey(
                    environment_key.unwrap_or_default().to_string(),
                ))
            }
        }
    }

    pub fn get_flags_response(
        &self,
        environment_key: Option<&str>,
        feature: Option<&str>,
    ) -> Result<FlagsResponse, ProxyError> {
        let (resolved, environment) = self.environment(environment_key)?;
        metrics::counter!(FLAG_REQUESTS_COUNTER, "key_type" => resolved.key_type()).increment(1);
        let project = &environment.document.project;

        let flags = self.memoizer.evaluate_environment(
            &resolved.client_side_key,
            &environment,
            feature,
        );

        if let Some(feature) = feature {
            let not_found = || ProxyError::FeatureNotFound(feature.to_string());
            let flag = flags.first().ok_or_else(not_found)?;
            if !resolved.is_server_key
                && (is_server_key_only(flag, &project.server_key_only_feature_ids)
                    || is_hidden(flag, project.hide_disabled_flags))
            {
                return Err(not_found());
            }
            return Ok(FlagsResponse::Single(map_flag_result_to_response(
                flag,
                &environment.feature_types,
            )));
        }

        let responses = if resolved.is_server_key {
            map_flag_results_to_response(flags.iter(), &environment.feature_types)
        } else {
            map_flag_results_to_response(
                filter_client_visible(
                    &flags,
                    &project.server_key_only_feature_ids,
                    project.hide_disabled_flags,
                ),
                &environment.feature_types,
            )
        };
        Ok(FlagsResponse::All(responses))
    }

    /// Rejects traits the evaluation layer must never see.
    pub fn validate_traits(&self, traits: &[Trait]) -> Result<(), ProxyError> {
        for t in traits {
            if let Value::String(value) = &t.trait_value {
                let length = value.chars().count();
                if length > self.max_trait_value_length {
                    return Err(ProxyError::ValidationError(format!(
                        "trait value for '{}' is {} characters, the limit is {}",
                        t.trait_key, length, self.max_trait_value_length
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get_identity_response(
        &self,
        environment_key: Option<&str>,
        identity: IdentityWithTraits,
    ) -> Result<IdentityResponse, ProxyError> {
        self.validate_traits(&identity.traits)?;
        let (resolved, environment) = self.environment(environment_key)?;
        metrics::counter!(IDENTITY_REQUESTS_COUNTER, "key_type" => resolved.key_type())
            .increment(1);
        let project = &environment.document.project;

        let flags = self.memoizer.evaluate_identity(
            &resolved.client_side_key,
            &environment,
            &identity.identifier,
            &identity.traits,
        );

        let responses = if resolved.is_server_key {
            map_flag_results_to_response(flags.iter(), &environment.feature_types)
        } else {
            map_flag_results_to_response(
                filter_client_visible(
                    &flags,
                    &project.server_key_only_feature_ids,
                    project.hide_disabled_flags,
                ),
                &environment.feature_types,
            )
        };

        Ok(IdentityResponse {
            identifier: identity.identifier,
            traits: identity.traits,
            flags: responses,
        })
    }
}

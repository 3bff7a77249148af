use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::environments::environment_models::{EnvironmentDocument, FeatureState, IdentityOverride};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trait {
    pub trait_key: String,
    #[serde(default)]
    pub trait_value: Value,
}

/// One evaluated feature. Feature type is attached later from the store's index.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagResult {
    pub feature_id: i64,
    pub feature_name: String,
    pub enabled: bool,
    pub value: Value,
}

impl From<&FeatureState> for FlagResult {
    fn from(state: &FeatureState) -> Self {
        FlagResult {
            feature_id: state.feature.id,
            feature_name: state.feature.name.clone(),
            enabled: state.enabled,
            value: state.feature_state_value.clone(),
        }
    }
}

/// Flag evaluation, kept behind a trait so the rules engine can be swapped without
/// touching caching or the HTTP layer. Implementations must be pure: the same inputs
/// always give the same output, which is what makes memoizing them sound.
pub trait EvaluationEngine: Send + Sync {
    fn evaluate_environment(
        &self,
        document: &EnvironmentDocument,
        feature: Option<&str>,
    ) -> Vec<FlagResult>;

    fn evaluate_identity(
        &self,
        document: &EnvironmentDocument,
        identifier: &str,
        traits: &[Trait],
        identity_override: &IdentityOverride,
    ) -> Vec<FlagResult>;
}

/// Resolves flags straight from the document's feature states, with identity overrides
/// applied on top. Segment rules and percentage rollouts are not evaluated here.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentEngine;

impl EvaluationEngine for DocumentEngine {
    fn evaluate_environment(
        &self,
        document: &EnvironmentDocument,
        feature: Option<&str>,
    ) -> Vec<FlagResult> {
        document
            .feature_states
            .iter()
            .filter(|fs| feature.map_or(true, |name| fs.feature.name == name))
            .map(FlagResult::from)
            .collect()
    }

    fn evaluate_identity(
        &self,
        document: &EnvironmentDocument,
        _identifier: &str,
        _traits: &[Trait],
        identity_override: &IdentityOverride,
    ) -> Vec<FlagResult> {
        let overrides: HashMap<i64, &FeatureState> = identity_override
            .identity_features
            .iter()
            .map(|fs| (fs.feature.id, fs))
            .collect();

        document
            .feature_states
            .iter()
            .map(|fs| match overrides.get(&fs.feature.id) {
                Some(overridden) => FlagResult::from(*overridden),
                None => FlagResult::from(fs),
            })
            .collect()
    }
}

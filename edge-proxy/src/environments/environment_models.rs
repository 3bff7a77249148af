use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_FEATURE_TYPE: &str = "STANDARD";

fn default_feature_type() -> String {
    DEFAULT_FEATURE_TYPE.to_string()
}

/// Maps a feature id to its type (`STANDARD`, `MULTIVARIATE`, ...).
pub type FeatureTypeIndex = HashMap<i64, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type", default = "default_feature_type")]
    pub feature_type: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureState {
    pub feature: Feature,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub feature_state_value: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub hide_disabled_flags: bool,
    #[serde(default)]
    pub server_key_only_feature_ids: Vec<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An identity override as embedded in the environment document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityOverrideDocument {
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub identity_features: Vec<FeatureState>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The authoritative snapshot of one environment. Only the fields the proxy reads are
/// typed; everything else (segments, project metadata, ...) is kept verbatim in `extra`
/// so that equality between two documents stays structural over the whole payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub feature_states: Vec<FeatureState>,
    #[serde(default)]
    pub project: Project,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_overrides: Option<Vec<IdentityOverrideDocument>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EnvironmentDocument {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Parses `updated_at`, accepting RFC 3339 and offset-less ISO 8601 timestamps
    /// (the latter are read as UTC). Returns `None` when absent or unparseable.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.updated_at.as_deref()?;
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn build_feature_types(&self) -> FeatureTypeIndex {
        self.feature_states
            .iter()
            .map(|fs| (fs.feature.id, fs.feature.feature_type.clone()))
            .collect()
    }

    /// Indexes the embedded overrides by identifier. Overrides without an identifier
    /// are skipped.
    pub fn build_identity_overrides(&self) -> HashMap<String, Vec<FeatureState>> {
        self.identity_overrides
            .iter()
            .flatten()
            .filter_map(|o| {
                o.identifier
                    .as_ref()
                    .filter(|id| !id.is_empty())
                    .map(|id| (id.clone(), o.identity_features.clone()))
            })
            .collect()
    }
}

/// Per-identity exceptions to environment-wide values. An identity without an
/// override gets an empty one, never an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityOverride {
    pub environment_api_key: String,
    pub identifier: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub identity_features: Vec<FeatureState>,
}

impl IdentityOverride {
    pub fn empty(environment_api_key: &str, identifier: &str) -> Self {
        Self {
            environment_api_key: environment_api_key.to_string(),
            identifier: identifier.to_string(),
            identity_features: Vec::new(),
        }
    }
}

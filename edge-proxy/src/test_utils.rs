use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::config::{EnvironmentKeyPair, EnvironmentKeyPairs};
use crate::environments::document_fetcher::{DocumentFetcher, FetchError, FetchOutcome};
use crate::environments::environment_models::{EnvironmentDocument, IdentityOverride};
use crate::evaluation::engine::{DocumentEngine, EvaluationEngine, FlagResult, Trait};

pub const TEST_CLIENT_KEY: &str = "environment_1_api_key";
pub const TEST_SERVER_KEY: &str = "ser.environment_1_server_key";

/// An environment with three features: `feature_1` disabled, `feature_2` enabled with a
/// numeric-looking string value and `feature_3` disabled and server-key-only.
pub fn environment_document_json() -> Value {
    json!({
        "feature_states": [
            {
                "multivariate_feature_state_values": [],
                "feature_state_value": "feature_1_value",
                "feature": {"name": "feature_1", "type": "STANDARD", "id": 1},
                "enabled": false
            },
            {
                "multivariate_feature_state_values": [],
                "feature_state_value": "2.3",
                "feature": {"name": "feature_2", "type": "STANDARD", "id": 2},
                "enabled": true
            },
            {
                "multivariate_feature_state_values": [],
                "feature_state_value": null,
                "feature": {"name": "feature_3", "type": "STANDARD", "id": 3},
                "enabled": false
            }
        ],
        "api_key": TEST_CLIENT_KEY,
        "project": {
            "name": "project-1",
            "organisation": {
                "feature_analytics": false,
                "name": "org-1",
                "id": 1,
                "persist_trait_data": true,
                "stop_serving_flags": false
            },
            "id": 1,
            "hide_disabled_flags": false,
            "segments": [{
                "name": "segment_1",
                "id": 1,
                "rules": [{
                    "conditions": [],
                    "type": "ALL",
                    "rules": [{
                        "conditions": [{"value": "test", "operator": "EQUAL", "property_": "first_name"}],
                        "type": "ANY",
                        "rules": []
                    }]
                }],
                "feature_states": [{
                    "multivariate_feature_state_values": [],
                    "feature_state_value": "segment_override",
                    "feature": {"name": "feature_2", "type": "STANDARD", "id": 2},
                    "enabled": true
                }]
            }],
            "server_key_only_feature_ids": [3]
        },
        "id": 1,
        "updated_at": "2023-06-01T10:15:30.123456+00:00"
    })
}

pub fn environment_document() -> EnvironmentDocument {
    serde_json::from_value(environment_document_json()).unwrap()
}

pub fn test_key_pairs(count: usize) -> EnvironmentKeyPairs {
    EnvironmentKeyPairs(
        (0..count)
            .map(|i| {
                if i == 0 {
                    EnvironmentKeyPair {
                        server_side_key: TEST_SERVER_KEY.to_string(),
                        client_side_key: TEST_CLIENT_KEY.to_string(),
                    }
                } else {
                    EnvironmentKeyPair {
                        server_side_key: format!("ser.key_{i}"),
                        client_side_key: format!("key_{i}"),
                    }
                }
            })
            .collect(),
    )
}

/// Delegates to [`DocumentEngine`] and counts invocations.
#[derive(Debug, Default)]
pub struct CountingEngine {
    environment_calls: AtomicUsize,
    identity_calls: AtomicUsize,
}

impl CountingEngine {
    pub fn environment_calls(&self) -> usize {
        self.environment_calls.load(Ordering::SeqCst)
    }

    pub fn identity_calls(&self) -> usize {
        self.identity_calls.load(Ordering::SeqCst)
    }
}

impl EvaluationEngine for CountingEngine {
    fn evaluate_environment(
        &self,
        document: &EnvironmentDocument,
        feature: Option<&str>,
    ) -> Vec<FlagResult> {
        self.environment_calls.fetch_add(1, Ordering::SeqCst);
        DocumentEngine.evaluate_environment(document, feature)
    }

    fn evaluate_identity(
        &self,
        document: &EnvironmentDocument,
        identifier: &str,
        traits: &[Trait],
        identity_override: &IdentityOverride,
    ) -> Vec<FlagResult> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        DocumentEngine.evaluate_identity(document, identifier, traits, identity_override)
    }
}

/// What a [`ScriptedFetcher`] answers for one client-side key.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Document(EnvironmentDocument),
    NotModified,
    Status(u16),
    Hang,
}

/// In-process fetcher returning canned responses per client-side key and
/// recording the conditional timestamp it was called with.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    responses: Mutex<HashMap<String, ScriptedResponse>>,
    calls: Mutex<Vec<(String, Option<DateTime<Utc>>)>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, client_side_key: &str, response: ScriptedResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(client_side_key.to_string(), response);
    }

    pub fn calls(&self) -> Vec<(String, Option<DateTime<Utc>>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        key_pair: &EnvironmentKeyPair,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push((key_pair.client_side_key.clone(), if_modified_since));
        let response = self
            .responses
            .lock()
            .unwrap()
            .get(&key_pair.client_side_key)
            .cloned()
            .unwrap_or(ScriptedResponse::Status(404));
        match response {
            ScriptedResponse::Document(document) => Ok(FetchOutcome::Modified(document)),
            ScriptedResponse::NotModified => Ok(FetchOutcome::NotModified),
            ScriptedResponse::Status(status) => Err(FetchError::UnexpectedStatus(status)),
            ScriptedResponse::Hang => std::future::pending().await,
        }
    }
}

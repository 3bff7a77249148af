use serde::{Deserialize, Serialize};

use crate::evaluation::engine::Trait;
use crate::evaluation::mappers::FlagResponse;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlagsQuery {
    pub feature: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityQuery {
    pub identifier: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IdentityWithTraits {
    pub identifier: String,
    #[serde(default)]
    pub traits: Vec<Trait>,
}

impl IdentityWithTraits {
    pub fn without_traits(identifier: String) -> Self {
        Self {
            identifier,
            traits: Vec::new(),
        }
    }
}

/// All visible flags, or the single flag asked for with `?feature=`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FlagsResponse {
    Single(FlagResponse),
    All(Vec<FlagResponse>),
}

/// Body of the identity change endpoint: either one identifier or a batch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum QueueIdentityChangeRequest {
    Single { identifier: String },
    Bulk { identifiers: Vec<String> },
}

impl QueueIdentityChangeRequest {
    pub fn into_identifiers(self) -> Vec<String> {
        match self {
            QueueIdentityChangeRequest::Single { identifier } => vec![identifier],
            QueueIdentityChangeRequest::Bulk { identifiers } => identifiers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_with_traits_defaults_traits() {
        let parsed: IdentityWithTraits =
            serde_json::from_value(json!({"identifier": "alice"})).unwrap();
        assert_eq!(parsed, IdentityWithTraits::without_traits("alice".to_string()));
    }

    #[test]
    fn test_queue_identity_change_request_shapes() {
        let single: QueueIdentityChangeRequest =
            serde_json::from_value(json!({"identifier": "a"})).unwrap();
        assert_eq!(single.into_identifiers(), vec!["a".to_string()]);

        let bulk: QueueIdentityChangeRequest =
            serde_json::from_value(json!({"identifiers": ["a", "b"]})).unwrap();
        assert_eq!(bulk.into_identifiers(), vec!["a".to_string(), "b".to_string()]);

        assert!(serde_json::from_value::<QueueIdentityChangeRequest>(json!({})).is_err());
    }
}

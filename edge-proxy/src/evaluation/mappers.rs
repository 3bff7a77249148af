use serde::Serialize;
use serde_json::Value;

use crate::environments::environment_models::{FeatureTypeIndex, DEFAULT_FEATURE_TYPE};
use crate::evaluation::engine::{FlagResult, Trait};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureResponse {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub feature_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagResponse {
    pub feature: FeatureResponse,
    pub enabled: bool,
    pub feature_state_value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityResponse {
    pub identifier: String,
    pub traits: Vec<Trait>,
    pub flags: Vec<FlagResponse>,
}

/// Turns string values that are really integers or booleans into those types.
///
/// `"12"` becomes `12` but `"012"` and `"2.3"` stay strings, since only values that
/// survive the round trip back to the same text are converted.
pub fn convert_feature_value_to_type(value: &Value) -> Value {
    let Value::String(raw) = value else {
        return value.clone();
    };
    if let Ok(int_value) = raw.parse::<i64>() {
        if int_value.to_string() == *raw {
            return Value::from(int_value);
        }
    }
    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    value.clone()
}

pub fn map_flag_result_to_response(
    flag: &FlagResult,
    feature_types: &FeatureTypeIndex,
) -> FlagResponse {
    FlagResponse {
        feature: FeatureResponse {
            id: flag.feature_id,
            name: flag.feature_name.clone(),
            feature_type: feature_types
                .get(&flag.feature_id)
                .cloned()
                .unwrap_or_else(|| DEFAULT_FEATURE_TYPE.to_string()),
        },
        enabled: flag.enabled,
        feature_state_value: convert_feature_value_to_type(&flag.value),
    }
}

pub fn map_flag_results_to_response<'a>(
    flags: impl IntoIterator<Item = &'a FlagResult>,
    feature_types: &FeatureTypeIndex,
) -> Vec<FlagResponse> {
    flags
        .into_iter()
        .map(|flag| map_flag_result_to_response(flag, feature_types))
        .collect()
}

pub fn is_server_key_only(flag: &FlagResult, server_key_only_feature_ids: &[i64]) -> bool {
    server_key_only_feature_ids.contains(&flag.feature_id)
}

pub fn is_hidden(flag: &FlagResult, hide_disabled_flags: bool) -> bool {
    hide_disabled_flags && !flag.enabled
}

/// Drops what a client-side key must not see: server-key-only features, and
/// disabled features when the project hides them.
pub fn filter_client_visible<'a>(
    flags: &'a [FlagResult],
    server_key_only_feature_ids: &'a [i64],
    hide_disabled_flags: bool,
) -> impl Iterator<Item = &'a FlagResult> {
    flags.iter().filter(move |flag| {
        !is_server_key_only(flag, server_key_only_feature_ids)
            && !is_hidden(flag, hide_disabled_flags)
    })
}

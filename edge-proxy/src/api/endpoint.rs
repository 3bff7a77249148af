use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::{debug_handler, Json};

use crate::api::errors::ProxyError;
use crate::api::types::{FlagsQuery, FlagsResponse, IdentityQuery, IdentityWithTraits};
use crate::environments::document_fetcher::ENVIRONMENT_KEY_HEADER;
use crate::evaluation::mappers::IdentityResponse;
use crate::router;

fn environment_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(ENVIRONMENT_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Environment flags, or a single flag with `?feature=<name>`.
#[debug_handler]
pub async fn flags(
    State(state): State<router::State>,
    Query(query): Query<FlagsQuery>,
    headers: HeaderMap,
) -> Result<Json<FlagsResponse>, ProxyError> {
    let response = state
        .environment_service
        .get_flags_response(environment_key(&headers), query.feature.as_deref())?;
    Ok(Json(response))
}

/// Flags for an identity with the given traits.
#[debug_handler]
pub async fn identity(
    State(state): State<router::State>,
    headers: HeaderMap,
    body: Result<Json<IdentityWithTraits>, JsonRejection>,
) -> Result<Json<IdentityResponse>, ProxyError> {
    let Json(identity) = body.map_err(|rejection| match rejection {
        JsonRejection::JsonDataError(e) => ProxyError::ValidationError(e.body_text()),
        other => ProxyError::RequestParsingError(other.body_text()),
    })?;
    let response = state
        .environment_service
        .get_identity_response(environment_key(&headers), identity)?;
    Ok(Json(response))
}

/// Flags for an identity without traits, `?identifier=<id>`.
#[debug_handler]
pub async fn identity_by_query(
    State(state): State<router::State>,
    headers: HeaderMap,
    query: Result<Query<IdentityQuery>, QueryRejection>,
) -> Result<Json<IdentityResponse>, ProxyError> {
    let Query(query) =
        query.map_err(|rejection| ProxyError::ValidationError(rejection.body_text()))?;
    let response = state.environment_service.get_identity_response(
        environment_key(&headers),
        IdentityWithTraits::without_traits(query.identifier),
    )?;
    Ok(Json(response))
}

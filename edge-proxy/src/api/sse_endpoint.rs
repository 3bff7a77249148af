use std::convert::Infallible;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::{Stream, StreamExt};

use crate::api::auth::authorize_bearer;
use crate::api::errors::ProxyError;
use crate::api::types::QueueIdentityChangeRequest;
use crate::notifications::stream::{subscribe, StreamEvent, StreamSettings};
use crate::router;

fn to_sse_event(event: StreamEvent, settings: &StreamSettings) -> Event {
    let data = serde_json::to_string(&event.data).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to serialize stream event");
        String::from("{}")
    });
    Event::default()
        .event(event.event)
        .data(data)
        .retry(settings.retry)
}

/// Records that the whole environment changed.
pub async fn queue_change(
    State(state): State<router::State>,
    Path(environment_key): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ProxyError> {
    authorize_bearer(&headers, &state.config.sse_authentication_token)?;
    state.change_store.record_environment_change(&environment_key);
    Ok(StatusCode::OK)
}

/// Records that one or more identities changed.
pub async fn queue_identity_change(
    State(state): State<router::State>,
    Path(environment_key): Path<String>,
    headers: HeaderMap,
    body: Result<Json<QueueIdentityChangeRequest>, JsonRejection>,
) -> Result<StatusCode, ProxyError> {
    authorize_bearer(&headers, &state.config.sse_authentication_token)?;
    let Json(request) = body.map_err(|rejection| match rejection {
        JsonRejection::JsonDataError(e) => ProxyError::ValidationError(e.body_text()),
        other => ProxyError::RequestParsingError(other.body_text()),
    })?;
    let identifiers = request.into_identifiers();
    if identifiers.is_empty() {
        return Err(ProxyError::ValidationError(
            "at least one identifier is required".to_string(),
        ));
    }
    state
        .change_store
        .record_identity_changes(&environment_key, identifiers);
    Ok(StatusCode::OK)
}

/// Server-sent events for changes recorded on `environment_key` after connecting.
///
/// Emits `environment_updated` and `identity_updated` events, the latter with the
/// identifier hashed. The server closes the stream after the configured maximum age.
pub async fn stream(
    State(state): State<router::State>,
    Path(environment_key): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let settings = StreamSettings::from(state.config.as_ref());
    let events = subscribe(state.change_store.clone(), environment_key, settings)
        .map(move |event| Ok(to_sse_event(event, &settings)));
    Sse::new(events).keep_alive(KeepAlive::default())
}

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::GracePeriod;
use crate::router;

pub const NOT_UPDATED_REASON: &str = "environment document(s) not updated.";
pub const STALE_REASON: &str = "environment document(s) stale.";

/// Readiness of the local cache, derived from the last fully successful refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready(DateTime<Utc>),
    NotUpdated,
    Stale(DateTime<Utc>),
}

/// Ready once every environment has refreshed in the same cycle, and that cycle is no
/// older than the poll period plus one grace period per environment. Without a grace
/// period only the first condition applies.
pub fn check_readiness(
    last_successful_update: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    poll_frequency: Duration,
    grace_period: GracePeriod,
    environment_count: usize,
) -> Readiness {
    let Some(last) = last_successful_update else {
        return Readiness::NotUpdated;
    };
    let Some(grace) = grace_period.as_duration() else {
        return Readiness::Ready(last);
    };

    let threshold = u32::try_from(environment_count)
        .ok()
        .and_then(|count| grace.checked_mul(count))
        .and_then(|grace| poll_frequency.checked_add(grace))
        .and_then(|allowed| chrono::Duration::from_std(allowed).ok())
        .and_then(|allowed| now.checked_sub_signed(allowed));
    match threshold {
        Some(threshold) if last < threshold => Readiness::Stale(last),
        _ => Readiness::Ready(last),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckResponse {
    pub status: &'static str,
    pub reason: Option<&'static str>,
    pub last_successful_update: Option<DateTime<Utc>>,
}

impl IntoResponse for Readiness {
    fn into_response(self) -> Response {
        let (code, body) = match self {
            Readiness::Ready(last) => (
                StatusCode::OK,
                HealthCheckResponse {
                    status: "ok",
                    reason: None,
                    last_successful_update: Some(last),
                },
            ),
            Readiness::NotUpdated => (
                StatusCode::SERVICE_UNAVAILABLE,
                HealthCheckResponse {
                    status: "error",
                    reason: Some(NOT_UPDATED_REASON),
                    last_successful_update: None,
                },
            ),
            Readiness::Stale(last) => (
                StatusCode::SERVICE_UNAVAILABLE,
                HealthCheckResponse {
                    status: "error",
                    reason: Some(STALE_REASON),
                    last_successful_update: Some(last),
                },
            ),
        };
        (code, Json(body)).into_response()
    }
}

pub async fn liveness() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthCheckResponse {
            status: "ok",
            reason: None,
            last_successful_update: None,
        }),
    )
}

pub async fn readiness(State(state): State<router::State>) -> Readiness {
    let readiness = check_readiness(
        state.refresh_state.last_successful_update(),
        Utc::now(),
        state.config.poll_frequency(),
        state.config.environment_update_grace_period_seconds,
        state.config.environment_key_pairs.len(),
    );
    if !matches!(readiness, Readiness::Ready(_)) {
        tracing::warn!(?readiness, "readiness check failed");
    }
    readiness
}

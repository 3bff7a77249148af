use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

use crate::config::Config;
use crate::metrics::consts::{ACTIVE_STREAMS_GAUGE, STREAMS_OPENED_COUNTER, STREAM_EVENTS_COUNTER};
use crate::notifications::change_store::{hash_identifier, ChangeEvent, ChangeNotificationStore};

pub const ENVIRONMENT_UPDATED_EVENT: &str = "environment_updated";
pub const IDENTITY_UPDATED_EVENT: &str = "identity_updated";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    /// Time between two reads of the change store.
    pub delay: Duration,
    /// The stream ends on its own once it has been open this long.
    pub max_age: Duration,
    /// Reconnect delay suggested to the client on every event.
    pub retry: Duration,
}

impl From<&Config> for StreamSettings {
    fn from(config: &Config) -> Self {
        Self {
            delay: config.stream_delay(),
            max_age: config.max_stream_age(),
            retry: config.stream_retry_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamEventData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A change as sent to subscribers, identifiers already hashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub event: &'static str,
    pub data: StreamEventData,
}

impl From<ChangeEvent> for StreamEvent {
    fn from(change: ChangeEvent) -> Self {
        match change.identifier {
            None => StreamEvent {
                event: ENVIRONMENT_UPDATED_EVENT,
                data: StreamEventData {
                    identifier: None,
                    updated_at: change.timestamp,
                },
            },
            Some(identifier) => StreamEvent {
                event: IDENTITY_UPDATED_EVENT,
                data: StreamEventData {
                    identifier: Some(hash_identifier(&identifier)),
                    updated_at: change.timestamp,
                },
            },
        }
    }
}

struct ActiveStreamGuard {
    environment_key: String,
}

impl ActiveStreamGuard {
    fn new(environment_key: &str) -> Self {
        metrics::counter!(STREAMS_OPENED_COUNTER).increment(1);
        metrics::gauge!(ACTIVE_STREAMS_GAUGE).increment(1.0);
        tracing::info!(environment_key, "change stream opened");
        Self {
            environment_key: environment_key.to_string(),
        }
    }
}

impl Drop for ActiveStreamGuard {
    fn drop(&mut self) {
        metrics::gauge!(ACTIVE_STREAMS_GAUGE).decrement(1.0);
        tracing::debug!(environment_key = %self.environment_key, "change stream closed");
    }
}

/// Subscribes to changes recorded for `environment_key` from now on.
///
/// The store is read every `delay`. The stream ends after `max_age`; dropping it
/// (the client went away) stops it earlier.
pub fn subscribe(
    store: Arc<ChangeNotificationStore>,
    environment_key: String,
    settings: StreamSettings,
) -> impl Stream<Item = StreamEvent> {
    async_stream::stream! {
        let _guard = ActiveStreamGuard::new(&environment_key);
        let mut cursor = store.cursor();
        let deadline = Instant::now() + settings.max_age;
        let mut ticker = interval(settings.delay);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = sleep_until(deadline) => break,
                _ = ticker.tick() => {}
            }

            let (changes, next_cursor) = store.changes_since(&environment_key, cursor);
            cursor = next_cursor;
            for change in changes {
                let event = StreamEvent::from(change);
                metrics::counter!(STREAM_EVENTS_COUNTER, "event" => event.event).increment(1);
                yield event;
            }
        }
    }
}

use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::{EnvironmentKeyPair, EnvironmentKeyPairs};
use crate::environments::document_fetcher::{DocumentFetcher, FetchError, FetchOutcome};
use crate::environments::environment_store::EnvironmentStore;
use crate::evaluation::memoizer::EvaluationMemoizer;
use crate::metrics::consts::{
    DOCUMENT_CHANGED_COUNTER, REFRESH_CYCLE_COUNTER, REFRESH_CYCLE_TIME, REFRESH_FAILURE_COUNTER,
    REFRESH_SUCCESS_COUNTER, SECONDS_SINCE_LAST_REFRESH_GAUGE,
};
use crate::metrics::utils::{gauge, inc, timing_guard};

/// When every configured environment last refreshed without error in the same cycle.
///
/// Only the refresh loop writes it; health checks read it.
#[derive(Debug, Default)]
pub struct RefreshState {
    last_successful_update: RwLock<Option<DateTime<Utc>>>,
}

impl RefreshState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_successful_update(&self) -> Option<DateTime<Utc>> {
        match self.last_successful_update.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn mark_successful_update(&self, at: DateTime<Utc>) {
        match self.last_successful_update.write() {
            Ok(mut guard) => *guard = Some(at),
            Err(poisoned) => *poisoned.into_inner() = Some(at),
        }
    }
}

/// Result of one refresh cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub refreshed: Vec<String>,
    pub changed: Vec<String>,
    pub failed: Vec<(String, FetchError)>,
}

impl CycleReport {
    pub fn is_fully_successful(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Keeps the [`EnvironmentStore`] in step with the upstream authority.
pub struct RefreshOrchestrator {
    key_pairs: EnvironmentKeyPairs,
    fetcher: Arc<dyn DocumentFetcher>,
    store: Arc<EnvironmentStore>,
    memoizer: Arc<EvaluationMemoizer>,
    state: Arc<RefreshState>,
    poll_frequency: Duration,
    poll_timeout: Duration,
}

impl RefreshOrchestrator {
    pub fn new(
        key_pairs: EnvironmentKeyPairs,
        fetcher: Arc<dyn DocumentFetcher>,
        store: Arc<EnvironmentStore>,
        memoizer: Arc<EvaluationMemoizer>,
        state: Arc<RefreshState>,
        poll_frequency: Duration,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            key_pairs,
            fetcher,
            store,
            memoizer,
            state,
            poll_frequency,
            poll_timeout,
        }
    }

    pub fn state(&self) -> Arc<RefreshState> {
        self.state.clone()
    }

    /// Refreshes one environment. Returns whether its cached document changed.
    async fn refresh_environment(&self, key_pair: &EnvironmentKeyPair) -> Result<bool, FetchError> {
        let client_side_key = key_pair.client_side_key.as_str();
        let cached = self.store.get(client_side_key);

        let if_modified_since = match &cached {
            Some(document) => {
                let parsed = document.updated_at();
                if parsed.is_none() {
                    warn!(
                        client_side_key,
                        updated_at = ?document.updated_at,
                        "cached document has no usable updated_at, fetching unconditionally"
                    );
                }
                parsed
            }
            None => None,
        };

        let outcome = tokio::time::timeout(
            self.poll_timeout,
            self.fetcher.fetch(key_pair, if_modified_since),
        )
        .await
        .map_err(|_| FetchError::Timeout(self.poll_timeout))??;

        let changed = match outcome {
            FetchOutcome::Modified(document) => self.store.put(client_side_key, document),
            FetchOutcome::NotModified if cached.is_some() => false,
            FetchOutcome::NotModified => return Err(FetchError::NotModifiedWithoutDocument),
        };

        if changed {
            self.memoizer.invalidate_environment(client_side_key);
            metrics::counter!(DOCUMENT_CHANGED_COUNTER, "client_side_key" => client_side_key.to_string())
                .increment(1);
            info!(client_side_key, "environment document updated");
        }
        Ok(changed)
    }

    /// Runs one refresh cycle over every configured environment.
    ///
    /// Environments are fetched concurrently and fail independently. The cycle returns
    /// only once every attempt has resolved, and [`RefreshState`] advances only when
    /// none of them failed.
    pub async fn refresh_cycle(&self) -> CycleReport {
        let _timer = timing_guard(REFRESH_CYCLE_TIME, &[]);
        let results = join_all(self.key_pairs.iter().map(|key_pair| async move {
            (key_pair, self.refresh_environment(key_pair).await)
        }))
        .await;

        let mut report = CycleReport::default();
        for (key_pair, result) in results {
            let labels = [(
                "client_side_key".to_string(),
                key_pair.client_side_key.clone(),
            )];
            match result {
                Ok(changed) => {
                    inc(REFRESH_SUCCESS_COUNTER, &labels, 1);
                    if changed {
                        report.changed.push(key_pair.client_side_key.clone());
                    }
                    report.refreshed.push(key_pair.client_side_key.clone());
                }
                Err(e) => {
                    inc(REFRESH_FAILURE_COUNTER, &labels, 1);
                    match &e {
                        FetchError::NotModifiedWithoutDocument => error!(
                            client_side_key = %key_pair.client_side_key,
                            "upstream answered not modified but no document is cached"
                        ),
                        _ => error!(
                            client_side_key = %key_pair.client_side_key,
                            kind = e.kind(),
                            error = %e,
                            "error fetching environment document"
                        ),
                    }
                    report.failed.push((key_pair.client_side_key.clone(), e));
                }
            }
        }

        inc(REFRESH_CYCLE_COUNTER, &[], 1);
        if report.is_fully_successful() {
            self.state.mark_successful_update(Utc::now());
        }
        if let Some(last) = self.state.last_successful_update() {
            let age = (Utc::now() - last).num_milliseconds().max(0) as f64 / 1000.0;
            gauge(SECONDS_SINCE_LAST_REFRESH_GAUGE, &[], age);
        }
        report
    }

    /// Repeats [`Self::refresh_cycle`] every poll period until `shutdown` resolves.
    ///
    /// The first cycle runs one period after the call; the server runs the initial
    /// cycle itself before accepting traffic. Cycles never overlap: a slow cycle
    /// delays the next tick instead of stacking another one behind it.
    pub async fn run<F>(self: Arc<Self>, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let mut ticker = interval_at(Instant::now() + self.poll_frequency, self.poll_frequency);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("refresh loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.refresh_cycle().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environments::environment_models::EnvironmentDocument;
    use crate::test_utils::{
        environment_document, environment_document_json, test_key_pairs, CountingEngine,
        ScriptedFetcher, ScriptedResponse, TEST_CLIENT_KEY,
    };
    use chrono::TimeZone;
    use serde_json::json;
    use tokio::sync::Notify;

    struct Harness {
        fetcher: Arc<ScriptedFetcher>,
        store: Arc<EnvironmentStore>,
        engine: Arc<CountingEngine>,
        memoizer: Arc<EvaluationMemoizer>,
        orchestrator: Arc<RefreshOrchestrator>,
    }

    fn harness(environments: usize) -> Harness {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let store = Arc::new(EnvironmentStore::new());
        let engine = Arc::new(CountingEngine::default());
        let memoizer = Arc::new(EvaluationMemoizer::new(engine.clone(), Some(32), Some(32)));
        let orchestrator = Arc::new(RefreshOrchestrator::new(
            test_key_pairs(environments),
            fetcher.clone(),
            store.clone(),
            memoizer.clone(),
            Arc::new(RefreshState::new()),
            Duration::from_secs(10),
            Duration::from_millis(500),
        ));
        Harness {
            fetcher,
            store,
            engine,
            memoizer,
            orchestrator,
        }
    }

    fn changed_document() -> EnvironmentDocument {
        let mut value = environment_document_json();
        value["feature_states"][0]["enabled"] = json!(true);
        value["updated_at"] = json!("2023-06-02T08:00:00+00:00");
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_successful_cycle_sets_state() {
        let h = harness(2);
        h.fetcher
            .respond(TEST_CLIENT_KEY, ScriptedResponse::Document(environment_document()));
        h.fetcher
            .respond("key_1", ScriptedResponse::Document(environment_document()));

        let report = h.orchestrator.refresh_cycle().await;

        assert!(report.is_fully_successful());
        assert_eq!(report.changed.len(), 2);
        assert!(h.orchestrator.state().last_successful_update().is_some());
        assert!(h.store.get("key_1").is_some());
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_others_or_advance_state() {
        let h = harness(3);
        h.fetcher
            .respond(TEST_CLIENT_KEY, ScriptedResponse::Document(environment_document()));
        h.fetcher.respond("key_1", ScriptedResponse::Status(500));
        h.fetcher
            .respond("key_2", ScriptedResponse::Document(environment_document()));

        let report = h.orchestrator.refresh_cycle().await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "key_1");
        assert!(h.store.get(TEST_CLIENT_KEY).is_some());
        assert!(h.store.get("key_2").is_some());
        assert!(h.store.get("key_1").is_none());
        assert_eq!(h.orchestrator.state().last_successful_update(), None);
    }

    #[tokio::test]
    async fn test_failed_cycle_keeps_previous_timestamp() {
        let h = harness(1);
        h.fetcher
            .respond(TEST_CLIENT_KEY, ScriptedResponse::Document(environment_document()));
        h.orchestrator.refresh_cycle().await;
        let first = h.orchestrator.state().last_successful_update();
        assert!(first.is_some());

        h.fetcher.respond(TEST_CLIENT_KEY, ScriptedResponse::Status(502));
        let report = h.orchestrator.refresh_cycle().await;

        assert!(!report.is_fully_successful());
        assert_eq!(h.orchestrator.state().last_successful_update(), first);
        // the cached document keeps serving
        assert_eq!(*h.store.get(TEST_CLIENT_KEY).unwrap(), environment_document());
    }

    #[tokio::test]
    async fn test_conditional_fetch_uses_cached_updated_at() {
        let h = harness(1);
        h.fetcher
            .respond(TEST_CLIENT_KEY, ScriptedResponse::Document(environment_document()));
        h.orchestrator.refresh_cycle().await;
        h.fetcher.respond(TEST_CLIENT_KEY, ScriptedResponse::NotModified);
        let report = h.orchestrator.refresh_cycle().await;

        assert!(report.is_fully_successful());
        assert!(report.changed.is_empty());
        let calls = h.fetcher.calls();
        assert_eq!(calls[0].1, None);
        assert_eq!(
            calls[1].1.map(|d| d.timestamp()),
            Some(Utc.with_ymd_and_hms(2023, 6, 1, 10, 15, 30).unwrap().timestamp())
        );
    }

    #[tokio::test]
    async fn test_not_modified_without_document_fails_loudly() {
        let h = harness(1);
        h.fetcher.respond(TEST_CLIENT_KEY, ScriptedResponse::NotModified);

        let report = h.orchestrator.refresh_cycle().await;

        assert_eq!(report.failed.len(), 1);
        assert!(matches!(
            report.failed[0].1,
            FetchError::NotModifiedWithoutDocument
        ));
        assert!(h.store.get(TEST_CLIENT_KEY).is_none());
        assert_eq!(h.orchestrator.state().last_successful_update(), None);
    }

    #[tokio::test]
    async fn test_memoizer_invalidated_only_on_real_change() {
        let h = harness(1);
        h.fetcher
            .respond(TEST_CLIENT_KEY, ScriptedResponse::Document(environment_document()));
        h.orchestrator.refresh_cycle().await;

        let evaluate = || {
            let entry = h.store.get_entry(TEST_CLIENT_KEY).unwrap();
            h.memoizer.evaluate_environment(TEST_CLIENT_KEY, &entry, None)
        };

        evaluate();
        // same document again: still a hit
        h.orchestrator.refresh_cycle().await;
        evaluate();
        assert_eq!(h.engine.environment_calls(), 1);

        h.fetcher
            .respond(TEST_CLIENT_KEY, ScriptedResponse::Document(changed_document()));
        let report = h.orchestrator.refresh_cycle().await;
        assert_eq!(report.changed, vec![TEST_CLIENT_KEY.to_string()]);

        let results = evaluate();
        assert_eq!(h.engine.environment_calls(), 2);
        assert!(results[0].enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_fetch_times_out() {
        let h = harness(2);
        h.fetcher.respond(TEST_CLIENT_KEY, ScriptedResponse::Hang);
        h.fetcher
            .respond("key_1", ScriptedResponse::Document(environment_document()));

        let report = h.orchestrator.refresh_cycle().await;

        assert_eq!(report.refreshed, vec!["key_1".to_string()]);
        assert!(matches!(report.failed[0].1, FetchError::Timeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_ticks_and_stops() {
        let h = harness(1);
        h.fetcher
            .respond(TEST_CLIENT_KEY, ScriptedResponse::Document(environment_document()));
        let shutdown = Arc::new(Notify::new());

        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(h.orchestrator.clone().run(async move {
                shutdown.notified().await;
            }))
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.fetcher.calls().is_empty());

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(h.fetcher.calls().len(), 2);

        shutdown.notify_one();
        handle.await.unwrap();
    }
}

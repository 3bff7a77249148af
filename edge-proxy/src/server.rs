use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use crate::config::Config;
use crate::environments::document_fetcher::{FetchError, HttpDocumentFetcher};
use crate::environments::environment_service::EnvironmentService;
use crate::environments::environment_store::EnvironmentStore;
use crate::environments::refresh::{RefreshOrchestrator, RefreshState};
use crate::evaluation::engine::DocumentEngine;
use crate::evaluation::memoizer::EvaluationMemoizer;
use crate::notifications::change_store::ChangeNotificationStore;
use crate::router;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to create document fetcher for {url}: {source}")]
    Fetcher {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn serve<F>(
    config: Config,
    listener: TcpListener,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let fetcher = match HttpDocumentFetcher::new(&config.api_url, config.poll_timeout()) {
        Ok(fetcher) => Arc::new(fetcher),
        Err(source) => {
            tracing::error!(
                "Failed to create document fetcher for URL {}: {}",
                config.api_url,
                source
            );
            return Err(ServerError::Fetcher {
                url: config.api_url.clone(),
                source,
            });
        }
    };

    let store = Arc::new(EnvironmentStore::new());
    let memoizer = Arc::new(EvaluationMemoizer::new(
        Arc::new(DocumentEngine),
        config.flags_cache_size(),
        config.identities_cache_size(),
    ));
    let refresh_state = Arc::new(RefreshState::new());

    let orchestrator = Arc::new(RefreshOrchestrator::new(
        config.environment_key_pairs.clone(),
        fetcher,
        store.clone(),
        memoizer.clone(),
        refresh_state.clone(),
        config.poll_frequency(),
        config.poll_timeout(),
    ));

    // Serve only once every environment had a chance to load; failures are logged
    // and readiness stays down until a later cycle succeeds.
    let report = orchestrator.refresh_cycle().await;
    tracing::info!(
        refreshed = report.refreshed.len(),
        failed = report.failed.len(),
        "initial environment refresh finished"
    );

    let stop_refresh = Arc::new(Notify::new());
    let refresh_stopped = stop_refresh.clone();
    tokio::spawn(orchestrator.run(async move { refresh_stopped.notified().await }));

    // Streams started before the retention cutoff may still read anything newer.
    let change_store = Arc::new(ChangeNotificationStore::new(
        config.max_stream_age() + config.stream_delay(),
    ));

    let environment_service = Arc::new(EnvironmentService::new(
        config.environment_key_pairs.clone(),
        store,
        memoizer,
        config.max_trait_value_length,
    ));

    let app = router::router(environment_service, refresh_state, change_store, config);

    match listener.local_addr() {
        Ok(addr) => tracing::info!("listening on {:?}", addr),
        Err(e) => tracing::warn!("could not read listener address: {}", e),
    }

    let graceful = async move {
        shutdown.await;
        // a stored permit covers a loop that is not waiting yet
        stop_refresh.notify_one();
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(graceful)
    .await
    .map_err(|e| {
        tracing::error!("server exited with error: {}", e);
        ServerError::from(e)
    })
}

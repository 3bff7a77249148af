use std::net::SocketAddr;
use std::sync::Arc;

use httpmock::{Method, Mock, MockServer};
use reqwest::header::{ACCEPT_ENCODING, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Notify;

use edge_proxy::config::{Config, EnvironmentKeyPairs, DEFAULT_TEST_CONFIG};
use edge_proxy::server::serve;
use edge_proxy::test_utils::{environment_document_json, test_key_pairs};

pub const ENVIRONMENT_KEY_HEADER: &str = "X-Environment-Key";

/// Upstream API serving environment documents, one mock per server-side key.
pub struct Upstream {
    pub server: MockServer,
}

impl Upstream {
    pub async fn start() -> Upstream {
        Upstream {
            server: MockServer::start_async().await,
        }
    }

    pub fn api_url(&self) -> String {
        self.server.url("/api/v1")
    }

    pub async fn serve_document(&self, server_side_key: &str, document: Value) -> Mock<'_> {
        self.server
            .mock_async(|when, then| {
                when.method(Method::GET)
                    .path("/api/v1/environment-document/")
                    .header("x-environment-key", server_side_key);
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(document);
            })
            .await
    }

    pub async fn fail_document(&self, server_side_key: &str, status: u16) -> Mock<'_> {
        self.server
            .mock_async(|when, then| {
                when.method(Method::GET)
                    .path("/api/v1/environment-document/")
                    .header("x-environment-key", server_side_key);
                then.status(status);
            })
            .await
    }
}

/// Test config pointing at `upstream` and mirroring the first `count` test environments.
pub fn config_for(upstream: &Upstream, count: usize) -> Config {
    let mut config = DEFAULT_TEST_CONFIG.clone();
    config.api_url = upstream.api_url();
    config.environment_key_pairs = test_key_pairs(count);
    config
}

pub fn config_without_environments(upstream: &Upstream) -> Config {
    let mut config = DEFAULT_TEST_CONFIG.clone();
    config.api_url = upstream.api_url();
    config.environment_key_pairs = EnvironmentKeyPairs::default();
    config
}

pub fn default_document() -> Value {
    environment_document_json()
}

/// The default document with `count` enabled features, large enough to be compressed.
pub fn document_with_features(count: i64) -> Value {
    let mut document = environment_document_json();
    document["feature_states"] = (1..=count)
        .map(|id| {
            json!({
                "multivariate_feature_state_values": [],
                "feature_state_value": format!("value_{id}"),
                "feature": {"name": format!("feature_{id}"), "type": "STANDARD", "id": id},
                "enabled": true
            })
        })
        .collect();
    document
}

pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
}

impl ServerHandle {
    pub async fn for_config(config: Config) -> ServerHandle {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let notify = Arc::new(Notify::new());
        let shutdown = notify.clone();

        tokio::spawn(async move {
            serve(config, listener, async move { notify.notified().await }).await
        });
        ServerHandle { addr, shutdown }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{:?}{}", self.addr, path)
    }

    pub async fn get_flags(&self, environment_key: &str, query: &str) -> reqwest::Response {
        reqwest::Client::new()
            .get(self.url(&format!("/api/v1/flags/{query}")))
            .header(ENVIRONMENT_KEY_HEADER, environment_key)
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn get_flags_accepting_gzip(
        &self,
        environment_key: &str,
        query: &str,
    ) -> reqwest::Response {
        reqwest::Client::new()
            .get(self.url(&format!("/api/v1/flags/{query}")))
            .header(ENVIRONMENT_KEY_HEADER, environment_key)
            .header(ACCEPT_ENCODING, "gzip")
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn post_identity<T: Into<reqwest::Body>>(
        &self,
        environment_key: &str,
        body: T,
    ) -> reqwest::Response {
        reqwest::Client::new()
            .post(self.url("/api/v1/identities/"))
            .header(ENVIRONMENT_KEY_HEADER, environment_key)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn get_identity(&self, environment_key: &str, query: &str) -> reqwest::Response {
        reqwest::Client::new()
            .get(self.url(&format!("/api/v1/identities/{query}")))
            .header(ENVIRONMENT_KEY_HEADER, environment_key)
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        reqwest::Client::new()
            .get(self.url(path))
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn queue_change<T: Into<reqwest::Body>>(
        &self,
        path: &str,
        token: &str,
        body: T,
    ) -> reqwest::Response {
        reqwest::Client::new()
            .post(self.url(path))
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .expect("failed to send request")
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.notify_one()
    }
}

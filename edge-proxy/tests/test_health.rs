use anyhow::Result;
use assert_json_diff::assert_json_include;
use reqwest::StatusCode;
use rstest::rstest;
use serde_json::{json, Value};

use crate::common::*;

use edge_proxy::test_utils::TEST_SERVER_KEY;

pub mod common;

#[rstest]
#[case("/proxy/health/readiness")]
#[case("/proxy/health")]
#[case("/health")]
#[tokio::test]
async fn it_is_ready_after_a_successful_refresh(#[case] path: &str) -> Result<()> {
    let upstream = Upstream::start().await;
    upstream
        .serve_document(TEST_SERVER_KEY, default_document())
        .await;
    let server = ServerHandle::for_config(config_for(&upstream, 1)).await;

    let res = server.get(path).await;
    assert_eq!(StatusCode::OK, res.status());

    let body = res.json::<Value>().await?;
    assert_json_include!(actual: body.clone(), expected: json!({"status": "ok"}));
    assert!(body["last_successful_update"].is_string());

    Ok(())
}

#[tokio::test]
async fn it_is_not_ready_until_every_environment_refreshed() -> Result<()> {
    let upstream = Upstream::start().await;
    upstream
        .serve_document(TEST_SERVER_KEY, default_document())
        .await;
    upstream.fail_document("ser.key_1", 502).await;
    let server = ServerHandle::for_config(config_for(&upstream, 2)).await;

    let res = server.get("/proxy/health/readiness").await;
    assert_eq!(StatusCode::SERVICE_UNAVAILABLE, res.status());
    assert_json_include!(
        actual: res.json::<Value>().await?,
        expected: json!({
            "status": "error",
            "reason": "environment document(s) not updated."
        })
    );

    Ok(())
}

#[tokio::test]
async fn it_is_always_live() -> Result<()> {
    let upstream = Upstream::start().await;
    upstream.fail_document(TEST_SERVER_KEY, 500).await;
    let server = ServerHandle::for_config(config_for(&upstream, 1)).await;

    let res = server.get("/proxy/health/liveness").await;
    assert_eq!(StatusCode::OK, res.status());
    assert_json_include!(
        actual: res.json::<Value>().await?,
        expected: json!({"status": "ok"})
    );

    Ok(())
}

#[tokio::test]
async fn it_is_ready_with_no_environments_configured() -> Result<()> {
    let upstream = Upstream::start().await;
    let server = ServerHandle::for_config(config_without_environments(&upstream)).await;

    let res = server.get("/proxy/health/readiness").await;
    assert_eq!(StatusCode::OK, res.status());

    Ok(())
}

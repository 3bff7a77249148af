use anyhow::Result;
use assert_json_diff::assert_json_include;
use reqwest::StatusCode;
use rstest::rstest;
use serde_json::{json, Value};

use crate::common::*;

use edge_proxy::test_utils::{TEST_CLIENT_KEY, TEST_SERVER_KEY};

pub mod common;

async fn server_with_default_document(upstream: &Upstream) -> ServerHandle {
    upstream
        .serve_document(TEST_SERVER_KEY, default_document())
        .await;
    ServerHandle::for_config(config_for(upstream, 1)).await
}

#[tokio::test]
async fn it_evaluates_an_identity_with_traits() -> Result<()> {
    let upstream = Upstream::start().await;
    let server = server_with_default_document(&upstream).await;

    let payload = json!({
        "identifier": "alice",
        "traits": [
            {"trait_key": "first_name", "trait_value": "test"},
            {"trait_key": "age", "trait_value": 31}
        ]
    });
    let res = server
        .post_identity(TEST_CLIENT_KEY, payload.to_string())
        .await;
    assert_eq!(StatusCode::OK, res.status());

    let body = res.json::<Value>().await?;
    assert_json_include!(
        actual: body.clone(),
        expected: json!({
            "identifier": "alice",
            "traits": [
                {"trait_key": "first_name", "trait_value": "test"},
                {"trait_key": "age", "trait_value": 31}
            ]
        })
    );
    let flags = body["flags"].as_array().unwrap();
    assert_eq!(flags.len(), 2);
    assert!(flags
        .iter()
        .all(|flag| flag["feature"]["name"] != "feature_3"));

    Ok(())
}

#[tokio::test]
async fn it_evaluates_an_identity_from_the_query_string() -> Result<()> {
    let upstream = Upstream::start().await;
    let server = server_with_default_document(&upstream).await;

    let res = server.get_identity(TEST_SERVER_KEY, "?identifier=bob").await;
    assert_eq!(StatusCode::OK, res.status());

    let body = res.json::<Value>().await?;
    assert_eq!(body["identifier"], "bob");
    assert_eq!(body["traits"], json!([]));
    assert_eq!(body["flags"].as_array().unwrap().len(), 3);

    Ok(())
}

#[tokio::test]
async fn it_requires_an_identifier_in_the_query_string() -> Result<()> {
    let upstream = Upstream::start().await;
    let server = server_with_default_document(&upstream).await;

    let res = server.get_identity(TEST_CLIENT_KEY, "").await;
    assert_eq!(StatusCode::UNPROCESSABLE_ENTITY, res.status());

    Ok(())
}

#[rstest]
#[case::too_long(2001, StatusCode::UNPROCESSABLE_ENTITY)]
#[case::at_limit(2000, StatusCode::OK)]
#[tokio::test]
async fn it_limits_trait_value_length(
    #[case] length: usize,
    #[case] expected: StatusCode,
) -> Result<()> {
    let upstream = Upstream::start().await;
    let server = server_with_default_document(&upstream).await;

    let payload = json!({
        "identifier": "alice",
        "traits": [{"trait_key": "bio", "trait_value": "a".repeat(length)}]
    });
    let res = server
        .post_identity(TEST_CLIENT_KEY, payload.to_string())
        .await;
    assert_eq!(expected, res.status());

    Ok(())
}

#[rstest]
#[case::malformed_json("{\"identifier\": ", StatusCode::BAD_REQUEST)]
#[case::missing_identifier("{\"traits\": []}", StatusCode::UNPROCESSABLE_ENTITY)]
#[tokio::test]
async fn it_rejects_bad_identity_payloads(
    #[case] body: &'static str,
    #[case] expected: StatusCode,
) -> Result<()> {
    let upstream = Upstream::start().await;
    let server = server_with_default_document(&upstream).await;

    let res = server.post_identity(TEST_CLIENT_KEY, body).await;
    assert_eq!(expected, res.status());

    Ok(())
}

#[tokio::test]
async fn it_rejects_identities_for_unknown_keys() -> Result<()> {
    let upstream = Upstream::start().await;
    let server = server_with_default_document(&upstream).await;

    let payload = json!({"identifier": "alice"});
    let res = server.post_identity("ser.unknown", payload.to_string()).await;
    assert_eq!(StatusCode::UNAUTHORIZED, res.status());

    Ok(())
}

//! Integration tests for the default chain over real HTTP, using wiremock.

use std::time::Duration;

use assert2::{check, let_assert};
use tether::middleware::RetryPolicy;
use tether::{
    ClientBuilder, Error, HttpClientExt, Method, StaticTokenProvider, TransportErrorKind,
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, header_exists, method, path},
};

fn client_for(server: &MockServer) -> ClientBuilder {
    ClientBuilder::new()
        .base_url(format!("{}/v1.0", server.uri()))
        .retry_policy(RetryPolicy::new(2).with_backoff(Duration::from_millis(5), Duration::from_millis(20)))
        .authentication_provider(StaticTokenProvider::new("my-secret-token"))
}

/// Test that the default chain sends the bearer credential.
#[tokio::test]
async fn test_bearer_credential_is_sent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/me"))
        .and(header("Authorization", "Bearer my-secret-token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"displayName": "Alice"})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().expect("client");
    let response = client.get("me").await.expect("response");

    check!(response.is_success());
    let body: serde_json::Value = response.json().expect("json");
    check!(body["displayName"] == "Alice");
}

/// Test that no retries happen for 4xx errors.
#[tokio::test]
async fn test_no_retry_on_client_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().expect("client");
    let response = client.get("missing").await.expect("response");

    check!(response.status() == 404);
}

/// Test retry on server error (5xx) until the budget runs out.
#[tokio::test]
async fn test_retry_on_server_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3) // Initial + 2 retries
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().expect("client");
    let result = client.get("flaky").await;

    let_assert!(
        Err(Error::Transport {
            kind: TransportErrorKind::Status(503),
            attempts: 3,
            ..
        }) = result
    );
}

/// Test that redirects are followed through the real transport.
#[tokio::test]
async fn test_follow_redirect() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/v1.0/new"))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1.0/new"))
        .and(header("Authorization", "Bearer my-secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server).build().expect("client");
    let response = client.get("old").await.expect("response");

    check!(response.status() == 200);
    check!(response.url().map(url::Url::path) == Some("/v1.0/new"));
    check!(response.text().expect("utf-8") == "moved");
}

/// Test that logging and telemetry layers keep the flow intact.
#[tokio::test]
async fn test_logging_and_telemetry() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/v1.0/me"))
        .and(header_exists("client-request-id"))
        .and(header_exists("sdkversion"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server)
        .with_logging()
        .with_telemetry()
        .build()
        .expect("client");

    let response = client
        .patch_json("me", &serde_json::json!({"jobTitle": "Engineer"}))
        .await
        .expect("response");

    check!(response.status() == 204);
}

/// Test that the per-attempt timeout surfaces as a transport timeout.
#[tokio::test]
async fn test_attempt_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server)
        .timeout(Duration::from_millis(100))
        .max_retries(0)
        .build()
        .expect("client");

    let request = client.request(Method::GET, "slow").expect("builder").build();
    let result = client.execute(request).await;

    let_assert!(Err(error) = result);
    check!(error.is_timeout());
    check!(error.attempts() == Some(1));
}

/// Test that an unreachable host is a connection failure after retries.
#[tokio::test]
async fn test_connection_refused() {
    // Port 9 (discard) on localhost is expected to be closed.
    let client = ClientBuilder::new()
        .base_url("http://127.0.0.1:9/v1.0")
        .retry_policy(RetryPolicy::new(1).with_backoff(Duration::ZERO, Duration::ZERO))
        .authentication_provider(StaticTokenProvider::new("token"))
        .build()
        .expect("client");

    let result = client.get("me").await;
    let_assert!(Err(error) = result);
    check!(error.is_connection());
    check!(error.attempts() == Some(2));
}

use std::time::Duration;

use rama::http::{StatusCode, service::client::HttpClientExt as _};

use mocks3_lib::client::ClientConfig;

use crate::test::e2e;

#[tokio::test]
#[tracing_test::traced_test]
async fn test_invalid_size_query() {
    let runtime = e2e::runtime::get().await;
    let client = runtime.web_client();

    for query in ["", "?size=abc", "?size=-1", "?chunk=10"] {
        let resp = client
            .get(format!("{}/file{query}", runtime.base_url()))
            .send()
            .await
            .unwrap();
        assert_eq!(StatusCode::BAD_REQUEST, resp.status(), "query: {query}");
    }
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_unknown_route_and_method() {
    let runtime = e2e::runtime::get().await;
    let client = runtime.web_client();

    let resp = client
        .get(format!("{}/bucket/object", runtime.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::NOT_FOUND, resp.status());

    let resp = client
        .delete(format!("{}/file", runtime.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::METHOD_NOT_ALLOWED, resp.status());
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_max_message_size() {
    let runtime = e2e::runtime::spawn_with_args(&["--max-message-size", "1024"]).await;

    let client = runtime.transfer_client(ClientConfig::default());
    assert!(client.get_file(1024).await.is_ok());
    assert!(client.get_file(1025).await.unwrap_err().is_invalid_input());
    assert!(client.put_file(2048).await.unwrap_err().is_invalid_input());

    let client = runtime.transfer_client(ClientConfig {
        streaming: true,
        chunk_size: 512,
        ..Default::default()
    });
    assert!(client.put_file(2048).await.unwrap_err().is_invalid_input());
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_request_deadline_exceeded() {
    let runtime = e2e::runtime::get().await;
    let client = runtime.transfer_client(ClientConfig {
        request_timeout: Duration::from_millis(20),
        ..Default::default()
    });

    // GET of 1 MiB has a target latency well above 100ms
    let err = client.get_file(1024 * 1024).await.unwrap_err();
    assert!(err.is_timeout(), "unexpected error: {err}");
}

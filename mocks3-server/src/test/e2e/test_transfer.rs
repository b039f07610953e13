use rama::http::{
    BodyExtractExt as _, StatusCode, header::SERVER, service::client::HttpClientExt as _,
};

use mocks3_lib::{client::ClientConfig, latency::Operation};

use crate::test::e2e;

#[tokio::test]
#[tracing_test::traced_test]
async fn test_ping() {
    let runtime = e2e::runtime::get().await;
    let client = runtime.web_client();

    let resp = client
        .get(format!("{}/ping", runtime.base_url()))
        .send()
        .await
        .unwrap();

    assert_eq!(StatusCode::OK, resp.status());
    assert!(
        resp.headers()
            .get(SERVER)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .starts_with("mocks3/")
    );
    assert_eq!("pong", resp.try_into_string().await.unwrap());
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_get_file_unary() {
    let runtime = e2e::runtime::get().await;
    let client = runtime.transfer_client(ClientConfig::default());

    let (payload, report) = client.get_file(4096).await.unwrap();

    assert_eq!(4096, payload.len());
    assert_eq!(Operation::Get, report.operation);
    assert!(report.end_to_end >= report.target);
    assert_eq!(
        report.target.as_micros(),
        report.server.expected_latency.as_micros()
    );
    assert!(report.server.sleep_time <= report.target);
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_get_file_stream() {
    let runtime = e2e::runtime::get().await;
    let client = runtime.transfer_client(ClientConfig {
        streaming: true,
        chunk_size: 64 * 1024,
        ..Default::default()
    });

    let size = 3 * 1024 * 1024 + 17;
    let (payload, report) = client.get_file(size).await.unwrap();

    assert_eq!(size as usize, payload.len());
    assert!(report.end_to_end >= report.target);
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_put_file_unary() {
    let runtime = e2e::runtime::get().await;
    let client = runtime.transfer_client(ClientConfig::default());

    let report = client.put_file(2 * 1024 * 1024).await.unwrap();

    assert_eq!(Operation::Put, report.operation);
    assert_eq!(2 * 1024 * 1024, report.size);
    assert!(report.end_to_end >= report.target);
    // the server accounts for the creation time reported by the client
    assert_eq!(
        report.creation_time.as_micros(),
        report.server.creation_time.as_micros()
    );
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_put_file_stream() {
    let runtime = e2e::runtime::get().await;
    let client = runtime.transfer_client(ClientConfig {
        streaming: true,
        chunk_size: 100_000,
        ..Default::default()
    });

    let report = client.put_file(1_000_001).await.unwrap();

    assert_eq!(1_000_001, report.size);
    assert!(report.end_to_end >= report.target);
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_put_then_get_without_compensation() {
    let runtime = e2e::runtime::get().await;
    let client = runtime.transfer_client(ClientConfig {
        compensate: false,
        ..Default::default()
    });

    for op in [Operation::Put, Operation::Get] {
        let report = client.transfer(op, 1).await.unwrap();
        assert_eq!(op, report.operation);
        assert!(report.client_sleep.is_zero());
    }
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_disabled_latency_still_reports_target() {
    let runtime = e2e::runtime::spawn_with_args(&["--disable-latency"]).await;
    let client = runtime.transfer_client(ClientConfig {
        compensate: false,
        ..Default::default()
    });

    let (_, report) = client.get_file(1024).await.unwrap();

    assert!(report.server.sleep_time.is_zero());
    assert!(!report.server.expected_latency.is_zero());
}

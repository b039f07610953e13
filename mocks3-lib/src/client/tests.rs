use super::*;

use crate::service::{EmulationConfig, TransferService};

fn new_client(emulation: EmulationConfig, cfg: ClientConfig) -> TransferClient<TransferService> {
    let svc = TransferService::new(LatencyModel::default(), emulation);
    TransferClient::new_with_service(svc, "mocks3.test:30000", LatencyModel::default(), cfg)
}

fn without_server_latency() -> EmulationConfig {
    EmulationConfig {
        latency_enabled: false,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
#[tracing_test::traced_test]
async fn test_get_file_server_sleep_covers_target() {
    let client = new_client(EmulationConfig::default(), ClientConfig::default());
    let target = LatencyModel::default()
        .target_latency(Operation::Get, 2048)
        .unwrap();

    let (payload, report) = client.get_file(2048).await.unwrap();

    assert_eq!(2048, payload.len());
    assert_eq!(Operation::Get, report.operation);
    assert_eq!(target, report.target);
    assert!(report.end_to_end >= target);
    // server slept (nearly) everything, the client has at most the header rounding left
    assert!(report.client_sleep < Duration::from_micros(1), "{report:?}");
}

#[tokio::test(start_paused = true)]
async fn test_get_file_client_compensates_fast_server() {
    let client = new_client(without_server_latency(), ClientConfig::default());
    let target = LatencyModel::default()
        .target_latency(Operation::Get, 10)
        .unwrap();

    let start = Instant::now();
    let (_, report) = client.get_file(10).await.unwrap();

    assert_eq!(target, report.client_sleep);
    // the paused clock advances in whole milliseconds
    assert!(report.end_to_end >= target, "{report:?}");
    assert!(report.end_to_end < target + Duration::from_millis(1), "{report:?}");
    assert!(start.elapsed() >= target);
    assert_eq!(Duration::ZERO, report.server.sleep_time);
}

/// Answers like a server whose own work outlasts the target latency.
#[derive(Debug, Clone)]
struct SlowService {
    inner: TransferService,
    delay: Duration,
}

impl Service<Request> for SlowService {
    type Output = Response;
    type Error = Infallible;

    async fn serve(&self, req: Request) -> Result<Self::Output, Self::Error> {
        tokio::time::sleep(self.delay).await;
        self.inner.serve(req).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_transfer_slower_than_target_never_sleeps() {
    let model = LatencyModel::default();
    let target = model.target_latency(Operation::Get, 1024).unwrap();
    let delay = target + Duration::from_millis(250);

    let client = TransferClient::new_with_service(
        SlowService {
            inner: TransferService::new(LatencyModel::default(), without_server_latency()),
            delay,
        },
        "mocks3.test:30000",
        model,
        ClientConfig::default(),
    );

    for op in [Operation::Get, Operation::Put] {
        let report = client.transfer(op, 1024).await.unwrap();
        assert_eq!(Duration::ZERO, report.client_sleep, "{op}: {report:?}");
        assert!(report.end_to_end >= delay, "{op}: {report:?}");
        assert!(report.end_to_end > report.target, "{op}: {report:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_no_compensation() {
    let client = new_client(
        without_server_latency(),
        ClientConfig {
            compensate: false,
            ..Default::default()
        },
    );

    let report = client.transfer(Operation::Put, 100).await.unwrap();
    assert_eq!(Duration::ZERO, report.client_sleep);
    assert_eq!(Duration::ZERO, report.end_to_end);
}

#[tokio::test(start_paused = true)]
async fn test_put_file_reports_creation_time() {
    let client = new_client(EmulationConfig::default(), ClientConfig::default());
    let target = LatencyModel::default()
        .target_latency(Operation::Put, 4096)
        .unwrap();

    let report = client.put_file(4096).await.unwrap();

    assert_eq!(Operation::Put, report.operation);
    assert_eq!(4096, report.size);
    assert_eq!(
        report.creation_time.as_micros(),
        report.server.creation_time.as_micros()
    );
    assert_eq!(
        target.as_micros(),
        report.server.expected_latency.as_micros()
    );
    assert!(report.end_to_end >= target);
}

#[tokio::test(start_paused = true)]
async fn test_streaming_transfers() {
    let client = new_client(
        EmulationConfig::default(),
        ClientConfig {
            streaming: true,
            chunk_size: 1000,
            ..Default::default()
        },
    );

    let (payload, report) = client.get_file(4500).await.unwrap();
    assert_eq!(4500, payload.len());
    assert!(report.end_to_end >= report.target);

    let report = client.put_file(4500).await.unwrap();
    assert_eq!(4500, report.size);
    assert!(report.end_to_end >= report.target);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_exceeded_is_timeout() {
    let client = new_client(
        EmulationConfig::default(),
        ClientConfig {
            request_timeout: Duration::from_millis(10),
            ..Default::default()
        },
    );

    let start = Instant::now();
    let err = client.get_file(1).await.unwrap_err();

    assert!(err.is_timeout(), "{err}");
    assert_eq!(Duration::from_millis(10), start.elapsed());
}

#[tokio::test(start_paused = true)]
async fn test_server_refusal_is_invalid_input() {
    let client = new_client(
        EmulationConfig {
            max_message_size: 10,
            ..Default::default()
        },
        ClientConfig::default(),
    );

    let err = client.get_file(11).await.unwrap_err();
    assert!(err.is_invalid_input(), "{err}");

    let err = client.put_file(11).await.unwrap_err();
    assert!(err.is_invalid_input(), "{err}");
}

#[tokio::test(start_paused = true)]
async fn test_zero_size_floor_transfer() {
    let client = new_client(EmulationConfig::default(), ClientConfig::default());
    let report = client.transfer(Operation::Get, 0).await.unwrap();
    assert_eq!(0, report.size);
    assert!(!report.target.is_zero());
}

#[derive(Debug, Clone)]
struct ShortReadService;

impl Service<Request> for ShortReadService {
    type Output = Response;
    type Error = Infallible;

    async fn serve(&self, _req: Request) -> Result<Self::Output, Self::Error> {
        let mut response = Response::new(Body::from("abc"));
        TimingMetadata::default().write_headers(response.headers_mut());
        Ok(response)
    }
}

#[tokio::test(start_paused = true)]
async fn test_short_read_is_protocol_error() {
    let client = TransferClient::new_with_service(
        ShortReadService,
        "mocks3.test",
        LatencyModel::default(),
        ClientConfig::default(),
    );

    let err = client.get_file(10).await.unwrap_err();
    assert!(matches!(err, TransferError::Protocol(_)), "{err}");
}

#[derive(Debug, Clone)]
struct RefusedService;

impl Service<Request> for RefusedService {
    type Output = Response;
    type Error = BoxError;

    async fn serve(&self, _req: Request) -> Result<Self::Output, Self::Error> {
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused").into())
    }
}

#[tokio::test(start_paused = true)]
async fn test_connection_failure_is_transport_error() {
    let client = TransferClient::new_with_service(
        RefusedService,
        "mocks3.test",
        LatencyModel::default(),
        ClientConfig::default(),
    );

    let err = client.put_file(10).await.unwrap_err();
    assert!(matches!(err, TransferError::Transport(_)), "{err}");
}

//! Compensating client.
//!
//! Measures the complete end-to-end time of a transfer, including
//! payload creation and the network exchange, and sleeps whatever is
//! left of the target latency so the caller observes the modelled time
//! regardless of how much time was already spent on the wire.

use std::{convert::Infallible, sync::Arc, time::Duration};

use rama::{
    Layer as _, Service,
    bytes::Bytes,
    error::{BoxError, ErrorContext as _},
    http::{
        Body, Method, Request, Response, StatusCode,
        body::util::BodyExt as _,
        client::EasyHttpWebClient,
        layer::{map_request_body::MapRequestBodyLayer, map_response_body::MapResponseBodyLayer},
    },
    layer::MapErrLayer,
    rt::Executor,
    service::BoxService,
    telemetry::tracing,
};
use tokio::time::Instant;

use crate::{
    TransferError,
    latency::{LatencyModel, Operation},
    payload::{DEFAULT_CHUNK_SIZE, PayloadGenerator, TILE_SIZE, split_into_chunks},
    timing::{self, TimingMetadata},
    wire::{
        FILE_PATH, FILE_STREAM_PATH, HEADER_CREATION_TIME, HEADER_TIMEOUT, PutResponse, SizeQuery,
        insert_duration_header,
    },
};

mod address;
pub use self::address::{DEFAULT_SERVER_ADDRESS, SERVER_ADDRESS_ENV, resolve_server_address};

#[cfg(test)]
mod tests;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default HTTP client used by the [`TransferClient`].
pub type WebClient = BoxService<Request, Response, BoxError>;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bound on the network exchange of a single transfer.
    pub request_timeout: Duration,
    /// Sleep the residual of the target latency on the client side.
    pub compensate: bool,
    /// Use the chunked `/file/stream` endpoints.
    pub streaming: bool,
    /// Chunk size used for streaming transfers.
    pub chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            compensate: true,
            streaming: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Timings of a single completed transfer as observed by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    pub operation: Operation,
    pub size: u64,
    pub target: Duration,
    /// Time from the start marker until the transfer was handed back.
    pub end_to_end: Duration,
    /// Payload creation: client side for PUT, server reported for GET.
    pub creation_time: Duration,
    /// Exchange time minus the sleep (and server creation) reported by the server.
    pub communication_time: Duration,
    /// Residual slept by the client itself.
    pub client_sleep: Duration,
    pub server: TimingMetadata,
}

pub struct TransferClient<S = WebClient> {
    inner: S,
    address: String,
    model: Arc<LatencyModel>,
    payloads: PayloadGenerator,
    cfg: ClientConfig,
}

impl<S> std::fmt::Debug for TransferClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferClient")
            .field("address", &self.address)
            .field("model", &self.model)
            .field("cfg", &self.cfg)
            .finish()
    }
}

impl<S: Clone> Clone for TransferClient<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            address: self.address.clone(),
            model: self.model.clone(),
            payloads: self.payloads.clone(),
            cfg: self.cfg.clone(),
        }
    }
}

impl TransferClient {
    /// Create a client for the resolved server address using the default web client.
    pub fn try_new(
        address: Option<&str>,
        model: LatencyModel,
        cfg: ClientConfig,
    ) -> Result<Self, BoxError> {
        let inner = new_web_client()?;
        Ok(Self::new_with_service(
            inner,
            &resolve_server_address(address)?,
            model,
            cfg,
        ))
    }
}

impl<S> TransferClient<S>
where
    S: Service<Request, Output = Response, Error: Into<BoxError>>,
{
    /// Create a client which exchanges its requests over the given service.
    pub fn new_with_service(inner: S, address: &str, model: LatencyModel, cfg: ClientConfig) -> Self {
        Self {
            inner,
            address: address.to_owned(),
            model: Arc::new(model),
            payloads: PayloadGenerator::new(),
            cfg,
        }
    }

    rama::utils::macros::generate_set_and_with! {
        /// Use a custom payload generator for PUT transfers.
        pub fn payload_generator(mut self, generator: PayloadGenerator) -> Self {
            self.payloads = generator;
            self
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn config(&self) -> &ClientConfig {
        &self.cfg
    }

    /// Run a single transfer of `size` bytes, discarding any GET payload.
    pub async fn transfer(&self, op: Operation, size: u64) -> Result<TransferReport, TransferError> {
        match op {
            Operation::Get => self.get_file(size).await.map(|(_, report)| report),
            Operation::Put => self.put_file(size).await,
        }
    }

    /// Download `size` bytes and return them once the GET target latency has passed.
    pub async fn get_file(&self, size: u64) -> Result<(Bytes, TransferReport), TransferError> {
        let start = Instant::now();
        let target = self.model.target_latency(Operation::Get, size)?;

        let uri = self.file_uri(size)?;
        let req = self.new_request(Method::GET, &uri, Body::empty())?;

        let exchange_start = Instant::now();
        let (payload, server) = self
            .with_deadline(async {
                let response = self.send(req).await?;
                let server = TimingMetadata::try_from_headers(response.headers())?;
                let payload = response
                    .into_body()
                    .collect()
                    .await
                    .map_err(TransferError::transport)?
                    .to_bytes();
                Ok::<_, TransferError>((payload, server))
            })
            .await?;
        let exchange = exchange_start.elapsed();

        if payload.len() as u64 != size {
            return Err(TransferError::protocol(format!(
                "received {} bytes, expected {size}",
                payload.len()
            )));
        }

        let report = self
            .finish(
                start,
                Operation::Get,
                size,
                target,
                server.creation_time,
                exchange.saturating_sub(server.sleep_time.saturating_add(server.creation_time)),
                server,
            )
            .await;
        Ok((payload, report))
    }

    /// Create a payload of `size` bytes and upload it, returning once
    /// the PUT target latency has passed.
    pub async fn put_file(&self, size: u64) -> Result<TransferReport, TransferError> {
        let start = Instant::now();
        let target = self.model.target_latency(Operation::Put, size)?;

        let len = usize::try_from(size).map_err(|_| {
            TransferError::invalid_input(format!("size of {size} bytes does not fit in memory"))
        })?;
        let payload = if len < TILE_SIZE {
            self.payloads.create_payload(len)
        } else {
            let payloads = self.payloads.clone();
            tokio::task::spawn_blocking(move || payloads.create_payload(len))
                .await
                .map_err(TransferError::transport)?
        };
        let creation_time = start.elapsed();

        let body = if self.cfg.streaming {
            let chunks = split_into_chunks(payload, self.cfg.chunk_size);
            Body::from_stream(tokio_stream::iter(chunks.map(Ok::<_, Infallible>)))
        } else {
            Body::from(payload)
        };

        let path = if self.cfg.streaming {
            FILE_STREAM_PATH
        } else {
            FILE_PATH
        };
        let uri = format!("http://{}{path}", self.address);
        let mut req = self.new_request(Method::PUT, &uri, body)?;
        insert_duration_header(req.headers_mut(), HEADER_CREATION_TIME, creation_time);

        let exchange_start = Instant::now();
        let (stored, server) = self
            .with_deadline(async {
                let response = self.send(req).await?;
                let server = TimingMetadata::try_from_headers(response.headers())?;
                let body = response
                    .into_body()
                    .collect()
                    .await
                    .map_err(TransferError::transport)?
                    .to_bytes();
                let stored: PutResponse = serde_json::from_slice(&body).map_err(|err| {
                    TransferError::protocol(format!("invalid PUT response body: {err}"))
                })?;
                Ok::<_, TransferError>((stored, server))
            })
            .await?;
        let exchange = exchange_start.elapsed();

        if stored.size != size {
            return Err(TransferError::protocol(format!(
                "server stored {} bytes, sent {size}",
                stored.size
            )));
        }

        Ok(self
            .finish(
                start,
                Operation::Put,
                size,
                target,
                creation_time,
                exchange.saturating_sub(server.sleep_time),
                server,
            )
            .await)
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        start: Instant,
        operation: Operation,
        size: u64,
        target: Duration,
        creation_time: Duration,
        communication_time: Duration,
        server: TimingMetadata,
    ) -> TransferReport {
        let client_sleep = if self.cfg.compensate {
            timing::residual(target, start.elapsed())
        } else {
            Duration::ZERO
        };
        if !client_sleep.is_zero() {
            tokio::time::sleep(client_sleep).await;
        }

        let report = TransferReport {
            operation,
            size,
            target,
            end_to_end: start.elapsed(),
            creation_time,
            communication_time,
            client_sleep,
            server,
        };
        tracing::debug!(
            %operation,
            size,
            ?target,
            end_to_end = ?report.end_to_end,
            ?client_sleep,
            "transfer complete"
        );
        report
    }

    fn file_uri(&self, size: u64) -> Result<String, TransferError> {
        let path = if self.cfg.streaming {
            FILE_STREAM_PATH
        } else {
            FILE_PATH
        };
        let query = SizeQuery {
            size,
            chunk: self.cfg.streaming.then_some(self.cfg.chunk_size),
        }
        .to_query_string()?;
        Ok(format!("http://{}{path}?{query}", self.address))
    }

    fn new_request(&self, method: Method, uri: &str, body: Body) -> Result<Request, TransferError> {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .body(body)
            .map_err(|err| TransferError::invalid_input(format!("invalid request uri: {err}")))?;
        insert_duration_header(req.headers_mut(), HEADER_TIMEOUT, self.cfg.request_timeout);
        Ok(req)
    }

    async fn send(&self, req: Request) -> Result<Response, TransferError> {
        let response = self
            .inner
            .serve(req)
            .await
            .map_err(|err| TransferError::Transport(err.into()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let reason = response
            .into_body()
            .collect()
            .await
            .map(|collected| String::from_utf8_lossy(&collected.to_bytes()).into_owned())
            .unwrap_or_default();

        Err(match status {
            StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE => {
                TransferError::InvalidInput(format!("server refused request ({status}): {reason}"))
            }
            StatusCode::GATEWAY_TIMEOUT => TransferError::Timeout(self.cfg.request_timeout),
            _ => TransferError::transport(format!("unexpected http status {status}: {reason}")),
        })
    }

    async fn with_deadline<T>(
        &self,
        exchange: impl Future<Output = Result<T, TransferError>>,
    ) -> Result<T, TransferError> {
        tokio::time::timeout(self.cfg.request_timeout, exchange)
            .await
            .map_err(|_| TransferError::Timeout(self.cfg.request_timeout))?
    }
}

/// Plain http web client without proxy support or retries:
/// a failed transfer is reported, never repeated.
pub fn new_web_client() -> Result<WebClient, BoxError> {
    let inner = EasyHttpWebClient::connector_builder()
        .with_default_transport_connector()
        .without_tls_proxy_support()
        .without_proxy_support()
        .with_tls_support_using_boringssl(None)
        .with_default_http_connector(Executor::default())
        .try_with_default_connection_pool()
        .context("create connection pool for mocks3 web client")?
        .build_client();

    Ok((
        MapResponseBodyLayer::new(Body::new),
        MapErrLayer::new(Into::<BoxError>::into),
        MapRequestBodyLayer::new(Body::new),
    )
        .into_layer(inner)
        .boxed())
}

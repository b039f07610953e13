//! The transfer service: an HTTP service emulating object GET and PUT
//! latencies, see [`crate::wire`] for the contract.
//!
//! Every transfer records an arrival instant, does its local work
//! (payload generation or body ingestion) and then sleeps for whatever
//! is left of the target latency.

use std::{
    convert::Infallible,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use rama::{
    Service,
    bytes::Bytes,
    http::{
        Body, HeaderMap, Method, Request, Response, StatusCode,
        body::util::BodyExt as _,
        header::CONTENT_LENGTH,
        headers::ContentType,
        service::web::response::{Headers, IntoResponse, Json},
    },
    telemetry::tracing,
};
use tokio::time::{Instant, Sleep};
use tokio_stream::Stream;

use crate::{
    TransferError,
    latency::{LatencyModel, Operation},
    payload::{DEFAULT_CHUNK_SIZE, PayloadChunks, PayloadGenerator, TILE_SIZE},
    timing::{self, TimingMetadata},
    wire::{
        FILE_PATH, FILE_STREAM_PATH, HEADER_CREATION_TIME, HEADER_TIMEOUT, PING_PATH, PutResponse,
        SizeQuery, read_duration_header,
    },
};


/// Default upper bound of a single transfer (1 GiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 1024 * 1024 * 1024;

/// Runtime switches of the [`TransferService`].
#[derive(Debug, Clone)]
pub struct EmulationConfig {
    /// When disabled the target is still computed and reported, but never slept.
    pub latency_enabled: bool,
    /// Subtract the creation time reported by a PUT client from the residual.
    pub use_client_creation_time: bool,
    /// Largest accepted transfer size in bytes.
    pub max_message_size: u64,
    /// Chunk size used by streaming GET when the client does not ask for one.
    pub chunk_size: usize,
}

impl Default for EmulationConfig {
    fn default() -> Self {
        Self {
            latency_enabled: true,
            use_client_creation_time: true,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransferService {
    model: Arc<LatencyModel>,
    payloads: PayloadGenerator,
    cfg: EmulationConfig,
}

impl TransferService {
    pub fn new(model: LatencyModel, cfg: EmulationConfig) -> Self {
        Self {
            model: Arc::new(model),
            payloads: PayloadGenerator::new(),
            cfg,
        }
    }

    rama::utils::macros::generate_set_and_with! {
        /// Use a custom (e.g. differently tuned) payload generator.
        pub fn payload_generator(mut self, generator: PayloadGenerator) -> Self {
            self.payloads = generator;
            self
        }
    }

    pub fn model(&self) -> &LatencyModel {
        &self.model
    }

    pub fn config(&self) -> &EmulationConfig {
        &self.cfg
    }

    /// Generate `size` bytes and return them once the GET target latency has passed.
    pub async fn get_file(&self, size: u64) -> Result<(Bytes, TimingMetadata), TransferError> {
        let arrival = Instant::now();
        let len = self.check_size(size)?;
        let target = self.model.target_latency(Operation::Get, size)?;

        let payload = if len < TILE_SIZE {
            self.payloads.create_payload(len)
        } else {
            let payloads = self.payloads.clone();
            tokio::task::spawn_blocking(move || payloads.create_payload(len))
                .await
                .map_err(TransferError::transport)?
        };
        let creation_time = arrival.elapsed();

        let sleep_time = self.sleep_residual(target, creation_time).await;
        tracing::debug!(
            size,
            ?target,
            ?creation_time,
            ?sleep_time,
            "GET file: payload ready"
        );

        Ok((
            payload,
            TimingMetadata {
                expected_latency: target,
                sleep_time,
                creation_time,
            },
        ))
    }

    /// Streaming flavour of [`Self::get_file`].
    ///
    /// The residual sleep is applied once, before the first chunk is
    /// handed out. Chunks are produced lazily.
    pub async fn get_file_stream(
        &self,
        size: u64,
        chunk_size: Option<usize>,
    ) -> Result<(PayloadChunks, TimingMetadata), TransferError> {
        let arrival = Instant::now();
        self.check_size(size)?;
        let target = self.model.target_latency(Operation::Get, size)?;

        let chunks = self
            .payloads
            .chunks(size, chunk_size.unwrap_or(self.cfg.chunk_size));
        let creation_time = arrival.elapsed();

        let sleep_time = self.sleep_residual(target, creation_time).await;
        tracing::debug!(
            size,
            ?target,
            ?sleep_time,
            "GET file stream: start streaming chunks"
        );

        Ok((
            chunks,
            TimingMetadata {
                expected_latency: target,
                sleep_time,
                creation_time,
            },
        ))
    }

    /// Consume a (possibly chunked) PUT body without buffering it and
    /// answer once the PUT target latency has passed.
    ///
    /// Reading stops as soon as the body grows past the max message size.
    /// The sleep decision is only taken after all bytes are in.
    pub async fn put_file(
        &self,
        body: Body,
        client_creation_time: Option<Duration>,
    ) -> Result<(u64, TimingMetadata), TransferError> {
        let arrival = Instant::now();
        let size = self.drain_body(body).await?;
        self.complete_put(arrival, size, client_creation_time).await
    }

    async fn complete_put(
        &self,
        arrival: Instant,
        size: u64,
        client_creation_time: Option<Duration>,
    ) -> Result<(u64, TimingMetadata), TransferError> {
        let target = self.model.target_latency(Operation::Put, size)?;

        let creation_time = if self.cfg.use_client_creation_time {
            client_creation_time.unwrap_or_default()
        } else {
            Duration::ZERO
        };

        let sleep_time = self
            .sleep_residual(target, creation_time.saturating_add(arrival.elapsed()))
            .await;
        tracing::debug!(
            size,
            ?target,
            ?creation_time,
            ?sleep_time,
            "PUT file: payload received"
        );

        Ok((
            size,
            TimingMetadata {
                expected_latency: target,
                sleep_time,
                creation_time,
            },
        ))
    }

    async fn sleep_residual(&self, target: Duration, spent: Duration) -> Duration {
        if !self.cfg.latency_enabled {
            return Duration::ZERO;
        }

        let sleep_time = timing::residual(target, spent);
        if !sleep_time.is_zero() {
            tokio::time::sleep(sleep_time).await;
        }
        sleep_time
    }

    fn check_size(&self, size: u64) -> Result<usize, TransferError> {
        if size > self.cfg.max_message_size {
            return Err(TransferError::invalid_input(format!(
                "size of {size} bytes exceeds the max message size of {} bytes",
                self.cfg.max_message_size
            )));
        }
        usize::try_from(size).map_err(|_| {
            TransferError::invalid_input(format!("size of {size} bytes does not fit in memory"))
        })
    }

    async fn drain_body(&self, mut body: Body) -> Result<u64, TransferError> {
        let mut size = 0u64;
        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(TransferError::transport)?;
            if let Some(data) = frame.data_ref() {
                size += data.len() as u64;
                self.check_size(size)?;
            }
        }
        Ok(size)
    }

    async fn route(&self, req: Request, deadline: Option<Deadline>) -> Response {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();

        let result = match (method, path.as_str()) {
            (Method::GET, FILE_PATH) => self.serve_get(req, false, deadline).await,
            (Method::GET, FILE_STREAM_PATH) => self.serve_get(req, true, deadline).await,
            (Method::PUT, FILE_PATH | FILE_STREAM_PATH) => self.serve_put(req).await,
            (Method::GET, PING_PATH) => Ok("pong".into_response()),
            (_, FILE_PATH | FILE_STREAM_PATH | PING_PATH) => {
                Ok(StatusCode::METHOD_NOT_ALLOWED.into_response())
            }
            _ => Ok(StatusCode::NOT_FOUND.into_response()),
        };

        result.unwrap_or_else(error_response)
    }

    async fn serve_get(
        &self,
        req: Request,
        streaming: bool,
        deadline: Option<Deadline>,
    ) -> Result<Response, TransferError> {
        let query = SizeQuery::parse(req.uri().query())?;

        let (body, metadata) = if streaming {
            let (chunks, metadata) = self.get_file_stream(query.size, query.chunk).await?;
            // chunks handed out after the headers still honour the deadline
            let body = match deadline {
                Some(deadline) => Body::from_stream(DeadlineChunks::new(chunks, deadline)),
                None => Body::from_stream(tokio_stream::iter(chunks.map(Ok::<_, Infallible>))),
            };
            (body, metadata)
        } else {
            let (payload, metadata) = self.get_file(query.size).await?;
            (Body::from(payload), metadata)
        };

        let response = (
            StatusCode::OK,
            Headers::single(ContentType::octet_stream()),
            body,
        )
            .into_response();
        Ok(with_timing_headers(response, &metadata))
    }

    async fn serve_put(&self, req: Request) -> Result<Response, TransferError> {
        let client_creation_time = read_duration_header(req.headers(), &HEADER_CREATION_TIME)?;

        if let Some(declared) = content_length(req.headers())
            && declared > self.cfg.max_message_size
        {
            tracing::debug!(
                declared,
                max = self.cfg.max_message_size,
                "PUT file: refuse oversized payload"
            );
            return Ok((
                StatusCode::PAYLOAD_TOO_LARGE,
                format!(
                    "payload of {declared} bytes exceeds the max message size of {} bytes",
                    self.cfg.max_message_size
                ),
            )
                .into_response());
        }

        let (size, metadata) = self.put_file(req.into_body(), client_creation_time).await?;

        let response = (StatusCode::OK, Json(PutResponse { size })).into_response();
        Ok(with_timing_headers(response, &metadata))
    }
}

impl Service<Request> for TransferService {
    type Output = Response;
    type Error = Infallible;

    async fn serve(&self, req: Request) -> Result<Self::Output, Self::Error> {
        let deadline = match read_duration_header(req.headers(), &HEADER_TIMEOUT) {
            Ok(deadline) => deadline,
            Err(err) => return Ok(error_response(err)),
        };

        // a deadline too far out to represent is no deadline at all
        let Some(deadline) = deadline.and_then(|timeout| {
            Some(Deadline {
                timeout,
                expires_at: Instant::now().checked_add(timeout)?,
            })
        }) else {
            return Ok(self.route(req, None).await);
        };

        match tokio::time::timeout_at(deadline.expires_at, self.route(req, Some(deadline))).await {
            Ok(response) => Ok(response),
            Err(_) => {
                tracing::debug!(
                    timeout = ?deadline.timeout,
                    "request deadline exceeded: abort transfer"
                );
                Ok(error_response(TransferError::Timeout(deadline.timeout)))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    timeout: Duration,
    expires_at: Instant,
}

/// Streaming GET body which stops with a [`TransferError::Timeout`]
/// once the request deadline expires, even after the headers went out.
struct DeadlineChunks {
    chunks: PayloadChunks,
    expired: Pin<Box<Sleep>>,
    timeout: Duration,
    done: bool,
}

impl DeadlineChunks {
    fn new(chunks: PayloadChunks, deadline: Deadline) -> Self {
        Self {
            chunks,
            expired: Box::pin(tokio::time::sleep_until(deadline.expires_at)),
            timeout: deadline.timeout,
            done: false,
        }
    }
}

impl Stream for DeadlineChunks {
    type Item = Result<Bytes, TransferError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        if this.expired.as_mut().poll(cx).is_ready() {
            this.done = true;
            tracing::debug!(
                timeout = ?this.timeout,
                remaining = this.chunks.remaining(),
                "request deadline exceeded: abort GET file stream"
            );
            return Poll::Ready(Some(Err(TransferError::Timeout(this.timeout))));
        }
        Poll::Ready(this.chunks.next().map(Ok))
    }
}

fn with_timing_headers(mut response: Response, metadata: &TimingMetadata) -> Response {
    metadata.write_headers(response.headers_mut());
    response
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

fn error_response(err: TransferError) -> Response {
    let status = match &err {
        TransferError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        TransferError::InvalidInput(_)
        | TransferError::Protocol(_)
        | TransferError::Transport(_) => StatusCode::BAD_REQUEST,
    };
    tracing::debug!(%status, "transfer failed: {err}");
    (status, err.to_string()).into_response()
}

//! Cheap generation of opaque random payloads.
//!
//! Small payloads are drawn fresh from the thread local CSPRNG.
//! Anything from [`TILE_SIZE`] upwards repeats a single random tile
//! which is created once per [`PayloadGenerator`]. The content is only
//! meant to be opaque, not statistically random.

use std::thread;

use rama::{bytes::Bytes, telemetry::tracing};
use rand::RngExt as _;


/// Size of the shared random tile (1 MiB).
pub const TILE_SIZE: usize = 1024 * 1024;

/// Payloads of at least this many bytes are tiled by multiple threads.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 50_000_000;

pub const DEFAULT_PARALLEL_WORKERS: usize = 10;

/// Default size of a single streamed chunk.
pub const DEFAULT_CHUNK_SIZE: usize = TILE_SIZE;

/// Upper bound for a streamed chunk.
pub const MAX_CHUNK_SIZE: usize = 2 * TILE_SIZE;

#[derive(Debug, Clone)]
pub struct PayloadGenerator {
    tile: Bytes,
    parallel_threshold: usize,
    workers: usize,
}

impl Default for PayloadGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadGenerator {
    /// Create a generator with a freshly drawn random tile.
    pub fn new() -> Self {
        Self {
            tile: random_bytes(TILE_SIZE),
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            workers: DEFAULT_PARALLEL_WORKERS,
        }
    }

    rama::utils::macros::generate_set_and_with! {
        /// Minimum payload size (in bytes) from which tiling is split over worker threads.
        pub fn parallel_threshold(mut self, threshold: usize) -> Self {
            self.parallel_threshold = threshold;
            self
        }
    }

    rama::utils::macros::generate_set_and_with! {
        /// Number of worker threads used for large payloads.
        pub fn parallel_workers(mut self, workers: usize) -> Self {
            self.workers = workers.max(1);
            self
        }
    }

    /// Produce exactly `size` opaque bytes.
    ///
    /// This is CPU bound for large sizes; call it from the blocking pool
    /// when running within an async context.
    pub fn create_payload(&self, size: usize) -> Bytes {
        if size < TILE_SIZE {
            return random_bytes(size);
        }

        let mut buffer = vec![0u8; size];
        if size >= self.parallel_threshold && self.workers > 1 {
            // regions are tile aligned so each worker starts at tile offset 0
            let region = size.div_ceil(self.workers).next_multiple_of(TILE_SIZE);
            tracing::trace!(
                size,
                region,
                workers = self.workers,
                "tile payload in parallel"
            );
            let tile = &self.tile[..];
            thread::scope(|scope| {
                for part in buffer.chunks_mut(region) {
                    scope.spawn(move || fill_tiled(part, tile));
                }
            });
        } else {
            fill_tiled(&mut buffer, &self.tile);
        }

        Bytes::from(buffer)
    }

    /// Lazily produce `size` bytes as a sequence of chunks of at most
    /// `chunk_size` bytes.
    ///
    /// Large payloads are served as zero-copy slices of the shared tile,
    /// so no buffer of `size` bytes is ever materialised.
    pub fn chunks(&self, size: u64, chunk_size: usize) -> PayloadChunks {
        let source = if size < TILE_SIZE as u64 {
            // size fits within a single tile
            random_bytes(size as usize)
        } else {
            self.tile.clone()
        };

        PayloadChunks {
            source,
            offset: 0,
            size,
            chunk_size: chunk_size.clamp(1, MAX_CHUNK_SIZE),
        }
    }
}

/// Iterator over the chunks of a streamed payload, see [`PayloadGenerator::chunks`].
#[derive(Debug, Clone)]
pub struct PayloadChunks {
    source: Bytes,
    offset: u64,
    size: u64,
    chunk_size: usize,
}

impl PayloadChunks {
    /// Bytes not yet yielded.
    pub fn remaining(&self) -> u64 {
        self.size - self.offset
    }
}

impl Iterator for PayloadChunks {
    type Item = Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.remaining();
        if remaining == 0 {
            return None;
        }

        let period = self.source.len() as u64;
        let phase = (self.offset % period) as usize;
        let len = (self.chunk_size as u64)
            .min(remaining)
            .min((self.source.len() - phase) as u64) as usize;

        self.offset += len as u64;
        Some(self.source.slice(phase..phase + len))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.remaining()).unwrap_or(usize::MAX);
        let lower = remaining.div_ceil(self.chunk_size);
        (lower, None)
    }
}

/// Split an already materialised payload into chunks of at most `chunk_size` bytes.
pub fn split_into_chunks(payload: Bytes, chunk_size: usize) -> impl Iterator<Item = Bytes> {
    let chunk_size = chunk_size.clamp(1, MAX_CHUNK_SIZE);
    let len = payload.len();
    (0..len)
        .step_by(chunk_size)
        .map(move |start| payload.slice(start..(start + chunk_size).min(len)))
}

fn random_bytes(size: usize) -> Bytes {
    let mut buffer = vec![0u8; size];
    rand::rng().fill(&mut buffer[..]);
    Bytes::from(buffer)
}

fn fill_tiled(dst: &mut [u8], tile: &[u8]) {
    for part in dst.chunks_mut(tile.len()) {
        part.copy_from_slice(&tile[..part.len()]);
    }
}

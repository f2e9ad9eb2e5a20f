//! Order-preserving, chunked publication of dispatch events.

use std::num::NonZeroUsize;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::error::StepError;
use crate::events::DispatchEvent;
use crate::step::StepContext;
use crate::telemetry;

/// Default upper bound on events per publish call.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Name of the durable step publishing chunk `number` (1-based).
pub fn chunk_step_name(number: usize) -> String {
    format!("send-chunk-{number}")
}

/// One contiguous slice of the event list.
#[derive(Clone, Copy, Debug)]
pub struct Chunk<'a> {
    /// 1-based position of the chunk.
    pub number: usize,
    /// Total number of chunks in the run.
    pub of: usize,
    /// Index of the first event of the chunk in the full event list.
    pub offset: usize,
    pub events: &'a [DispatchEvent],
}

impl Chunk<'_> {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn step_name(&self) -> String {
        chunk_step_name(self.number)
    }

    pub fn receipt(&self) -> ChunkReceipt {
        ChunkReceipt {
            offset: self.offset,
            len: self.len(),
        }
    }
}

/// Journaled output of a `send-chunk-{n}` step: the event range it published.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChunkReceipt {
    pub offset: usize,
    pub len: usize,
}

/// Splits events into bounded chunks and publishes each as its own step.
#[derive(Clone, Copy, Debug)]
pub struct ChunkedDispatcher {
    chunk_size: NonZeroUsize,
}

impl Default for ChunkedDispatcher {
    fn default() -> Self {
        Self {
            chunk_size: NonZeroUsize::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl ChunkedDispatcher {
    pub fn new(chunk_size: NonZeroUsize) -> Self {
        Self { chunk_size }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.get()
    }

    /// Number of publish calls needed for `events` events.
    pub fn chunk_count(&self, events: usize) -> usize {
        events.div_ceil(self.chunk_size())
    }

    /// Contiguous chunks of at most `chunk_size` events, in order.
    pub fn chunks<'a>(&self, events: &'a [DispatchEvent]) -> Vec<Chunk<'a>> {
        let of = self.chunk_count(events.len());
        events
            .chunks(self.chunk_size())
            .enumerate()
            .map(|(i, events)| Chunk {
                number: i + 1,
                of,
                offset: i * self.chunk_size(),
                events,
            })
            .collect()
    }

    /// Publish one chunk as the step `send-chunk-{n}`.
    ///
    /// A chunk already published by an earlier attempt of the same
    /// invocation is not published again. If that attempt published a
    /// different event range under the same step name (the chunk size
    /// changed in between), this fails with [`StepError::ReplayMismatch`].
    pub async fn publish_chunk(
        &self,
        ctx: &StepContext,
        chunk: &Chunk<'_>,
    ) -> Result<(), StepError> {
        let span = telemetry::dispatch_chunk_span(chunk.number, chunk.of, chunk.len());
        async {
            let started = Instant::now();
            ctx.send_events_with_receipt(&chunk.step_name(), chunk.events, chunk.receipt())
                .await?;
            telemetry::record_chunk_dispatched(
                chunk.number,
                chunk.len(),
                started.elapsed().as_secs_f64(),
            );
            Ok(())
        }
        .instrument(span)
        .await
    }
}

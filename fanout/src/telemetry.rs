//! Tracing and telemetry instrumentation for fanout.
//!
//! Helper functions for creating tracing spans and recording metrics over
//! the life of an invocation. All functions work both with and without the
//! `metrics` feature flag; without it they only emit tracing events.
//!
//! # Example
//!
//! ```ignore
//! use fanout::telemetry::{invocation_span, record_items_enumerated};
//!
//! let span = invocation_span("0190c3a4-...");
//! let _enter = span.enter();
//! record_items_enumerated(2500, 3);
//! ```

use tracing::{info_span, Span};

/// Create a tracing span covering one attempt of an invocation.
///
/// `batch_id` is declared empty and recorded once the batch id is known.
#[must_use]
pub fn invocation_span(invocation_id: impl AsRef<str>) -> Span {
    info_span!(
        "fanout.invocation",
        invocation_id = %invocation_id.as_ref(),
        batch_id = tracing::field::Empty,
    )
}

/// Create a tracing span for the executions of one durable step.
#[must_use]
pub fn step_span(invocation_id: impl AsRef<str>, step: impl AsRef<str>) -> Span {
    info_span!(
        "fanout.step",
        invocation_id = %invocation_id.as_ref(),
        step = %step.as_ref(),
    )
}

/// Create a tracing span for work source enumeration.
#[must_use]
pub fn enumerate_span(page_size: usize) -> Span {
    info_span!("fanout.enumerate", page_size = page_size)
}

/// Create a tracing span for publishing one chunk.
#[must_use]
pub fn dispatch_chunk_span(chunk: usize, chunks: usize, size: usize) -> Span {
    info_span!(
        "fanout.dispatch_chunk",
        chunk = chunk,
        chunks = chunks,
        size = size,
    )
}

/// Record that a completed step was served from the journal.
pub fn record_step_replayed(invocation_id: impl AsRef<str>, step: impl AsRef<str>) {
    tracing::debug!(
        invocation_id = %invocation_id.as_ref(),
        step = %step.as_ref(),
        "step replayed from journal"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_step_replayed(step.as_ref());
}

/// Record the outcome of a completed enumeration.
pub fn record_items_enumerated(items: usize, pages: usize) {
    tracing::info!(items = items, pages = pages, "work source enumerated");

    #[cfg(feature = "metrics")]
    crate::metrics::record_items_enumerated(items as u64);
}

/// Record a chunk that was published.
pub fn record_chunk_dispatched(chunk: usize, size: usize, duration_secs: f64) {
    tracing::debug!(
        chunk = chunk,
        size = size,
        duration_secs = duration_secs,
        "chunk dispatched"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_chunk_dispatched(size as u64, duration_secs);
}

/// Record how an invocation attempt ended.
///
/// `status` is one of `completed`, `empty` or `failed`.
pub fn record_invocation_finished(
    invocation_id: impl AsRef<str>,
    status: impl AsRef<str>,
    events_sent: usize,
) {
    tracing::info!(
        invocation_id = %invocation_id.as_ref(),
        status = %status.as_ref(),
        events_sent = events_sent,
        "invocation finished"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_invocation(status.as_ref());
}

use thiserror::Error;

use crate::correlation::BatchId;
use crate::scheduler::RunState;

/// Failures of the durable step runtime itself.
#[derive(Debug, Error)]
pub enum StepError {
    /// The step body failed on every execution the retry policy allowed.
    #[error("step `{step}` failed after {attempts} attempt(s)")]
    RetriesExhausted {
        step: String,
        attempts: u16,
        #[source]
        source: anyhow::Error,
    },

    /// The journal could not be read or written.
    #[error("step journal unavailable for `{step}`")]
    Journal {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    /// A step output could not be encoded for, or decoded from, the journal.
    #[error("step `{step}` output could not be (de)serialized")]
    Codec {
        step: String,
        #[source]
        source: serde_json::Error,
    },

    /// A replayed step recorded a different output than this attempt expects.
    ///
    /// Raised when the inputs of an invocation changed between attempts, for
    /// example a chunk that now covers other events than the one published.
    #[error("step `{step}` was recorded as {recorded} but this attempt expects {expected}")]
    ReplayMismatch {
        step: String,
        recorded: serde_json::Value,
        expected: serde_json::Value,
    },
}

impl StepError {
    /// Name of the step that failed.
    pub fn step(&self) -> &str {
        match self {
            StepError::RetriesExhausted { step, .. }
            | StepError::Journal { step, .. }
            | StepError::Codec { step, .. }
            | StepError::ReplayMismatch { step, .. } => step,
        }
    }
}

/// Errors surfaced by one scheduler invocation.
#[derive(Debug, Error)]
pub enum Error {
    /// Enumerating the work source failed; nothing was dispatched.
    #[error("work enumeration failed")]
    Fetch(#[source] StepError),

    /// A chunk could not be published within the retry budget.
    ///
    /// Chunks before `chunk` stay published, so `events_sent` may be lower
    /// than `total_items`.
    #[error(
        "batch {batch_id}: publishing chunk {chunk}/{chunks} failed after \
         {events_sent}/{total_items} events were sent"
    )]
    Publish {
        batch_id: BatchId,
        chunk: usize,
        chunks: usize,
        events_sent: usize,
        total_items: usize,
        #[source]
        source: StepError,
    },

    /// A step outside enumeration and dispatch failed.
    #[error(transparent)]
    Step(#[from] StepError),

    #[error("invalid invocation state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: RunState, to: RunState },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Number of events published before the invocation failed.
    pub fn events_sent(&self) -> usize {
        match self {
            Error::Publish { events_sent, .. } => *events_sent,
            _ => 0,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

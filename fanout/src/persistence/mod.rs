/// PostgreSQL implementations of the work source and the step journal.
///
/// This module provides `PostgresWorkSource`, a paged reader over a work
/// item table, and `PostgresStepJournal`, a durable [`StepJournal`] so
/// invocations can resume across process restarts.
///
/// [`StepJournal`]: crate::step::StepJournal
pub mod postgres;

pub use postgres::{connect, PostgresStepJournal, PostgresWorkSource};

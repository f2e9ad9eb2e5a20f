//! Fanout - periodic fan-out dispatch over a durable step runtime.
//!
//! Turns a large, unbounded collection of tracked work items into a bounded
//! stream of per-item processing events, all stamped with one batch
//! correlation id, and publishes them in size-bounded chunks. Every side
//! effect runs inside a memoized durable step, so a crashed or timed-out
//! invocation can be attempted again without repeating completed work.
//!
//! # Core Concepts
//!
//! - **Work source**: The [`WorkSource`] trait abstracts paged, read-only
//!   access to the tracked items. [`WorkEnumerator`] pages through it and
//!   validates each record into a [`WorkItemRef`].
//!
//! - **Batch**: [`BatchCoordinator`] stamps one [`BatchId`] onto every
//!   [`DispatchEvent`] built for a run.
//!
//! - **Dispatch**: [`ChunkedDispatcher`] splits the event list into
//!   order-preserving chunks and publishes each as its own durable step.
//!
//! - **Steps**: [`DurableRuntime`] and [`StepContext`] provide the two
//!   primitives everything else is built on: memoized `run` and
//!   `send_events`, over a [`StepJournal`] and an [`EventBus`].
//!
//! - **Invocation**: [`FanOutScheduler`] runs one attempt of an invocation
//!   and [`CronTrigger`] fires invocations on a cron schedule.
//!
//! # Feature Flags
//!
//! - `postgres` - PostgreSQL work source and step journal via sqlx
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use fanout::*;
//! use std::sync::Arc;
//!
//! let scheduler = FanOutSchedulerBuilder::new(FanOutConfig::from_env()?)
//!     .with_source(Arc::new(my_source))
//!     .with_bus(Arc::new(InProcEventBus::new(1024)))
//!     .build()?;
//!
//! let result = scheduler.invoke(&InvocationId::new()).await?;
//! println!("{}", result.message);
//! ```

/// Configuration for the engine, its schedule and persistence.
///
/// The `config` module defines [`FanOutConfig`] (with environment overlay)
/// and [`PersistenceConfig`] for the Postgres adapters.
pub mod config;

/// Batch correlation and invocation identity.
///
/// The `correlation` module provides [`BatchId`], [`InvocationId`],
/// [`BatchIdPolicy`] and the [`BatchCoordinator`] that builds events.
pub mod correlation;

/// Chunked, order-preserving event publication.
pub mod dispatcher;

/// Paged enumeration of eligible work items.
pub mod enumerator;

/// Error taxonomy for invocations and the step runtime.
pub mod error;

/// Dispatch events and the transports they are published to.
///
/// The `events` module provides:
/// - [`DispatchEvent`] and [`DispatchPayload`] for event data
/// - [`EventBus`] for transports
/// - [`EventSubscriber`] and [`InProcEventBus`] for in-process fan-out
pub mod events;

/// Work item identities, raw records and selection predicates.
pub mod item;

/// Prometheus metrics instrumentation (feature `metrics`).
#[cfg(feature = "metrics")]
pub mod metrics;

#[cfg(feature = "postgres")]
/// PostgreSQL persistence implementation.
///
/// The `persistence` module provides PostgreSQL-backed implementations
/// of the work source and step journal when the `postgres` feature is
/// enabled.
pub mod persistence;

/// Step-level retry and backoff configuration.
pub mod retry;

/// Trigger and wiring for scheduled invocations.
///
/// The `runtime` module provides:
/// - [`FanOutSchedulerBuilder`] - builder for schedulers
/// - [`CronTrigger`] - recurring trigger loop
/// - [`ShutdownToken`] - graceful shutdown signaling
pub mod runtime;

/// The invocation state machine and its result.
pub mod scheduler;

/// Paged work source abstraction.
pub mod source;

/// Durable, memoized step execution.
pub mod step;

/// Tracing spans and metric recording helpers.
pub mod telemetry;

pub use config::*;
pub use correlation::*;
pub use dispatcher::*;
pub use enumerator::*;
pub use error::{Error, Result, StepError};
pub use events::*;
pub use item::*;
pub use retry::*;
pub use runtime::*;
pub use scheduler::*;
pub use source::*;
pub use step::*;

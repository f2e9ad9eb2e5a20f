//! In-memory collaborators and fixtures for testing `fanout`.
//!
//! - [`InMemoryWorkSource`] records every page fetch and can fail on demand.
//! - [`RecordingEventBus`] records every publish call and can fail chosen
//!   calls, always or a fixed number of times.
//! - [`fixtures`] builds items, configs and schedulers wired to both.

pub mod bus;
pub mod fixtures;
pub mod source;

pub use bus::{PublishAttempt, RecordingEventBus};
pub use fixtures::*;
pub use source::{FetchRecord, InMemoryWorkSource};

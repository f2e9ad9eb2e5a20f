use std::fmt;
use std::sync::Arc;

use crate::config::FanOutConfig;
use crate::dispatcher::ChunkedDispatcher;
use crate::enumerator::WorkEnumerator;
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::scheduler::FanOutScheduler;
use crate::source::WorkSource;
use crate::step::{DurableRuntime, InMemoryStepJournal, StepJournal};

/// Builder for constructing a `FanOutScheduler` with explicit dependencies.
///
/// The work source and the event bus are required. Without a journal the
/// scheduler memoizes steps in process memory, which only covers
/// re-attempts within the same process.
///
/// # Example
///
/// ```ignore
/// use fanout::*;
///
/// let scheduler = FanOutSchedulerBuilder::new(FanOutConfig::from_env()?)
///     .with_source(source)
///     .with_bus(bus)
///     .with_journal(journal)
///     .build()?;
/// ```
pub struct FanOutSchedulerBuilder {
    config: FanOutConfig,
    source: Option<Arc<dyn WorkSource>>,
    bus: Option<Arc<dyn EventBus>>,
    journal: Option<Arc<dyn StepJournal>>,
}

impl fmt::Debug for FanOutSchedulerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanOutSchedulerBuilder")
            .field("config", &self.config)
            .field("source_set", &self.source.is_some())
            .field("bus_set", &self.bus.is_some())
            .field("journal_set", &self.journal.is_some())
            .finish()
    }
}

impl FanOutSchedulerBuilder {
    /// Create a new builder with the given engine configuration.
    pub fn new(config: FanOutConfig) -> Self {
        Self {
            config,
            source: None,
            bus: None,
            journal: None,
        }
    }

    /// Set the work source.
    pub fn with_source(mut self, source: Arc<dyn WorkSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the event bus.
    pub fn with_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Set the step journal.
    pub fn with_journal(mut self, journal: Arc<dyn StepJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Build the scheduler, validating configuration and dependencies.
    pub fn build(self) -> Result<FanOutScheduler> {
        self.config.validate()?;

        let source = self
            .source
            .ok_or_else(|| Error::Config("work source dependency missing".into()))?;
        let bus = self
            .bus
            .ok_or_else(|| Error::Config("event bus dependency missing".into()))?;
        let journal = self.journal.unwrap_or_else(|| {
            tracing::debug!("no step journal configured; using in-memory journal");
            Arc::new(InMemoryStepJournal::new())
        });

        let enumerator = WorkEnumerator::new(
            source,
            self.config.selection.clone(),
            self.config.page_size()?,
        )
        .with_max_items(self.config.max_items);
        let dispatcher = ChunkedDispatcher::new(self.config.chunk_size()?);
        let runtime = DurableRuntime::new(journal, bus, self.config.retry.clone());

        Ok(FanOutScheduler::new(
            enumerator,
            dispatcher,
            runtime,
            self.config.event_name,
            self.config.batch_id_policy,
        ))
    }
}

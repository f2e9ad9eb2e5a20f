use fanout::{
    BatchIdPolicy, EventBus, FanOutConfig, FanOutScheduler, FanOutSchedulerBuilder, RawWorkItem,
    RetryPolicy, StepJournal, WorkSource,
};
use std::sync::Arc;

/// Deterministic raw record number `i`, spread over five groups.
pub fn raw_item(i: usize) -> RawWorkItem {
    RawWorkItem::new(format!("item-{i:06}"), format!("group-{}", i % 5))
}

pub fn raw_items(n: usize) -> Vec<RawWorkItem> {
    (0..n).map(raw_item).collect()
}

/// Default engine configuration with retries that never sleep.
pub fn fast_config(page_size: usize, chunk_size: usize) -> FanOutConfig {
    FanOutConfig {
        page_size,
        chunk_size,
        retry: RetryPolicy::immediate(3),
        ..FanOutConfig::default()
    }
}

/// Same as [`fast_config`] with a stable batch id per invocation.
pub fn per_invocation_config(page_size: usize, chunk_size: usize) -> FanOutConfig {
    FanOutConfig {
        batch_id_policy: BatchIdPolicy::PerInvocation,
        ..fast_config(page_size, chunk_size)
    }
}

/// Scheduler wired to the given collaborators.
pub fn scheduler(
    config: FanOutConfig,
    source: Arc<dyn WorkSource>,
    bus: Arc<dyn EventBus>,
    journal: Arc<dyn StepJournal>,
) -> FanOutScheduler {
    FanOutSchedulerBuilder::new(config)
        .with_source(source)
        .with_bus(bus)
        .with_journal(journal)
        .build()
        .expect("test scheduler config should be valid")
}

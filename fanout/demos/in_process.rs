//! In-process fan-out example.
//!
//! Enumerates 2,500 in-memory work items, dispatches them in chunks of
//! 1,000 onto an `InProcEventBus`, and counts the events a subscriber
//! receives. The second publish fails once to show the step retry.

use std::sync::Arc;

use fanout::*;
use fanout_testkit::{InMemoryWorkSource, RecordingEventBus};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let source = Arc::new(InMemoryWorkSource::with_mixed(2500, 300));
    let bus = Arc::new(InProcEventBus::new(4096));
    let mut rx = bus.subscribe();

    let scheduler = FanOutSchedulerBuilder::new(FanOutConfig {
        retry: RetryPolicy::immediate(3),
        ..FanOutConfig::default()
    })
    .with_source(source.clone())
    .with_bus(bus.clone())
    .build()?;

    let result = scheduler.invoke(&InvocationId::new()).await?;
    println!("[FANOUT] {}", serde_json::to_string(&result)?);
    println!("[FANOUT] page fetches: {:?}", source.fetched_sizes());

    let mut received = 0usize;
    while rx.try_recv().is_ok() {
        received += 1;
    }
    println!("[SUBSCRIBER] received {received} events");

    // Same run against a flaky transport.
    let flaky = Arc::new(RecordingEventBus::new());
    flaky.fail_call(2, Some(1));
    let scheduler = FanOutSchedulerBuilder::new(FanOutConfig {
        retry: RetryPolicy::immediate(3),
        ..FanOutConfig::default()
    })
    .with_source(source)
    .with_bus(flaky.clone())
    .build()?;

    let result = scheduler.invoke(&InvocationId::new()).await?;
    println!("[FANOUT] {}", result.message);
    println!(
        "[BUS] {} publish attempts, {} succeeded: {:?}",
        flaky.attempt_count(),
        flaky.publish_count(),
        flaky.call_sizes()
    );

    Ok(())
}

//! Durable, memoized step execution.
//!
//! A step is a named unit of work inside one invocation. Its output is
//! recorded in a [`StepJournal`] once it succeeds; when the same
//! invocation is attempted again, completed steps return the recorded
//! output instead of running their body. Code between steps must therefore
//! be free of irreversible effects, since it runs again on every attempt.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{warn, Instrument};

use crate::correlation::InvocationId;
use crate::error::StepError;
use crate::events::{DispatchEvent, EventBus};
use crate::retry::RetryPolicy;
use crate::telemetry;

/// Storage for completed step outputs, keyed by invocation and step name.
#[async_trait]
pub trait StepJournal: Send + Sync {
    /// Recorded output of a completed step, if any.
    async fn load(
        &self,
        invocation: &InvocationId,
        step: &str,
    ) -> anyhow::Result<Option<serde_json::Value>>;

    /// Record the output of a completed step.
    ///
    /// Recording an output for a step that already has one keeps the
    /// existing output.
    async fn record(
        &self,
        invocation: &InvocationId,
        step: &str,
        output: serde_json::Value,
    ) -> anyhow::Result<()>;
}

/// Journal held in process memory.
///
/// Survives retries within one process, not restarts.
#[derive(Clone, Default, Debug)]
pub struct InMemoryStepJournal {
    inner: Arc<Mutex<HashMap<(String, String), serde_json::Value>>>,
}

impl InMemoryStepJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the steps completed for an invocation, sorted.
    pub async fn completed_steps(&self, invocation: &InvocationId) -> Vec<String> {
        let guard = self.inner.lock().await;
        let mut steps: Vec<String> = guard
            .keys()
            .filter(|(inv, _)| inv == invocation.as_str())
            .map(|(_, step)| step.clone())
            .collect();
        steps.sort();
        steps
    }

    /// Drop every recorded step of an invocation.
    pub async fn forget(&self, invocation: &InvocationId) {
        let mut guard = self.inner.lock().await;
        guard.retain(|(inv, _), _| inv != invocation.as_str());
    }
}

#[async_trait]
impl StepJournal for InMemoryStepJournal {
    async fn load(
        &self,
        invocation: &InvocationId,
        step: &str,
    ) -> anyhow::Result<Option<serde_json::Value>> {
        let guard = self.inner.lock().await;
        Ok(guard
            .get(&(invocation.as_str().to_string(), step.to_string()))
            .cloned())
    }

    async fn record(
        &self,
        invocation: &InvocationId,
        step: &str,
        output: serde_json::Value,
    ) -> anyhow::Result<()> {
        let mut guard = self.inner.lock().await;
        guard
            .entry((invocation.as_str().to_string(), step.to_string()))
            .or_insert(output);
        Ok(())
    }
}

/// The step runtime: a journal, a transport and a retry policy.
#[derive(Clone)]
pub struct DurableRuntime {
    journal: Arc<dyn StepJournal>,
    bus: Arc<dyn EventBus>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for DurableRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableRuntime")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl DurableRuntime {
    pub fn new(
        journal: Arc<dyn StepJournal>,
        bus: Arc<dyn EventBus>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            journal,
            bus,
            retry,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Step context for one attempt of an invocation.
    pub fn context(&self, invocation: InvocationId) -> StepContext {
        StepContext {
            invocation,
            journal: Arc::clone(&self.journal),
            bus: Arc::clone(&self.bus),
            retry: self.retry.clone(),
        }
    }
}

/// Step primitives bound to one invocation.
pub struct StepContext {
    invocation: InvocationId,
    journal: Arc<dyn StepJournal>,
    bus: Arc<dyn EventBus>,
    retry: RetryPolicy,
}

impl StepContext {
    pub fn invocation(&self) -> &InvocationId {
        &self.invocation
    }

    /// Run `body` as the step `step`, memoizing its output.
    ///
    /// A step already recorded for this invocation returns the recorded
    /// output without calling `body`. Otherwise `body` runs until it
    /// succeeds or the retry policy is exhausted.
    pub async fn run<T, F, Fut>(&self, step: &str, mut body: F) -> Result<T, StepError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let recorded = self
            .journal
            .load(&self.invocation, step)
            .await
            .map_err(|source| StepError::Journal {
                step: step.to_string(),
                source,
            })?;

        if let Some(output) = recorded {
            telemetry::record_step_replayed(self.invocation.as_str(), step);
            return serde_json::from_value(output).map_err(|source| StepError::Codec {
                step: step.to_string(),
                source,
            });
        }

        let span = telemetry::step_span(self.invocation.as_str(), step);
        let value = async {
            let mut attempts: u16 = 0;
            loop {
                attempts += 1;
                match body().await {
                    Ok(value) => break Ok(value),
                    Err(source) if !self.retry.should_retry(attempts) => {
                        break Err(StepError::RetriesExhausted {
                            step: step.to_string(),
                            attempts,
                            source,
                        });
                    }
                    Err(err) => {
                        let delay = self.retry.backoff(attempts);
                        warn!(
                            step,
                            attempt = attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "step attempt failed; retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        .instrument(span)
        .await?;

        let output = serde_json::to_value(&value).map_err(|source| StepError::Codec {
            step: step.to_string(),
            source,
        })?;
        self.journal
            .record(&self.invocation, step, output)
            .await
            .map_err(|source| StepError::Journal {
                step: step.to_string(),
                source,
            })?;

        Ok(value)
    }

    /// Publish `events` as one memoized step.
    ///
    /// If publishing succeeds but recording the step fails, a later attempt
    /// publishes the same events again.
    pub async fn send_events(&self, step: &str, events: &[DispatchEvent]) -> Result<(), StepError> {
        self.send_events_with_receipt(step, events, ()).await
    }

    /// Publish `events` as one memoized step recording `receipt` as its output.
    ///
    /// On replay the recorded receipt must equal `receipt`; otherwise the
    /// step covered other events when it was published and
    /// [`StepError::ReplayMismatch`] is returned without publishing.
    pub async fn send_events_with_receipt<R>(
        &self,
        step: &str,
        events: &[DispatchEvent],
        receipt: R,
    ) -> Result<R, StepError>
    where
        R: Serialize + DeserializeOwned + PartialEq + Clone,
    {
        let recorded = self
            .run(step, || {
                let bus = Arc::clone(&self.bus);
                let receipt = receipt.clone();
                async move {
                    bus.publish(events).await?;
                    Ok(receipt)
                }
            })
            .await?;

        if recorded != receipt {
            let encode = |value: &R| {
                serde_json::to_value(value).map_err(|source| StepError::Codec {
                    step: step.to_string(),
                    source,
                })
            };
            return Err(StepError::ReplayMismatch {
                step: step.to_string(),
                recorded: encode(&recorded)?,
                expected: encode(&receipt)?,
            });
        }
        Ok(recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullBus;

    #[async_trait]
    impl EventBus for NullBus {
        async fn publish(&self, _events: &[DispatchEvent]) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn runtime(journal: InMemoryStepJournal, retry: RetryPolicy) -> DurableRuntime {
        DurableRuntime::new(Arc::new(journal), Arc::new(NullBus), retry)
    }

    #[tokio::test]
    async fn test_completed_step_is_not_rerun() {
        let journal = InMemoryStepJournal::new();
        let rt = runtime(journal.clone(), RetryPolicy::no_retry());
        let invocation = InvocationId::from("inv-1");
        let calls = &AtomicUsize::new(0);

        for _ in 0..3 {
            let ctx = rt.context(invocation.clone());
            let value: Vec<u32> = ctx
                .run("load", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1, 2, 3])
                })
                .await
                .unwrap();
            assert_eq!(value, vec![1, 2, 3]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(journal.completed_steps(&invocation).await, vec!["load"]);
    }

    #[tokio::test]
    async fn test_steps_are_scoped_per_invocation() {
        let rt = runtime(InMemoryStepJournal::new(), RetryPolicy::no_retry());
        let calls = &AtomicUsize::new(0);

        for id in ["inv-a", "inv-b"] {
            let ctx = rt.context(InvocationId::from(id));
            let _: () = ctx
                .run("step", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failing_step_retries_then_succeeds() {
        let rt = runtime(InMemoryStepJournal::new(), RetryPolicy::immediate(3));
        let ctx = rt.context(InvocationId::new());
        let calls = &AtomicUsize::new(0);

        let value: u32 = ctx
            .run("flaky", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("transient");
                }
                Ok(42)
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let journal = InMemoryStepJournal::new();
        let rt = runtime(journal.clone(), RetryPolicy::immediate(2));
        let invocation = InvocationId::new();
        let ctx = rt.context(invocation.clone());
        let calls = &AtomicUsize::new(0);

        let err = ctx
            .run::<(), _, _>("broken", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("down")
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StepError::RetriesExhausted { ref step, attempts: 2, .. } if step == "broken"
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(journal.completed_steps(&invocation).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_for_backoff() {
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_backoff_ms: 10_000,
        };
        let rt = runtime(InMemoryStepJournal::new(), retry);
        let ctx = rt.context(InvocationId::new());
        let started = tokio::time::Instant::now();

        let _ = ctx
            .run::<(), _, _>("slow", || async move { anyhow::bail!("down") })
            .await;

        // 1s after the first failure, 2s after the second.
        assert!(started.elapsed() >= std::time::Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_first_recorded_output_wins() {
        let journal = InMemoryStepJournal::new();
        let invocation = InvocationId::from("inv");
        journal
            .record(&invocation, "s", serde_json::json!(1))
            .await
            .unwrap();
        journal
            .record(&invocation, "s", serde_json::json!(2))
            .await
            .unwrap();

        let loaded = journal.load(&invocation, "s").await.unwrap();
        assert_eq!(loaded, Some(serde_json::json!(1)));
    }

    #[derive(Default)]
    struct CountingBus {
        published: AtomicUsize,
    }

    #[async_trait]
    impl EventBus for CountingBus {
        async fn publish(&self, events: &[DispatchEvent]) -> anyhow::Result<()> {
            self.published.fetch_add(events.len(), Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_receipt_replays_without_publishing() {
        let bus = Arc::new(CountingBus::default());
        let rt = DurableRuntime::new(
            Arc::new(InMemoryStepJournal::new()),
            bus.clone(),
            RetryPolicy::no_retry(),
        );
        let invocation = InvocationId::from("inv");

        for _ in 0..2 {
            let receipt = rt
                .context(invocation.clone())
                .send_events_with_receipt("send", &[], (0u32, 10u32))
                .await
                .unwrap();
            assert_eq!(receipt, (0, 10));
        }
        rt.context(invocation)
            .send_events("plain", &[])
            .await
            .unwrap();

        assert_eq!(bus.published.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_changed_receipt_is_replay_mismatch() {
        let journal = InMemoryStepJournal::new();
        let invocation = InvocationId::from("inv");
        journal
            .record(&invocation, "send", serde_json::json!([0, 10]))
            .await
            .unwrap();
        let rt = runtime(journal, RetryPolicy::no_retry());

        let err = rt
            .context(invocation)
            .send_events_with_receipt("send", &[], (0u32, 20u32))
            .await
            .unwrap_err();

        match err {
            StepError::ReplayMismatch {
                step,
                recorded,
                expected,
            } => {
                assert_eq!(step, "send");
                assert_eq!(recorded, serde_json::json!([0, 10]));
                assert_eq!(expected, serde_json::json!([0, 20]));
            }
            other => panic!("expected replay mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_recorded_output_of_wrong_shape_is_codec_error() {
        let journal = InMemoryStepJournal::new();
        let invocation = InvocationId::from("inv");
        journal
            .record(&invocation, "s", serde_json::json!("not a number"))
            .await
            .unwrap();

        let rt = runtime(journal, RetryPolicy::no_retry());
        let err = rt
            .context(invocation)
            .run::<u32, _, _>("s", || async move { Ok(1) })
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Codec { .. }));
    }
}

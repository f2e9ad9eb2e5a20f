use async_trait::async_trait;
use fanout::{BatchId, DispatchEvent, EventBus};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// One `publish` call as seen by the bus.
#[derive(Clone, Debug)]
pub struct PublishAttempt {
    pub size: usize,
    pub succeeded: bool,
}

#[derive(Clone, Copy, Debug)]
struct FailurePlan {
    /// 1-based number of the successful call to refuse.
    call: usize,
    /// Failures left; `None` fails forever.
    remaining: Option<usize>,
}

#[derive(Default)]
struct Inner {
    published: Vec<Vec<DispatchEvent>>,
    attempts: Vec<PublishAttempt>,
    failures: Vec<FailurePlan>,
}

/// Event bus that records what it is asked to publish.
///
/// Failures are planned per successful call number: `fail_call(2, None)`
/// refuses every attempt at what would become the second successful
/// publish, which with one publish per chunk means chunk 2.
#[derive(Clone, Default)]
pub struct RecordingEventBus {
    inner: Arc<Mutex<Inner>>,
}

impl RecordingEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the `call`-th successful publish, `times` times or forever.
    pub fn fail_call(&self, call: usize, times: Option<usize>) {
        self.inner.lock().failures.push(FailurePlan {
            call,
            remaining: times,
        });
    }

    /// Drop every planned failure.
    pub fn heal(&self) {
        self.inner.lock().failures.clear();
    }

    /// Successful publish calls, in order.
    pub fn published(&self) -> Vec<Vec<DispatchEvent>> {
        self.inner.lock().published.clone()
    }

    /// Every published event, flattened in publish order.
    pub fn events(&self) -> Vec<DispatchEvent> {
        self.inner.lock().published.concat()
    }

    pub fn publish_count(&self) -> usize {
        self.inner.lock().published.len()
    }

    pub fn call_sizes(&self) -> Vec<usize> {
        self.inner.lock().published.iter().map(Vec::len).collect()
    }

    pub fn attempts(&self) -> Vec<PublishAttempt> {
        self.inner.lock().attempts.clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.inner.lock().attempts.len()
    }

    /// Distinct batch ids across everything published.
    pub fn batch_ids(&self) -> HashSet<BatchId> {
        self.inner
            .lock()
            .published
            .iter()
            .flatten()
            .map(|e| e.data.batch_id)
            .collect()
    }

    pub fn assert_publish_count_eq(&self, expected: usize) {
        let actual = self.publish_count();
        assert_eq!(
            actual, expected,
            "Expected {} publish calls, got {}",
            expected, actual
        );
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.published.clear();
        inner.attempts.clear();
    }
}

#[async_trait]
impl EventBus for RecordingEventBus {
    async fn publish(&self, events: &[DispatchEvent]) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        let call = inner.published.len() + 1;

        let refused = inner
            .failures
            .iter_mut()
            .find(|plan| plan.call == call && plan.remaining != Some(0))
            .map(|plan| {
                if let Some(left) = plan.remaining.as_mut() {
                    *left -= 1;
                }
            })
            .is_some();

        inner.attempts.push(PublishAttempt {
            size: events.len(),
            succeeded: !refused,
        });
        if refused {
            anyhow::bail!("injected publish failure on call {call}");
        }

        inner.published.push(events.to_vec());
        Ok(())
    }
}

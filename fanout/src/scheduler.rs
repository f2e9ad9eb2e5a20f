//! One scheduled fan-out invocation.
//!
//! [`FanOutScheduler::invoke`] drives a single attempt of a logical
//! invocation through enumeration, batch coordination and chunked dispatch.
//! Every side effect happens inside a durable step, so attempting the same
//! [`InvocationId`] again resumes after the last completed step.

use serde::{Deserialize, Serialize};
use tracing::{info, warn, Instrument};

use crate::correlation::{BatchCoordinator, BatchId, BatchIdPolicy, InvocationId};
use crate::dispatcher::ChunkedDispatcher;
use crate::enumerator::WorkEnumerator;
use crate::error::{Error, Result};
use crate::item::WorkItemRef;
use crate::step::{DurableRuntime, StepContext};
use crate::telemetry;

/// Step name of the enumeration step.
pub const LOAD_ITEMS_STEP: &str = "load-active-items";
/// Step name under which a per-invocation batch id is memoized.
pub const MINT_BATCH_ID_STEP: &str = "mint-batch-id";

/// Message reported when enumeration found nothing to dispatch.
pub const NO_ITEMS_MESSAGE: &str = "No active items found";

/// Lifecycle of one invocation attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RunState {
    Pending,
    Enumerating,
    /// Publishing chunk `chunk` of `of` (1-based).
    Dispatching {
        chunk: usize,
        of: usize,
    },
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        match (*self, next) {
            (Pending, Enumerating) => true,
            (Enumerating, Dispatching { chunk: 1, of }) => of >= 1,
            (Enumerating, Completed | Failed) => true,
            (Dispatching { chunk, of }, Dispatching { chunk: next, of: next_of }) => {
                next_of == of && next == chunk + 1 && next <= of
            }
            (Dispatching { chunk, of }, Completed) => chunk == of,
            (Dispatching { .. }, Failed) => true,
            _ => false,
        }
    }
}

/// Ephemeral record of one invocation attempt.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRun {
    pub batch_id: Option<BatchId>,
    pub total_items: usize,
    pub events_sent: usize,
    pub state: RunState,
}

impl Default for BatchRun {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchRun {
    pub fn new() -> Self {
        Self {
            batch_id: None,
            total_items: 0,
            events_sent: 0,
            state: RunState::Pending,
        }
    }

    /// Move to `next`, rejecting transitions the state machine forbids.
    ///
    /// Completing also requires every enumerated item to have been sent.
    pub fn transition(&mut self, next: RunState) -> Result<()> {
        let allowed = self.state.can_transition_to(next)
            && (next != RunState::Completed || self.events_sent == self.total_items);
        if !allowed {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

/// Summary returned to whoever triggered the invocation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResult {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_count: Option<usize>,
}

impl InvocationResult {
    pub fn no_items() -> Self {
        Self {
            message: NO_ITEMS_MESSAGE.to_string(),
            batch_id: None,
            scheduled_count: None,
        }
    }

    pub fn scheduled(batch_id: BatchId, count: usize) -> Self {
        Self {
            message: format!("Scheduled {count} work items for processing"),
            batch_id: Some(batch_id),
            scheduled_count: Some(count),
        }
    }
}

/// Wires enumeration, batch coordination and dispatch into one invocation.
///
/// Build with [`crate::runtime::FanOutSchedulerBuilder`].
#[derive(Clone, Debug)]
pub struct FanOutScheduler {
    enumerator: WorkEnumerator,
    dispatcher: ChunkedDispatcher,
    runtime: DurableRuntime,
    event_name: String,
    batch_id_policy: BatchIdPolicy,
}

impl FanOutScheduler {
    pub fn new(
        enumerator: WorkEnumerator,
        dispatcher: ChunkedDispatcher,
        runtime: DurableRuntime,
        event_name: impl Into<String>,
        batch_id_policy: BatchIdPolicy,
    ) -> Self {
        Self {
            enumerator,
            dispatcher,
            runtime,
            event_name: event_name.into(),
            batch_id_policy,
        }
    }

    pub fn batch_id_policy(&self) -> BatchIdPolicy {
        self.batch_id_policy
    }

    pub fn dispatcher(&self) -> &ChunkedDispatcher {
        &self.dispatcher
    }

    /// Run one attempt of `invocation`.
    pub async fn invoke(&self, invocation: &InvocationId) -> Result<InvocationResult> {
        self.invoke_tracked(invocation).await.1
    }

    /// Run one attempt of `invocation`, also returning the final run record.
    pub async fn invoke_tracked(
        &self,
        invocation: &InvocationId,
    ) -> (BatchRun, Result<InvocationResult>) {
        let span = telemetry::invocation_span(invocation.as_str());
        let mut run = BatchRun::new();
        let result = self
            .attempt(invocation, &mut run)
            .instrument(span)
            .await;

        let status = match &result {
            Err(_) => "failed",
            Ok(_) if run.total_items == 0 => "empty",
            Ok(_) => "completed",
        };
        telemetry::record_invocation_finished(invocation.as_str(), status, run.events_sent);

        (run, result)
    }

    async fn attempt(
        &self,
        invocation: &InvocationId,
        run: &mut BatchRun,
    ) -> Result<InvocationResult> {
        let ctx = self.runtime.context(invocation.clone());

        run.transition(RunState::Enumerating)?;
        let enumerator = &self.enumerator;
        let loaded = ctx
            .run(LOAD_ITEMS_STEP, || async move {
                let items: Vec<WorkItemRef> = enumerator.collect_all().await?;
                Ok(items)
            })
            .await;
        let items = match loaded {
            Ok(items) => items,
            Err(source) => {
                run.transition(RunState::Failed)?;
                return Err(Error::Fetch(source));
            }
        };

        run.total_items = items.len();
        if items.is_empty() {
            run.transition(RunState::Completed)?;
            info!("no active items; nothing to dispatch");
            return Ok(InvocationResult::no_items());
        }

        let batch_id = match self.batch_id(&ctx).await {
            Ok(batch_id) => batch_id,
            Err(err) => {
                run.transition(RunState::Failed)?;
                return Err(err);
            }
        };
        run.batch_id = Some(batch_id);
        tracing::Span::current().record("batch_id", tracing::field::display(batch_id));

        let events = BatchCoordinator::with_batch_id(batch_id, self.event_name.as_str())
            .build_events(&items);

        for chunk in self.dispatcher.chunks(&events) {
            run.transition(RunState::Dispatching {
                chunk: chunk.number,
                of: chunk.of,
            })?;

            if let Err(source) = self.dispatcher.publish_chunk(&ctx, &chunk).await {
                run.transition(RunState::Failed)?;
                warn!(
                    %batch_id,
                    chunk = chunk.number,
                    chunks = chunk.of,
                    events_sent = run.events_sent,
                    total_items = run.total_items,
                    "chunk publish failed; earlier chunks remain published"
                );
                return Err(Error::Publish {
                    batch_id,
                    chunk: chunk.number,
                    chunks: chunk.of,
                    events_sent: run.events_sent,
                    total_items: run.total_items,
                    source,
                });
            }
            run.events_sent += chunk.len();
        }

        run.transition(RunState::Completed)?;
        info!(%batch_id, scheduled = run.events_sent, "batch dispatched");
        Ok(InvocationResult::scheduled(batch_id, run.events_sent))
    }

    async fn batch_id(&self, ctx: &StepContext) -> Result<BatchId> {
        match self.batch_id_policy {
            BatchIdPolicy::PerAttempt => Ok(BatchId::new()),
            BatchIdPolicy::PerInvocation => Ok(ctx
                .run(MINT_BATCH_ID_STEP, || async { Ok(BatchId::new()) })
                .await?),
        }
    }
}

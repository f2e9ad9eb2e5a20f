use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::events::DispatchEvent;
use crate::item::WorkItemRef;

/// Correlation id grouping every event produced by one scheduled run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub Uuid);

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchId {
    /// A fresh random (v4) id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for BatchId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one logical invocation.
///
/// Steps are memoized per invocation id; re-attempting an invocation with
/// the same id replays completed steps instead of re-running them.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationId(String);

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl InvocationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for InvocationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for InvocationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How long a batch id lives.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchIdPolicy {
    /// Every attempt of an invocation mints its own id. Chunks replayed
    /// from an earlier attempt keep the id they were published with.
    #[default]
    PerAttempt,
    /// The id is minted once in a memoized step and reused by every
    /// attempt of the same invocation.
    PerInvocation,
}

/// Stamps one batch id onto every event of a run.
#[derive(Clone, Debug)]
pub struct BatchCoordinator {
    batch_id: BatchId,
    event_name: String,
}

impl BatchCoordinator {
    /// Coordinator for a freshly minted batch.
    pub fn mint(event_name: impl Into<String>) -> Self {
        Self::with_batch_id(BatchId::new(), event_name)
    }

    /// Coordinator for an already minted batch id.
    pub fn with_batch_id(batch_id: BatchId, event_name: impl Into<String>) -> Self {
        Self {
            batch_id,
            event_name: event_name.into(),
        }
    }

    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    /// Build one event per item, preserving item order.
    pub fn build_events(&self, items: &[WorkItemRef]) -> Vec<DispatchEvent> {
        items
            .iter()
            .map(|item| DispatchEvent::for_item(&self.event_name, item, self.batch_id))
            .collect()
    }
}

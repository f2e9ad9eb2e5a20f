use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::item::{RawWorkItem, Selection};

/// Position of the next page within a work source.
///
/// Opaque to callers; the enumerator advances it by the number of raw
/// records each page returned.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PageCursor(pub u64);

impl PageCursor {
    /// The first page.
    pub fn start() -> Self {
        Self(0)
    }

    pub fn offset(&self) -> u64 {
        self.0
    }

    /// Cursor for the page following one that returned `count` records.
    pub fn advance(self, count: usize) -> Self {
        Self(self.0 + count as u64)
    }
}

/// One page of records returned by a work source.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub items: Vec<RawWorkItem>,
    pub has_more: bool,
}

impl Page {
    pub fn new(items: Vec<RawWorkItem>, has_more: bool) -> Self {
        Self { items, has_more }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Paged, read-only access to the collection of tracked work items.
///
/// Implementors own the backing store; the engine only ever reads through
/// this trait and never mutates work items.
#[async_trait]
pub trait WorkSource: Send + Sync {
    /// Fetch up to `page_size` records matching `selection`, starting at
    /// `cursor`.
    async fn fetch_page(
        &self,
        selection: &Selection,
        cursor: PageCursor,
        page_size: usize,
    ) -> anyhow::Result<Page>;
}

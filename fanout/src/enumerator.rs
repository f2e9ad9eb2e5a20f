//! Paged enumeration of eligible work items.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn, Instrument};

use crate::item::{InvalidItem, Selection, WorkItemId, WorkItemRef};
use crate::source::{PageCursor, WorkSource};
use crate::telemetry;

/// Why enumeration produced no item set.
#[derive(Debug, Error)]
pub enum EnumerationError {
    #[error("fetching page at offset {} failed", cursor.offset())]
    Fetch {
        cursor: PageCursor,
        #[source]
        source: anyhow::Error,
    },

    #[error("record {position} of the work source is invalid")]
    InvalidItem {
        position: u64,
        #[source]
        source: InvalidItem,
    },

    #[error("work source returned more than {limit} items")]
    CapacityExceeded { limit: usize },
}

/// Pages through a [`WorkSource`] and returns every eligible item.
///
/// Pages are requested in order until one comes back shorter than the page
/// size or the source reports no further pages. Any failed page aborts the
/// whole enumeration; a partial item list is never returned.
#[derive(Clone)]
pub struct WorkEnumerator {
    source: Arc<dyn WorkSource>,
    selection: Selection,
    page_size: NonZeroUsize,
    max_items: Option<usize>,
}

impl std::fmt::Debug for WorkEnumerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkEnumerator")
            .field("selection", &self.selection)
            .field("page_size", &self.page_size)
            .field("max_items", &self.max_items)
            .finish_non_exhaustive()
    }
}

impl WorkEnumerator {
    pub fn new(source: Arc<dyn WorkSource>, selection: Selection, page_size: NonZeroUsize) -> Self {
        Self {
            source,
            selection,
            page_size,
            max_items: None,
        }
    }

    /// Fail enumeration once more than `limit` distinct items are found.
    pub fn with_max_items(mut self, limit: Option<usize>) -> Self {
        self.max_items = limit;
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size.get()
    }

    /// Collect every eligible item, in the order the source returned them.
    pub async fn collect_all(&self) -> Result<Vec<WorkItemRef>, EnumerationError> {
        let span = telemetry::enumerate_span(self.page_size());
        self.collect_pages().instrument(span).await
    }

    async fn collect_pages(&self) -> Result<Vec<WorkItemRef>, EnumerationError> {
        let page_size = self.page_size();
        let mut items = Vec::new();
        let mut seen: HashSet<WorkItemId> = HashSet::new();
        let mut cursor = PageCursor::start();
        let mut pages = 0usize;

        loop {
            let page = self
                .source
                .fetch_page(&self.selection, cursor, page_size)
                .await
                .map_err(|source| EnumerationError::Fetch { cursor, source })?;
            pages += 1;

            let fetched = page.len();
            let has_more = page.has_more;
            debug!(
                offset = cursor.offset(),
                fetched, has_more, "fetched work source page"
            );

            for (i, raw) in page.items.into_iter().enumerate() {
                let position = cursor.offset() + i as u64;
                let item = WorkItemRef::try_from(raw)
                    .map_err(|source| EnumerationError::InvalidItem { position, source })?;

                if !seen.insert(item.id.clone()) {
                    warn!(
                        work_item_id = %item.id,
                        position,
                        "duplicate work item across pages; keeping first occurrence"
                    );
                    continue;
                }

                if let Some(limit) = self.max_items {
                    if items.len() >= limit {
                        return Err(EnumerationError::CapacityExceeded { limit });
                    }
                }
                items.push(item);
            }

            if !has_more || fetched < page_size {
                break;
            }
            cursor = cursor.advance(fetched);
        }

        telemetry::record_items_enumerated(items.len(), pages);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::RawWorkItem;
    use crate::source::Page;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Offset-paged source over a fixed record list.
    struct VecSource {
        records: Vec<RawWorkItem>,
        fetches: AtomicUsize,
        fail_at_offset: Option<u64>,
    }

    impl VecSource {
        fn with_items(n: usize) -> Self {
            Self::from_records(
                (0..n)
                    .map(|i| RawWorkItem::new(format!("item-{i}"), format!("group-{}", i % 7)))
                    .collect(),
            )
        }

        fn from_records(records: Vec<RawWorkItem>) -> Self {
            Self {
                records,
                fetches: AtomicUsize::new(0),
                fail_at_offset: None,
            }
        }
    }

    #[async_trait]
    impl WorkSource for VecSource {
        async fn fetch_page(
            &self,
            _selection: &Selection,
            cursor: PageCursor,
            page_size: usize,
        ) -> anyhow::Result<Page> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_at_offset == Some(cursor.offset()) {
                anyhow::bail!("connection reset");
            }
            let start = (cursor.offset() as usize).min(self.records.len());
            let end = (start + page_size).min(self.records.len());
            Ok(Page::new(
                self.records[start..end].to_vec(),
                end < self.records.len(),
            ))
        }
    }

    fn enumerator(source: Arc<VecSource>, page_size: usize) -> WorkEnumerator {
        WorkEnumerator::new(
            source,
            Selection::active(),
            NonZeroUsize::new(page_size).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_returns_every_item_exactly_once() {
        for page_size in [1usize, 3, 10, 1000] {
            for count in [0, page_size - 1, page_size, page_size * 3, page_size * 3 + 1] {
                let source = Arc::new(VecSource::with_items(count));
                let items = enumerator(Arc::clone(&source), page_size)
                    .collect_all()
                    .await
                    .unwrap();

                assert_eq!(items.len(), count, "page_size={page_size} count={count}");
                let distinct: HashSet<_> = items.iter().map(|i| i.id.clone()).collect();
                assert_eq!(distinct.len(), count);
                for (i, item) in items.iter().enumerate() {
                    assert_eq!(item.id.as_str(), format!("item-{i}"));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_page_count_follows_short_page_rule() {
        let source = Arc::new(VecSource::with_items(2500));
        enumerator(Arc::clone(&source), 1000)
            .collect_all()
            .await
            .unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);

        // An exact multiple needs one more request to learn the end, unless
        // the source reports has_more = false on the last full page.
        let source = Arc::new(VecSource::with_items(2000));
        enumerator(Arc::clone(&source), 1000)
            .collect_all()
            .await
            .unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_error_aborts_without_partial_result() {
        let mut source = VecSource::with_items(30);
        source.fail_at_offset = Some(20);

        let err = enumerator(Arc::new(source), 10)
            .collect_all()
            .await
            .unwrap_err();
        assert!(
            matches!(err, EnumerationError::Fetch { cursor, .. } if cursor.offset() == 20)
        );
    }

    #[tokio::test]
    async fn test_duplicates_across_pages_are_dropped() {
        let records = vec![
            RawWorkItem::new("a", "g"),
            RawWorkItem::new("b", "g"),
            RawWorkItem::new("b", "g"),
            RawWorkItem::new("c", "g"),
        ];
        let items = enumerator(Arc::new(VecSource::from_records(records)), 2)
            .collect_all()
            .await
            .unwrap();

        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_invalid_record_reports_position() {
        let records = vec![
            RawWorkItem::new("a", "g"),
            RawWorkItem {
                id: Some("b".into()),
                group_id: None,
            },
        ];
        let err = enumerator(Arc::new(VecSource::from_records(records)), 10)
            .collect_all()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EnumerationError::InvalidItem {
                position: 1,
                source: InvalidItem::Missing { field: "groupId" }
            }
        ));
    }

    #[tokio::test]
    async fn test_capacity_cap() {
        let source = Arc::new(VecSource::with_items(11));
        let err = enumerator(Arc::clone(&source), 5)
            .with_max_items(Some(10))
            .collect_all()
            .await
            .unwrap_err();
        assert!(matches!(err, EnumerationError::CapacityExceeded { limit: 10 }));

        let items = enumerator(Arc::new(VecSource::with_items(10)), 5)
            .with_max_items(Some(10))
            .collect_all()
            .await
            .unwrap();
        assert_eq!(items.len(), 10);
    }
}

use async_trait::async_trait;
use fanout::{ItemStatus, Page, PageCursor, RawWorkItem, Selection, WorkSource};
use parking_lot::Mutex;
use std::sync::Arc;

/// One `fetch_page` call as seen by the source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchRecord {
    pub offset: u64,
    pub page_size: usize,
    /// Records returned; `None` when the fetch was failed on purpose.
    pub returned: Option<usize>,
}

#[derive(Default)]
struct Inner {
    fetches: Vec<FetchRecord>,
    fail_next: usize,
    fail_at_offset: Option<u64>,
}

/// Work source over an in-memory record list, filtered by [`Selection`].
#[derive(Clone)]
pub struct InMemoryWorkSource {
    records: Arc<Vec<(RawWorkItem, ItemStatus)>>,
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryWorkSource {
    pub fn new(records: Vec<(RawWorkItem, ItemStatus)>) -> Self {
        Self {
            records: Arc::new(records),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Source holding `n` active items.
    pub fn with_active(n: usize) -> Self {
        Self::with_mixed(n, 0)
    }

    /// Source holding `active` active items interleaved with `inactive`
    /// paused ones.
    pub fn with_mixed(active: usize, inactive: usize) -> Self {
        let mut records = Vec::with_capacity(active + inactive);
        let (mut a, mut p) = (0, 0);
        while a < active || p < inactive {
            if a < active {
                records.push((crate::fixtures::raw_item(a), ItemStatus::Active));
                a += 1;
            }
            if p < inactive {
                records.push((
                    RawWorkItem::new(format!("paused-{p:06}"), "group-paused"),
                    ItemStatus::Paused,
                ));
                p += 1;
            }
        }
        Self::new(records)
    }

    /// Fail the next `n` fetches.
    pub fn fail_next(&self, n: usize) {
        self.inner.lock().fail_next = n;
    }

    /// Fail every fetch starting at `offset` until [`Self::heal`] is called.
    pub fn fail_at_offset(&self, offset: u64) {
        self.inner.lock().fail_at_offset = Some(offset);
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        let mut inner = self.inner.lock();
        inner.fail_next = 0;
        inner.fail_at_offset = None;
    }

    pub fn fetches(&self) -> Vec<FetchRecord> {
        self.inner.lock().fetches.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.inner.lock().fetches.len()
    }

    /// Sizes of the successful fetches, in call order.
    pub fn fetched_sizes(&self) -> Vec<usize> {
        self.inner
            .lock()
            .fetches
            .iter()
            .filter_map(|f| f.returned)
            .collect()
    }

    pub fn assert_fetch_count_eq(&self, expected: usize) {
        let actual = self.fetch_count();
        assert_eq!(
            actual, expected,
            "Expected {} page fetches, got {}",
            expected, actual
        );
    }

    pub fn clear(&self) {
        self.inner.lock().fetches.clear();
    }

    fn matching(&self, selection: &Selection) -> Vec<&RawWorkItem> {
        self.records
            .iter()
            .filter(|(raw, status)| {
                selection.matches(*status, raw.group_id.as_deref().unwrap_or_default())
            })
            .map(|(raw, _)| raw)
            .collect()
    }
}

#[async_trait]
impl WorkSource for InMemoryWorkSource {
    async fn fetch_page(
        &self,
        selection: &Selection,
        cursor: PageCursor,
        page_size: usize,
    ) -> anyhow::Result<Page> {
        {
            let mut inner = self.inner.lock();
            let fail = if inner.fail_next > 0 {
                inner.fail_next -= 1;
                true
            } else {
                inner.fail_at_offset == Some(cursor.offset())
            };
            if fail {
                inner.fetches.push(FetchRecord {
                    offset: cursor.offset(),
                    page_size,
                    returned: None,
                });
                anyhow::bail!("injected fetch failure at offset {}", cursor.offset());
            }
        }

        let matching = self.matching(selection);
        let start = usize::try_from(cursor.offset())?.min(matching.len());
        let end = start.saturating_add(page_size).min(matching.len());
        let items: Vec<RawWorkItem> = matching[start..end].iter().map(|r| (*r).clone()).collect();

        self.inner.lock().fetches.push(FetchRecord {
            offset: cursor.offset(),
            page_size,
            returned: Some(items.len()),
        });
        Ok(Page::new(items, end < matching.len()))
    }
}

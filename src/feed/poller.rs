//! Poll the swap feed and yield only swaps not seen in the previous window

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::source::SwapFeedSource;
use super::types::{SwapRecord, SwapSnapshot};
use crate::error::Result;
use crate::store::JsonStore;

const SNAPSHOT_KEY: &str = "snapshot";

/// Records in `current` whose id is absent from `previous`, in feed order
///
/// Without a previous snapshot everything is new.
pub fn diff(previous: Option<&SwapSnapshot>, current: &SwapSnapshot) -> Vec<SwapRecord> {
    let seen: HashSet<&str> = match previous {
        Some(prev) => prev.ids(),
        None => HashSet::new(),
    };

    current
        .records
        .iter()
        .filter(|r| !seen.contains(r.id.as_str()))
        .cloned()
        .collect()
}

/// Fetch one window of recent swaps
pub async fn fetch_recent(source: &dyn SwapFeedSource, limit: usize) -> Result<SwapSnapshot> {
    let page = source.list_recent_swaps(limit).await?;
    Ok(SwapSnapshot::from_page(page, limit))
}

/// Swap poller with a retained dedup baseline
pub struct SwapPoller {
    source: Arc<dyn SwapFeedSource>,
    store: Option<Arc<JsonStore>>,
    window_size: usize,
    snapshot: Option<SwapSnapshot>,
}

impl SwapPoller {
    pub fn new(source: Arc<dyn SwapFeedSource>, window_size: usize) -> Self {
        Self {
            source,
            store: None,
            window_size,
            snapshot: None,
        }
    }

    /// Restore the last persisted snapshot; missing or corrupt means first run
    pub async fn with_store(mut self, store: Arc<JsonStore>) -> Self {
        self.snapshot = store.load_or_default::<Option<SwapSnapshot>>(SNAPSHOT_KEY).await;
        if let Some(snapshot) = &self.snapshot {
            info!(
                records = snapshot.len(),
                fetched_at = %snapshot.fetched_at,
                "Restored swap snapshot"
            );
        }
        self.store = Some(store);
        self
    }

    pub async fn fetch_recent(&self, limit: usize) -> Result<SwapSnapshot> {
        fetch_recent(self.source.as_ref(), limit).await
    }

    /// The current dedup baseline
    pub fn snapshot(&self) -> Option<&SwapSnapshot> {
        self.snapshot.as_ref()
    }

    /// Fetch, diff against the retained window, then replace it
    ///
    /// A fetch error leaves the retained window untouched.
    pub async fn poll(&mut self) -> Result<Vec<SwapRecord>> {
        let current = self.fetch_recent(self.window_size).await?;
        let fresh = diff(self.snapshot.as_ref(), &current);

        if let Some(previous) = &self.snapshot {
            let previous_ids = previous.ids();
            let overlap = current
                .records
                .iter()
                .any(|r| previous_ids.contains(r.id.as_str()));
            if !overlap && !previous.is_empty() && !current.is_empty() {
                debug!(
                    window = self.window_size,
                    "No overlap with previous window, swaps may have been missed"
                );
            }
        }

        debug!(
            fetched = current.len(),
            new = fresh.len(),
            "Polled swap feed"
        );

        if let Some(store) = &self.store {
            store.save_logged(SNAPSHOT_KEY, &Some(&current)).await;
        }
        self.snapshot = Some(current);

        Ok(fresh)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use crate::error::Error;
    use crate::feed::{SwapPage, SwapRecord};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Feed that replays queued pages; an empty queue is a 503
    #[derive(Default)]
    pub struct ScriptedFeed {
        pages: Mutex<VecDeque<Result<Vec<SwapRecord>>>>,
    }

    impl ScriptedFeed {
        pub fn push(&self, records: Vec<SwapRecord>) {
            self.pages.lock().unwrap().push_back(Ok(records));
        }

        pub fn push_error(&self, error: Error) {
            self.pages.lock().unwrap().push_back(Err(error));
        }
    }

    #[async_trait]
    impl SwapFeedSource for ScriptedFeed {
        async fn list_recent_swaps(&self, limit: usize) -> Result<SwapPage> {
            let next = self.pages.lock().unwrap().pop_front();
            match next {
                Some(Ok(mut records)) => {
                    records.truncate(limit);
                    let total = Some(records.len() as u64);
                    Ok(SwapPage { records, total })
                }
                Some(Err(e)) => Err(e),
                None => Err(Error::Http {
                    status: 503,
                    body: "no page queued".into(),
                    retry_after: None,
                }),
            }
        }

        async fn list_swaps_for_address(
            &self,
            _address: &str,
            _pool_id: &str,
            _limit: usize,
        ) -> Result<Vec<SwapRecord>> {
            Ok(Vec::new())
        }
    }
}

pub mod hermes;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::types::{FeedId, PriceSnapshot};

/// One side's view of the freshest prices, source or target. `start` must
/// fail fast when the subscription cannot be established; afterwards the
/// implementation keeps its cache current in the background.
#[async_trait]
pub trait PriceListener: Send + Sync {
    async fn start(&self) -> Result<()>;

    /// Latest observed snapshot for a feed, if any has arrived. Never blocks.
    fn get_latest_price_info(&self, id: &FeedId) -> Option<PriceSnapshot>;
}

/// Latest-snapshot store shared between one writer task and the controller.
/// Entries are replaced wholesale per feed. An update older than the cached
/// publish time is dropped, so a stream replay after a reconnect cannot
/// regress the cache.
#[derive(Debug, Default)]
pub struct PriceCache {
    inner: DashMap<FeedId, PriceSnapshot>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, id: FeedId, snapshot: PriceSnapshot) {
        match self.inner.entry(id) {
            Entry::Occupied(mut entry) => {
                if snapshot.publish_time >= entry.get().publish_time {
                    entry.insert(snapshot);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(snapshot);
            }
        }
    }

    pub fn latest(&self, id: &FeedId) -> Option<PriceSnapshot> {
        self.inner.get(id).map(|entry| *entry.value())
    }
}

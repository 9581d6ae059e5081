use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::feeds::{PriceCache, PriceListener};
use crate::pusher::PricePusher;
use crate::types::{FeedId, PriceSnapshot, UnixTimestamp};

/// In-process stand-in for a target chain, used for dry runs and tests.
/// Pushed batches "land" by copying the current source snapshot into the
/// target-side cache, honoring the requested minimum publish time the way
/// a real updater contract would.
pub struct SimChain {
    cache: Arc<PriceCache>,
    source: Arc<dyn PriceListener>,
}

impl SimChain {
    pub fn new(source: Arc<dyn PriceListener>) -> Self {
        Self {
            cache: Arc::new(PriceCache::new()),
            source,
        }
    }

    pub fn listener(&self) -> Arc<SimListener> {
        Arc::new(SimListener {
            cache: self.cache.clone(),
        })
    }

    pub fn pusher(&self) -> Arc<SimPusher> {
        Arc::new(SimPusher {
            cache: self.cache.clone(),
            source: self.source.clone(),
        })
    }
}

pub struct SimListener {
    cache: Arc<PriceCache>,
}

#[async_trait]
impl PriceListener for SimListener {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    fn get_latest_price_info(&self, id: &FeedId) -> Option<PriceSnapshot> {
        self.cache.latest(id)
    }
}

pub struct SimPusher {
    cache: Arc<PriceCache>,
    source: Arc<dyn PriceListener>,
}

#[async_trait]
impl PricePusher for SimPusher {
    async fn update_price_feed(
        &self,
        feed_ids: &[FeedId],
        publish_times: &[UnixTimestamp],
    ) -> Result<()> {
        let mut applied = 0usize;
        let mut skipped = 0usize;

        for (id, min_publish_time) in feed_ids.iter().zip(publish_times) {
            match self.source.get_latest_price_info(id) {
                Some(snapshot) if snapshot.publish_time >= *min_publish_time => {
                    self.cache.update(*id, snapshot);
                    applied += 1;
                }
                _ => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(applied, skipped, "simulated push skipped feeds with source data older than requested");
        } else {
            info!(applied, "simulated push applied");
        }
        Ok(())
    }
}

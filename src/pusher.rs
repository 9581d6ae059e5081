use anyhow::Result;
use async_trait::async_trait;

use crate::types::{FeedId, UnixTimestamp};

/// Outbound side of the target chain. One call submits one batched update;
/// from the caller's point of view the batch lands as a whole or fails as
/// a whole. `publish_times` are parallel to `feed_ids` and carry the
/// minimum publish time the submission must satisfy per feed.
#[async_trait]
pub trait PricePusher: Send + Sync {
    async fn update_price_feed(
        &self,
        feed_ids: &[FeedId],
        publish_times: &[UnixTimestamp],
    ) -> Result<()>;
}

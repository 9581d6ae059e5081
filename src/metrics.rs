use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::info;

use crate::types::{FeedId, PriceSnapshot, UpdateCondition};

/// Observability hooks for the controller. Every method is fire-and-forget;
/// implementations must not fail or block the cycle. The defaults are
/// no-ops, so an empty impl is a valid sink.
pub trait MetricsSink: Send + Sync {
    fn set_feed_count(&self, _count: usize) {}
    fn record_last_published_time(&self, _id: &FeedId, _alias: &str, _snapshot: &PriceSnapshot) {}
    fn record_decision(&self, _id: &FeedId, _alias: &str, _condition: UpdateCondition) {}
    fn record_push_success(&self, _id: &FeedId, _alias: &str) {}
    fn record_push_error(&self, _id: &FeedId, _alias: &str) {}
}

/// Substitute used when metrics are not wired up.
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

#[derive(Default)]
struct FeedCounters {
    alias: String,
    yes: AtomicU64,
    early: AtomicU64,
    no: AtomicU64,
    pushes: AtomicU64,
    push_errors: AtomicU64,
    // unix seconds; 0 means never published
    last_published_time: AtomicI64,
}

/// In-memory metrics backed by per-feed atomic counters, snapshotable for
/// the periodic summary log.
#[derive(Default)]
pub struct PusherMetrics {
    feed_count: AtomicUsize,
    feeds: DashMap<FeedId, Arc<FeedCounters>>,
}

/// Point-in-time copy of one feed's counters.
#[derive(Debug, Clone)]
pub struct FeedSummary {
    pub alias: String,
    pub yes: u64,
    pub early: u64,
    pub no: u64,
    pub pushes: u64,
    pub push_errors: u64,
    pub last_published_time: Option<i64>,
}

impl PusherMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, id: &FeedId, alias: &str) -> Arc<FeedCounters> {
        self.feeds
            .entry(*id)
            .or_insert_with(|| {
                Arc::new(FeedCounters {
                    alias: alias.to_string(),
                    ..Default::default()
                })
            })
            .clone()
    }

    pub fn feed_count(&self) -> usize {
        self.feed_count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Vec<FeedSummary> {
        let mut summaries: Vec<FeedSummary> = self
            .feeds
            .iter()
            .map(|entry| {
                let c = entry.value();
                let last = c.last_published_time.load(Ordering::Relaxed);
                FeedSummary {
                    alias: c.alias.clone(),
                    yes: c.yes.load(Ordering::Relaxed),
                    early: c.early.load(Ordering::Relaxed),
                    no: c.no.load(Ordering::Relaxed),
                    pushes: c.pushes.load(Ordering::Relaxed),
                    push_errors: c.push_errors.load(Ordering::Relaxed),
                    last_published_time: (last != 0).then_some(last),
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.alias.cmp(&b.alias));
        summaries
    }
}

impl MetricsSink for PusherMetrics {
    fn set_feed_count(&self, count: usize) {
        self.feed_count.store(count, Ordering::Relaxed);
    }

    fn record_last_published_time(&self, id: &FeedId, alias: &str, snapshot: &PriceSnapshot) {
        self.counters(id, alias)
            .last_published_time
            .store(snapshot.publish_time, Ordering::Relaxed);
    }

    fn record_decision(&self, id: &FeedId, alias: &str, condition: UpdateCondition) {
        let counters = self.counters(id, alias);
        let counter = match condition {
            UpdateCondition::Yes => &counters.yes,
            UpdateCondition::Early => &counters.early,
            UpdateCondition::No => &counters.no,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_push_success(&self, id: &FeedId, alias: &str) {
        self.counters(id, alias).pushes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_push_error(&self, id: &FeedId, alias: &str) {
        self.counters(id, alias)
            .push_errors
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// Logs aggregate and per-feed counters at a fixed interval.
pub fn spawn_summary_logger(metrics: Arc<PusherMetrics>, every: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(every).await;

            let feeds = metrics.snapshot();
            let pushes: u64 = feeds.iter().map(|f| f.pushes).sum();
            let push_errors: u64 = feeds.iter().map(|f| f.push_errors).sum();
            info!(
                event = "SUMMARY",
                feeds = metrics.feed_count(),
                pushes,
                push_errors,
            );

            for feed in feeds {
                let last_published = feed
                    .last_published_time
                    .and_then(|t| chrono::DateTime::from_timestamp(t, 0))
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                info!(
                    event = "FEED_SUMMARY",
                    feed = %feed.alias,
                    yes = feed.yes,
                    early = feed.early,
                    no = feed.no,
                    pushes = feed.pushes,
                    push_errors = feed.push_errors,
                    last_published = %last_published,
                );
            }
        }
    });
}

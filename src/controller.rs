use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::FeedConfig;
use crate::engine;
use crate::feeds::PriceListener;
use crate::metrics::MetricsSink;
use crate::pusher::PricePusher;
use crate::types::{FeedId, UnixTimestamp, UpdateCondition};

/// Drives the evaluate → push → sleep cycle over all configured feeds until
/// the shutdown signal flips.
pub struct Controller {
    feeds: Vec<FeedConfig>,
    source: Arc<dyn PriceListener>,
    target: Arc<dyn PriceListener>,
    pusher: Arc<dyn PricePusher>,
    metrics: Arc<dyn MetricsSink>,
    push_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

/// One cycle's worth of qualifying feeds, in configuration order. `ids` and
/// `publish_times` are parallel vectors, exactly as handed to the pusher.
struct CycleBatch {
    push_required: bool,
    ids: Vec<FeedId>,
    aliases: Vec<String>,
    publish_times: Vec<UnixTimestamp>,
}

impl Controller {
    pub fn new(
        feeds: Vec<FeedConfig>,
        source: Arc<dyn PriceListener>,
        target: Arc<dyn PriceListener>,
        pusher: Arc<dyn PricePusher>,
        metrics: Arc<dyn MetricsSink>,
        push_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            feeds,
            source,
            target,
            pusher,
            metrics,
            push_interval,
            shutdown,
        }
    }

    pub async fn start(mut self) -> Result<()> {
        self.source
            .start()
            .await
            .context("starting source price listener")?;
        self.target
            .start()
            .await
            .context("starting target price listener")?;

        self.metrics.set_feed_count(self.feeds.len());

        info!(
            feeds = self.feeds.len(),
            interval_secs = self.push_interval.as_secs(),
            "controller started"
        );

        // A push from a previous run of the process may still be in flight;
        // hold off one full interval so it lands before the first evaluation.
        if self.sleep_or_shutdown().await {
            return Ok(());
        }

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let batch = self.evaluate();

            if batch.push_required {
                if *self.shutdown.borrow() {
                    break;
                }
                self.push(&batch).await;
            } else {
                info!("no feed met its update conditions, nothing to push");
            }

            if self.sleep_or_shutdown().await {
                break;
            }
        }

        info!("controller stopped");
        Ok(())
    }

    /// Evaluate every configured feed and collect the cycle's batch. Feeds
    /// deciding YES force the push; EARLY feeds ride along with it.
    fn evaluate(&self) -> CycleBatch {
        let mut batch = CycleBatch {
            push_required: false,
            ids: Vec::new(),
            aliases: Vec::new(),
            publish_times: Vec::new(),
        };

        for feed in &self.feeds {
            let source = self.source.get_latest_price_info(&feed.id);
            let target = self.target.get_latest_price_info(&feed.id);

            if let Some(target) = &target {
                self.metrics
                    .record_last_published_time(&feed.id, &feed.alias, target);
            }

            let condition = engine::should_update(feed, source.as_ref(), target.as_ref());
            self.metrics.record_decision(&feed.id, &feed.alias, condition);

            if condition == UpdateCondition::Yes {
                batch.push_required = true;
            }
            if matches!(condition, UpdateCondition::Yes | UpdateCondition::Early) {
                batch.ids.push(feed.id);
                batch.aliases.push(feed.alias.clone());
                batch
                    .publish_times
                    .push(target.map(|t| t.publish_time).unwrap_or(0) + 1);
            }
        }

        batch
    }

    async fn push(&self, batch: &CycleBatch) {
        info!(feeds = ?batch.aliases, "update conditions met, pushing batch");

        match self
            .pusher
            .update_price_feed(&batch.ids, &batch.publish_times)
            .await
        {
            Ok(()) => {
                for (id, alias) in batch.ids.iter().zip(&batch.aliases) {
                    self.metrics.record_push_success(id, alias);
                }
            }
            Err(e) => {
                let ids: Vec<String> = batch.ids.iter().map(|id| id.to_string()).collect();
                error!(error = %e, ids = ?ids, "failed to push price updates");
                for (id, alias) in batch.ids.iter().zip(&batch.aliases) {
                    self.metrics.record_push_error(id, alias);
                }
            }
        }
    }

    /// Sleep one push interval. Returns true when shutdown was requested.
    async fn sleep_or_shutdown(&mut self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.push_interval) => false,
            changed = self.shutdown.changed() => changed.is_err() || *self.shutdown.borrow(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::bail;
    use async_trait::async_trait;

    use super::*;
    use crate::feeds::PriceCache;
    use crate::types::PriceSnapshot;

    fn id(byte: u8) -> FeedId {
        FeedId::from_hex(&format!("{byte:02x}").repeat(32)).unwrap()
    }

    fn snap(price: i64, publish_time: i64) -> PriceSnapshot {
        PriceSnapshot {
            price,
            conf: 1,
            expo: -8,
            publish_time,
        }
    }

    fn feed(alias: &str, id: FeedId) -> FeedConfig {
        FeedConfig {
            alias: alias.to_string(),
            id,
            time_difference_secs: 60,
            price_deviation_pct: 0.5,
            max_confidence_ratio_pct: None,
            early_update: Some(crate::config::EarlyUpdateConfig {
                time_difference_secs: Some(30),
                price_deviation_pct: None,
            }),
        }
    }

    struct StaticListener {
        cache: PriceCache,
    }

    impl StaticListener {
        fn new(entries: &[(FeedId, PriceSnapshot)]) -> Arc<Self> {
            let cache = PriceCache::new();
            for (id, snapshot) in entries {
                cache.update(*id, *snapshot);
            }
            Arc::new(Self { cache })
        }
    }

    #[async_trait]
    impl PriceListener for StaticListener {
        async fn start(&self) -> Result<()> {
            Ok(())
        }

        fn get_latest_price_info(&self, id: &FeedId) -> Option<PriceSnapshot> {
            self.cache.latest(id)
        }
    }

    struct FailingListener;

    #[async_trait]
    impl PriceListener for FailingListener {
        async fn start(&self) -> Result<()> {
            bail!("subscription refused")
        }

        fn get_latest_price_info(&self, _id: &FeedId) -> Option<PriceSnapshot> {
            None
        }
    }

    #[derive(Default)]
    struct RecordingPusher {
        fail: bool,
        calls: Mutex<Vec<(Vec<FeedId>, Vec<UnixTimestamp>)>>,
    }

    #[async_trait]
    impl PricePusher for RecordingPusher {
        async fn update_price_feed(
            &self,
            feed_ids: &[FeedId],
            publish_times: &[UnixTimestamp],
        ) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((feed_ids.to_vec(), publish_times.to_vec()));
            if self.fail {
                bail!("rpc unavailable");
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingMetrics {
        successes: Mutex<Vec<String>>,
        errors: Mutex<Vec<String>>,
    }

    impl MetricsSink for RecordingMetrics {
        fn record_push_success(&self, _id: &FeedId, alias: &str) {
            self.successes.lock().unwrap().push(alias.to_string());
        }

        fn record_push_error(&self, _id: &FeedId, alias: &str) {
            self.errors.lock().unwrap().push(alias.to_string());
        }
    }

    fn controller(
        feeds: Vec<FeedConfig>,
        source: Arc<dyn PriceListener>,
        target: Arc<dyn PriceListener>,
        pusher: Arc<RecordingPusher>,
        metrics: Arc<RecordingMetrics>,
        interval: Duration,
    ) -> (Controller, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let ctl = Controller::new(feeds, source, target, pusher, metrics, interval, rx);
        (ctl, tx)
    }

    #[test]
    fn test_batch_has_yes_and_early_feeds_in_config_order() {
        // f1 is 61s stale (YES), f2 is 40s stale (EARLY), f3 is fresh (NO)
        let (f1, f2, f3) = (id(1), id(2), id(3));
        let source = StaticListener::new(&[
            (f1, snap(10_000, 161)),
            (f2, snap(20_000, 240)),
            (f3, snap(30_000, 301)),
        ]);
        let target = StaticListener::new(&[
            (f1, snap(10_000, 100)),
            (f2, snap(20_000, 200)),
            (f3, snap(30_000, 300)),
        ]);

        let (ctl, _tx) = controller(
            vec![feed("F1", f1), feed("F2", f2), feed("F3", f3)],
            source,
            target,
            Arc::new(RecordingPusher::default()),
            Arc::new(RecordingMetrics::default()),
            Duration::from_millis(10),
        );

        let batch = ctl.evaluate();
        assert!(batch.push_required);
        assert_eq!(batch.ids, vec![f1, f2]);
        assert_eq!(batch.publish_times, vec![101, 201]);
        assert_eq!(batch.aliases, vec!["F1", "F2"]);
    }

    #[test]
    fn test_early_feeds_alone_do_not_require_push() {
        let f1 = id(1);
        let source = StaticListener::new(&[(f1, snap(10_000, 140))]);
        let target = StaticListener::new(&[(f1, snap(10_000, 100))]);

        let (ctl, _tx) = controller(
            vec![feed("F1", f1)],
            source,
            target,
            Arc::new(RecordingPusher::default()),
            Arc::new(RecordingMetrics::default()),
            Duration::from_millis(10),
        );

        let batch = ctl.evaluate();
        assert!(!batch.push_required);
        assert_eq!(batch.ids, vec![f1]);
    }

    #[test]
    fn test_uninitialized_feed_gets_publish_time_one() {
        let f1 = id(1);
        let source = StaticListener::new(&[(f1, snap(10_000, 161))]);
        let target = StaticListener::new(&[]);

        let (ctl, _tx) = controller(
            vec![feed("F1", f1)],
            source,
            target,
            Arc::new(RecordingPusher::default()),
            Arc::new(RecordingMetrics::default()),
            Duration::from_millis(10),
        );

        let batch = ctl.evaluate();
        assert!(batch.push_required);
        assert_eq!(batch.publish_times, vec![1]);
    }

    #[tokio::test]
    async fn test_single_stale_feed_pushes_exact_batch() {
        let f1 = id(1);
        let source = StaticListener::new(&[(f1, snap(10_000, 161))]);
        let target = StaticListener::new(&[(f1, snap(10_000, 100))]);
        let pusher = Arc::new(RecordingPusher::default());
        let metrics = Arc::new(RecordingMetrics::default());

        let (ctl, tx) = controller(
            vec![feed("F1", f1)],
            source,
            target,
            pusher.clone(),
            metrics.clone(),
            Duration::from_millis(10),
        );

        let handle = tokio::spawn(ctl.start());
        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let calls = pusher.calls.lock().unwrap();
        assert!(!calls.is_empty());
        assert_eq!(calls[0], (vec![f1], vec![101]));
        assert!(metrics.successes.lock().unwrap().contains(&"F1".to_string()));
    }

    #[tokio::test]
    async fn test_no_push_when_all_feeds_hold() {
        let f1 = id(1);
        let source = StaticListener::new(&[(f1, snap(10_000, 101))]);
        let target = StaticListener::new(&[(f1, snap(10_000, 100))]);
        let pusher = Arc::new(RecordingPusher::default());

        let (ctl, tx) = controller(
            vec![feed("F1", f1)],
            source,
            target,
            pusher.clone(),
            Arc::new(RecordingMetrics::default()),
            Duration::from_millis(10),
        );

        let handle = tokio::spawn(ctl.start());
        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert!(pusher.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_push_failure_records_errors_and_loop_continues() {
        let (f1, f2, f3) = (id(1), id(2), id(3));
        let source = StaticListener::new(&[
            (f1, snap(10_000, 161)),
            (f2, snap(20_000, 240)),
            (f3, snap(30_000, 400)),
        ]);
        let target = StaticListener::new(&[
            (f1, snap(10_000, 100)),
            (f2, snap(20_000, 100)),
            (f3, snap(30_000, 100)),
        ]);
        let pusher = Arc::new(RecordingPusher {
            fail: true,
            ..Default::default()
        });
        let metrics = Arc::new(RecordingMetrics::default());

        let (ctl, tx) = controller(
            vec![feed("F1", f1), feed("F2", f2), feed("F3", f3)],
            source,
            target,
            pusher.clone(),
            metrics.clone(),
            Duration::from_millis(10),
        );

        let handle = tokio::spawn(ctl.start());
        tokio::time::sleep(Duration::from_millis(80)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        // the failing push was re-attempted on later cycles
        assert!(pusher.calls.lock().unwrap().len() >= 2);

        let errors = metrics.errors.lock().unwrap();
        for alias in ["F1", "F2", "F3"] {
            assert!(errors.contains(&alias.to_string()), "missing error for {alias}");
        }
        assert!(metrics.successes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_before_first_cycle_pushes_nothing() {
        let f1 = id(1);
        let source = StaticListener::new(&[(f1, snap(10_000, 161))]);
        let target = StaticListener::new(&[]);
        let pusher = Arc::new(RecordingPusher::default());

        let (ctl, tx) = controller(
            vec![feed("F1", f1)],
            source,
            target,
            pusher.clone(),
            Arc::new(RecordingMetrics::default()),
            Duration::from_secs(60),
        );

        let handle = tokio::spawn(ctl.start());
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert!(pusher.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_listener_start_failure_is_fatal() {
        let f1 = id(1);
        let target = StaticListener::new(&[]);
        let pusher = Arc::new(RecordingPusher::default());

        let (ctl, _tx) = controller(
            vec![feed("F1", f1)],
            Arc::new(FailingListener),
            target,
            pusher.clone(),
            Arc::new(RecordingMetrics::default()),
            Duration::from_millis(10),
        );

        let err = ctl.start().await.unwrap_err();
        assert!(err.to_string().contains("source price listener"), "{err}");
        assert!(pusher.calls.lock().unwrap().is_empty());
    }
}

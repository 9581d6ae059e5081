use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use url::Url;

use crate::types::FeedId;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Seconds between evaluation cycles.
    pub push_interval_secs: u64,
    /// Interval for the periodic metrics summary log. 0 disables metrics
    /// collection entirely.
    #[serde(default = "default_summary_interval")]
    pub metrics_summary_interval_secs: u64,
    pub source: SourceConfig,
    pub feeds: Vec<FeedConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Websocket endpoint of the source price service.
    pub ws_endpoint: String,
    /// HTTP endpoint of the same service, used to prime the cache at startup.
    pub http_endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Display name for logs and metrics (e.g. "BTC/USD"). Not used in decisions.
    pub alias: String,
    pub id: FeedId,
    /// Push when the source publish time is at least this far ahead of the target's.
    pub time_difference_secs: u64,
    /// Push when source and target prices deviate by at least this percentage.
    pub price_deviation_pct: f64,
    /// Hold all non-bootstrap pushes while the source confidence interval is
    /// at least this percentage of the price. Unset means no gate.
    #[serde(default)]
    pub max_confidence_ratio_pct: Option<f64>,
    #[serde(default)]
    pub early_update: Option<EarlyUpdateConfig>,
}

/// Lower thresholds that mark a feed as ready to ride along with a batch
/// some other feed already forced.
#[derive(Debug, Clone, Deserialize)]
pub struct EarlyUpdateConfig {
    #[serde(default)]
    pub time_difference_secs: Option<u64>,
    #[serde(default)]
    pub price_deviation_pct: Option<f64>,
}

fn default_summary_interval() -> u64 {
    60
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {path}"))?;
        let cfg: Config = toml::from_str(&text).with_context(|| "parsing config TOML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.push_interval_secs == 0 {
            bail!("push_interval_secs must be positive");
        }
        if self.feeds.is_empty() {
            bail!("no feeds configured");
        }
        Url::parse(&self.source.ws_endpoint)
            .with_context(|| format!("invalid source ws_endpoint {:?}", self.source.ws_endpoint))?;
        Url::parse(&self.source.http_endpoint)
            .with_context(|| format!("invalid source http_endpoint {:?}", self.source.http_endpoint))?;

        let mut seen = HashSet::new();
        for feed in &self.feeds {
            if !seen.insert(feed.id) {
                bail!("duplicate feed id {} ({})", feed.id, feed.alias);
            }
            if let Some(early) = &feed.early_update {
                if early.time_difference_secs.is_some_and(|t| t > feed.time_difference_secs) {
                    bail!(
                        "{}: early time_difference_secs exceeds the main threshold",
                        feed.alias
                    );
                }
                if early.price_deviation_pct.is_some_and(|d| d > feed.price_deviation_pct) {
                    bail!(
                        "{}: early price_deviation_pct exceeds the main threshold",
                        feed.alias
                    );
                }
            }
        }
        Ok(())
    }

    pub fn feed_ids(&self) -> Vec<FeedId> {
        self.feeds.iter().map(|f| f.id).collect()
    }
}

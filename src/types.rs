use std::fmt;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Deserializer};

pub type UnixTimestamp = i64;

/// 32-byte price feed identifier. Configs and logs carry it as hex,
/// with or without a leading "0x".
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedId([u8; 32]);

impl FeedId {
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| anyhow!("invalid feed id {s:?}: {e}"))?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("feed id must be 32 bytes, got {}", s.len() / 2))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeedId({})", hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for FeedId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        FeedId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Point-in-time price observation in fixed-point form: `price * 10^expo`
/// with a confidence interval of `conf * 10^expo` around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceSnapshot {
    pub price: i64,
    pub conf: u64,
    pub expo: i32,
    pub publish_time: UnixTimestamp,
}

impl PriceSnapshot {
    pub fn scaled_price(&self) -> f64 {
        self.price as f64 * 10f64.powi(self.expo)
    }

    pub fn scaled_conf(&self) -> f64 {
        self.conf as f64 * 10f64.powi(self.expo)
    }
}

/// Per-feed outcome of one evaluation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateCondition {
    /// The feed does not need a push this cycle.
    No,
    /// Close enough to a threshold to ride along with a batch that is
    /// already going out, but not worth a push on its own.
    Early,
    /// The feed alone mandates a push.
    Yes,
}

impl fmt::Display for UpdateCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateCondition::No => write!(f, "NO"),
            UpdateCondition::Early => write!(f, "EARLY"),
            UpdateCondition::Yes => write!(f, "YES"),
        }
    }
}

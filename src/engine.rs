use tracing::{debug, info};

use crate::config::FeedConfig;
use crate::types::{PriceSnapshot, UpdateCondition};

/// Decide whether a feed needs pushing, given the freshest snapshot from
/// each side. Pure apart from diagnostic logging.
pub fn should_update(
    cfg: &FeedConfig,
    source: Option<&PriceSnapshot>,
    target: Option<&PriceSnapshot>,
) -> UpdateCondition {
    let Some(source) = source else {
        info!(feed = %cfg.alias, "no source price yet");
        return UpdateCondition::No;
    };
    let Some(target) = target else {
        info!(feed = %cfg.alias, "feed not initialized on target, pushing");
        return UpdateCondition::Yes;
    };

    let time_diff = source.publish_time - target.publish_time;
    let deviation_pct = price_deviation_pct(source, target);
    let confidence_pct = confidence_ratio_pct(source);

    debug!(
        feed = %cfg.alias,
        time_diff,
        deviation_pct = %format!("{deviation_pct:.4}"),
        confidence_pct = %format!("{confidence_pct:.4}"),
        "feed evaluated"
    );

    if let Some(max_ratio) = cfg.max_confidence_ratio_pct {
        if confidence_pct >= max_ratio {
            debug!(
                feed = %cfg.alias,
                confidence_pct = %format!("{confidence_pct:.4}"),
                max_ratio,
                "source confidence interval too wide, holding update"
            );
            return UpdateCondition::No;
        }
    }

    if time_diff >= cfg.time_difference_secs as i64 {
        return UpdateCondition::Yes;
    }
    if deviation_pct >= cfg.price_deviation_pct {
        return UpdateCondition::Yes;
    }

    if let Some(early) = &cfg.early_update {
        if early.time_difference_secs.is_some_and(|t| time_diff >= t as i64) {
            return UpdateCondition::Early;
        }
        if early.price_deviation_pct.is_some_and(|d| deviation_pct >= d) {
            return UpdateCondition::Early;
        }
    }

    UpdateCondition::No
}

/// Relative deviation between the two sides, in percent. Compares scaled
/// prices so differing exponents are handled. A zero target price yields
/// an infinite deviation, which always triggers.
fn price_deviation_pct(source: &PriceSnapshot, target: &PriceSnapshot) -> f64 {
    ((source.scaled_price() - target.scaled_price()).abs() / target.scaled_price().abs()) * 100.0
}

/// Width of the source confidence interval relative to its price, in percent.
fn confidence_ratio_pct(source: &PriceSnapshot) -> f64 {
    (source.scaled_conf() / source.scaled_price().abs()) * 100.0
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{error, info, warn};

use super::{PriceCache, PriceListener};
use crate::config::SourceConfig;
use crate::types::{FeedId, PriceSnapshot};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Source-side listener subscribed to a Hermes price service stream.
pub struct HermesListener {
    ws_endpoint: String,
    http_endpoint: String,
    ids: Vec<FeedId>,
    cache: Arc<PriceCache>,
}

impl HermesListener {
    pub fn new(cfg: &SourceConfig, ids: Vec<FeedId>) -> Self {
        Self {
            ws_endpoint: cfg.ws_endpoint.clone(),
            http_endpoint: cfg.http_endpoint.clone(),
            ids,
            cache: Arc::new(PriceCache::new()),
        }
    }

    /// Best-effort REST fetch of the latest prices so the first evaluation
    /// cycle does not start from an empty cache.
    async fn prime(&self) -> Result<()> {
        let client = reqwest::Client::new();
        let url = format!(
            "{}/v2/updates/price/latest",
            self.http_endpoint.trim_end_matches('/')
        );
        let mut request = client.get(url).query(&[("parsed", "true")]);
        for id in &self.ids {
            request = request.query(&[("ids[]", id.to_string())]);
        }

        let response: serde_json::Value = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut primed = 0;
        if let Some(parsed) = response.get("parsed").and_then(|p| p.as_array()) {
            for entry in parsed {
                if let Some((id, snapshot)) = parse_feed_entry(entry) {
                    self.cache.update(id, snapshot);
                    primed += 1;
                }
            }
        }
        info!(feeds = primed, "primed source cache from REST");
        Ok(())
    }
}

#[async_trait]
impl PriceListener for HermesListener {
    async fn start(&self) -> Result<()> {
        if let Err(e) = self.prime().await {
            warn!(%e, "initial REST price fetch failed, waiting for the stream");
        }

        // The first subscription must succeed or startup aborts; reconnects
        // are only attempted once the stream has been up.
        let ws = connect(&self.ws_endpoint, &self.ids).await?;

        let endpoint = self.ws_endpoint.clone();
        let ids = self.ids.clone();
        let cache = self.cache.clone();
        tokio::spawn(async move {
            let mut stream = Some(ws);
            loop {
                let ws = match stream.take() {
                    Some(ws) => ws,
                    None => match connect(&endpoint, &ids).await {
                        Ok(ws) => ws,
                        Err(e) => {
                            error!(%e, "hermes reconnect failed, retrying in 1s");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                            continue;
                        }
                    },
                };
                match read_loop(ws, &cache).await {
                    Ok(()) => warn!("hermes stream closed, reconnecting"),
                    Err(e) => error!(%e, "hermes stream error, reconnecting in 1s"),
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });

        Ok(())
    }

    fn get_latest_price_info(&self, id: &FeedId) -> Option<PriceSnapshot> {
        self.cache.latest(id)
    }
}

async fn connect(endpoint: &str, ids: &[FeedId]) -> Result<WsStream> {
    let (mut ws, _) = connect_async(endpoint)
        .await
        .with_context(|| format!("connecting to {endpoint}"))?;

    let sub = serde_json::json!({
        "type": "subscribe",
        "ids": ids.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
    });
    ws.send(Message::Text(sub.to_string().into()))
        .await
        .context("subscribing to price updates")?;

    info!(endpoint, feeds = ids.len(), "subscribed to hermes stream");
    Ok(ws)
}

async fn read_loop(mut ws: WsStream, cache: &PriceCache) -> Result<()> {
    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(text) => {
                if let Some((id, snapshot)) = parse_price_update(&text) {
                    cache.update(id, snapshot);
                }
            }
            Message::Close(_) => return Ok(()),
            _ => {}
        }
    }
    Ok(())
}

fn parse_price_update(json: &str) -> Option<(FeedId, PriceSnapshot)> {
    let v: serde_json::Value = serde_json::from_str(json).ok()?;
    if v.get("type")?.as_str()? != "price_update" {
        return None;
    }
    parse_feed_entry(v.get("price_feed")?)
}

fn parse_feed_entry(v: &serde_json::Value) -> Option<(FeedId, PriceSnapshot)> {
    let id = FeedId::from_hex(v.get("id")?.as_str()?).ok()?;
    let price = v.get("price")?;
    let snapshot = PriceSnapshot {
        price: price.get("price")?.as_str()?.parse().ok()?,
        conf: price.get("conf")?.as_str()?.parse().ok()?,
        expo: price.get("expo")?.as_i64()? as i32,
        publish_time: price.get("publish_time")?.as_i64()?,
    };
    Some((id, snapshot))
}

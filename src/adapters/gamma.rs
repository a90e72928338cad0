//! Polymarket Gamma market feed.
//!
//! Read-only REST adapter over the Gamma `/markets` endpoint. Payloads are
//! normalized into [`SourceMarket`] rows: Gamma's stringly-typed arrays
//! are decoded tolerantly, and resolution is inferred from the UMA status
//! plus the collapse of the winning outcome's price to 1.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};

use super::{is_retryable, is_retryable_status, RetryPolicy};
use crate::config::FeedConfig;
use crate::domain::MarketKind;
use crate::error::{Result, ToutError};
use crate::feed::{MarketFeed, SourceMarket, SourceStatus};

/// REST client for the Gamma markets API.
pub struct GammaFeed {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl GammaFeed {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("tout/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout())
            .build()
            .map_err(|e| ToutError::Internal(format!("failed to build feed HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::new(config.max_retries, config.backoff_ms),
        })
    }

    /// GET with retry on transient failures. `Ok(None)` on 404.
    async fn get_with_retry(&self, url: &str, query: &[(&str, String)]) -> Result<Option<Value>> {
        let mut attempts = 0;
        let mut last_error: Option<ToutError> = None;

        while attempts < self.retry.max_attempts {
            attempts += 1;

            match self.http.get(url).query(query).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    if status.is_success() {
                        return Ok(Some(resp.json::<Value>().await?));
                    }

                    let body = resp.text().await.unwrap_or_default();
                    let err = ToutError::Feed(format!(
                        "GET {} returned {}: {}",
                        url,
                        status,
                        body.chars().take(200).collect::<String>()
                    ));
                    if !is_retryable_status(status) {
                        return Err(err);
                    }
                    warn!("Feed request attempt {} failed: {}", attempts, err);
                    last_error = Some(err);
                }
                Err(e) => {
                    if !is_retryable(&e) {
                        return Err(e.into());
                    }
                    warn!("Feed request attempt {} failed: {}", attempts, e);
                    last_error = Some(e.into());
                }
            }

            if attempts < self.retry.max_attempts {
                tokio::time::sleep(self.retry.backoff(attempts - 1)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| ToutError::Feed(format!("GET {} failed", url))))
    }
}

#[async_trait]
impl MarketFeed for GammaFeed {
    async fn top_markets(&self, limit: usize) -> Result<Vec<SourceMarket>> {
        let url = format!("{}/markets", self.base_url);
        let query = [
            ("order", "volume".to_string()),
            ("ascending", "false".to_string()),
            ("limit", limit.to_string()),
            ("active", "true".to_string()),
            ("closed", "false".to_string()),
        ];

        let value = self
            .get_with_retry(&url, &query)
            .await?
            .ok_or_else(|| ToutError::Feed("markets listing endpoint not found".to_string()))?;

        let rows: Vec<Value> = serde_json::from_value(value)?;
        let mut markets = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<GammaMarket>(row) {
                Ok(raw) => {
                    let source_id = raw.id.clone();
                    match map_market(raw) {
                        Some(market) => markets.push(market),
                        None => warn!(source_id, "Skipping unmappable market row"),
                    }
                }
                Err(e) => warn!("Skipping undecodable market row: {}", e),
            }
        }

        debug!(count = markets.len(), "Fetched market listing");
        Ok(markets)
    }

    async fn market(&self, source_id: &str) -> Result<Option<SourceMarket>> {
        let url = format!("{}/markets/{}", self.base_url, source_id);
        let Some(value) = self.get_with_retry(&url, &[]).await? else {
            return Ok(None);
        };

        let raw: GammaMarket = serde_json::from_value(value)?;
        Ok(map_market(raw))
    }
}

#[derive(Debug, Deserialize)]
struct GammaMarket {
    id: String,
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default, deserialize_with = "de_string_vec")]
    outcomes: Vec<String>,
    #[serde(rename = "outcomePrices", default, deserialize_with = "de_string_vec")]
    outcome_prices: Vec<String>,
    #[serde(default, deserialize_with = "de_decimal_opt")]
    volume: Option<Decimal>,
    #[serde(rename = "endDate", default)]
    end_date: Option<String>,
    #[serde(default)]
    active: Option<bool>,
    #[serde(default)]
    closed: Option<bool>,
    #[serde(rename = "umaResolutionStatus", default)]
    uma_resolution_status: Option<String>,
}

fn de_string_vec<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match v {
        Value::Array(arr) => Ok(arr
            .into_iter()
            .filter_map(|x| match x {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect()),
        Value::String(s) => {
            // Gamma returns JSON arrays as a string (e.g. "[\"Yes\",\"No\"]").
            serde_json::from_str::<Vec<String>>(&s).map_err(serde::de::Error::custom)
        }
        _ => Ok(Vec::new()),
    }
}

fn de_decimal_opt<'de, D>(deserializer: D) -> std::result::Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match v {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(Decimal::from_str_exact(&n.to_string()).ok()),
        Value::String(s) => Ok(Decimal::from_str_exact(s.trim()).ok()),
        _ => Ok(None),
    }
}

/// Normalize one Gamma row. None when the row is unusable (no question
/// or no outcomes).
fn map_market(raw: GammaMarket) -> Option<SourceMarket> {
    let question = raw.question.map(|q| q.trim().to_string())?;
    if question.is_empty() || raw.outcomes.is_empty() {
        return None;
    }

    let prices: Vec<Option<Decimal>> = raw
        .outcome_prices
        .iter()
        .map(|s| Decimal::from_str_exact(s.trim()).ok())
        .collect();

    let uma = raw
        .uma_resolution_status
        .as_deref()
        .unwrap_or("")
        .to_ascii_lowercase();
    let cancelled = uma.contains("cancel");
    let closed = raw.closed.unwrap_or(false);

    // Resolved markets collapse the winning outcome's price to 1.
    let winning_outcome = if closed || uma == "resolved" {
        raw.outcomes
            .iter()
            .zip(prices.iter())
            .find(|(_, price)| **price == Some(Decimal::ONE))
            .map(|(name, _)| name.clone())
    } else {
        None
    };

    let status = if cancelled {
        SourceStatus::Cancelled
    } else if winning_outcome.is_some() {
        SourceStatus::Resolved
    } else if closed {
        SourceStatus::Closed
    } else if raw.active.unwrap_or(false) {
        SourceStatus::Active
    } else {
        SourceStatus::Closed
    };

    let is_binary = raw.outcomes.len() == 2
        && raw.outcomes.iter().any(|o| o.eq_ignore_ascii_case("yes"))
        && raw.outcomes.iter().any(|o| o.eq_ignore_ascii_case("no"));

    let (kind, yes_price, outcome_prices) = if is_binary {
        let yes_idx = raw
            .outcomes
            .iter()
            .position(|o| o.eq_ignore_ascii_case("yes"))?;
        (
            MarketKind::Binary,
            prices.get(yes_idx).copied().flatten(),
            HashMap::new(),
        )
    } else {
        let map: HashMap<String, Decimal> = raw
            .outcomes
            .iter()
            .cloned()
            .zip(prices.iter().copied())
            .filter_map(|(name, price)| price.map(|p| (name, p)))
            .collect();
        (MarketKind::MultiOutcome, None, map)
    };

    let close_time = raw
        .end_date
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));

    Some(SourceMarket {
        source_id: raw.id,
        question,
        category: raw.category.filter(|c| !c.trim().is_empty()),
        kind,
        yes_price,
        outcome_prices,
        volume: raw.volume.unwrap_or(Decimal::ZERO),
        close_time,
        status,
        winning_outcome,
    })
}

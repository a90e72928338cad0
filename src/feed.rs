//! Market data source seam.
//!
//! The benchmark treats the prediction-market source as a black-box
//! read/poll API: a top-N-by-volume listing plus single-market lookups
//! that carry the resolution outcome once known.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{MarketKind, MarketStatus};
use crate::error::Result;
use crate::store::MarketUpsert;

/// Market lifecycle as reported by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Active,
    Closed,
    Resolved,
    Cancelled,
}

impl SourceStatus {
    pub fn as_market_status(self) -> MarketStatus {
        match self {
            SourceStatus::Active => MarketStatus::Active,
            SourceStatus::Closed => MarketStatus::Closed,
            SourceStatus::Resolved => MarketStatus::Resolved,
            SourceStatus::Cancelled => MarketStatus::Cancelled,
        }
    }
}

/// One market as reported by the external source.
#[derive(Debug, Clone)]
pub struct SourceMarket {
    pub source_id: String,
    pub question: String,
    pub category: Option<String>,
    pub kind: MarketKind,
    pub yes_price: Option<Decimal>,
    pub outcome_prices: HashMap<String, Decimal>,
    pub volume: Decimal,
    pub close_time: Option<DateTime<Utc>>,
    pub status: SourceStatus,
    pub winning_outcome: Option<String>,
}

impl SourceMarket {
    /// The mirror row for this snapshot.
    pub fn to_upsert(&self) -> MarketUpsert {
        MarketUpsert {
            source_id: self.source_id.clone(),
            question: self.question.clone(),
            category: self.category.clone(),
            kind: self.kind,
            yes_price: self.yes_price,
            outcome_prices: self.outcome_prices.clone(),
            volume: self.volume,
            status: self.status.as_market_status(),
            close_time: self.close_time,
        }
    }
}

#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Markets ordered by trading volume, highest first.
    async fn top_markets(&self, limit: usize) -> Result<Vec<SourceMarket>>;

    /// One market by source identifier, including the winning outcome
    /// once resolved. None when the source no longer knows the id.
    async fn market(&self, source_id: &str) -> Result<Option<SourceMarket>>;
}

//! Ledger persistence seam.
//!
//! Engines talk to [`LedgerStore`]; Postgres implements it for real runs
//! and the in-memory store stands in for tests. Every mutating call is
//! one atomic unit: the composite updates commit entirely or not at all.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{
    Agent, Cohort, Decision, Market, MarketKind, MarketStatus, NewBrierRecord, NewDecision,
    Position, Side, Trade,
};
use crate::error::Result;

/// New cohort row; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewCohort {
    pub sequence: i32,
    pub methodology: String,
    pub initial_balance: Decimal,
}

/// One agent to seed when creating a cohort.
#[derive(Debug, Clone)]
pub struct NewAgent {
    pub model: String,
    pub display_name: String,
}

/// Market snapshot written into the local mirror.
#[derive(Debug, Clone)]
pub struct MarketUpsert {
    pub source_id: String,
    pub question: String,
    pub category: Option<String>,
    pub kind: MarketKind,
    pub yes_price: Option<Decimal>,
    pub outcome_prices: HashMap<String, Decimal>,
    pub volume: Decimal,
    pub status: MarketStatus,
    pub close_time: Option<DateTime<Utc>>,
}

/// Position part of a bet: merge into an existing open row (carrying the
/// post-merge state) or open a new one.
#[derive(Debug, Clone)]
pub enum PositionUpsert {
    Existing(Position),
    New(NewPosition),
}

#[derive(Debug, Clone)]
pub struct NewPosition {
    pub agent_id: i64,
    pub market_id: i64,
    pub side: Side,
    pub shares: Decimal,
    pub avg_entry_price: Decimal,
    pub cost_basis: Decimal,
}

/// A bet's full ledger effect. The store derives the BUY trade row from
/// these fields plus the position it upserts.
#[derive(Debug, Clone)]
pub struct BetUpdate {
    /// Post-debit agent state to persist.
    pub agent: Agent,
    pub position: PositionUpsert,
    pub decision_id: Option<i64>,
    pub side: Side,
    pub shares: Decimal,
    pub price: Decimal,
    pub amount: Decimal,
    pub implied_confidence: Option<Decimal>,
}

/// One position's share of a sell batch.
#[derive(Debug, Clone)]
pub struct SellUpdate {
    /// Post-reduce position state (closed when fully sold).
    pub position: Position,
    pub shares_sold: Decimal,
    pub price: Decimal,
    pub proceeds: Decimal,
    pub cost_basis_sold: Decimal,
    pub realized_pnl: Decimal,
}

/// An agent's entire sell list as one transaction.
#[derive(Debug, Clone)]
pub struct SellBatchUpdate {
    /// Post-batch agent state to persist.
    pub agent: Agent,
    pub decision_id: Option<i64>,
    pub sells: Vec<SellUpdate>,
}

/// One position finalized at market resolution or cancellation.
#[derive(Debug, Clone)]
pub struct PositionSettlement {
    /// Post-settlement position state (settled, or closed for refunds).
    pub position: Position,
    pub shares: Decimal,
    /// Cash credited: payout on resolution, cost basis on cancellation.
    pub payout: Decimal,
    pub cost_basis: Decimal,
    pub price: Decimal,
    pub realized_pnl: Decimal,
}

/// One agent's settlements for one market as one transaction.
#[derive(Debug, Clone)]
pub struct SettlementUpdate {
    /// Post-settlement agent state (may have gone bankrupt).
    pub agent: Agent,
    pub market_id: i64,
    pub settlements: Vec<PositionSettlement>,
}

/// Transactional relational store for the benchmark ledger.
///
/// Point lookups by primary key, status/foreign-key filtered queries,
/// composite atomic mutations, monotonically ordered id generation.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // Cohorts and agents

    /// Create a cohort plus one agent per entry, atomically.
    async fn create_cohort(&self, cohort: NewCohort, agents: Vec<NewAgent>) -> Result<Cohort>;
    async fn cohort(&self, id: i64) -> Result<Option<Cohort>>;
    async fn latest_cohort(&self) -> Result<Option<Cohort>>;
    async fn active_cohorts(&self) -> Result<Vec<Cohort>>;
    async fn complete_cohort(&self, cohort_id: i64) -> Result<()>;
    async fn cohort_agents(&self, cohort_id: i64) -> Result<Vec<Agent>>;
    async fn agent(&self, id: i64) -> Result<Option<Agent>>;

    // Markets

    /// Insert or refresh a mirrored market. Never moves status backward:
    /// terminal rows keep their status, non-active rows ignore an
    /// `active` snapshot. An incoming terminal status is clamped to
    /// `closed` so settlement always runs before a row turns terminal;
    /// only [`update_market_status`](Self::update_market_status) writes
    /// `resolved` or `cancelled`.
    async fn upsert_market(&self, market: &MarketUpsert) -> Result<Market>;
    async fn market(&self, id: i64) -> Result<Option<Market>>;
    async fn market_by_source_id(&self, source_id: &str) -> Result<Option<Market>>;
    async fn markets_with_status(&self, status: MarketStatus) -> Result<Vec<Market>>;
    /// Forward-only status transition; false when the row was not in a
    /// valid predecessor status.
    async fn update_market_status(
        &self,
        market_id: i64,
        status: MarketStatus,
        winning_outcome: Option<&str>,
    ) -> Result<bool>;

    // Decisions

    async fn record_decision(&self, decision: NewDecision) -> Result<Decision>;
    async fn decision_count(&self, cohort_id: i64) -> Result<i64>;

    // Positions and trades

    async fn position(&self, id: i64) -> Result<Option<Position>>;
    async fn open_positions(&self, agent_id: i64) -> Result<Vec<Position>>;
    async fn open_positions_for_market(&self, market_id: i64) -> Result<Vec<Position>>;
    /// Open positions across all agents of a cohort.
    async fn open_position_count(&self, cohort_id: i64) -> Result<i64>;
    async fn buy_trades_for_market(&self, market_id: i64) -> Result<Vec<Trade>>;

    // Composite ledger mutations, one transaction each

    /// Persist a bet: agent balances + position upsert + BUY trade.
    /// Returns the stored position.
    async fn record_bet(&self, update: &BetUpdate) -> Result<Position>;
    /// Persist an agent's sell batch: agent balances + every position
    /// reduction + SELL trades.
    async fn record_sells(&self, update: &SellBatchUpdate) -> Result<()>;
    /// Persist one agent's settlements for one market: agent balances +
    /// position finalization + settlement trades (no decision link).
    async fn settle_positions(&self, update: &SettlementUpdate) -> Result<()>;
    /// Insert calibration scores, skipping trades already scored.
    /// Returns how many rows were actually inserted.
    async fn record_brier_scores(&self, records: &[NewBrierRecord]) -> Result<u64>;
}

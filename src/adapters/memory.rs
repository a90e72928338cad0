//! Functional in-memory [`LedgerStore`].
//!
//! Backs engine unit tests and the integration suite without a database.
//! Mirrors the Postgres adapter's semantics where they matter: sequential
//! ids, forward-only market status, calibration-score dedup. Lives
//! outside `#[cfg(test)]` so the `tests/` suites can reach it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::domain::{
    Agent, AgentStatus, BrierRecord, Cohort, CohortStatus, Decision, Market, MarketStatus,
    NewBrierRecord, NewDecision, NewTrade, Position, PositionStatus, Trade, TradeKind,
};
use crate::error::{Result, ToutError};
use crate::store::{
    BetUpdate, LedgerStore, MarketUpsert, NewAgent, NewCohort, PositionUpsert, SellBatchUpdate,
    SettlementUpdate,
};

#[derive(Default)]
struct MemoryState {
    cohorts: BTreeMap<i64, Cohort>,
    agents: BTreeMap<i64, Agent>,
    markets: BTreeMap<i64, Market>,
    decisions: BTreeMap<i64, Decision>,
    positions: BTreeMap<i64, Position>,
    trades: BTreeMap<i64, Trade>,
    brier_scores: BTreeMap<i64, BrierRecord>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn push_trade(&mut self, trade: NewTrade, at: DateTime<Utc>) -> Trade {
        let id = self.next_id();
        let stored = Trade {
            id,
            agent_id: trade.agent_id,
            market_id: trade.market_id,
            position_id: trade.position_id,
            decision_id: trade.decision_id,
            kind: trade.kind,
            side: trade.side,
            shares: trade.shares,
            price: trade.price,
            amount: trade.amount,
            implied_confidence: trade.implied_confidence,
            cost_basis_sold: trade.cost_basis_sold,
            realized_pnl: trade.realized_pnl,
            executed_at: at,
        };
        self.trades.insert(id, stored.clone());
        stored
    }

    fn store_position(&mut self, position: &Position, at: DateTime<Utc>) -> Position {
        let mut stored = position.clone();
        stored.updated_at = at;
        self.positions.insert(stored.id, stored.clone());
        stored
    }

    fn store_agent(&mut self, agent: &Agent, at: DateTime<Utc>) {
        let mut stored = agent.clone();
        stored.updated_at = at;
        self.agents.insert(stored.id, stored);
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every trade in insertion order; test inspection only.
    pub async fn trades(&self) -> Vec<Trade> {
        self.state.read().await.trades.values().cloned().collect()
    }

    /// Every decision in insertion order; test inspection only.
    pub async fn decisions(&self) -> Vec<Decision> {
        self.state.read().await.decisions.values().cloned().collect()
    }

    /// Every calibration record in insertion order; test inspection only.
    pub async fn brier_records(&self) -> Vec<BrierRecord> {
        self.state
            .read()
            .await
            .brier_scores
            .values()
            .cloned()
            .collect()
    }

    /// Overwrite one agent row in place; test seeding only.
    pub async fn put_agent(&self, agent: Agent) {
        self.state.write().await.agents.insert(agent.id, agent);
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn create_cohort(&self, cohort: NewCohort, agents: Vec<NewAgent>) -> Result<Cohort> {
        let mut state = self.state.write().await;

        if state
            .cohorts
            .values()
            .any(|c| c.sequence == cohort.sequence)
        {
            return Err(ToutError::Internal(format!(
                "duplicate cohort sequence {}",
                cohort.sequence
            )));
        }

        let now = Utc::now();
        let id = state.next_id();
        let created = Cohort {
            id,
            sequence: cohort.sequence,
            status: CohortStatus::Active,
            methodology: cohort.methodology,
            initial_balance: cohort.initial_balance,
            started_at: now,
            completed_at: None,
        };
        state.cohorts.insert(id, created.clone());

        for agent in agents {
            let agent_id = state.next_id();
            state.agents.insert(
                agent_id,
                Agent {
                    id: agent_id,
                    cohort_id: id,
                    model: agent.model,
                    display_name: agent.display_name,
                    cash_balance: created.initial_balance,
                    total_invested: Decimal::ZERO,
                    status: AgentStatus::Active,
                    updated_at: now,
                },
            );
        }

        Ok(created)
    }

    async fn cohort(&self, id: i64) -> Result<Option<Cohort>> {
        Ok(self.state.read().await.cohorts.get(&id).cloned())
    }

    async fn latest_cohort(&self) -> Result<Option<Cohort>> {
        Ok(self
            .state
            .read()
            .await
            .cohorts
            .values()
            .max_by_key(|c| c.sequence)
            .cloned())
    }

    async fn active_cohorts(&self) -> Result<Vec<Cohort>> {
        let mut cohorts: Vec<Cohort> = self
            .state
            .read()
            .await
            .cohorts
            .values()
            .filter(|c| c.is_active())
            .cloned()
            .collect();
        cohorts.sort_by_key(|c| c.sequence);
        Ok(cohorts)
    }

    async fn complete_cohort(&self, cohort_id: i64) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(cohort) = state.cohorts.get_mut(&cohort_id) {
            if cohort.status == CohortStatus::Active {
                cohort.status = CohortStatus::Completed;
                cohort.completed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn cohort_agents(&self, cohort_id: i64) -> Result<Vec<Agent>> {
        Ok(self
            .state
            .read()
            .await
            .agents
            .values()
            .filter(|a| a.cohort_id == cohort_id)
            .cloned()
            .collect())
    }

    async fn agent(&self, id: i64) -> Result<Option<Agent>> {
        Ok(self.state.read().await.agents.get(&id).cloned())
    }

    async fn upsert_market(&self, market: &MarketUpsert) -> Result<Market> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        // Terminal statuses are written only by update_market_status, after
        // settlement; a source-terminal market enters the mirror as closed
        // and waits for the resolution sweep.
        let incoming = match market.status {
            MarketStatus::Resolved | MarketStatus::Cancelled => MarketStatus::Closed,
            other => other,
        };

        if let Some(existing) = state
            .markets
            .values_mut()
            .find(|m| m.source_id == market.source_id)
        {
            existing.question = market.question.clone();
            existing.category = market.category.clone();
            existing.kind = market.kind;
            existing.yes_price = market.yes_price;
            existing.outcome_prices = market.outcome_prices.clone();
            existing.volume = market.volume;
            let keep = existing.status.is_terminal()
                || (existing.status == MarketStatus::Closed && incoming == MarketStatus::Active);
            if !keep {
                existing.status = incoming;
            }
            existing.close_time = market.close_time;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let id = state.next_id();
        let stored = Market {
            id,
            source_id: market.source_id.clone(),
            question: market.question.clone(),
            category: market.category.clone(),
            kind: market.kind,
            yes_price: market.yes_price,
            outcome_prices: market.outcome_prices.clone(),
            volume: market.volume,
            status: incoming,
            close_time: market.close_time,
            winning_outcome: None,
            updated_at: now,
        };
        state.markets.insert(id, stored.clone());
        Ok(stored)
    }

    async fn market(&self, id: i64) -> Result<Option<Market>> {
        Ok(self.state.read().await.markets.get(&id).cloned())
    }

    async fn market_by_source_id(&self, source_id: &str) -> Result<Option<Market>> {
        Ok(self
            .state
            .read()
            .await
            .markets
            .values()
            .find(|m| m.source_id == source_id)
            .cloned())
    }

    async fn markets_with_status(&self, status: MarketStatus) -> Result<Vec<Market>> {
        let mut markets: Vec<Market> = self
            .state
            .read()
            .await
            .markets
            .values()
            .filter(|m| m.status == status)
            .cloned()
            .collect();
        markets.sort_by(|a, b| b.volume.cmp(&a.volume).then(a.id.cmp(&b.id)));
        Ok(markets)
    }

    async fn update_market_status(
        &self,
        market_id: i64,
        status: MarketStatus,
        winning_outcome: Option<&str>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(market) = state.markets.get_mut(&market_id) else {
            return Ok(false);
        };
        if !market.status.can_transition_to(status) {
            return Ok(false);
        }

        market.status = status;
        if let Some(outcome) = winning_outcome {
            market.winning_outcome = Some(outcome.to_string());
        }
        market.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_decision(&self, decision: NewDecision) -> Result<Decision> {
        let mut state = self.state.write().await;
        let id = state.next_id();
        let stored = Decision {
            id,
            run_id: decision.run_id,
            agent_id: decision.agent_id,
            cohort_id: decision.cohort_id,
            system_prompt: decision.system_prompt,
            user_prompt: decision.user_prompt,
            raw_response: decision.raw_response,
            parsed: decision.parsed,
            action: decision.action,
            origin: decision.origin,
            retries: decision.retries,
            error: decision.error,
            prompt_tokens: decision.prompt_tokens,
            completion_tokens: decision.completion_tokens,
            cost_usd: decision.cost_usd,
            latency_ms: decision.latency_ms,
            created_at: Utc::now(),
        };
        state.decisions.insert(id, stored.clone());
        Ok(stored)
    }

    async fn decision_count(&self, cohort_id: i64) -> Result<i64> {
        Ok(self
            .state
            .read()
            .await
            .decisions
            .values()
            .filter(|d| d.cohort_id == cohort_id)
            .count() as i64)
    }

    async fn position(&self, id: i64) -> Result<Option<Position>> {
        Ok(self.state.read().await.positions.get(&id).cloned())
    }

    async fn open_positions(&self, agent_id: i64) -> Result<Vec<Position>> {
        Ok(self
            .state
            .read()
            .await
            .positions
            .values()
            .filter(|p| p.agent_id == agent_id && p.is_open())
            .cloned()
            .collect())
    }

    async fn open_positions_for_market(&self, market_id: i64) -> Result<Vec<Position>> {
        Ok(self
            .state
            .read()
            .await
            .positions
            .values()
            .filter(|p| p.market_id == market_id && p.is_open())
            .cloned()
            .collect())
    }

    async fn open_position_count(&self, cohort_id: i64) -> Result<i64> {
        let state = self.state.read().await;
        let agent_ids: HashMap<i64, ()> = state
            .agents
            .values()
            .filter(|a| a.cohort_id == cohort_id)
            .map(|a| (a.id, ()))
            .collect();
        Ok(state
            .positions
            .values()
            .filter(|p| p.is_open() && agent_ids.contains_key(&p.agent_id))
            .count() as i64)
    }

    async fn buy_trades_for_market(&self, market_id: i64) -> Result<Vec<Trade>> {
        Ok(self
            .state
            .read()
            .await
            .trades
            .values()
            .filter(|t| t.market_id == market_id && t.kind == TradeKind::Buy)
            .cloned()
            .collect())
    }

    async fn record_bet(&self, update: &BetUpdate) -> Result<Position> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        state.store_agent(&update.agent, now);

        let position = match &update.position {
            PositionUpsert::Existing(position) => state.store_position(position, now),
            PositionUpsert::New(new) => {
                let id = state.next_id();
                let stored = Position {
                    id,
                    agent_id: new.agent_id,
                    market_id: new.market_id,
                    side: new.side.clone(),
                    shares: new.shares,
                    avg_entry_price: new.avg_entry_price,
                    cost_basis: new.cost_basis,
                    current_value: None,
                    status: PositionStatus::Open,
                    opened_at: now,
                    updated_at: now,
                };
                state.positions.insert(id, stored.clone());
                stored
            }
        };

        state.push_trade(
            NewTrade {
                agent_id: update.agent.id,
                market_id: position.market_id,
                position_id: position.id,
                decision_id: update.decision_id,
                kind: TradeKind::Buy,
                side: update.side.clone(),
                shares: update.shares,
                price: update.price,
                amount: update.amount,
                implied_confidence: update.implied_confidence,
                cost_basis_sold: None,
                realized_pnl: None,
            },
            now,
        );

        Ok(position)
    }

    async fn record_sells(&self, update: &SellBatchUpdate) -> Result<()> {
        if update.sells.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().await;
        let now = Utc::now();

        state.store_agent(&update.agent, now);

        for sell in &update.sells {
            state.store_position(&sell.position, now);
            state.push_trade(
                NewTrade {
                    agent_id: update.agent.id,
                    market_id: sell.position.market_id,
                    position_id: sell.position.id,
                    decision_id: update.decision_id,
                    kind: TradeKind::Sell,
                    side: sell.position.side.clone(),
                    shares: sell.shares_sold,
                    price: sell.price,
                    amount: sell.proceeds,
                    implied_confidence: None,
                    cost_basis_sold: Some(sell.cost_basis_sold),
                    realized_pnl: Some(sell.realized_pnl),
                },
                now,
            );
        }

        Ok(())
    }

    async fn settle_positions(&self, update: &SettlementUpdate) -> Result<()> {
        if update.settlements.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().await;
        let now = Utc::now();

        state.store_agent(&update.agent, now);

        for settlement in &update.settlements {
            state.store_position(&settlement.position, now);
            state.push_trade(
                NewTrade {
                    agent_id: update.agent.id,
                    market_id: update.market_id,
                    position_id: settlement.position.id,
                    decision_id: None,
                    kind: TradeKind::Sell,
                    side: settlement.position.side.clone(),
                    shares: settlement.shares,
                    price: settlement.price,
                    amount: settlement.payout,
                    implied_confidence: None,
                    cost_basis_sold: Some(settlement.cost_basis),
                    realized_pnl: Some(settlement.realized_pnl),
                },
                now,
            );
        }

        Ok(())
    }

    async fn record_brier_scores(&self, records: &[NewBrierRecord]) -> Result<u64> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut inserted = 0u64;

        for record in records {
            let already = state
                .brier_scores
                .values()
                .any(|b| b.trade_id == record.trade_id);
            if already {
                continue;
            }

            let id = state.next_id();
            state.brier_scores.insert(
                id,
                BrierRecord {
                    id,
                    trade_id: record.trade_id,
                    agent_id: record.agent_id,
                    market_id: record.market_id,
                    forecast: record.forecast,
                    side_won: record.side_won,
                    score: record.score,
                    created_at: now,
                },
            );
            inserted += 1;
        }

        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market_upsert(source_id: &str, status: MarketStatus) -> MarketUpsert {
        MarketUpsert {
            source_id: source_id.to_string(),
            question: "Will it happen?".to_string(),
            category: None,
            kind: crate::domain::MarketKind::Binary,
            yes_price: Some(dec!(0.40)),
            outcome_prices: HashMap::new(),
            volume: dec!(1000),
            status,
            close_time: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_never_moves_status_backward() {
        let store = MemoryStore::new();

        let market = store
            .upsert_market(&market_upsert("mkt-1", MarketStatus::Active))
            .await
            .unwrap();
        assert!(store
            .update_market_status(market.id, MarketStatus::Resolved, Some("Yes"))
            .await
            .unwrap());

        // A later active snapshot must not reopen the resolved row.
        let after = store
            .upsert_market(&market_upsert("mkt-1", MarketStatus::Active))
            .await
            .unwrap();
        assert_eq!(after.id, market.id);
        assert_eq!(after.status, MarketStatus::Resolved);
        assert_eq!(after.winning_outcome.as_deref(), Some("Yes"));
    }

    #[tokio::test]
    async fn test_upsert_clamps_terminal_statuses_to_closed() {
        let store = MemoryStore::new();

        // A source-resolved market waits in closed until the resolution
        // sweep settles it; only update_market_status writes terminal rows.
        let market = store
            .upsert_market(&market_upsert("mkt-1", MarketStatus::Resolved))
            .await
            .unwrap();
        assert_eq!(market.status, MarketStatus::Closed);

        store
            .upsert_market(&market_upsert("mkt-2", MarketStatus::Active))
            .await
            .unwrap();
        let updated = store
            .upsert_market(&market_upsert("mkt-2", MarketStatus::Cancelled))
            .await
            .unwrap();
        assert_eq!(updated.status, MarketStatus::Closed);
    }

    #[tokio::test]
    async fn test_update_market_status_rejects_invalid_transition() {
        let store = MemoryStore::new();
        let market = store
            .upsert_market(&market_upsert("mkt-1", MarketStatus::Active))
            .await
            .unwrap();

        assert!(store
            .update_market_status(market.id, MarketStatus::Cancelled, None)
            .await
            .unwrap());
        assert!(!store
            .update_market_status(market.id, MarketStatus::Resolved, Some("Yes"))
            .await
            .unwrap());
        assert!(!store
            .update_market_status(9999, MarketStatus::Closed, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_create_cohort_seeds_agents() {
        let store = MemoryStore::new();
        let cohort = store
            .create_cohort(
                NewCohort {
                    sequence: 1,
                    methodology: "v1".to_string(),
                    initial_balance: dec!(10000),
                },
                vec![
                    NewAgent {
                        model: "a/one".to_string(),
                        display_name: "One".to_string(),
                    },
                    NewAgent {
                        model: "b/two".to_string(),
                        display_name: "Two".to_string(),
                    },
                ],
            )
            .await
            .unwrap();

        let agents = store.cohort_agents(cohort.id).await.unwrap();
        assert_eq!(agents.len(), 2);
        assert!(agents.iter().all(|a| a.cash_balance == dec!(10000)));
        assert!(agents.iter().all(|a| a.total_invested == dec!(0)));

        let dup = store
            .create_cohort(
                NewCohort {
                    sequence: 1,
                    methodology: "v1".to_string(),
                    initial_balance: dec!(10000),
                },
                vec![],
            )
            .await;
        assert!(dup.is_err());
    }

    #[tokio::test]
    async fn test_brier_scores_dedup_by_trade() {
        let store = MemoryStore::new();
        let record = NewBrierRecord {
            trade_id: 7,
            agent_id: 1,
            market_id: 1,
            forecast: dec!(0.20),
            side_won: true,
            score: dec!(0.64),
        };

        assert_eq!(store.record_brier_scores(&[record.clone()]).await.unwrap(), 1);
        assert_eq!(store.record_brier_scores(&[record]).await.unwrap(), 0);
        assert_eq!(store.brier_records().await.len(), 1);
    }
}

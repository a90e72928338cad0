//! Market resolution and settlement.
//!
//! The sweep closes expired markets, polls the source for each closed
//! one, and settles or refunds the open positions of whatever resolved.
//! A market's terminal status is written only after its positions and
//! calibration scores are in, so an aborted sweep resumes cleanly: still
//! open positions get settled on the next pass and score inserts dedup
//! on the trade id.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::config::BenchmarkConfig;
use crate::domain::{Market, MarketStatus, NewBrierRecord, Position};
use crate::error::Result;
use crate::feed::{MarketFeed, SourceStatus};
use crate::scoring;
use crate::store::{LedgerStore, PositionSettlement, SettlementUpdate};

/// What one resolution sweep did.
#[derive(Debug, Clone, Default)]
pub struct ResolutionSummary {
    pub markets_closed: u64,
    pub markets_checked: usize,
    pub markets_resolved: usize,
    pub markets_cancelled: usize,
    /// Poll failures and unusable source records, retried next sweep.
    pub markets_skipped: usize,
    pub positions_settled: usize,
    pub scores_recorded: u64,
    /// BUY trades left unscored for missing or out-of-range confidence.
    pub scores_skipped: u64,
}

struct ScoreCounts {
    recorded: u64,
    skipped: u64,
}

pub struct ResolutionEngine {
    store: Arc<dyn LedgerStore>,
    feed: Arc<dyn MarketFeed>,
    poll_pacing: Duration,
}

impl ResolutionEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        feed: Arc<dyn MarketFeed>,
        config: &BenchmarkConfig,
    ) -> Self {
        Self {
            store,
            feed,
            poll_pacing: config.poll_pacing(),
        }
    }

    /// One full sweep: close expired markets, then poll every closed
    /// market and settle what the source has resolved.
    ///
    /// Per-market poll failures are logged and skipped; the market stays
    /// closed and the next sweep retries it.
    pub async fn run_sweep(&self) -> Result<ResolutionSummary> {
        let mut summary = ResolutionSummary {
            markets_closed: self.close_expired_markets().await?,
            ..Default::default()
        };

        let closed = self.store.markets_with_status(MarketStatus::Closed).await?;
        summary.markets_checked = closed.len();

        for (i, market) in closed.iter().enumerate() {
            if i > 0 {
                sleep(self.poll_pacing).await;
            }

            let snapshot = match self.feed.market(&market.source_id).await {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => {
                    warn!(
                        source_id = %market.source_id,
                        "Source no longer lists market; leaving closed"
                    );
                    summary.markets_skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(
                        source_id = %market.source_id,
                        error = %e,
                        "Market poll failed; will retry next sweep"
                    );
                    summary.markets_skipped += 1;
                    continue;
                }
            };

            match snapshot.status {
                SourceStatus::Resolved => {
                    let Some(outcome) = snapshot.winning_outcome.as_deref() else {
                        warn!(
                            source_id = %market.source_id,
                            "Source reports resolved without a winning outcome; skipping"
                        );
                        summary.markets_skipped += 1;
                        continue;
                    };
                    let (settled, scores) = self.settle_market(market, outcome).await?;
                    summary.markets_resolved += 1;
                    summary.positions_settled += settled;
                    summary.scores_recorded += scores.recorded;
                    summary.scores_skipped += scores.skipped;
                }
                SourceStatus::Cancelled => {
                    let refunded = self.cancel_market(market).await?;
                    summary.markets_cancelled += 1;
                    summary.positions_settled += refunded;
                }
                SourceStatus::Active | SourceStatus::Closed => {
                    debug!(source_id = %market.source_id, "Market not yet resolved");
                }
            }
        }

        info!(
            closed = summary.markets_closed,
            checked = summary.markets_checked,
            resolved = summary.markets_resolved,
            cancelled = summary.markets_cancelled,
            skipped = summary.markets_skipped,
            positions = summary.positions_settled,
            scores = summary.scores_recorded,
            scores_skipped = summary.scores_skipped,
            "Resolution sweep complete"
        );
        Ok(summary)
    }

    /// Move every active market whose close time has passed to closed,
    /// making it eligible for resolution polling.
    pub async fn close_expired_markets(&self) -> Result<u64> {
        let now = Utc::now();
        let mut closed = 0u64;

        for market in self.store.markets_with_status(MarketStatus::Active).await? {
            if !market.is_past_close(now) {
                continue;
            }
            if self
                .store
                .update_market_status(market.id, MarketStatus::Closed, None)
                .await?
            {
                debug!(
                    market_id = market.id,
                    source_id = %market.source_id,
                    "Market past close time; marked closed"
                );
                closed += 1;
            }
        }

        Ok(closed)
    }

    /// Settle a resolved market: pay out every open position at $1 per
    /// winning share, score every BUY forecast, then mark the market
    /// resolved. Returns positions settled plus the score counts.
    async fn settle_market(&self, market: &Market, outcome: &str) -> Result<(usize, ScoreCounts)> {
        let mut settled = 0usize;

        for (agent_id, positions) in self.open_positions_by_agent(market.id).await? {
            let Some(mut agent) = self.store.agent(agent_id).await? else {
                warn!(
                    agent_id,
                    market_id = market.id,
                    "Open position references missing agent; skipping group"
                );
                continue;
            };

            let mut settlements = Vec::with_capacity(positions.len());
            for position in positions {
                let payout = scoring::settlement_value(position.shares, &position.side, outcome);
                let price = if position.side.matches_outcome(outcome) {
                    Decimal::ONE
                } else {
                    Decimal::ZERO
                };
                let shares = position.shares;
                let cost_basis = position.cost_basis;
                let realized_pnl = payout - cost_basis;

                let mut finalized = position;
                finalized.settle();
                agent.apply_ledger_update(payout, -cost_basis);

                settlements.push(PositionSettlement {
                    position: finalized,
                    shares,
                    payout,
                    cost_basis,
                    price,
                    realized_pnl,
                });
            }

            settled += settlements.len();
            self.store
                .settle_positions(&SettlementUpdate {
                    agent,
                    market_id: market.id,
                    settlements,
                })
                .await?;
        }

        let scores = self.score_forecasts(market, outcome).await?;

        if !self
            .store
            .update_market_status(market.id, MarketStatus::Resolved, Some(outcome))
            .await?
        {
            warn!(market_id = market.id, "Market already left closed status");
        }

        info!(
            market_id = market.id,
            source_id = %market.source_id,
            winning_outcome = outcome,
            positions = settled,
            scores = scores.recorded,
            "Market resolved"
        );
        Ok((settled, scores))
    }

    /// Refund a cancelled market: every open position pays back its cost
    /// basis, no gain, no loss, no calibration scores.
    async fn cancel_market(&self, market: &Market) -> Result<usize> {
        let mut refunded = 0usize;

        for (agent_id, positions) in self.open_positions_by_agent(market.id).await? {
            let Some(mut agent) = self.store.agent(agent_id).await? else {
                warn!(
                    agent_id,
                    market_id = market.id,
                    "Open position references missing agent; skipping group"
                );
                continue;
            };

            let mut settlements = Vec::with_capacity(positions.len());
            for position in positions {
                let refund = position.cost_basis;
                let shares = position.shares;
                let price = position.avg_entry_price;

                let mut finalized = position;
                finalized.reduce(shares, refund);
                agent.apply_ledger_update(refund, -refund);

                settlements.push(PositionSettlement {
                    position: finalized,
                    shares,
                    payout: refund,
                    cost_basis: refund,
                    price,
                    realized_pnl: Decimal::ZERO,
                });
            }

            refunded += settlements.len();
            self.store
                .settle_positions(&SettlementUpdate {
                    agent,
                    market_id: market.id,
                    settlements,
                })
                .await?;
        }

        if !self
            .store
            .update_market_status(market.id, MarketStatus::Cancelled, None)
            .await?
        {
            warn!(market_id = market.id, "Market already left closed status");
        }

        info!(
            market_id = market.id,
            source_id = %market.source_id,
            positions = refunded,
            "Market cancelled; positions refunded at cost"
        );
        Ok(refunded)
    }

    /// One calibration score per BUY trade on the market. Trades without
    /// a usable implied confidence are logged and skipped, never scored.
    async fn score_forecasts(&self, market: &Market, outcome: &str) -> Result<ScoreCounts> {
        let trades = self.store.buy_trades_for_market(market.id).await?;
        let mut records = Vec::with_capacity(trades.len());
        let mut skipped = 0u64;

        for trade in &trades {
            let Some(confidence) = trade.implied_confidence else {
                warn!(
                    trade_id = trade.id,
                    "BUY trade carries no implied confidence; skipping calibration score"
                );
                skipped += 1;
                continue;
            };
            if confidence < Decimal::ZERO || confidence > Decimal::ONE {
                warn!(
                    trade_id = trade.id,
                    confidence = %confidence,
                    "Implied confidence out of range; skipping calibration score"
                );
                skipped += 1;
                continue;
            }

            records.push(NewBrierRecord {
                trade_id: trade.id,
                agent_id: trade.agent_id,
                market_id: trade.market_id,
                forecast: confidence,
                side_won: trade.side.matches_outcome(outcome),
                score: scoring::brier_score(confidence, &trade.side, outcome),
            });
        }

        let recorded = self.store.record_brier_scores(&records).await?;
        Ok(ScoreCounts { recorded, skipped })
    }

    async fn open_positions_by_agent(
        &self,
        market_id: i64,
    ) -> Result<BTreeMap<i64, Vec<Position>>> {
        let mut by_agent: BTreeMap<i64, Vec<Position>> = BTreeMap::new();
        for position in self.store.open_positions_for_market(market_id).await? {
            by_agent.entry(position.agent_id).or_default().push(position);
        }
        Ok(by_agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::domain::{
        AgentStatus, BetInstruction, BetLimits, MarketKind, PositionStatus, Side, TradeKind,
    };
    use crate::engine::ExecutionEngine;
    use crate::error::ToutError;
    use crate::feed::SourceMarket;
    use crate::store::{MarketUpsert, NewAgent, NewCohort};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;
    use std::collections::{HashMap, HashSet};

    /// Scripted market source: fixed snapshots per id, optional failures.
    #[derive(Default)]
    struct StubFeed {
        markets: HashMap<String, SourceMarket>,
        failing: HashSet<String>,
    }

    impl StubFeed {
        fn with(mut self, snapshot: SourceMarket) -> Self {
            self.markets.insert(snapshot.source_id.clone(), snapshot);
            self
        }

        fn failing_on(mut self, source_id: &str) -> Self {
            self.failing.insert(source_id.to_string());
            self
        }
    }

    #[async_trait]
    impl MarketFeed for StubFeed {
        async fn top_markets(&self, _limit: usize) -> Result<Vec<SourceMarket>> {
            Ok(self.markets.values().cloned().collect())
        }

        async fn market(&self, source_id: &str) -> Result<Option<SourceMarket>> {
            if self.failing.contains(source_id) {
                return Err(ToutError::Feed(format!("poll failed for {}", source_id)));
            }
            Ok(self.markets.get(source_id).cloned())
        }
    }

    fn snapshot(source_id: &str, status: SourceStatus, winner: Option<&str>) -> SourceMarket {
        SourceMarket {
            source_id: source_id.to_string(),
            question: format!("Question for {}?", source_id),
            category: None,
            kind: MarketKind::Binary,
            yes_price: Some(dec!(0.40)),
            outcome_prices: HashMap::new(),
            volume: dec!(50000),
            close_time: None,
            status,
            winning_outcome: winner.map(|w| w.to_string()),
        }
    }

    fn benchmark_config() -> BenchmarkConfig {
        BenchmarkConfig {
            poll_pacing_ms: 0,
            ..Default::default()
        }
    }

    fn resolution(store: &Arc<MemoryStore>, feed: StubFeed) -> ResolutionEngine {
        ResolutionEngine::new(store.clone(), Arc::new(feed), &benchmark_config())
    }

    async fn seed_agent(store: &MemoryStore) -> crate::domain::Agent {
        let cohort = store
            .create_cohort(
                NewCohort {
                    sequence: 1,
                    methodology: "v1".to_string(),
                    initial_balance: dec!(10000),
                },
                vec![NewAgent {
                    model: "openai/gpt-4o".to_string(),
                    display_name: "GPT-4o".to_string(),
                }],
            )
            .await
            .unwrap();
        store.cohort_agents(cohort.id).await.unwrap().remove(0)
    }

    async fn seed_market(store: &MemoryStore, source_id: &str, status: crate::domain::MarketStatus) {
        store
            .upsert_market(&MarketUpsert {
                source_id: source_id.to_string(),
                question: format!("Question for {}?", source_id),
                category: None,
                kind: MarketKind::Binary,
                yes_price: Some(dec!(0.40)),
                outcome_prices: HashMap::new(),
                volume: dec!(50000),
                status,
                close_time: None,
            })
            .await
            .unwrap();
    }

    async fn place_bet(
        store: &Arc<MemoryStore>,
        agent_id: i64,
        source_id: &str,
        side: Side,
        amount: Decimal,
    ) -> crate::engine::BetReceipt {
        let engine = ExecutionEngine::new(
            store.clone(),
            BetLimits {
                min_bet: dec!(1),
                max_bet_fraction: dec!(0.25),
            },
        );
        engine
            .execute_bet(
                agent_id,
                &BetInstruction {
                    market_id: source_id.to_string(),
                    side,
                    amount,
                },
                // Dummy decision id so the settlement trade written by the
                // sweep is the only trade without one.
                Some(1),
            )
            .await
            .unwrap()
    }

    async fn close_market(store: &MemoryStore, source_id: &str) {
        let market = store.market_by_source_id(source_id).await.unwrap().unwrap();
        assert!(store
            .update_market_status(market.id, MarketStatus::Closed, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_close_expired_markets_only_past_close() {
        let store = Arc::new(MemoryStore::new());
        let past = Utc::now() - ChronoDuration::hours(1);
        let future = Utc::now() + ChronoDuration::hours(1);

        for (source_id, close_time) in [("expired", past), ("running", future)] {
            store
                .upsert_market(&MarketUpsert {
                    source_id: source_id.to_string(),
                    question: "Q?".to_string(),
                    category: None,
                    kind: MarketKind::Binary,
                    yes_price: Some(dec!(0.50)),
                    outcome_prices: HashMap::new(),
                    volume: dec!(1000),
                    status: MarketStatus::Active,
                    close_time: Some(close_time),
                })
                .await
                .unwrap();
        }

        let engine = resolution(&store, StubFeed::default());
        assert_eq!(engine.close_expired_markets().await.unwrap(), 1);

        let expired = store.market_by_source_id("expired").await.unwrap().unwrap();
        assert_eq!(expired.status, MarketStatus::Closed);
        let running = store.market_by_source_id("running").await.unwrap().unwrap();
        assert_eq!(running.status, MarketStatus::Active);
    }

    #[tokio::test]
    async fn test_resolution_pays_winning_position() {
        let store = Arc::new(MemoryStore::new());
        let agent = seed_agent(&store).await;
        seed_market(&store, "mkt-1", MarketStatus::Active).await;
        let receipt = place_bet(&store, agent.id, "mkt-1", Side::Yes, dec!(500)).await;
        close_market(&store, "mkt-1").await;

        let feed = StubFeed::default().with(snapshot("mkt-1", SourceStatus::Resolved, Some("Yes")));
        let summary = resolution(&store, feed).run_sweep().await.unwrap();

        assert_eq!(summary.markets_resolved, 1);
        assert_eq!(summary.positions_settled, 1);
        assert_eq!(summary.scores_recorded, 1);

        let after = store.agent(agent.id).await.unwrap().unwrap();
        assert_eq!(after.cash_balance, dec!(10750));
        assert_eq!(after.total_invested, dec!(0));
        assert_eq!(after.status, AgentStatus::Active);

        let position = store.position(receipt.position.id).await.unwrap().unwrap();
        assert_eq!(position.status, PositionStatus::Settled);
        assert_eq!(position.shares, dec!(0));

        let market = store.market_by_source_id("mkt-1").await.unwrap().unwrap();
        assert_eq!(market.status, MarketStatus::Resolved);
        assert_eq!(market.winning_outcome.as_deref(), Some("Yes"));

        let trades = store.trades().await;
        let settlement = trades.iter().find(|t| t.decision_id.is_none()).unwrap();
        assert_eq!(settlement.kind, TradeKind::Sell);
        assert_eq!(settlement.amount, dec!(1250));
        assert_eq!(settlement.realized_pnl, Some(dec!(750)));

        let scores = store.brier_records().await;
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].forecast, dec!(0.20));
        assert!(scores[0].side_won);
        assert_eq!(scores[0].score, dec!(0.64));
    }

    #[tokio::test]
    async fn test_resolution_wipes_losing_position() {
        let store = Arc::new(MemoryStore::new());
        let agent = seed_agent(&store).await;
        seed_market(&store, "mkt-1", MarketStatus::Active).await;
        place_bet(&store, agent.id, "mkt-1", Side::Yes, dec!(500)).await;
        close_market(&store, "mkt-1").await;

        let feed = StubFeed::default().with(snapshot("mkt-1", SourceStatus::Resolved, Some("No")));
        resolution(&store, feed).run_sweep().await.unwrap();

        let after = store.agent(agent.id).await.unwrap().unwrap();
        assert_eq!(after.cash_balance, dec!(9500));
        assert_eq!(after.total_invested, dec!(0));
        assert_eq!(after.status, AgentStatus::Active);

        let scores = store.brier_records().await;
        assert!(!scores[0].side_won);
        assert_eq!(scores[0].score, dec!(0.04));
    }

    #[tokio::test]
    async fn test_cancelled_market_refunds_cost_basis() {
        let store = Arc::new(MemoryStore::new());
        let agent = seed_agent(&store).await;
        seed_market(&store, "mkt-1", MarketStatus::Active).await;
        let receipt = place_bet(&store, agent.id, "mkt-1", Side::Yes, dec!(500)).await;
        close_market(&store, "mkt-1").await;

        let feed = StubFeed::default().with(snapshot("mkt-1", SourceStatus::Cancelled, None));
        let summary = resolution(&store, feed).run_sweep().await.unwrap();

        assert_eq!(summary.markets_cancelled, 1);
        assert_eq!(summary.positions_settled, 1);
        assert_eq!(summary.scores_recorded, 0);

        let after = store.agent(agent.id).await.unwrap().unwrap();
        assert_eq!(after.cash_balance, dec!(10000));
        assert_eq!(after.total_invested, dec!(0));

        let position = store.position(receipt.position.id).await.unwrap().unwrap();
        assert_eq!(position.status, PositionStatus::Closed);

        let trades = store.trades().await;
        let refund = trades.iter().find(|t| t.decision_id.is_none()).unwrap();
        assert_eq!(refund.amount, dec!(500));
        assert_eq!(refund.realized_pnl, Some(dec!(0)));

        assert!(store.brier_records().await.is_empty());
        let market = store.market_by_source_id("mkt-1").await.unwrap().unwrap();
        assert_eq!(market.status, MarketStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_agent_goes_bankrupt_when_everything_is_lost() {
        let store = Arc::new(MemoryStore::new());
        let agent = seed_agent(&store).await;
        seed_market(&store, "mkt-1", MarketStatus::Active).await;

        // Four max-fraction bets deploy most of the bankroll; drain the
        // rest with one more ledger-level fill so cash hits exactly zero.
        let mut cash = dec!(10000);
        for _ in 0..4 {
            let amount = cash * dec!(0.25);
            place_bet(&store, agent.id, "mkt-1", Side::Yes, amount).await;
            cash -= amount;
        }
        let remainder = store.agent(agent.id).await.unwrap().unwrap();
        assert!(remainder.cash_balance > dec!(0));

        let mut drained = remainder.clone();
        let rest = drained.cash_balance;
        drained.apply_ledger_update(-rest, rest);
        let open = store.open_positions(agent.id).await.unwrap().remove(0);
        let mut merged = open.clone();
        merged.merge_fill(rest / dec!(0.40), rest);
        store
            .record_bet(&crate::store::BetUpdate {
                agent: drained,
                position: crate::store::PositionUpsert::Existing(merged),
                decision_id: None,
                side: Side::Yes,
                shares: rest / dec!(0.40),
                price: dec!(0.40),
                amount: rest,
                implied_confidence: Some(dec!(1)),
            })
            .await
            .unwrap();

        close_market(&store, "mkt-1").await;
        let feed = StubFeed::default().with(snapshot("mkt-1", SourceStatus::Resolved, Some("No")));
        resolution(&store, feed).run_sweep().await.unwrap();

        let after = store.agent(agent.id).await.unwrap().unwrap();
        assert_eq!(after.cash_balance, dec!(0));
        assert_eq!(after.total_invested, dec!(0));
        assert_eq!(after.status, AgentStatus::Bankrupt);
    }

    #[tokio::test]
    async fn test_sweep_continues_past_feed_failures() {
        let store = Arc::new(MemoryStore::new());
        let agent = seed_agent(&store).await;
        seed_market(&store, "mkt-ok", MarketStatus::Active).await;
        seed_market(&store, "mkt-down", MarketStatus::Active).await;
        place_bet(&store, agent.id, "mkt-ok", Side::Yes, dec!(100)).await;
        place_bet(&store, agent.id, "mkt-down", Side::Yes, dec!(100)).await;
        close_market(&store, "mkt-ok").await;
        close_market(&store, "mkt-down").await;

        let feed = StubFeed::default()
            .with(snapshot("mkt-ok", SourceStatus::Resolved, Some("Yes")))
            .failing_on("mkt-down");
        let summary = resolution(&store, feed).run_sweep().await.unwrap();

        assert_eq!(summary.markets_checked, 2);
        assert_eq!(summary.markets_resolved, 1);
        assert_eq!(summary.markets_skipped, 1);

        let down = store.market_by_source_id("mkt-down").await.unwrap().unwrap();
        assert_eq!(down.status, MarketStatus::Closed);
        let ok = store.market_by_source_id("mkt-ok").await.unwrap().unwrap();
        assert_eq!(ok.status, MarketStatus::Resolved);
    }

    #[tokio::test]
    async fn test_unresolved_market_left_alone() {
        let store = Arc::new(MemoryStore::new());
        let agent = seed_agent(&store).await;
        seed_market(&store, "mkt-1", MarketStatus::Active).await;
        place_bet(&store, agent.id, "mkt-1", Side::Yes, dec!(100)).await;
        close_market(&store, "mkt-1").await;

        let feed = StubFeed::default().with(snapshot("mkt-1", SourceStatus::Closed, None));
        let summary = resolution(&store, feed).run_sweep().await.unwrap();

        assert_eq!(summary.markets_resolved, 0);
        assert_eq!(store.open_positions(agent.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scores_skip_unusable_confidence() {
        let store = Arc::new(MemoryStore::new());
        let agent = seed_agent(&store).await;
        seed_market(&store, "mkt-1", MarketStatus::Active).await;
        place_bet(&store, agent.id, "mkt-1", Side::Yes, dec!(500)).await;

        // A second fill recorded without confidence, as corrupted history.
        let market = store.market_by_source_id("mkt-1").await.unwrap().unwrap();
        let mut holder = store.agent(agent.id).await.unwrap().unwrap();
        holder.apply_ledger_update(dec!(-40), dec!(40));
        let open = store.open_positions(agent.id).await.unwrap().remove(0);
        let mut merged = open.clone();
        merged.merge_fill(dec!(100), dec!(40));
        store
            .record_bet(&crate::store::BetUpdate {
                agent: holder,
                position: crate::store::PositionUpsert::Existing(merged),
                decision_id: None,
                side: Side::Yes,
                shares: dec!(100),
                price: dec!(0.40),
                amount: dec!(40),
                implied_confidence: None,
            })
            .await
            .unwrap();
        assert_eq!(store.buy_trades_for_market(market.id).await.unwrap().len(), 2);

        close_market(&store, "mkt-1").await;
        let feed = StubFeed::default().with(snapshot("mkt-1", SourceStatus::Resolved, Some("Yes")));
        let summary = resolution(&store, feed).run_sweep().await.unwrap();

        assert_eq!(summary.scores_recorded, 1);
        assert_eq!(summary.scores_skipped, 1);
        assert_eq!(store.brier_records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_resolution_is_idempotent_across_sweeps() {
        let store = Arc::new(MemoryStore::new());
        let agent = seed_agent(&store).await;
        seed_market(&store, "mkt-1", MarketStatus::Active).await;
        place_bet(&store, agent.id, "mkt-1", Side::Yes, dec!(500)).await;
        close_market(&store, "mkt-1").await;

        let feed = StubFeed::default().with(snapshot("mkt-1", SourceStatus::Resolved, Some("Yes")));
        let engine = resolution(&store, feed);
        engine.run_sweep().await.unwrap();

        // Resolved markets are out of the closed set; nothing re-settles.
        let again = engine.run_sweep().await.unwrap();
        assert_eq!(again.markets_checked, 0);
        assert_eq!(store.brier_records().await.len(), 1);

        let after = store.agent(agent.id).await.unwrap().unwrap();
        assert_eq!(after.cash_balance, dec!(10750));
    }
}

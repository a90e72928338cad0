//! PostgreSQL ledger store.
//!
//! Composite mutations (cohort creation, bets, sell batches, settlements)
//! each run inside one transaction, so the ledger never shows a
//! half-applied update.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info, instrument};

use crate::config::DatabaseConfig;
use crate::domain::{
    ActionKind, Agent, AgentStatus, Cohort, CohortStatus, Decision, DecisionOrigin, Market,
    MarketKind, MarketStatus, NewBrierRecord, NewDecision, NewTrade, Position, PositionStatus,
    Side, Trade, TradeKind,
};
use crate::error::{Result, ToutError};
use crate::store::{
    BetUpdate, LedgerStore, MarketUpsert, NewAgent, NewCohort, PositionUpsert, SellBatchUpdate,
    SettlementUpdate,
};

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PostgresStore {
    // ==================== Cohorts and agents ====================

    #[instrument(skip(self, cohort, agents))]
    async fn create_cohort(&self, cohort: NewCohort, agents: Vec<NewAgent>) -> Result<Cohort> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO cohorts (sequence, status, methodology, initial_balance)
            VALUES ($1, 'active', $2, $3)
            RETURNING id, sequence, status, methodology, initial_balance, started_at, completed_at
            "#,
        )
        .bind(cohort.sequence)
        .bind(&cohort.methodology)
        .bind(cohort.initial_balance)
        .fetch_one(&mut *tx)
        .await?;
        let created = map_cohort(&row)?;

        for agent in &agents {
            sqlx::query(
                r#"
                INSERT INTO agents (cohort_id, model, display_name, cash_balance, total_invested, status)
                VALUES ($1, $2, $3, $4, 0, 'active')
                "#,
            )
            .bind(created.id)
            .bind(&agent.model)
            .bind(&agent.display_name)
            .bind(cohort.initial_balance)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(
            cohort_id = created.id,
            sequence = created.sequence,
            agents = agents.len(),
            "Created cohort"
        );
        Ok(created)
    }

    async fn cohort(&self, id: i64) -> Result<Option<Cohort>> {
        let row = sqlx::query(
            r#"
            SELECT id, sequence, status, methodology, initial_balance, started_at, completed_at
            FROM cohorts WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_cohort).transpose()
    }

    async fn latest_cohort(&self) -> Result<Option<Cohort>> {
        let row = sqlx::query(
            r#"
            SELECT id, sequence, status, methodology, initial_balance, started_at, completed_at
            FROM cohorts ORDER BY sequence DESC LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_cohort).transpose()
    }

    async fn active_cohorts(&self) -> Result<Vec<Cohort>> {
        let rows = sqlx::query(
            r#"
            SELECT id, sequence, status, methodology, initial_balance, started_at, completed_at
            FROM cohorts WHERE status = 'active' ORDER BY sequence ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_cohort).collect()
    }

    async fn complete_cohort(&self, cohort_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE cohorts SET status = 'completed', completed_at = NOW()
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(cohort_id)
        .execute(&self.pool)
        .await?;

        info!(cohort_id, "Marked cohort completed");
        Ok(())
    }

    async fn cohort_agents(&self, cohort_id: i64) -> Result<Vec<Agent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, cohort_id, model, display_name, cash_balance, total_invested, status, updated_at
            FROM agents WHERE cohort_id = $1 ORDER BY id ASC
            "#,
        )
        .bind(cohort_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_agent).collect()
    }

    async fn agent(&self, id: i64) -> Result<Option<Agent>> {
        let row = sqlx::query(
            r#"
            SELECT id, cohort_id, model, display_name, cash_balance, total_invested, status, updated_at
            FROM agents WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_agent).transpose()
    }

    // ==================== Markets ====================

    #[instrument(skip(self, market), fields(source_id = %market.source_id))]
    async fn upsert_market(&self, market: &MarketUpsert) -> Result<Market> {
        let outcome_prices = serde_json::to_value(&market.outcome_prices)?;

        // Terminal statuses are written only by update_market_status, after
        // settlement; a source-terminal market enters the mirror as closed
        // and waits for the resolution sweep.
        let status = match market.status {
            MarketStatus::Resolved | MarketStatus::Cancelled => MarketStatus::Closed,
            other => other,
        };

        let row = sqlx::query(
            r#"
            INSERT INTO markets (
                source_id, question, category, kind, yes_price, outcome_prices,
                volume, status, close_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (source_id) DO UPDATE SET
                question = EXCLUDED.question,
                category = EXCLUDED.category,
                kind = EXCLUDED.kind,
                yes_price = EXCLUDED.yes_price,
                outcome_prices = EXCLUDED.outcome_prices,
                volume = EXCLUDED.volume,
                status = CASE
                    WHEN markets.status IN ('resolved', 'cancelled') THEN markets.status
                    WHEN markets.status = 'closed' AND EXCLUDED.status = 'active' THEN markets.status
                    ELSE EXCLUDED.status
                END,
                close_time = EXCLUDED.close_time,
                updated_at = NOW()
            RETURNING id, source_id, question, category, kind, yes_price, outcome_prices,
                      volume, status, close_time, winning_outcome, updated_at
            "#,
        )
        .bind(&market.source_id)
        .bind(&market.question)
        .bind(&market.category)
        .bind(market.kind.as_str())
        .bind(market.yes_price)
        .bind(outcome_prices)
        .bind(market.volume)
        .bind(status.as_str())
        .bind(market.close_time)
        .fetch_one(&self.pool)
        .await?;

        map_market(&row)
    }

    async fn market(&self, id: i64) -> Result<Option<Market>> {
        let row = sqlx::query(
            r#"
            SELECT id, source_id, question, category, kind, yes_price, outcome_prices,
                   volume, status, close_time, winning_outcome, updated_at
            FROM markets WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_market).transpose()
    }

    async fn market_by_source_id(&self, source_id: &str) -> Result<Option<Market>> {
        let row = sqlx::query(
            r#"
            SELECT id, source_id, question, category, kind, yes_price, outcome_prices,
                   volume, status, close_time, winning_outcome, updated_at
            FROM markets WHERE source_id = $1
            "#,
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_market).transpose()
    }

    async fn markets_with_status(&self, status: MarketStatus) -> Result<Vec<Market>> {
        let rows = sqlx::query(
            r#"
            SELECT id, source_id, question, category, kind, yes_price, outcome_prices,
                   volume, status, close_time, winning_outcome, updated_at
            FROM markets WHERE status = $1 ORDER BY volume DESC, id ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_market).collect()
    }

    #[instrument(skip(self))]
    async fn update_market_status(
        &self,
        market_id: i64,
        status: MarketStatus,
        winning_outcome: Option<&str>,
    ) -> Result<bool> {
        // The WHERE clause enforces forward-only transitions; a row in the
        // wrong predecessor status simply matches nothing.
        let result = sqlx::query(
            r#"
            UPDATE markets SET
                status = $1,
                winning_outcome = COALESCE($2, winning_outcome),
                updated_at = NOW()
            WHERE id = $3
              AND CASE $1
                    WHEN 'closed' THEN status = 'active'
                    WHEN 'resolved' THEN status IN ('active', 'closed')
                    WHEN 'cancelled' THEN status IN ('active', 'closed')
                    ELSE FALSE
                  END
            "#,
        )
        .bind(status.as_str())
        .bind(winning_outcome)
        .bind(market_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ==================== Decisions ====================

    #[instrument(skip(self, decision), fields(agent_id = decision.agent_id))]
    async fn record_decision(&self, decision: NewDecision) -> Result<Decision> {
        let row = sqlx::query(
            r#"
            INSERT INTO decisions (
                run_id, agent_id, cohort_id, system_prompt, user_prompt, raw_response,
                parsed, action, origin, retries, error, prompt_tokens, completion_tokens,
                cost_usd, latency_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING id, run_id, agent_id, cohort_id, system_prompt, user_prompt, raw_response,
                      parsed, action, origin, retries, error, prompt_tokens, completion_tokens,
                      cost_usd, latency_ms, created_at
            "#,
        )
        .bind(decision.run_id)
        .bind(decision.agent_id)
        .bind(decision.cohort_id)
        .bind(&decision.system_prompt)
        .bind(&decision.user_prompt)
        .bind(&decision.raw_response)
        .bind(&decision.parsed)
        .bind(decision.action.as_str())
        .bind(decision.origin.as_str())
        .bind(decision.retries)
        .bind(&decision.error)
        .bind(decision.prompt_tokens)
        .bind(decision.completion_tokens)
        .bind(decision.cost_usd)
        .bind(decision.latency_ms)
        .fetch_one(&self.pool)
        .await?;

        map_decision(&row)
    }

    async fn decision_count(&self, cohort_id: i64) -> Result<i64> {
        let row = sqlx::query(r#"SELECT COUNT(*) AS count FROM decisions WHERE cohort_id = $1"#)
            .bind(cohort_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("count"))
    }

    // ==================== Positions and trades ====================

    async fn position(&self, id: i64) -> Result<Option<Position>> {
        let row = sqlx::query(
            r#"
            SELECT id, agent_id, market_id, side, shares, avg_entry_price, cost_basis,
                   current_value, status, opened_at, updated_at
            FROM positions WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_position).transpose()
    }

    async fn open_positions(&self, agent_id: i64) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT id, agent_id, market_id, side, shares, avg_entry_price, cost_basis,
                   current_value, status, opened_at, updated_at
            FROM positions WHERE agent_id = $1 AND status = 'open' ORDER BY id ASC
            "#,
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_position).collect()
    }

    async fn open_positions_for_market(&self, market_id: i64) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT id, agent_id, market_id, side, shares, avg_entry_price, cost_basis,
                   current_value, status, opened_at, updated_at
            FROM positions WHERE market_id = $1 AND status = 'open' ORDER BY id ASC
            "#,
        )
        .bind(market_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_position).collect()
    }

    async fn open_position_count(&self, cohort_id: i64) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count
            FROM positions p
            JOIN agents a ON a.id = p.agent_id
            WHERE a.cohort_id = $1 AND p.status = 'open'
            "#,
        )
        .bind(cohort_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("count"))
    }

    async fn buy_trades_for_market(&self, market_id: i64) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            r#"
            SELECT id, agent_id, market_id, position_id, decision_id, kind, side, shares,
                   price, amount, implied_confidence, cost_basis_sold, realized_pnl, executed_at
            FROM trades WHERE market_id = $1 AND kind = 'BUY' ORDER BY id ASC
            "#,
        )
        .bind(market_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_trade).collect()
    }

    // ==================== Composite ledger mutations ====================

    #[instrument(skip(self, update), fields(agent_id = update.agent.id))]
    async fn record_bet(&self, update: &BetUpdate) -> Result<Position> {
        let mut tx = self.pool.begin().await?;

        update_agent_row(&mut tx, &update.agent).await?;

        let position = match &update.position {
            PositionUpsert::Existing(position) => {
                sqlx::query(
                    r#"
                    UPDATE positions SET
                        shares = $1,
                        avg_entry_price = $2,
                        cost_basis = $3,
                        updated_at = NOW()
                    WHERE id = $4
                    "#,
                )
                .bind(position.shares)
                .bind(position.avg_entry_price)
                .bind(position.cost_basis)
                .bind(position.id)
                .execute(&mut *tx)
                .await?;
                position.clone()
            }
            PositionUpsert::New(new) => {
                let row = sqlx::query(
                    r#"
                    INSERT INTO positions (
                        agent_id, market_id, side, shares, avg_entry_price, cost_basis, status
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, 'open')
                    RETURNING id, agent_id, market_id, side, shares, avg_entry_price, cost_basis,
                              current_value, status, opened_at, updated_at
                    "#,
                )
                .bind(new.agent_id)
                .bind(new.market_id)
                .bind(new.side.as_str())
                .bind(new.shares)
                .bind(new.avg_entry_price)
                .bind(new.cost_basis)
                .fetch_one(&mut *tx)
                .await?;
                map_position(&row)?
            }
        };

        insert_trade(
            &mut tx,
            &NewTrade {
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
        )
        .await?;

        tx.commit().await?;
        debug!(position_id = position.id, "Recorded bet");
        Ok(position)
    }

    #[instrument(skip(self, update), fields(agent_id = update.agent.id))]
    async fn record_sells(&self, update: &SellBatchUpdate) -> Result<()> {
        if update.sells.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        update_agent_row(&mut tx, &update.agent).await?;

        for sell in &update.sells {
            update_position_row(&mut tx, &sell.position).await?;

            insert_trade(
                &mut tx,
                &NewTrade {
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
            )
            .await?;
        }

        tx.commit().await?;
        debug!(count = update.sells.len(), "Recorded sell batch");
        Ok(())
    }

    #[instrument(skip(self, update), fields(agent_id = update.agent.id, market_id = update.market_id))]
    async fn settle_positions(&self, update: &SettlementUpdate) -> Result<()> {
        if update.settlements.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        update_agent_row(&mut tx, &update.agent).await?;

        for settlement in &update.settlements {
            update_position_row(&mut tx, &settlement.position).await?;

            insert_trade(
                &mut tx,
                &NewTrade {
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
            )
            .await?;
        }

        tx.commit().await?;
        debug!(count = update.settlements.len(), "Recorded settlements");
        Ok(())
    }

    async fn record_brier_scores(&self, records: &[NewBrierRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO brier_scores (trade_id, agent_id, market_id, forecast, side_won, score)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (trade_id) DO NOTHING
                "#,
            )
            .bind(record.trade_id)
            .bind(record.agent_id)
            .bind(record.market_id)
            .bind(record.forecast)
            .bind(record.side_won)
            .bind(record.score)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        debug!(inserted, total = records.len(), "Recorded calibration scores");
        Ok(inserted)
    }
}

async fn update_agent_row(tx: &mut Transaction<'_, Postgres>, agent: &Agent) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE agents SET
            cash_balance = $1,
            total_invested = $2,
            status = $3,
            updated_at = NOW()
        WHERE id = $4
        "#,
    )
    .bind(agent.cash_balance)
    .bind(agent.total_invested)
    .bind(agent.status.as_str())
    .bind(agent.id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn update_position_row(tx: &mut Transaction<'_, Postgres>, position: &Position) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE positions SET
            shares = $1,
            cost_basis = $2,
            current_value = $3,
            status = $4,
            updated_at = NOW()
        WHERE id = $5
        "#,
    )
    .bind(position.shares)
    .bind(position.cost_basis)
    .bind(position.current_value)
    .bind(position.status.as_str())
    .bind(position.id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_trade(tx: &mut Transaction<'_, Postgres>, trade: &NewTrade) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO trades (
            agent_id, market_id, position_id, decision_id, kind, side, shares,
            price, amount, implied_confidence, cost_basis_sold, realized_pnl
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(trade.agent_id)
    .bind(trade.market_id)
    .bind(trade.position_id)
    .bind(trade.decision_id)
    .bind(trade.kind.as_str())
    .bind(trade.side.as_str())
    .bind(trade.shares)
    .bind(trade.price)
    .bind(trade.amount)
    .bind(trade.implied_confidence)
    .bind(trade.cost_basis_sold)
    .bind(trade.realized_pnl)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ==================== Row mapping ====================

fn map_cohort(row: &PgRow) -> Result<Cohort> {
    Ok(Cohort {
        id: row.get("id"),
        sequence: row.get("sequence"),
        status: CohortStatus::try_from(row.get::<String, _>("status").as_str())
            .map_err(|e| ToutError::Internal(e))?,
        methodology: row.get("methodology"),
        initial_balance: row.get("initial_balance"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    })
}

fn map_agent(row: &PgRow) -> Result<Agent> {
    Ok(Agent {
        id: row.get("id"),
        cohort_id: row.get("cohort_id"),
        model: row.get("model"),
        display_name: row.get("display_name"),
        cash_balance: row.get("cash_balance"),
        total_invested: row.get("total_invested"),
        status: AgentStatus::try_from(row.get::<String, _>("status").as_str())
            .map_err(|e| ToutError::Internal(e))?,
        updated_at: row.get("updated_at"),
    })
}

fn map_market(row: &PgRow) -> Result<Market> {
    let outcome_prices: HashMap<String, Decimal> =
        serde_json::from_value(row.get::<serde_json::Value, _>("outcome_prices"))?;

    Ok(Market {
        id: row.get("id"),
        source_id: row.get("source_id"),
        question: row.get("question"),
        category: row.get("category"),
        kind: MarketKind::try_from(row.get::<String, _>("kind").as_str())
            .map_err(|e| ToutError::Internal(e))?,
        yes_price: row.get("yes_price"),
        outcome_prices,
        volume: row.get("volume"),
        status: MarketStatus::try_from(row.get::<String, _>("status").as_str())
            .map_err(|e| ToutError::Internal(e))?,
        close_time: row.get("close_time"),
        winning_outcome: row.get("winning_outcome"),
        updated_at: row.get("updated_at"),
    })
}

fn map_position(row: &PgRow) -> Result<Position> {
    Ok(Position {
        id: row.get("id"),
        agent_id: row.get("agent_id"),
        market_id: row.get("market_id"),
        side: Side::parse(row.get::<String, _>("side").as_str()),
        shares: row.get("shares"),
        avg_entry_price: row.get("avg_entry_price"),
        cost_basis: row.get("cost_basis"),
        current_value: row.get("current_value"),
        status: PositionStatus::try_from(row.get::<String, _>("status").as_str())
            .map_err(|e| ToutError::Internal(e))?,
        opened_at: row.get("opened_at"),
        updated_at: row.get("updated_at"),
    })
}

fn map_trade(row: &PgRow) -> Result<Trade> {
    Ok(Trade {
        id: row.get("id"),
        agent_id: row.get("agent_id"),
        market_id: row.get("market_id"),
        position_id: row.get("position_id"),
        decision_id: row.get("decision_id"),
        kind: TradeKind::try_from(row.get::<String, _>("kind").as_str())
            .map_err(|e| ToutError::Internal(e))?,
        side: Side::parse(row.get::<String, _>("side").as_str()),
        shares: row.get("shares"),
        price: row.get("price"),
        amount: row.get("amount"),
        implied_confidence: row.get("implied_confidence"),
        cost_basis_sold: row.get("cost_basis_sold"),
        realized_pnl: row.get("realized_pnl"),
        executed_at: row.get("executed_at"),
    })
}

fn map_decision(row: &PgRow) -> Result<Decision> {
    Ok(Decision {
        id: row.get("id"),
        run_id: row.get("run_id"),
        agent_id: row.get("agent_id"),
        cohort_id: row.get("cohort_id"),
        system_prompt: row.get("system_prompt"),
        user_prompt: row.get("user_prompt"),
        raw_response: row.get("raw_response"),
        parsed: row.get("parsed"),
        action: ActionKind::try_from(row.get::<String, _>("action").as_str())
            .map_err(|e| ToutError::Internal(e))?,
        origin: DecisionOrigin::try_from(row.get::<String, _>("origin").as_str())
            .map_err(|e| ToutError::Internal(e))?,
        retries: row.get("retries"),
        error: row.get("error"),
        prompt_tokens: row.get("prompt_tokens"),
        completion_tokens: row.get("completion_tokens"),
        cost_usd: row.get("cost_usd"),
        latency_ms: row.get("latency_ms"),
        created_at: row.get("created_at"),
    })
}

//! Applies validated trading instructions to the ledger.
//!
//! Each bet commits as its own transaction; an agent's sell list commits
//! as one batch. Validation failures are per-instruction
//! [`ExecutionError`]s and never abort sibling instructions; store
//! failures abort the call and roll the batch back.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::domain::{
    Agent, BetInstruction, BetLimits, Position, SellInstruction,
};
use crate::error::{ExecutionError, Result, ToutError};
use crate::store::{BetUpdate, LedgerStore, NewPosition, PositionUpsert, SellBatchUpdate, SellUpdate};

/// Fill details for one executed bet.
#[derive(Debug, Clone)]
pub struct BetReceipt {
    /// Position state after the bet (merged or newly opened).
    pub position: Position,
    pub shares: Decimal,
    pub price: Decimal,
    pub amount: Decimal,
    pub implied_confidence: Option<Decimal>,
}

/// Fill details for one executed sell.
#[derive(Debug, Clone)]
pub struct SellReceipt {
    pub position_id: i64,
    pub shares_sold: Decimal,
    pub price: Decimal,
    pub proceeds: Decimal,
    pub cost_basis_removed: Decimal,
    pub realized_pnl: Decimal,
}

type SellOutcome = std::result::Result<SellReceipt, ExecutionError>;

pub struct ExecutionEngine {
    store: Arc<dyn LedgerStore>,
    limits: BetLimits,
}

impl ExecutionEngine {
    pub fn new(store: Arc<dyn LedgerStore>, limits: BetLimits) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> BetLimits {
        self.limits
    }

    /// Execute one bet instruction against the ledger.
    ///
    /// Implied confidence (amount over the maximum allowed bet) is taken
    /// at the pre-debit balance; it is the forecast probability scored at
    /// resolution.
    pub async fn execute_bet(
        &self,
        agent_id: i64,
        bet: &BetInstruction,
        decision_id: Option<i64>,
    ) -> Result<BetReceipt> {
        let mut agent = self.tradable_agent(agent_id).await?;

        let market = self
            .store
            .market_by_source_id(&bet.market_id)
            .await?
            .ok_or_else(|| ExecutionError::MarketNotFound(bet.market_id.clone()))?;
        if !market.is_active() {
            return Err(ExecutionError::MarketNotActive {
                source_id: market.source_id,
                status: market.status.to_string(),
            }
            .into());
        }

        let max_bet = self.limits.max_bet(agent.cash_balance);
        if bet.amount > max_bet {
            return Err(ExecutionError::BetExceedsMax {
                amount: bet.amount,
                max: max_bet,
            }
            .into());
        }
        if bet.amount > agent.cash_balance {
            return Err(ExecutionError::InsufficientBalance {
                amount: bet.amount,
                balance: agent.cash_balance,
            }
            .into());
        }

        if !market.accepts(&bet.side) {
            return Err(ExecutionError::InvalidSide {
                side: bet.side.to_string(),
                kind: market.kind.to_string(),
                source_id: market.source_id,
            }
            .into());
        }
        let price = market
            .price_for(&bet.side)
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| ExecutionError::PriceUnavailable {
                side: bet.side.to_string(),
                source_id: market.source_id.clone(),
            })?;

        let shares = bet.amount / price;
        let implied_confidence = self
            .limits
            .implied_confidence(bet.amount, agent.cash_balance);

        let open = self.store.open_positions(agent_id).await?;
        let position = match open
            .into_iter()
            .find(|p| p.market_id == market.id && p.side == bet.side)
        {
            Some(mut existing) => {
                existing.merge_fill(shares, bet.amount);
                PositionUpsert::Existing(existing)
            }
            None => PositionUpsert::New(NewPosition {
                agent_id,
                market_id: market.id,
                side: bet.side.clone(),
                shares,
                avg_entry_price: price,
                cost_basis: bet.amount,
            }),
        };

        agent.apply_ledger_update(-bet.amount, bet.amount);

        let stored = self
            .store
            .record_bet(&BetUpdate {
                agent,
                position,
                decision_id,
                side: bet.side.clone(),
                shares,
                price,
                amount: bet.amount,
                implied_confidence,
            })
            .await?;

        info!(
            agent_id,
            market = %market.source_id,
            side = %bet.side,
            amount = %bet.amount,
            price = %price,
            shares = %shares,
            "Executed bet"
        );

        Ok(BetReceipt {
            position: stored,
            shares,
            price,
            amount: bet.amount,
            implied_confidence,
        })
    }

    /// Execute an agent's sell list.
    ///
    /// Instructions are applied in order against in-batch state, so a
    /// second sell of the same position sees the already-reduced shares.
    /// Accepted sells commit together; the returned vector carries one
    /// outcome per instruction in input order.
    pub async fn execute_sells(
        &self,
        agent_id: i64,
        sells: &[SellInstruction],
        decision_id: Option<i64>,
    ) -> Result<Vec<SellOutcome>> {
        if sells.is_empty() {
            return Ok(Vec::new());
        }

        let mut agent = self.tradable_agent(agent_id).await?;

        let mut open: HashMap<i64, Position> = self
            .store
            .open_positions(agent_id)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut outcomes = Vec::with_capacity(sells.len());
        let mut batch = Vec::new();

        for sell in sells {
            match self.prepare_sell(agent_id, sell, &mut open, &mut agent).await? {
                Ok((receipt, update)) => {
                    batch.push(update);
                    outcomes.push(Ok(receipt));
                }
                Err(reject) => {
                    warn!(
                        agent_id,
                        position_id = sell.position_id,
                        error = %reject,
                        "Sell rejected"
                    );
                    outcomes.push(Err(reject));
                }
            }
        }

        if !batch.is_empty() {
            let executed = batch.len();
            self.store
                .record_sells(&SellBatchUpdate {
                    agent,
                    decision_id,
                    sells: batch,
                })
                .await?;
            info!(
                agent_id,
                executed,
                rejected = sells.len() - executed,
                "Executed sell batch"
            );
        }

        Ok(outcomes)
    }

    /// Agent lookup plus the checks every instruction shares: the agent
    /// exists, is not bankrupt, and belongs to a still-active cohort.
    async fn tradable_agent(&self, agent_id: i64) -> Result<Agent> {
        let agent = self
            .store
            .agent(agent_id)
            .await?
            .ok_or(ExecutionError::AgentNotFound(agent_id))?;
        if agent.is_bankrupt() {
            return Err(ExecutionError::AgentBankrupt(agent_id).into());
        }

        let cohort = self
            .store
            .cohort(agent.cohort_id)
            .await?
            .ok_or(ToutError::CohortNotFound(agent.cohort_id))?;
        if !cohort.is_active() {
            return Err(ExecutionError::CohortCompleted(cohort.id).into());
        }

        Ok(agent)
    }

    /// Validate one sell against in-batch state and stage its ledger
    /// effect. The outer `Result` is a store failure; the inner one is
    /// the per-instruction verdict.
    async fn prepare_sell(
        &self,
        agent_id: i64,
        sell: &SellInstruction,
        open: &mut HashMap<i64, Position>,
        agent: &mut Agent,
    ) -> Result<std::result::Result<(SellReceipt, SellUpdate), ExecutionError>> {
        let position = match open.get(&sell.position_id) {
            Some(p) if p.is_open() => p.clone(),
            Some(p) => return Ok(Err(ExecutionError::PositionNotOpen(p.id))),
            None => {
                let verdict = match self.store.position(sell.position_id).await? {
                    Some(p) if p.agent_id != agent_id => ExecutionError::PositionNotOwned {
                        position_id: p.id,
                        agent_id,
                    },
                    Some(p) if !p.is_open() => ExecutionError::PositionNotOpen(p.id),
                    _ => ExecutionError::PositionNotFound(sell.position_id),
                };
                return Ok(Err(verdict));
            }
        };

        let market = match self.store.market(position.market_id).await? {
            Some(m) => m,
            None => {
                return Ok(Err(ExecutionError::MarketNotFound(
                    position.market_id.to_string(),
                )))
            }
        };
        let Some(price) = market.price_for(&position.side) else {
            return Ok(Err(ExecutionError::PriceUnavailable {
                side: position.side.to_string(),
                source_id: market.source_id,
            }));
        };

        let pct = sell.percentage / Decimal::from(100);
        let shares_sold = position.shares * pct;
        let cost_removed = position.cost_basis * pct;
        let proceeds = shares_sold * price;
        let realized_pnl = proceeds - cost_removed;

        let mut updated = position;
        updated.reduce(shares_sold, cost_removed);
        agent.apply_ledger_update(proceeds, -cost_removed);
        open.insert(updated.id, updated.clone());

        let receipt = SellReceipt {
            position_id: updated.id,
            shares_sold,
            price,
            proceeds,
            cost_basis_removed: cost_removed,
            realized_pnl,
        };
        let update = SellUpdate {
            position: updated,
            shares_sold,
            price,
            proceeds,
            cost_basis_sold: cost_removed,
            realized_pnl,
        };
        Ok(Ok((receipt, update)))
    }
}

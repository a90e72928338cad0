use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::market::Side;

/// Final action recorded on a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionKind {
    Bet,
    Sell,
    Hold,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Bet => "BET",
            ActionKind::Sell => "SELL",
            ActionKind::Hold => "HOLD",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for ActionKind {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s {
            "BET" => Ok(ActionKind::Bet),
            "SELL" => Ok(ActionKind::Sell),
            "HOLD" => Ok(ActionKind::Hold),
            other => Err(format!("unknown action kind: {}", other)),
        }
    }
}

/// Where the recorded action came from: the model's first response, a
/// successful retry after a malformed one, or a system default after both
/// attempts failed. Keeps "model chose HOLD" distinguishable from "system
/// defaulted to HOLD".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOrigin {
    Model,
    Retried,
    Defaulted,
}

impl DecisionOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionOrigin::Model => "model",
            DecisionOrigin::Retried => "retried",
            DecisionOrigin::Defaulted => "defaulted",
        }
    }
}

impl std::fmt::Display for DecisionOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for DecisionOrigin {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s {
            "model" => Ok(DecisionOrigin::Model),
            "retried" => Ok(DecisionOrigin::Retried),
            "defaulted" => Ok(DecisionOrigin::Defaulted),
            other => Err(format!("unknown decision origin: {}", other)),
        }
    }
}

/// One validated bet instruction from a parsed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetInstruction {
    /// External market identifier as listed in the prompt.
    pub market_id: String,
    pub side: Side,
    pub amount: Decimal,
}

/// One validated sell instruction from a parsed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellInstruction {
    pub position_id: i64,
    /// Portion of the position to sell, 1-100.
    pub percentage: Decimal,
}

/// A validated trading instruction. Serializes to the exact wire shape
/// the prompt protocol asks the models for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "UPPERCASE")]
pub enum TradingAction {
    Bet {
        reasoning: String,
        bets: Vec<BetInstruction>,
    },
    Sell {
        reasoning: String,
        sells: Vec<SellInstruction>,
    },
    Hold {
        reasoning: String,
    },
}

impl TradingAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            TradingAction::Bet { .. } => ActionKind::Bet,
            TradingAction::Sell { .. } => ActionKind::Sell,
            TradingAction::Hold { .. } => ActionKind::Hold,
        }
    }

    pub fn reasoning(&self) -> &str {
        match self {
            TradingAction::Bet { reasoning, .. }
            | TradingAction::Sell { reasoning, .. }
            | TradingAction::Hold { reasoning } => reasoning,
        }
    }

    pub fn hold(reasoning: impl Into<String>) -> Self {
        TradingAction::Hold {
            reasoning: reasoning.into(),
        }
    }
}

/// Position-sizing constraints shared by the parser, the execution engine
/// and the prompt text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetLimits {
    pub min_bet: Decimal,
    /// Fraction of cash balance a single bet may not exceed.
    pub max_bet_fraction: Decimal,
}

impl BetLimits {
    pub fn max_bet(&self, cash_balance: Decimal) -> Decimal {
        cash_balance * self.max_bet_fraction
    }

    /// Bet size as a fraction of the maximum allowed bet. None when the
    /// maximum is not positive (no meaningful forecast probability).
    pub fn implied_confidence(&self, amount: Decimal, cash_balance: Decimal) -> Option<Decimal> {
        let max = self.max_bet(cash_balance);
        if max > Decimal::ZERO {
            Some(amount / max)
        } else {
            None
        }
    }
}

/// Full log of one agent turn. Append-only; the reproducibility record
/// for the benchmark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: i64,
    /// Groups all decisions of one orchestrator cycle.
    pub run_id: Uuid,
    pub agent_id: i64,
    pub cohort_id: i64,
    pub system_prompt: String,
    pub user_prompt: String,
    pub raw_response: Option<String>,
    /// Normalized parse result for successful attempts.
    pub parsed: Option<serde_json::Value>,
    pub action: ActionKind,
    pub origin: DecisionOrigin,
    pub retries: i32,
    pub error: Option<String>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub cost_usd: Option<Decimal>,
    pub latency_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDecision {
    pub run_id: Uuid,
    pub agent_id: i64,
    pub cohort_id: i64,
    pub system_prompt: String,
    pub user_prompt: String,
    pub raw_response: Option<String>,
    pub parsed: Option<serde_json::Value>,
    pub action: ActionKind,
    pub origin: DecisionOrigin,
    pub retries: i32,
    pub error: Option<String>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub cost_usd: Option<Decimal>,
    pub latency_ms: Option<i64>,
}

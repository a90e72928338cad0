use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Cohort lifecycle: active until every agent has flattened out, then
/// completed. Completion is one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CohortStatus {
    Active,
    Completed,
}

impl CohortStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CohortStatus::Active => "active",
            CohortStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for CohortStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for CohortStatus {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s {
            "active" => Ok(CohortStatus::Active),
            "completed" => Ok(CohortStatus::Completed),
            other => Err(format!("unknown cohort status: {}", other)),
        }
    }
}

/// One weekly competition run: one agent per enabled model, all seeded
/// with the same starting balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cohort {
    pub id: i64,
    pub sequence: i32,
    pub status: CohortStatus,
    /// Prompt-protocol version the cohort ran under.
    pub methodology: String,
    pub initial_balance: Decimal,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Cohort {
    pub fn is_active(&self) -> bool {
        self.status == CohortStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Bankrupt,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Bankrupt => "bankrupt",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for AgentStatus {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s {
            "active" => Ok(AgentStatus::Active),
            "bankrupt" => Ok(AgentStatus::Bankrupt),
            other => Err(format!("unknown agent status: {}", other)),
        }
    }
}

/// One model's trading identity within one cohort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: i64,
    pub cohort_id: i64,
    /// Model slug as sent to the completion API, e.g. "openai/gpt-4o".
    pub model: String,
    pub display_name: String,
    pub cash_balance: Decimal,
    /// Cost basis of currently open positions.
    pub total_invested: Decimal,
    pub status: AgentStatus,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn is_bankrupt(&self) -> bool {
        self.status == AgentStatus::Bankrupt
    }

    /// Apply a ledger delta to cash and invested capital.
    ///
    /// Invested capital is floored at zero. An agent goes bankrupt only
    /// when both cash and invested capital are drained: zero cash with
    /// open positions stays active because those positions may still
    /// resolve favorably.
    pub fn apply_ledger_update(&mut self, cash_delta: Decimal, invested_delta: Decimal) {
        self.cash_balance += cash_delta;
        self.total_invested = (self.total_invested + invested_delta).max(Decimal::ZERO);
        if self.cash_balance <= Decimal::ZERO && self.total_invested <= Decimal::ZERO {
            self.status = AgentStatus::Bankrupt;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn agent(cash: Decimal, invested: Decimal) -> Agent {
        Agent {
            id: 1,
            cohort_id: 1,
            model: "openai/gpt-4o".to_string(),
            display_name: "GPT-4o".to_string(),
            cash_balance: cash,
            total_invested: invested,
            status: AgentStatus::Active,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_debit_credits_invested() {
        let mut a = agent(dec!(10000), dec!(0));
        a.apply_ledger_update(dec!(-500), dec!(500));
        assert_eq!(a.cash_balance, dec!(9500));
        assert_eq!(a.total_invested, dec!(500));
        assert_eq!(a.status, AgentStatus::Active);
    }

    #[test]
    fn test_bankrupt_only_when_both_drained() {
        // All cash deployed, positions still open: active.
        let mut a = agent(dec!(100), dec!(400));
        a.apply_ledger_update(dec!(-100), dec!(100));
        assert_eq!(a.cash_balance, dec!(0));
        assert_eq!(a.status, AgentStatus::Active);

        // Positions settle worthless: now bankrupt.
        a.apply_ledger_update(dec!(0), dec!(-500));
        assert_eq!(a.total_invested, dec!(0));
        assert_eq!(a.status, AgentStatus::Bankrupt);
    }

    #[test]
    fn test_invested_floored_at_zero() {
        let mut a = agent(dec!(50), dec!(100));
        a.apply_ledger_update(dec!(120), dec!(-150));
        assert_eq!(a.total_invested, dec!(0));
        assert_eq!(a.cash_balance, dec!(170));
        assert_eq!(a.status, AgentStatus::Active);
    }
}

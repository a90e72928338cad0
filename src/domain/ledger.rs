use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::market::Side;

/// Position lifecycle. Closed = agent exited before resolution;
/// settled = market resolved while the position was open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
    Settled,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Closed => "closed",
            PositionStatus::Settled => "settled",
        }
    }
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for PositionStatus {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s {
            "open" => Ok(PositionStatus::Open),
            "closed" => Ok(PositionStatus::Closed),
            "settled" => Ok(PositionStatus::Settled),
            other => Err(format!("unknown position status: {}", other)),
        }
    }
}

/// One agent's accumulated holding in one (market, side) pair.
///
/// At most one open position exists per (agent, market, side); repeat bets
/// on the same side merge into it instead of creating a second row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub agent_id: i64,
    pub market_id: i64,
    pub side: Side,
    pub shares: Decimal,
    /// Volume-weighted average entry price.
    pub avg_entry_price: Decimal,
    pub cost_basis: Decimal,
    /// Mark-to-market value; None until first computed.
    pub current_value: Option<Decimal>,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Merge an additional fill into this position, re-averaging the
    /// entry price by cost weight.
    pub fn merge_fill(&mut self, shares: Decimal, cost: Decimal) {
        self.shares += shares;
        self.cost_basis += cost;
        if self.shares > Decimal::ZERO {
            self.avg_entry_price = self.cost_basis / self.shares;
        }
    }

    /// Remove a sold slice. When nothing remains the position closes with
    /// zeroed value fields; otherwise shares and cost basis shrink
    /// proportionally and the entry price is unchanged.
    pub fn reduce(&mut self, shares_sold: Decimal, cost_removed: Decimal) {
        self.shares -= shares_sold;
        self.cost_basis = (self.cost_basis - cost_removed).max(Decimal::ZERO);
        if self.shares <= Decimal::ZERO {
            self.zero_out(PositionStatus::Closed);
        }
    }

    /// Finalize at market resolution.
    pub fn settle(&mut self) {
        self.zero_out(PositionStatus::Settled);
    }

    fn zero_out(&mut self, status: PositionStatus) {
        self.status = status;
        self.shares = Decimal::ZERO;
        self.cost_basis = Decimal::ZERO;
        self.current_value = Some(Decimal::ZERO);
    }
}

/// BUY or SELL execution record. Append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeKind {
    Buy,
    Sell,
}

impl TradeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeKind::Buy => "BUY",
            TradeKind::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for TradeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for TradeKind {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s {
            "BUY" => Ok(TradeKind::Buy),
            "SELL" => Ok(TradeKind::Sell),
            other => Err(format!("unknown trade kind: {}", other)),
        }
    }
}

/// Immutable record of one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub agent_id: i64,
    pub market_id: i64,
    pub position_id: i64,
    /// None for system-driven settlement trades.
    pub decision_id: Option<i64>,
    pub kind: TradeKind,
    pub side: Side,
    pub shares: Decimal,
    pub price: Decimal,
    pub amount: Decimal,
    /// BUY only: bet size as a fraction of the maximum allowed bet,
    /// scored for calibration once the market resolves.
    pub implied_confidence: Option<Decimal>,
    /// SELL only: cost basis of the shares sold.
    pub cost_basis_sold: Option<Decimal>,
    /// SELL only: proceeds minus cost basis sold.
    pub realized_pnl: Option<Decimal>,
    pub executed_at: DateTime<Utc>,
}

/// Trade fields the store fills in (id, timestamp) are absent here.
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub agent_id: i64,
    pub market_id: i64,
    pub position_id: i64,
    pub decision_id: Option<i64>,
    pub kind: TradeKind,
    pub side: Side,
    pub shares: Decimal,
    pub price: Decimal,
    pub amount: Decimal,
    pub implied_confidence: Option<Decimal>,
    pub cost_basis_sold: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
}

/// One scored forecast, created per BUY trade after its market resolves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrierRecord {
    pub id: i64,
    pub trade_id: i64,
    pub agent_id: i64,
    pub market_id: i64,
    /// Probability the forecast assigned to the chosen side.
    pub forecast: Decimal,
    /// Whether the chosen side won.
    pub side_won: bool,
    /// Squared error: 0 = perfect, 1 = worst.
    pub score: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBrierRecord {
    pub trade_id: i64,
    pub agent_id: i64,
    pub market_id: i64,
    pub forecast: Decimal,
    pub side_won: bool,
    pub score: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn open_position(shares: Decimal, entry: Decimal) -> Position {
        Position {
            id: 1,
            agent_id: 1,
            market_id: 1,
            side: Side::Yes,
            shares,
            avg_entry_price: entry,
            cost_basis: shares * entry,
            current_value: None,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_merge_fill_vwap() {
        // 1000 @ 0.40 then 500 @ 0.70: avg = 750/1500 = 0.50
        let mut p = open_position(dec!(1000), dec!(0.40));
        p.merge_fill(dec!(500), dec!(350));
        assert_eq!(p.shares, dec!(1500));
        assert_eq!(p.cost_basis, dec!(750));
        assert_eq!(p.avg_entry_price, dec!(0.50));
        assert!(p.is_open());
    }

    #[test]
    fn test_reduce_partial_keeps_open() {
        let mut p = open_position(dec!(1000), dec!(0.30));
        p.reduce(dec!(500), dec!(150));
        assert_eq!(p.shares, dec!(500));
        assert_eq!(p.cost_basis, dec!(150));
        assert_eq!(p.avg_entry_price, dec!(0.30));
        assert_eq!(p.status, PositionStatus::Open);
    }

    #[test]
    fn test_reduce_full_closes_and_zeroes() {
        let mut p = open_position(dec!(1000), dec!(0.30));
        p.reduce(dec!(1000), dec!(300));
        assert_eq!(p.status, PositionStatus::Closed);
        assert_eq!(p.shares, dec!(0));
        assert_eq!(p.cost_basis, dec!(0));
        assert_eq!(p.current_value, Some(dec!(0)));
    }

    #[test]
    fn test_settle_zeroes() {
        let mut p = open_position(dec!(1250), dec!(0.40));
        p.settle();
        assert_eq!(p.status, PositionStatus::Settled);
        assert_eq!(p.shares, dec!(0));
        assert_eq!(p.cost_basis, dec!(0));
    }
}

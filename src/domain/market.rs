use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Which outcome a bet backs: YES/NO on binary markets, a named outcome
/// on multi-outcome markets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Side {
    Yes,
    No,
    Named(String),
}

impl Side {
    /// Parse a side label. Never fails: anything other than YES/NO
    /// (case-insensitive) is treated as a named outcome and validated
    /// against the target market at execution time.
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        match trimmed.to_uppercase().as_str() {
            "YES" => Side::Yes,
            "NO" => Side::No,
            _ => Side::Named(trimmed.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Side::Yes => "YES",
            Side::No => "NO",
            Side::Named(name) => name,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Side::Yes | Side::No)
    }

    /// Case-insensitive match against a market's winning outcome label.
    pub fn matches_outcome(&self, outcome: &str) -> bool {
        self.as_str().to_lowercase() == outcome.trim().to_lowercase()
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Stored and transmitted as a plain string label.
impl Serialize for Side {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Side {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Side::parse(&s))
    }
}

/// Market payout structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketKind {
    Binary,
    MultiOutcome,
}

impl MarketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketKind::Binary => "binary",
            MarketKind::MultiOutcome => "multi_outcome",
        }
    }
}

impl std::fmt::Display for MarketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for MarketKind {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s {
            "binary" => Ok(MarketKind::Binary),
            "multi_outcome" => Ok(MarketKind::MultiOutcome),
            other => Err(format!("unknown market kind: {}", other)),
        }
    }
}

/// Market lifecycle. Transitions are forward-only: active markets close
/// (or resolve directly), closed markets resolve or cancel, and the two
/// end states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    Active,
    Closed,
    Resolved,
    Cancelled,
}

impl MarketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Active => "active",
            MarketStatus::Closed => "closed",
            MarketStatus::Resolved => "resolved",
            MarketStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MarketStatus::Resolved | MarketStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: MarketStatus) -> bool {
        use MarketStatus::*;
        matches!(
            (self, next),
            (Active, Closed)
                | (Active, Resolved)
                | (Active, Cancelled)
                | (Closed, Resolved)
                | (Closed, Cancelled)
        )
    }
}

impl std::fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for MarketStatus {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s {
            "active" => Ok(MarketStatus::Active),
            "closed" => Ok(MarketStatus::Closed),
            "resolved" => Ok(MarketStatus::Resolved),
            "cancelled" => Ok(MarketStatus::Cancelled),
            other => Err(format!("unknown market status: {}", other)),
        }
    }
}

/// A prediction market mirrored from the external source.
///
/// Binary markets carry a single YES price; multi-outcome markets carry a
/// price per named outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: i64,
    pub source_id: String,
    pub question: String,
    pub category: Option<String>,
    pub kind: MarketKind,
    pub yes_price: Option<Decimal>,
    pub outcome_prices: HashMap<String, Decimal>,
    pub volume: Decimal,
    pub status: MarketStatus,
    pub close_time: Option<DateTime<Utc>>,
    pub winning_outcome: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Market {
    pub fn is_active(&self) -> bool {
        self.status == MarketStatus::Active
    }

    pub fn is_past_close(&self, now: DateTime<Utc>) -> bool {
        matches!(self.close_time, Some(t) if t <= now)
    }

    /// Whether this market's outcome structure accepts the given side.
    pub fn accepts(&self, side: &Side) -> bool {
        match self.kind {
            MarketKind::Binary => side.is_binary(),
            MarketKind::MultiOutcome => !side.is_binary(),
        }
    }

    /// Current price for taking `side`.
    ///
    /// Binary: the YES price, or its complement for NO. Multi-outcome: the
    /// named outcome's price from the stored map, 0.5 when the map has no
    /// entry for it. `None` for a shape mismatch (see [`Market::accepts`])
    /// or a binary market without a mirrored price.
    pub fn price_for(&self, side: &Side) -> Option<Decimal> {
        match (self.kind, side) {
            (MarketKind::Binary, Side::Yes) => self.yes_price,
            (MarketKind::Binary, Side::No) => self.yes_price.map(|p| Decimal::ONE - p),
            (MarketKind::MultiOutcome, Side::Named(name)) => Some(self.outcome_price(name)),
            _ => None,
        }
    }

    /// Price map lookup, case-insensitive on the outcome label.
    pub fn outcome_price(&self, name: &str) -> Decimal {
        let wanted = name.trim().to_lowercase();
        self.outcome_prices
            .iter()
            .find(|(label, _)| label.trim().to_lowercase() == wanted)
            .map(|(_, price)| *price)
            .unwrap_or_else(|| Decimal::new(5, 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn binary_market(yes_price: Decimal) -> Market {
        Market {
            id: 1,
            source_id: "mkt-1".to_string(),
            question: "Will it rain tomorrow?".to_string(),
            category: None,
            kind: MarketKind::Binary,
            yes_price: Some(yes_price),
            outcome_prices: HashMap::new(),
            volume: dec!(1000),
            status: MarketStatus::Active,
            close_time: None,
            winning_outcome: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_side_parse() {
        assert_eq!(Side::parse("YES"), Side::Yes);
        assert_eq!(Side::parse("no"), Side::No);
        assert_eq!(Side::parse(" Yes "), Side::Yes);
        assert_eq!(Side::parse("Chiefs"), Side::Named("Chiefs".to_string()));
    }

    #[test]
    fn test_side_matches_outcome_case_insensitive() {
        assert!(Side::Yes.matches_outcome("yes"));
        assert!(Side::No.matches_outcome("NO"));
        assert!(Side::Named("Chiefs".to_string()).matches_outcome("CHIEFS"));
        assert!(!Side::Yes.matches_outcome("no"));
    }

    #[test]
    fn test_status_transitions_forward_only() {
        use MarketStatus::*;
        assert!(Active.can_transition_to(Closed));
        assert!(Active.can_transition_to(Resolved));
        assert!(Closed.can_transition_to(Resolved));
        assert!(Closed.can_transition_to(Cancelled));
        assert!(!Resolved.can_transition_to(Closed));
        assert!(!Resolved.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Active));
        assert!(!Closed.can_transition_to(Active));
    }

    #[test]
    fn test_binary_price_complement() {
        let market = binary_market(dec!(0.40));
        assert_eq!(market.price_for(&Side::Yes), Some(dec!(0.40)));
        assert_eq!(market.price_for(&Side::No), Some(dec!(0.60)));
        assert_eq!(market.price_for(&Side::Named("Chiefs".to_string())), None);
    }

    #[test]
    fn test_multi_outcome_price_defaults() {
        let mut market = binary_market(Decimal::ZERO);
        market.kind = MarketKind::MultiOutcome;
        market.yes_price = None;
        market.outcome_prices.insert("Chiefs".to_string(), dec!(0.35));

        let chiefs = Side::Named("chiefs".to_string());
        let eagles = Side::Named("Eagles".to_string());
        assert_eq!(market.price_for(&chiefs), Some(dec!(0.35)));
        assert_eq!(market.price_for(&eagles), Some(dec!(0.5)));
        assert_eq!(market.price_for(&Side::Yes), None);
    }

    #[test]
    fn test_side_serde_round_trip() {
        let side = Side::Named("Lakers".to_string());
        let json = serde_json::to_string(&side).unwrap();
        assert_eq!(json, "\"Lakers\"");
        let back: Side = serde_json::from_str(&json).unwrap();
        assert_eq!(back, side);

        let yes: Side = serde_json::from_str("\"yes\"").unwrap();
        assert_eq!(yes, Side::Yes);
    }
}

//! Pure scoring functions: position valuation, settlement payout, P/L and
//! Brier calibration. No I/O, no clock dependence.

use rust_decimal::Decimal;

use crate::domain::{Market, MarketKind, Position, Side};

/// Mark-to-market value of a holding at the current price.
///
/// `price` is the market's YES price for binary sides (NO values at the
/// complement) and the outcome's own price for named sides.
pub fn position_value(shares: Decimal, side: &Side, price: Decimal) -> Decimal {
    match side {
        Side::No => shares * (Decimal::ONE - price),
        Side::Yes | Side::Named(_) => shares * price,
    }
}

/// Mark-to-market value of an open position against its market's mirrored
/// prices. None when the market carries no usable price for the side.
pub fn mark_to_market(position: &Position, market: &Market) -> Option<Decimal> {
    match (market.kind, &position.side) {
        (MarketKind::Binary, Side::Yes | Side::No) => market
            .yes_price
            .map(|p| position_value(position.shares, &position.side, p)),
        (MarketKind::MultiOutcome, Side::Named(name)) => Some(position_value(
            position.shares,
            &position.side,
            market.outcome_price(name),
        )),
        _ => None,
    }
}

/// Settlement payout: the full share count when the chosen side won,
/// nothing otherwise. Outcome matching is case-insensitive.
pub fn settlement_value(shares: Decimal, side: &Side, winning_outcome: &str) -> Decimal {
    if side.matches_outcome(winning_outcome) {
        shares
    } else {
        Decimal::ZERO
    }
}

/// Squared-error calibration score for one forecast.
///
/// `confidence` is the probability the bet assigned to its chosen side.
/// For binary sides this equals the YES-space squared error exactly
/// (((1-c) - (1-a))^2 = (c - a)^2); named outcomes extend the same
/// formula. 0 is a certain and correct forecast, 1 a certain and wrong
/// one.
pub fn brier_score(confidence: Decimal, side: &Side, winning_outcome: &str) -> Decimal {
    let realized = if side.matches_outcome(winning_outcome) {
        Decimal::ONE
    } else {
        Decimal::ZERO
    };
    let err = confidence - realized;
    err * err
}

/// Profit/loss against the starting balance.
pub fn total_pnl(total_value: Decimal, initial_balance: Decimal) -> Decimal {
    total_value - initial_balance
}

/// P/L as a percentage of the starting balance; None for a non-positive
/// starting balance.
pub fn total_pnl_pct(total_value: Decimal, initial_balance: Decimal) -> Option<Decimal> {
    if initial_balance > Decimal::ZERO {
        Some((total_value - initial_balance) / initial_balance * Decimal::from(100))
    } else {
        None
    }
}

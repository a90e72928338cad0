//! Prompt protocol: the one wire format this system owns.
//!
//! The system rules text is rendered identically for every model in a
//! cohort; the benchmark's fairness claim depends on it. Bump
//! [`PROTOCOL_VERSION`] whenever any prompt text changes.

use rust_decimal::Decimal;

use crate::domain::{Agent, BetLimits, Market, MarketKind};
use crate::error::ParseError;
use crate::parser::truncate_response;

/// Stamped on cohorts as their methodology version.
pub const PROTOCOL_VERSION: &str = "v1";

/// One open position as presented to the model.
#[derive(Debug, Clone)]
pub struct PromptPosition {
    pub position_id: i64,
    pub question: String,
    pub side: String,
    pub shares: Decimal,
    pub avg_entry_price: Decimal,
    pub cost_basis: Decimal,
    pub current_price: Option<Decimal>,
    pub current_value: Option<Decimal>,
}

/// The system rules prompt. Deterministic: identical limits produce
/// byte-identical text.
pub fn system_prompt(limits: &BetLimits) -> String {
    let max_pct = (limits.max_bet_fraction * Decimal::from(100)).normalize();
    format!(
        r#"You are a trading agent in a simulated prediction-market competition. You hold a cash balance and place simulated bets on real prediction markets. Your goal is to grow your total portfolio value.

Rules:
- Minimum bet: {} per bet.
- Maximum bet: {}% of your current cash balance per bet.
- Bet only on markets listed in the prompt, referenced by their market_id.
- Sell only positions listed in the prompt, referenced by their position_id.
- Each market resolves to one winning outcome. Winning shares pay $1 each; losing shares pay $0.
- Buying at price p yields amount/p shares. On binary markets a NO bet is priced at 1 minus the YES price.

Respond with exactly one JSON object and no other text, in one of these three shapes:

To place one or more bets:
{{"action": "BET", "reasoning": "<your analysis>", "bets": [{{"market_id": "<id>", "side": "YES" | "NO" | "<outcome name>", "amount": <dollars>}}]}}

To sell part or all of one or more open positions:
{{"action": "SELL", "reasoning": "<your analysis>", "sells": [{{"position_id": <id>, "percentage": <1-100>}}]}}

To do nothing this cycle:
{{"action": "HOLD", "reasoning": "<your analysis>"}}

Only one action per response. If you want to exit positions and also open new ones, sell this cycle and bet on a later one."#,
        money(limits.min_bet),
        max_pct,
    )
}

/// The per-agent user prompt: portfolio state plus the markets open for
/// betting, in deterministic order.
pub fn portfolio_prompt(agent: &Agent, positions: &[PromptPosition], markets: &[Market]) -> String {
    let mut out = String::with_capacity(2048);

    out.push_str("Your portfolio:\n");
    out.push_str(&format!("- Cash balance: {}\n", money(agent.cash_balance)));
    out.push_str(&format!(
        "- Invested (cost basis of open positions): {}\n",
        money(agent.total_invested)
    ));

    if positions.is_empty() {
        out.push_str("- Open positions: none\n");
    } else {
        out.push_str("- Open positions:\n");
        for p in positions {
            let value = match p.current_value {
                Some(v) => format!("current value {}", money(v)),
                None => "current value unknown".to_string(),
            };
            let price = match p.current_price {
                Some(v) => format!(" (price {})", v.normalize()),
                None => String::new(),
            };
            out.push_str(&format!(
                "  [position_id={}] {} on \"{}\" - {} shares @ avg {}, cost {}, {}{}\n",
                p.position_id,
                p.side,
                p.question,
                p.shares.normalize(),
                money(p.avg_entry_price),
                money(p.cost_basis),
                value,
                price,
            ));
        }
    }

    out.push_str(&format!(
        "\nMarkets open for betting ({} by volume):\n",
        markets.len()
    ));
    for m in markets {
        out.push_str(&format!("  [market_id={}] \"{}\"", m.source_id, m.question));
        match m.kind {
            MarketKind::Binary => {
                match m.yes_price {
                    Some(p) => out.push_str(&format!(" - binary, YES price {}", p.normalize())),
                    None => out.push_str(" - binary, YES price unknown"),
                };
            }
            MarketKind::MultiOutcome => {
                let mut entries: Vec<_> = m.outcome_prices.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let listed = entries
                    .iter()
                    .map(|(name, price)| format!("{} {}", name, price.normalize()))
                    .collect::<Vec<_>>()
                    .join(", ");
                out.push_str(&format!(" - outcomes: {}", listed));
            }
        }
        match m.close_time {
            Some(t) => out.push_str(&format!(", closes {}", t.format("%Y-%m-%d %H:%M UTC"))),
            None => out.push_str(", no close date"),
        }
        out.push_str(&format!(", volume {}\n", money(m.volume)));
    }

    out.push_str("\nRespond with exactly one JSON object per the rules.\n");
    out
}

/// The amended prompt for the single retry after a malformed response:
/// original context plus the offending output and the specific error.
pub fn retry_prompt(user_prompt: &str, previous_raw: &str, error: &ParseError) -> String {
    format!(
        "{}\n---\nYour previous response could not be parsed.\n\nError: {}\n\nYour previous response was:\n{}\n\nRespond again with exactly one valid JSON object in one of the three shapes from the rules, with no surrounding text.\n",
        user_prompt,
        error,
        truncate_response(previous_raw),
    )
}

fn money(d: Decimal) -> String {
    format!("${:.2}", d)
}

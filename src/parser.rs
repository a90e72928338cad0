//! Turns raw model output into a validated trading instruction.
//!
//! Models wrap their JSON in markdown fences, quotes, or prose more often
//! than not, so extraction digs the decision object out before
//! validation. Pure: same text and limits in, same result out.

use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::domain::{BetInstruction, BetLimits, SellInstruction, Side, TradingAction};
use crate::error::ParseError;

/// Cap on raw response text echoed into logs and error records.
pub const MAX_LOGGED_RESPONSE: usize = 500;

/// Raw model output shortened for log and error contexts.
pub fn truncate_response(raw: &str) -> String {
    if raw.len() <= MAX_LOGGED_RESPONSE {
        return raw.to_string();
    }
    let mut end = MAX_LOGGED_RESPONSE;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated {} bytes]", &raw[..end], raw.len() - end)
}

/// Parse one model response into a trading instruction.
///
/// `cash_balance` and `limits` bound-check bet amounts; ownership and
/// market-level validity stay with the execution engine.
pub fn parse_decision(
    raw: &str,
    cash_balance: Decimal,
    limits: &BetLimits,
) -> std::result::Result<TradingAction, ParseError> {
    let value = extract_value(raw)?;
    let obj = value.as_object().ok_or(ParseError::NoJsonObject)?;

    let reasoning = obj
        .get("reasoning")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingReasoning)?
        .to_string();

    let action = obj
        .get("action")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingAction)?;

    match action.trim().to_uppercase().as_str() {
        "BET" => parse_bets(obj, cash_balance, limits, reasoning),
        "SELL" => parse_sells(obj, reasoning),
        "HOLD" => Ok(TradingAction::Hold { reasoning }),
        _ => Err(ParseError::UnknownAction(action.trim().to_string())),
    }
}

fn parse_bets(
    obj: &Map<String, Value>,
    cash_balance: Decimal,
    limits: &BetLimits,
    reasoning: String,
) -> std::result::Result<TradingAction, ParseError> {
    let list = obj
        .get("bets")
        .and_then(Value::as_array)
        .ok_or(ParseError::EmptyBets)?;
    if list.is_empty() {
        return Err(ParseError::EmptyBets);
    }

    let max_bet = limits.max_bet(cash_balance);
    let mut bets = Vec::with_capacity(list.len());
    for (i, entry) in list.iter().enumerate() {
        let index = i + 1;
        let bet = entry
            .as_object()
            .ok_or_else(|| invalid_bet(index, "entry is not an object"))?;
        let market_id = string_field(bet, "market_id")
            .ok_or_else(|| invalid_bet(index, "missing or empty market_id"))?;
        let side = string_field(bet, "side")
            .ok_or_else(|| invalid_bet(index, "missing or empty side"))?;
        let amount = decimal_field(bet, "amount")
            .ok_or_else(|| invalid_bet(index, "missing or non-numeric amount"))?;

        if amount < limits.min_bet {
            return Err(invalid_bet(
                index,
                format!(
                    "amount ${} is below the ${} minimum bet",
                    amount, limits.min_bet
                ),
            ));
        }
        if amount > max_bet {
            return Err(invalid_bet(
                index,
                format!("amount ${} exceeds the ${} maximum bet", amount, max_bet),
            ));
        }

        bets.push(BetInstruction {
            market_id,
            side: Side::parse(&side),
            amount,
        });
    }

    Ok(TradingAction::Bet { reasoning, bets })
}

fn parse_sells(
    obj: &Map<String, Value>,
    reasoning: String,
) -> std::result::Result<TradingAction, ParseError> {
    let list = obj
        .get("sells")
        .and_then(Value::as_array)
        .ok_or(ParseError::EmptySells)?;
    if list.is_empty() {
        return Err(ParseError::EmptySells);
    }

    let mut sells = Vec::with_capacity(list.len());
    for (i, entry) in list.iter().enumerate() {
        let index = i + 1;
        let sell = entry
            .as_object()
            .ok_or_else(|| invalid_sell(index, "entry is not an object"))?;
        let position_id = id_field(sell, "position_id")
            .ok_or_else(|| invalid_sell(index, "missing or non-numeric position_id"))?;
        let percentage = decimal_field(sell, "percentage")
            .ok_or_else(|| invalid_sell(index, "missing or non-numeric percentage"))?;

        if percentage < Decimal::ONE || percentage > Decimal::from(100) {
            return Err(invalid_sell(
                index,
                format!("percentage {} is outside 1-100", percentage),
            ));
        }

        sells.push(SellInstruction {
            position_id,
            percentage,
        });
    }

    Ok(TradingAction::Sell { reasoning, sells })
}

fn invalid_bet(index: usize, reason: impl Into<String>) -> ParseError {
    ParseError::InvalidBet {
        index,
        reason: reason.into(),
    }
}

fn invalid_sell(index: usize, reason: impl Into<String>) -> ParseError {
    ParseError::InvalidSell {
        index,
        reason: reason.into(),
    }
}

/// Non-empty trimmed string field.
fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    let s = obj.get(key)?.as_str()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Numeric field, accepting JSON numbers and numeric strings (models
/// emit both).
fn decimal_field(obj: &Map<String, Value>, key: &str) -> Option<Decimal> {
    match obj.get(key)? {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Integer identifier field, accepting JSON numbers and numeric strings.
fn id_field(obj: &Map<String, Value>, key: &str) -> Option<i64> {
    match obj.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Locate and parse the decision object inside the raw response.
fn extract_value(raw: &str) -> std::result::Result<Value, ParseError> {
    let stripped = strip_wrappers(raw);

    if stripped.starts_with('{') {
        // Trailing prose after the object is common; cut at the matching
        // close brace when there is one.
        let candidate = match balanced_span_end(stripped) {
            Some(end) => &stripped[..=end],
            None => stripped,
        };
        return serde_json::from_str(candidate)
            .map_err(|e| ParseError::InvalidJson(e.to_string()));
    }

    // Prose: scan every balanced object span for one carrying an
    // "action" key at the top level.
    let mut search_from = 0;
    while let Some(offset) = stripped[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(len) = balanced_span_end(&stripped[start..]) {
            let candidate = &stripped[start..=start + len];
            if candidate.contains("\"action\"") {
                if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                    if value.get("action").is_some() {
                        return Ok(value);
                    }
                }
            }
        }
        search_from = start + 1;
    }

    Err(ParseError::NoJsonObject)
}

/// Peel markdown code fences and wrapping quotes off the response.
fn strip_wrappers(text: &str) -> &str {
    let s = text.trim();

    // Fenced ```json block anywhere in the response
    if let Some(start) = s.find("```json") {
        if let Some(end) = s[start + 7..].find("```") {
            return s[start + 7..start + 7 + end].trim();
        }
    }

    // Generic fence at the start; drop a language identifier line
    if let Some(rest) = s.strip_prefix("```") {
        let body = match rest.find("```") {
            Some(end) => &rest[..end],
            None => rest,
        };
        let body = body.trim();
        if body.starts_with('{') {
            return body;
        }
        if let Some(newline) = body.find('\n') {
            return body[newline + 1..].trim();
        }
        return body;
    }

    // Wrapping quotes
    let bytes = s.as_bytes();
    if s.len() >= 2 {
        let first = bytes[0];
        let last = bytes[s.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return s[1..s.len() - 1].trim();
        }
    }

    s
}

/// Byte index of the close brace matching the object that starts at byte
/// 0, tracking string literals and escapes. None when unbalanced.
fn balanced_span_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in text.as_bytes().iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

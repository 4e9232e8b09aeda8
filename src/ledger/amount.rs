// Amount - Reading and writing coin amounts as people type them

use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Unit suffixes, each one a further power of 1000
const DECIMAL_POWERS: [&str; 7] = ["", "k", "m", "b", "t", "q", "p"];

/// Phrases that mean "my entire balance"
pub const GAMBLE_WORDS: [&str; 5] = ["all", "all in", "all-in", "everything", "yolo"];

pub const COIN_SYMBOL: char = '₡';

/// Rejection of a typed amount; the message is the reply to show the user
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("You can't put a price on this bot.")]
    Priceless,

    #[error("Memes are priceless.")]
    Memes,

    #[error("You don't have a positive int to spare.")]
    Broke,

    #[error("Unrecognized amount.")]
    Unrecognized,
}

#[derive(Clone, Copy, Debug)]
enum Rule {
    Memes,
    Integer,
    Hex,
    PositiveInt,
    HumanUnits,
}

fn rules() -> &'static [(Regex, Rule)] {
    static RULES: OnceLock<Vec<(Regex, Rule)>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (r"^(?:dank)? ?memes?$", Rule::Memes),
            (r"^(-?[0-9]+)$", Rule::Integer),
            (r"^(?:0x)?([0-9a-f]+)$", Rule::Hex),
            (r"^(?:a )?positive int$", Rule::PositiveInt),
            (r"^(-?[0-9.]+ ?[a-z]+)$", Rule::HumanUnits),
        ]
        .into_iter()
        .filter_map(|(pattern, rule)| Regex::new(pattern).ok().map(|re| (re, rule)))
        .collect()
    })
}

/// Turns free text into an amount of coins for a user holding `balance`.
///
/// Gamble words stake the whole balance. Decimal, hex and human units
/// ("50k", "1.5m") are understood. Signs are kept; callers decide what a
/// negative amount means.
pub fn parse_amount(text: &str, balance: i64, bot_name: &str) -> Result<i64, AmountError> {
    let text = text.trim().to_lowercase();
    if GAMBLE_WORDS.contains(&text.as_str()) {
        return Ok(balance);
    }
    if !bot_name.is_empty() && text == bot_name.to_lowercase() {
        return Err(AmountError::Priceless);
    }

    for (pattern, rule) in rules() {
        let Some(captures) = pattern.captures(&text) else {
            continue;
        };
        let matched = captures.get(1).map_or(text.as_str(), |m| m.as_str());
        return match rule {
            Rule::Memes => Err(AmountError::Memes),
            Rule::Integer => matched.parse().map_err(|_| AmountError::Unrecognized),
            Rule::Hex => i64::from_str_radix(matched, 16).map_err(|_| AmountError::Unrecognized),
            Rule::PositiveInt if balance < 1 => Err(AmountError::Broke),
            Rule::PositiveInt => Ok(rand::thread_rng().gen_range(1..=balance)),
            Rule::HumanUnits => unformat_coins(matched)
                .filter(|value| value.is_finite() && value.abs() < i64::MAX as f64)
                .map(|value| value as i64)
                .ok_or(AmountError::Unrecognized),
        };
    }
    Err(AmountError::Unrecognized)
}

/// Renders an amount with the coin symbol, either in full with thousands
/// separators or abbreviated to three significant digits.
pub fn format_coins(amount: i64, abbreviate: bool) -> String {
    if !abbreviate {
        return format!("{}{}", group_thousands(amount), COIN_SYMBOL);
    }

    let mut value = amount as f64;
    let mut prefix = "";
    for (power, unit) in DECIMAL_POWERS.iter().enumerate() {
        value = amount as f64 / 1e3_f64.powi(power as i32);
        prefix = unit;
        if value.round().abs() < 1e3 {
            break;
        }
    }

    if prefix.is_empty() {
        return format!("{}{}", value.round() as i64, COIN_SYMBOL);
    }
    let magnitude = value.abs().round().max(1.0).log10() as usize;
    let decimals = 2usize.saturating_sub(magnitude);
    format!("{:.*}{}{}", decimals, value, prefix, COIN_SYMBOL)
}

/// Reads a human amount like "1.5m" or "50 k". Unknown units count as 1.
pub fn unformat_coins(text: &str) -> Option<f64> {
    let text = text.trim().to_lowercase();
    let text = text.trim_end_matches(COIN_SYMBOL);
    let split = text
        .find(|c: char| !"0123456789eE-+.".contains(c))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let number: f64 = number.parse().ok()?;
    let scale = DECIMAL_POWERS
        .iter()
        .position(|candidate| *candidate == unit.trim())
        .map_or(1.0, |power| 1e3_f64.powi(power as i32));
    Some(number * scale)
}

fn group_thousands(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if amount < 0 {
        grouped.push('-');
    }
    for (i, digit) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped
}

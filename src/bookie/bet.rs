// Bet - A user's stake on a game outcome

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    #[default]
    For,
    Against,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub user: String,
    pub amount: i64,
    #[serde(default)]
    pub direction: Direction,
    pub target: String,
    /// Only this resolver may settle the bet; empty means anyone
    #[serde(default)]
    pub resolver: String,
    /// Set by the bookie when the bet is placed
    #[serde(default)]
    pub game: String,
    /// Game specific payload
    #[serde(default)]
    pub data: Value,
}

impl Bet {
    pub fn new(user: &str, amount: i64, direction: Direction, target: &str) -> Self {
        Self {
            user: user.to_string(),
            amount,
            direction,
            target: target.to_string(),
            resolver: String::new(),
            game: String::new(),
            data: Value::Null,
        }
    }

    pub fn with_resolver(mut self, resolver: &str) -> Self {
        self.resolver = resolver.to_string();
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Whether `resolver` may settle this bet
    pub fn resolvable_by(&self, resolver: &str) -> bool {
        self.resolver.is_empty() || self.resolver == resolver
    }
}

/// A game's outstanding bets, keyed by user
pub type BetTable = BTreeMap<String, Vec<Bet>>;

// Game - What the bookie needs from a game and from the item store

use serde_json::Value;

use super::bet::{Bet, BetTable};

/// What a winner receives
#[derive(Clone, Debug, PartialEq)]
pub enum Payout {
    Coins(i64),
    Item(Value),
}

/// The result of settling a game's bets
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Settlement {
    pub winners: Vec<(String, Payout)>,
    /// Bets that stay open for a later settlement
    pub unused_bets: BetTable,
    /// Messages for the channel, in order
    pub notifications: Vec<String>,
}

pub trait Game: Send + Sync {
    /// Extra input the game needs to decide outcomes
    type SettleArgs;

    /// Unique name; also the storage key of the game's bets
    fn name(&self) -> &str;

    /// Validates and may adjust a bet before it is placed
    fn take_bet(&self, bet: &mut Bet) -> bool;

    fn format_bet(&self, bet: &Bet) -> String;

    /// Limit applied to a merged bet. `pool` holds every other user's bets.
    fn cap_bet(&self, bet: &Bet, pool: &BetTable) -> i64 {
        let _ = pool;
        bet.amount
    }

    /// Decides winners among `pool`. The bookie performs the payouts.
    fn settle_bets(&self, pool: BetTable, args: &Self::SettleArgs) -> Settlement;
}

/// Where item payouts go
pub trait Inventory: Send + Sync {
    fn add_item(&self, user: &str, item: &Value) -> bool;
}

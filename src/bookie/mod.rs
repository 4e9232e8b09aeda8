// Bookie module - WAGERS
// Bet tables per game, atomic bet placement and settlement payouts

mod bet;
#[allow(clippy::module_inception)]
mod bookie;
mod game;

pub use bet::{Bet, BetTable, Direction};
pub use bookie::{Bookie, BookieError, BET_SUBKEY};
pub use game::{Game, Inventory, Payout, Settlement};

// Bookie - Takes bets into a per-game table and settles them through the bank
//
// A game's bets live as one JSON table under (game name, "bets"). Placing a
// bet updates that table and charges the user in the same transaction.
// Settling rewrites the table atomically and pays winners afterwards.

use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use super::bet::{Bet, BetTable};
use super::game::{Game, Inventory, Payout, Settlement};
use crate::ledger::{Bank, BankError, TransferOutcome};
use crate::storage::{Store, StoreError};

pub const BET_SUBKEY: &str = "bets";

#[derive(Error, Debug)]
pub enum BookieError {
    #[error(transparent)]
    Bank(#[from] BankError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

enum Placement {
    Placed,
    Rejected,
    Insufficient { balance: i64 },
}

pub struct Bookie<S: Store> {
    store: Arc<S>,
    bank: Arc<Bank<S>>,
    inventory: Arc<dyn Inventory>,
}

impl<S: Store> Bookie<S> {
    pub fn new(bank: Arc<Bank<S>>, inventory: Arc<dyn Inventory>) -> Self {
        Self {
            store: bank.store().clone(),
            bank,
            inventory,
        }
    }

    pub fn bank(&self) -> &Arc<Bank<S>> {
        &self.bank
    }

    fn bookie_account(&self) -> &str {
        &self.bank.config().bookie_account
    }

    fn load_bets(&self, game: &str, tx: Option<&mut S::Tx>) -> Result<BetTable, StoreError> {
        Ok(self
            .store
            .get_json_value(game, BET_SUBKEY, tx)?
            .unwrap_or_default())
    }

    /// Outstanding bets of `game`, optionally only one user's or one
    /// resolver's. Without filters the stored table comes back as is;
    /// filtering by resolver omits users left without bets.
    pub fn lookup_bets(
        &self,
        game: &str,
        user: Option<&str>,
        resolver: Option<&str>,
    ) -> Result<BetTable, BookieError> {
        let mut bets = self.load_bets(game, None)?;
        if let Some(user) = user {
            bets.retain(|bettor, _| bettor == user);
        }
        if let Some(resolver) = resolver {
            for user_bets in bets.values_mut() {
                user_bets.retain(|bet| bet.resolver == resolver);
            }
            bets.retain(|_, user_bets| !user_bets.is_empty());
        }
        Ok(bets)
    }

    /// Places `bet` on `game`, charging the user for it.
    ///
    /// A bet on a target the user already bet on replaces the old one and
    /// only the difference is charged. With `merge` the new amount is added
    /// to the old one first, subject to the game's cap. Returns `false` when
    /// the replacement would lower the stake or the user cannot pay, the
    /// latter also costing an overdraft fee.
    pub fn place_bet<G: Game>(&self, game: &G, bet: Bet, merge: bool) -> Result<bool, BookieError> {
        if bet.amount <= 0 {
            warn!(user = %bet.user, amount = bet.amount, "Refusing non-positive bet");
            return Ok(false);
        }

        let name = format!("PlaceBet {} on {}", bet.user, game.name());
        let placement = self
            .store
            .run_in_transaction(&name, |tx| self.place_bet_in(game, &bet, merge, tx))?;

        match placement {
            Placement::Placed => Ok(true),
            Placement::Rejected => Ok(false),
            Placement::Insufficient { balance } => {
                self.bank.charge_overdraft_fee(&bet.user, balance)?;
                Ok(false)
            }
        }
    }

    fn place_bet_in<G: Game>(
        &self,
        game: &G,
        bet: &Bet,
        merge: bool,
        tx: &mut S::Tx,
    ) -> Result<Placement, BookieError> {
        let mut bet = bet.clone();
        bet.game = game.name().to_string();

        let mut bets = self.load_bets(game.name(), Some(&mut *tx))?;
        let prior = bets.get(&bet.user).and_then(|user_bets| {
            user_bets
                .iter()
                .position(|b| b.target == bet.target)
                .map(|i| (i, user_bets[i].clone()))
        });

        if let (true, Some((_, prior_bet))) = (merge, &prior) {
            info!(user = %bet.user, game = game.name(), target = %bet.target, "Merging with prior bet");
            let Some(merged) = bet.amount.checked_add(prior_bet.amount) else {
                warn!(user = %bet.user, amount = bet.amount, prior = prior_bet.amount, "Merged bet would overflow");
                return Ok(Placement::Rejected);
            };
            bet.amount = merged;
            let mut pool = bets.clone();
            pool.remove(&bet.user);
            bet.amount = game.cap_bet(&bet, &pool);
        }

        let prior_amount = prior.as_ref().map_or(0, |(_, b)| b.amount);
        let net_amount = bet.amount - prior_amount;
        if net_amount < 0 {
            info!(user = %bet.user, net_amount, "Replacement would take money off the table");
            return Ok(Placement::Rejected);
        }

        let details = match &prior {
            Some((_, prior_bet)) => format!(
                "Bet updated. Replaced {} with {}",
                game.format_bet(prior_bet),
                game.format_bet(&bet)
            ),
            None => format!("Bet placed. {}", game.format_bet(&bet)),
        };

        match self
            .bank
            .transfer(&bet.user, self.bookie_account(), net_amount, &details, false, tx)?
        {
            TransferOutcome::Completed => {}
            TransferOutcome::InsufficientFunds { balance } => {
                return Ok(Placement::Insufficient { balance })
            }
            TransferOutcome::Rejected => return Ok(Placement::Rejected),
        }

        let user_bets = bets.entry(bet.user.clone()).or_default();
        if let Some((index, _)) = prior {
            user_bets.remove(index);
        }
        user_bets.push(bet);
        self.store
            .set_json_value(game.name(), BET_SUBKEY, &bets, Some(tx))?;
        Ok(Placement::Placed)
    }

    /// Settles every bet on `game` that `resolver` may settle and pays the
    /// winners. Bets owned by other resolvers, and bets the game leaves
    /// unused, stay in the table. Returns the game's notifications.
    pub fn settle_bets<G: Game>(
        &self,
        game: &G,
        resolver: &str,
        args: &G::SettleArgs,
    ) -> Result<Vec<String>, BookieError> {
        let name = format!("SettleBets {}", game.name());
        let settlement = self
            .store
            .run_in_transaction(&name, |tx| self.settle_in(game, resolver, args, tx))?;
        let Some(settlement) = settlement else {
            return Ok(Vec::new());
        };

        let bookie = self.bookie_account();
        for (winner, payout) in settlement.winners {
            match payout {
                Payout::Coins(amount) => {
                    let paid = self.bank.process_payment(
                        bookie,
                        &[winner.as_str()],
                        amount,
                        "Gambling payout",
                        true,
                        None,
                    )?;
                    if !paid {
                        error!(winner = %winner, amount, game = game.name(), "Couldn't pay winnings");
                    }
                }
                Payout::Item(item) => {
                    if !self.inventory.add_item(&winner, &item) {
                        error!(winner = %winner, game = game.name(), "Couldn't award item");
                    }
                }
            }
        }
        Ok(settlement.notifications)
    }

    fn settle_in<G: Game>(
        &self,
        game: &G,
        resolver: &str,
        args: &G::SettleArgs,
        tx: &mut S::Tx,
    ) -> Result<Option<Settlement>, BookieError> {
        let bets = self.load_bets(game.name(), Some(&mut *tx))?;
        if bets.is_empty() {
            info!(game = game.name(), "No bets to settle");
            return Ok(None);
        }

        let mut pool = BetTable::new();
        let mut foreign = BetTable::new();
        for (user, user_bets) in bets {
            let (ours, theirs): (Vec<Bet>, Vec<Bet>) = user_bets
                .into_iter()
                .partition(|bet| bet.resolvable_by(resolver));
            if !ours.is_empty() {
                pool.insert(user.clone(), ours);
            }
            if !theirs.is_empty() {
                foreign.insert(user, theirs);
            }
        }
        if pool.is_empty() {
            info!(game = game.name(), resolver, "No bets for this resolver");
            return Ok(None);
        }

        let mut settlement = game.settle_bets(pool, args);
        for (user, user_bets) in foreign {
            settlement.unused_bets.entry(user).or_default().extend(user_bets);
        }
        settlement.unused_bets.retain(|_, user_bets| !user_bets.is_empty());
        self.store
            .set_json_value(game.name(), BET_SUBKEY, &settlement.unused_bets, Some(tx))?;
        Ok(Some(settlement))
    }

    /// Fines `user` in favour of the bookie; fines may overdraw
    pub fn fine_user(&self, user: &str, amount: i64, details: &str) -> Result<bool, BookieError> {
        Ok(self.bank.fine_user(user, amount, details)?)
    }
}

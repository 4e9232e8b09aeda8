// Bank - Balances, payments and history for the virtual currency
//
// Balances are integers under the "bank:balance" subkey, histories are
// most-recent-first lists under "bank:transaction". Every payment leg debits,
// credits and records both sides inside one transaction.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::amount::{self, AmountError};
use super::entry::LedgerEntry;
use crate::config::BankConfig;
use crate::storage::{Store, StoreError};

pub const BALANCE_SUBKEY: &str = "bank:balance";
pub const TRANSACTION_SUBKEY: &str = "bank:transaction";
/// Legs of queued payments that already settled, keyed by request id
pub const SETTLED_SUBKEY: &str = "bank:settled";

/// Counterparty recorded on minted coins
pub const MINT_SOURCE: &str = "Ether";

#[derive(Error, Debug)]
pub enum BankError {
    #[error("Storage failure: {0}")]
    Store(#[from] StoreError),

    #[error("Got {weights} weights for {merchants} merchants")]
    WeightMismatch { merchants: usize, weights: usize },

    #[error("Merchant weights must be finite, non-negative and not all zero")]
    InvalidWeights,
}

/// Result of a single payment leg
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed,
    InsufficientFunds { balance: i64 },
    /// Negative amounts, and amounts that would overflow a balance, are
    /// never moved
    Rejected,
}

/// Outcome of reading a typed amount
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedAmount {
    Amount(i64),
    Rejected(AmountError),
}

/// A payment waiting in the durable payment queue
///
/// The id lets a replayed queue batch recognise legs that already settled.
/// Payloads without one get a fresh id when read and are not protected
/// against replays.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    #[serde(default = "new_request_id")]
    pub id: String,
    pub customer: String,
    pub merchants: Vec<String>,
    pub amount: i64,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub can_overdraft: bool,
    #[serde(default)]
    pub weights: Option<Vec<f64>>,
}

fn new_request_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

impl PaymentRequest {
    pub fn new(customer: &str, merchants: &[&str], amount: i64) -> Self {
        Self {
            id: new_request_id(),
            customer: customer.to_string(),
            merchants: merchants.iter().map(|m| m.to_string()).collect(),
            amount,
            details: String::new(),
            can_overdraft: false,
            weights: None,
        }
    }

    pub fn with_details(mut self, details: &str) -> Self {
        self.details = details.to_string();
        self
    }

    pub fn with_overdraft(mut self, can_overdraft: bool) -> Self {
        self.can_overdraft = can_overdraft;
        self
    }

    pub fn with_weights(mut self, weights: Option<Vec<f64>>) -> Self {
        self.weights = weights;
        self
    }
}

/// True for `"<nick>:<account>"` when `account` is given, otherwise for any
/// account containing a ':'.
pub fn is_sub_account(user: &str, account: Option<&str>) -> bool {
    match account {
        Some(account) => user
            .strip_suffix(account)
            .is_some_and(|rest| rest.ends_with(':')),
        None => user.contains(':'),
    }
}

/// Splits `total` by `weights` (already normalized). Every share is rounded
/// but capped by what is left, and the last share takes the remainder, so
/// the shares always add up to `total`.
pub fn split_amount(total: i64, weights: &[f64]) -> Vec<i64> {
    let mut shares = Vec::with_capacity(weights.len());
    let mut assigned = 0i64;
    for (i, weight) in weights.iter().enumerate() {
        let remaining = total - assigned;
        let share = if i + 1 == weights.len() {
            remaining
        } else {
            ((total as f64 * weight).round() as i64).clamp(0, remaining)
        };
        assigned += share;
        shares.push(share);
    }
    shares
}

fn normalize_weights(merchants: usize, weights: Option<&[f64]>) -> Result<Vec<f64>, BankError> {
    let weights = match weights {
        Some(weights) if weights.len() != merchants => {
            return Err(BankError::WeightMismatch {
                merchants,
                weights: weights.len(),
            });
        }
        Some(weights) => weights.to_vec(),
        None => vec![1.0; merchants],
    };
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(BankError::InvalidWeights);
    }
    let sum: f64 = weights.iter().sum();
    if sum <= 0.0 {
        return Err(BankError::InvalidWeights);
    }
    Ok(weights.into_iter().map(|w| w / sum).collect())
}

/// What happened to one leg of a payment
enum LegOutcome {
    Paid {
        outcome: TransferOutcome,
        fee: Option<i64>,
    },
    Replayed {
        completed: bool,
    },
}

pub struct Bank<S: Store> {
    store: Arc<S>,
    config: BankConfig,
}

impl<S: Store> Bank<S> {
    pub fn new(store: Arc<S>, config: BankConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &BankConfig {
        &self.config
    }

    /// Reserved accounts belong to the bot and are left out of "plebs" views
    pub fn is_reserved(&self, account: &str) -> bool {
        self.config.reserved_accounts().contains(&account)
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Display balance. Not transactional; a malformed stored value reads as 0.
    pub fn get_balance(&self, user: &str) -> Result<i64, BankError> {
        let raw = self.store.get_value(user, BALANCE_SUBKEY, None)?;
        Ok(self.lenient_balance(user, raw.as_deref()))
    }

    fn lenient_balance(&self, user: &str, raw: Option<&str>) -> i64 {
        match raw {
            None | Some("") => 0,
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(user, value = raw, "Malformed balance, reading as 0");
                0
            }),
        }
    }

    /// Balance read inside `tx`; the key joins its watch set
    fn balance_in(&self, user: &str, tx: &mut S::Tx) -> Result<i64, BankError> {
        match self.store.get_value(user, BALANCE_SUBKEY, Some(tx))?.as_deref() {
            None | Some("") => Ok(0),
            Some(raw) => raw.trim().parse().map_err(|_| {
                BankError::Store(StoreError::NotAnInteger {
                    key: format!("{}:{}", BALANCE_SUBKEY, user),
                    value: raw.to_string(),
                })
            }),
        }
    }

    /// Balances of every account, optionally without reserved accounts and
    /// optionally only sub-accounts of `account`.
    pub fn get_user_balances(
        &self,
        plebs_only: bool,
        account: Option<&str>,
    ) -> Result<BTreeMap<String, i64>, BankError> {
        let entries = self.store.get_subkey(BALANCE_SUBKEY, None)?;
        Ok(entries
            .into_iter()
            .filter(|(user, _)| !(plebs_only && self.is_reserved(user)))
            .filter(|(user, _)| account.map_or(true, |a| is_sub_account(user, Some(a))))
            .map(|(user, raw)| {
                let balance = self.lenient_balance(&user, Some(&raw));
                (user, balance)
            })
            .collect())
    }

    /// (number of accounts, coins in circulation)
    pub fn get_bank_stats(
        &self,
        plebs_only: bool,
        account: Option<&str>,
    ) -> Result<(usize, i64), BankError> {
        let balances = self.get_user_balances(plebs_only, account)?;
        Ok((balances.len(), balances.values().sum()))
    }

    /// The most recent ledger entries for `user`, newest first
    pub fn get_transactions(&self, user: &str) -> Result<Vec<LedgerEntry>, BankError> {
        Ok(self.store.get_historical_values(
            user,
            TRANSACTION_SUBKEY,
            self.config.transactions_shown,
            None,
        )?)
    }

    /// Reads a typed amount for `user`, staking their balance on gamble words
    pub fn parse_amount(&self, user: &str, text: &str) -> Result<ParsedAmount, BankError> {
        let balance = self.get_balance(user)?;
        Ok(
            match amount::parse_amount(text, balance, &self.config.bot_name) {
                Ok(value) => ParsedAmount::Amount(value),
                Err(err) => ParsedAmount::Rejected(err),
            },
        )
    }

    // ========================================================================
    // PAYMENTS
    // ========================================================================

    /// Pays `total` from `customer`, split across `merchants`.
    ///
    /// Each merchant is paid in its own transaction. A leg that fails for
    /// lack of funds charges the customer an overdraft fee and the method
    /// returns `false`, but legs already paid stay paid.
    pub fn process_payment(
        &self,
        customer: &str,
        merchants: &[&str],
        total: i64,
        details: &str,
        can_overdraft: bool,
        weights: Option<&[f64]>,
    ) -> Result<bool, BankError> {
        self.pay(customer, merchants, total, details, can_overdraft, weights, None)
    }

    /// With a `request_id`, every leg records its outcome under that id in
    /// its own transaction and a replayed leg returns the recorded outcome
    /// instead of paying again.
    #[allow(clippy::too_many_arguments)]
    fn pay(
        &self,
        customer: &str,
        merchants: &[&str],
        total: i64,
        details: &str,
        can_overdraft: bool,
        weights: Option<&[f64]>,
        request_id: Option<&str>,
    ) -> Result<bool, BankError> {
        if total < 0 {
            warn!(customer, total, "Refusing negative payment");
            return Ok(false);
        }
        if merchants.is_empty() {
            warn!(customer, total, "Payment has no merchants");
            return Ok(false);
        }

        let weights = normalize_weights(merchants.len(), weights)?;
        let shares = split_amount(total, &weights);

        let mut success = true;
        for (leg, (merchant, share)) in merchants.iter().zip(shares).enumerate() {
            if share == 0 {
                continue;
            }
            let name = format!("PAY {} {} -> {}", share, customer, merchant);
            let outcome = self.store.run_in_transaction::<_, BankError, _>(&name, |tx| {
                let mut settled: BTreeMap<String, bool> = match request_id {
                    Some(id) => self
                        .store
                        .get_json_value(id, SETTLED_SUBKEY, Some(&mut *tx))?
                        .unwrap_or_default(),
                    None => BTreeMap::new(),
                };
                if let Some(&completed) = settled.get(&leg.to_string()) {
                    return Ok(LegOutcome::Replayed { completed });
                }

                let outcome = self.transfer(customer, merchant, share, details, can_overdraft, tx)?;
                let fee = match outcome {
                    TransferOutcome::InsufficientFunds { balance } => {
                        Some(self.overdraft_fee_in(customer, balance, tx)?)
                    }
                    _ => None,
                };
                if let Some(id) = request_id {
                    settled.insert(leg.to_string(), outcome == TransferOutcome::Completed);
                    self.store.set_json_value(id, SETTLED_SUBKEY, &settled, Some(tx))?;
                }
                Ok(LegOutcome::Paid { outcome, fee })
            })?;

            match outcome {
                LegOutcome::Paid { outcome: TransferOutcome::Completed, .. } => {
                    info!(customer, merchant = *merchant, amount = share, details, "Payment complete");
                }
                LegOutcome::Paid { outcome: TransferOutcome::InsufficientFunds { balance }, fee } => {
                    info!(customer, merchant = *merchant, amount = share, balance, fee, "Insufficient funds");
                    success = false;
                }
                LegOutcome::Paid { outcome: TransferOutcome::Rejected, .. } => {
                    warn!(customer, merchant = *merchant, amount = share, "Payment leg rejected");
                    success = false;
                }
                LegOutcome::Replayed { completed } => {
                    debug!(customer, merchant = *merchant, leg, completed, "Leg already settled");
                    success &= completed;
                }
            }
        }
        Ok(success)
    }

    /// One payment leg inside a caller's transaction: debit, credit and a
    /// ledger entry on each side.
    ///
    /// Paying yourself only checks funds.
    pub fn transfer(
        &self,
        customer: &str,
        merchant: &str,
        amount: i64,
        details: &str,
        can_overdraft: bool,
        tx: &mut S::Tx,
    ) -> Result<TransferOutcome, BankError> {
        if amount < 0 {
            return Ok(TransferOutcome::Rejected);
        }
        if amount == 0 {
            return Ok(TransferOutcome::Completed);
        }

        let balance = self.balance_in(customer, tx)?;
        if !can_overdraft && balance < amount {
            return Ok(TransferOutcome::InsufficientFunds { balance });
        }
        if customer == merchant {
            debug!(customer, amount, "Self payment, nothing to move");
            return Ok(TransferOutcome::Completed);
        }

        let merchant_balance = self.balance_in(merchant, tx)?;
        let (Some(debited), Some(credited)) = (
            balance.checked_sub(amount),
            merchant_balance.checked_add(amount),
        ) else {
            warn!(customer, merchant, amount, "Payment would overflow a balance");
            return Ok(TransferOutcome::Rejected);
        };

        self.store
            .set_value(customer, BALANCE_SUBKEY, &debited.to_string(), Some(&mut *tx))?;
        self.record(customer, &LedgerEntry::new(-amount, merchant, details), tx)?;
        self.store
            .set_value(merchant, BALANCE_SUBKEY, &credited.to_string(), Some(&mut *tx))?;
        self.record(merchant, &LedgerEntry::new(amount, customer, details), tx)?;
        Ok(TransferOutcome::Completed)
    }

    /// Credits `amount` to `account` from outside the economy
    pub fn deposit(
        &self,
        account: &str,
        amount: i64,
        source: &str,
        details: &str,
        tx: &mut S::Tx,
    ) -> Result<i64, BankError> {
        let balance = self
            .store
            .update_value(account, BALANCE_SUBKEY, amount, Some(&mut *tx))?;
        self.record(account, &LedgerEntry::new(amount, source, details), tx)?;
        Ok(balance)
    }

    fn record(&self, user: &str, entry: &LedgerEntry, tx: &mut S::Tx) -> Result<(), BankError> {
        self.store.prepend_value(
            user,
            TRANSACTION_SUBKEY,
            entry,
            Some(self.config.history_length),
            Some(tx),
        )?;
        Ok(())
    }

    /// Charges `user` for a payment their `balance` could not cover.
    /// Returns the fee.
    pub fn charge_overdraft_fee(&self, user: &str, balance: i64) -> Result<i64, BankError> {
        let name = format!("OVERDRAFT {}", user);
        self.store
            .run_in_transaction(&name, |tx| self.overdraft_fee_in(user, balance, tx))
    }

    fn overdraft_fee_in(&self, user: &str, balance: i64, tx: &mut S::Tx) -> Result<i64, BankError> {
        let percent_fee = (balance as f64 * self.config.overdraft_fee_percent) as i64;
        let fee = percent_fee.max(self.config.min_overdraft_fee);
        warn!(user, balance, fee, "Charging overdraft fee");
        let fee_account = self.config.fee_account.as_str();
        self.transfer(user, fee_account, fee, "Overdraft fee", true, tx)?;
        Ok(fee)
    }

    /// Takes `amount` from `user` for the bookie, even into debt
    pub fn fine_user(&self, user: &str, amount: i64, details: &str) -> Result<bool, BankError> {
        let details = format!("Fine: {}", details);
        let bookie = self.config.bookie_account.as_str();
        self.process_payment(user, &[bookie], amount, &details, true, None)
    }

    /// Runs a payment request right away
    pub fn process_request(&self, request: &PaymentRequest) -> Result<bool, BankError> {
        let merchants: Vec<&str> = request.merchants.iter().map(String::as_str).collect();
        self.process_payment(
            &request.customer,
            &merchants,
            request.amount,
            &request.details,
            request.can_overdraft,
            request.weights.as_deref(),
        )
    }

    /// Handler for the durable payment queue.
    ///
    /// Legs settle at most once per request id even when the queue batch is
    /// replayed; the settlement record is dropped through `queue_tx`, so it
    /// disappears exactly when the dequeue commits. Always acknowledges:
    /// malformed payloads are dropped and failed payments are final.
    pub fn settle_queued(&self, payload: &Value, queue_tx: &mut S::Tx) -> Result<bool, BankError> {
        let request: PaymentRequest = match serde_json::from_value(payload.clone()) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, %payload, "Dropping malformed payment request");
                return Ok(true);
            }
        };

        let merchants: Vec<&str> = request.merchants.iter().map(String::as_str).collect();
        let paid = self.pay(
            &request.customer,
            &merchants,
            request.amount,
            &request.details,
            request.can_overdraft,
            request.weights.as_deref(),
            Some(&request.id),
        )?;
        if !paid {
            info!(request = %request.id, customer = %request.customer, "Queued payment failed");
        }

        self.store
            .delete_value(&request.id, SETTLED_SUBKEY, Some(queue_tx))?;
        Ok(true)
    }

    // ========================================================================
    // MINTING
    // ========================================================================

    /// Tops up the mint account when it holds less than its reserve share of
    /// the coins users hold. Returns the amount minted, if any.
    pub fn mint_new_coins(&self) -> Result<Option<i64>, BankError> {
        let mint_account = self.config.mint_account.as_str();
        let mint_balance = self.get_balance(mint_account)?;
        let (users, circulation) = self.get_bank_stats(true, None)?;

        let reserve = (circulation as f64 * self.config.mint_reserve_fraction) as i64;
        if mint_balance >= reserve {
            debug!(mint_balance, circulation, "Mint holds its reserve, not minting");
            return Ok(None);
        }

        let scaled = if circulation > 1 {
            ((circulation as f64).log2() * users as f64 * self.config.mint_scale as f64) as i64
        } else {
            0
        };
        let amount = scaled.max(self.config.min_mint);

        let balance = self.store.run_in_transaction("MINT", |tx| {
            self.deposit(mint_account, amount, MINT_SOURCE, "Minting", tx)
        })?;
        info!(amount, balance, circulation, users, "Minted new coins");
        Ok(Some(amount))
    }
}

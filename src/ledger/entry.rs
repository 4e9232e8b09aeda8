// Ledger Entry - One side of a payment as recorded in account history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Amount is signed from the account owner's point of view: negative for
/// money leaving the account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub amount: i64,
    pub counterparty: String,
    pub details: String,
    pub create_time: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(amount: i64, counterparty: &str, details: &str) -> Self {
        Self {
            amount,
            counterparty: counterparty.to_string(),
            details: details.to_string(),
            create_time: Utc::now(),
        }
    }

    pub fn is_credit(&self) -> bool {
        self.amount > 0
    }
}

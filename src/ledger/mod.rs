// Ledger module - THE BANK
// Balances, payments, minting and per-account history

mod amount;
mod bank;
mod entry;

pub use amount::{format_coins, parse_amount, unformat_coins, AmountError, GAMBLE_WORDS};
pub use bank::{
    is_sub_account, split_amount, Bank, BankError, ParsedAmount, PaymentRequest,
    TransferOutcome, BALANCE_SUBKEY, MINT_SOURCE, SETTLED_SUBKEY, TRANSACTION_SUBKEY,
};
pub use entry::LedgerEntry;

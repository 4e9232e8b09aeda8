// Minting Tests

use hypecoin::config::BankConfig;
use hypecoin::ledger::{Bank, MINT_SOURCE};
use hypecoin::storage::{OptimisticStore, Store};
use std::sync::Arc;

fn create_bank() -> Bank<OptimisticStore> {
    Bank::new(Arc::new(OptimisticStore::in_memory()), BankConfig::default())
}

fn fund(bank: &Bank<OptimisticStore>, user: &str, amount: i64) {
    bank.store()
        .run_in_transaction("fund", |tx| bank.deposit(user, amount, "Test", "Funding", tx))
        .unwrap();
}

#[test]
fn test_empty_economy_mints_nothing() {
    let bank = create_bank();

    assert_eq!(bank.mint_new_coins().unwrap(), None);
    assert_eq!(bank.get_balance("hypebank").unwrap(), 0);
}

#[test]
fn test_small_economy_mints_minimum() {
    let bank = create_bank();
    fund(&bank, "alice", 10);

    // log2(10) * 1 user * 1000 is below the minimum
    assert_eq!(bank.mint_new_coins().unwrap(), Some(5000));
    assert_eq!(bank.get_balance("hypebank").unwrap(), 5000);

    let entry = &bank.get_transactions("hypebank").unwrap()[0];
    assert_eq!(entry.counterparty, MINT_SOURCE);
    assert_eq!(entry.details, "Minting");

    // The mint now holds far more than a quarter of the circulation
    assert_eq!(bank.mint_new_coins().unwrap(), None);
}

#[test]
fn test_mint_scales_with_circulation() {
    let bank = create_bank();
    fund(&bank, "alice", 100_000);

    // log2(100000) * 1 user * 1000
    assert_eq!(bank.mint_new_coins().unwrap(), Some(16_609));
}

#[test]
fn test_mint_stops_at_reserve() {
    let bank = create_bank();
    fund(&bank, "alice", 100_000);
    fund(&bank, "hypebank", 25_000);

    assert_eq!(bank.mint_new_coins().unwrap(), None);
    assert_eq!(bank.get_balance("hypebank").unwrap(), 25_000);
}

#[test]
fn test_minted_coins_are_conserved_through_payments() {
    let bank = create_bank();
    fund(&bank, "alice", 1000);
    let minted = bank.mint_new_coins().unwrap().unwrap();

    bank.process_payment("hypebank", &["alice", "bob"], 3000, "Welcome", false, None)
        .unwrap();
    bank.process_payment("alice", &["carol"], 700, "Rent", false, None)
        .unwrap();
    bank.process_payment("carol", &["dave"], 5000, "Too much", false, None)
        .unwrap();

    let (_, total) = bank.get_bank_stats(false, None).unwrap();
    assert_eq!(total, 1000 + minted);
}

// Amount Parsing Tests

use hypecoin::config::BankConfig;
use hypecoin::ledger::{parse_amount, AmountError, Bank, ParsedAmount};
use hypecoin::storage::{OptimisticStore, Store};
use std::sync::Arc;

#[test]
fn test_gamble_words_stake_everything() {
    for word in ["all", "ALL", "everything", "all in", "all-in", " yolo "] {
        assert_eq!(parse_amount(word, 1234, "hypebot"), Ok(1234), "{word}");
    }
}

#[test]
fn test_plain_and_hex_integers() {
    assert_eq!(parse_amount("42", 0, "hypebot"), Ok(42));
    assert_eq!(parse_amount("-7", 0, "hypebot"), Ok(-7));
    assert_eq!(parse_amount("0x1f", 0, "hypebot"), Ok(31));
    assert_eq!(parse_amount("ff", 0, "hypebot"), Ok(255));
}

#[test]
fn test_human_units() {
    assert_eq!(parse_amount("50k", 0, "hypebot"), Ok(50_000));
    assert_eq!(parse_amount("1.5m", 0, "hypebot"), Ok(1_500_000));
    assert_eq!(parse_amount("2 b", 0, "hypebot"), Ok(2_000_000_000));
    assert_eq!(parse_amount("3 bucks", 0, "hypebot"), Ok(3));
}

#[test]
fn test_positive_int_is_random_within_balance() {
    for _ in 0..50 {
        let amount = parse_amount("a positive int", 10, "hypebot").unwrap();
        assert!((1..=10).contains(&amount));
    }
    assert_eq!(parse_amount("positive int", 0, "hypebot"), Err(AmountError::Broke));
}

#[test]
fn test_rejections() {
    assert_eq!(parse_amount("HypeBot", 100, "hypebot"), Err(AmountError::Priceless));
    assert_eq!(parse_amount("dank memes", 100, "hypebot"), Err(AmountError::Memes));
    assert_eq!(parse_amount("banana", 100, "hypebot"), Err(AmountError::Unrecognized));
    assert_eq!(parse_amount("1.2.3k", 100, "hypebot"), Err(AmountError::Unrecognized));
    assert_eq!(
        AmountError::Priceless.to_string(),
        "You can't put a price on this bot."
    );
}

#[test]
fn test_bank_parses_against_users_balance() {
    let store = Arc::new(OptimisticStore::in_memory());
    let bank = Bank::new(store.clone(), BankConfig::default());
    store.set_value("alice", "bank:balance", "300", None).unwrap();

    assert_eq!(bank.parse_amount("alice", "all").unwrap(), ParsedAmount::Amount(300));
    assert_eq!(bank.parse_amount("bob", "all").unwrap(), ParsedAmount::Amount(0));
    assert_eq!(
        bank.parse_amount("alice", "memes").unwrap(),
        ParsedAmount::Rejected(AmountError::Memes)
    );
}

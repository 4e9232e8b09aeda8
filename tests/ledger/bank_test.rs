// Bank Tests
// Payments, overdrafts, splits and ledger history

use hypecoin::config::BankConfig;
use hypecoin::ledger::{
    Bank, BankError, PaymentRequest, TransferOutcome, BALANCE_SUBKEY, SETTLED_SUBKEY,
};
use hypecoin::storage::{
    DurableQueue, Engine, FlakyEngine, OptimisticStore, RetryPolicy, Store, StoreError,
};
use std::sync::Arc;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn create_bank() -> Bank<OptimisticStore> {
    let store = OptimisticStore::in_memory().with_retry_policy(
        RetryPolicy::new()
            .with_max_attempts(500)
            .with_base_delay_ms(0)
            .with_jitter_ms(2),
    );
    Bank::new(Arc::new(store), BankConfig::default())
}

fn fund(bank: &Bank<OptimisticStore>, user: &str, amount: i64) {
    bank.store()
        .run_in_transaction("fund", |tx| bank.deposit(user, amount, "Test", "Funding", tx))
        .unwrap();
}

fn balance(bank: &Bank<OptimisticStore>, user: &str) -> i64 {
    bank.get_balance(user).unwrap()
}

// ============================================================================
// SINGLE MERCHANT PAYMENTS
// ============================================================================

#[test]
fn test_payment_moves_coins_and_records_both_sides() {
    let bank = create_bank();
    fund(&bank, "alice", 100);

    assert!(bank
        .process_payment("alice", &["bob"], 30, "Lunch", false, None)
        .unwrap());

    assert_eq!(balance(&bank, "alice"), 70);
    assert_eq!(balance(&bank, "bob"), 30);

    let alice_history = bank.get_transactions("alice").unwrap();
    assert_eq!(alice_history[0].amount, -30);
    assert_eq!(alice_history[0].counterparty, "bob");
    assert_eq!(alice_history[0].details, "Lunch");

    let bob_history = bank.get_transactions("bob").unwrap();
    assert_eq!(bob_history.len(), 1);
    assert_eq!(bob_history[0].amount, 30);
    assert_eq!(bob_history[0].counterparty, "alice");
    assert!(bob_history[0].is_credit());
}

#[test]
fn test_insufficient_funds_charges_overdraft_fee() {
    let bank = create_bank();
    fund(&bank, "alice", 10);

    assert!(!bank
        .process_payment("alice", &["bob"], 50, "Too much", false, None)
        .unwrap());

    assert_eq!(balance(&bank, "alice"), 5);
    assert_eq!(balance(&bank, "bob"), 0);
    assert_eq!(balance(&bank, "hypebank"), 5);
    assert_eq!(bank.get_transactions("alice").unwrap()[0].details, "Overdraft fee");
}

#[test]
fn test_overdraft_fee_scales_with_balance() {
    let bank = create_bank();
    fund(&bank, "alice", 1000);

    assert!(!bank
        .process_payment("alice", &["bob"], 5000, "Yacht", false, None)
        .unwrap());

    assert_eq!(balance(&bank, "alice"), 950);
}

#[test]
fn test_can_overdraft_allows_negative_balance() {
    let bank = create_bank();
    fund(&bank, "alice", 10);

    assert!(bank
        .process_payment("alice", &["bob"], 25, "On credit", true, None)
        .unwrap());

    assert_eq!(balance(&bank, "alice"), -15);
    assert_eq!(balance(&bank, "bob"), 25);
}

#[test]
fn test_invalid_payments_change_nothing() {
    let bank = create_bank();
    fund(&bank, "alice", 100);

    assert!(!bank
        .process_payment("alice", &["bob"], -5, "Negative", false, None)
        .unwrap());
    assert!(!bank
        .process_payment("alice", &[], 5, "Nobody", false, None)
        .unwrap());
    assert!(bank
        .process_payment("alice", &["bob"], 0, "Nothing", false, None)
        .unwrap());

    assert_eq!(balance(&bank, "alice"), 100);
    assert_eq!(bank.get_transactions("alice").unwrap().len(), 1);
    assert!(bank.get_transactions("bob").unwrap().is_empty());
}

#[test]
fn test_paying_yourself_writes_nothing() {
    let bank = create_bank();
    fund(&bank, "alice", 100);

    assert!(bank
        .process_payment("alice", &["alice"], 60, "Mirror", false, None)
        .unwrap());
    assert!(!bank
        .process_payment("alice", &["alice"], 500, "Mirror", false, None)
        .unwrap());

    // Only the overdraft fee moved
    assert_eq!(balance(&bank, "alice"), 95);
}

#[test]
fn test_transfer_inside_callers_transaction() {
    let bank = create_bank();
    fund(&bank, "alice", 50);

    let outcome = bank
        .store()
        .run_in_transaction("manual", |tx| {
            bank.transfer("alice", "bob", 80, "Nope", false, tx)
        })
        .unwrap();
    assert_eq!(outcome, TransferOutcome::InsufficientFunds { balance: 50 });
    assert_eq!(balance(&bank, "alice"), 50);

    let outcome = bank
        .store()
        .run_in_transaction("manual", |tx| {
            bank.transfer("alice", "bob", -1, "Nope", false, tx)
        })
        .unwrap();
    assert_eq!(outcome, TransferOutcome::Rejected);
}

#[test]
fn test_malformed_balance() {
    let bank = create_bank();
    bank.store()
        .set_value("mallory", BALANCE_SUBKEY, "a lot", None)
        .unwrap();

    assert_eq!(balance(&bank, "mallory"), 0);
    let err = bank
        .process_payment("mallory", &["bob"], 1, "Hmm", false, None)
        .unwrap_err();
    assert!(matches!(err, BankError::Store(StoreError::NotAnInteger { .. })));
}

// ============================================================================
// SPLIT PAYMENTS
// ============================================================================

#[test]
fn test_weighted_split() {
    let bank = create_bank();
    fund(&bank, "alice", 1000);

    assert!(bank
        .process_payment("alice", &["bob", "carol"], 100, "split", false, Some(&[1.0, 3.0]))
        .unwrap());

    assert_eq!(balance(&bank, "alice"), 900);
    assert_eq!(balance(&bank, "bob"), 25);
    assert_eq!(balance(&bank, "carol"), 75);
    for merchant in ["bob", "carol"] {
        let history = bank.get_transactions(merchant).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].details, "split");
    }
}

#[test]
fn test_even_split_gives_remainder_to_last() {
    let bank = create_bank();
    fund(&bank, "alice", 1000);

    assert!(bank
        .process_payment("alice", &["bob", "carol", "dave"], 10, "Split", false, None)
        .unwrap());

    assert_eq!(balance(&bank, "bob"), 3);
    assert_eq!(balance(&bank, "carol"), 3);
    assert_eq!(balance(&bank, "dave"), 4);
    assert_eq!(balance(&bank, "alice"), 990);
}

#[test]
fn test_mismatched_weights_are_an_error() {
    let bank = create_bank();
    fund(&bank, "alice", 1000);

    let result = bank.process_payment("alice", &["bob", "carol"], 100, "Split", false, Some(&[1.0]));
    assert!(matches!(result, Err(BankError::WeightMismatch { merchants: 2, weights: 1 })));
    assert_eq!(balance(&bank, "alice"), 1000);
}

#[test]
fn test_failed_leg_keeps_earlier_legs() {
    let bank = create_bank();
    fund(&bank, "alice", 60);

    assert!(!bank
        .process_payment("alice", &["bob", "carol"], 100, "Split", false, None)
        .unwrap());

    // bob's 50 went through, carol's 50 did not, then a 5 coin fee
    assert_eq!(balance(&bank, "bob"), 50);
    assert_eq!(balance(&bank, "carol"), 0);
    assert_eq!(balance(&bank, "alice"), 5);
}

// ============================================================================
// HISTORY AND STATS
// ============================================================================

#[test]
fn test_history_is_bounded_and_newest_first() {
    let bank = create_bank();
    fund(&bank, "alice", 1000);

    for i in 1..=25 {
        bank.process_payment("alice", &["bob"], i, &format!("Payment {i}"), false, None)
            .unwrap();
    }

    let shown = bank.get_transactions("alice").unwrap();
    assert_eq!(shown.len(), 5);
    assert_eq!(shown[0].details, "Payment 25");
    assert_eq!(shown[4].details, "Payment 21");

    let kept: Vec<serde_json::Value> = bank
        .store()
        .get_historical_values("alice", "bank:transaction", 100, None)
        .unwrap();
    assert_eq!(kept.len(), 20);
}

#[test]
fn test_user_balances_and_stats() {
    let bank = create_bank();
    fund(&bank, "alice", 100);
    fund(&bank, "alice:savings", 40);
    fund(&bank, "bob", 60);
    fund(&bank, "hypebank", 1000);
    fund(&bank, "hypescholarship", 7);

    let everyone = bank.get_user_balances(false, None).unwrap();
    assert_eq!(everyone.len(), 5);

    let plebs = bank.get_user_balances(true, None).unwrap();
    assert_eq!(plebs.keys().collect::<Vec<_>>(), vec!["alice", "alice:savings", "bob"]);

    let savings = bank.get_user_balances(true, Some("savings")).unwrap();
    assert_eq!(savings.get("alice:savings"), Some(&40));
    assert_eq!(savings.len(), 1);

    assert_eq!(bank.get_bank_stats(true, None).unwrap(), (3, 200));
    assert_eq!(bank.get_bank_stats(false, None).unwrap(), (5, 1207));
    assert!(bank.is_reserved("hypescholarship"));
    assert!(!bank.is_reserved("alice"));
}

#[test]
fn test_fine_may_overdraw() {
    let bank = create_bank();

    assert!(bank.fine_user("alice", 50, "spamming").unwrap());

    assert_eq!(balance(&bank, "alice"), -50);
    assert_eq!(balance(&bank, "hypebank"), 50);
    assert_eq!(bank.get_transactions("alice").unwrap()[0].details, "Fine: spamming");
}

#[test]
fn test_queued_request_runs_like_a_payment() {
    let bank = create_bank();
    fund(&bank, "alice", 100);

    let request: PaymentRequest = serde_json::from_value(serde_json::json!({
        "customer": "alice",
        "merchants": ["bob", "carol"],
        "amount": 40,
        "weights": [3.0, 1.0],
    }))
    .unwrap();

    assert!(bank.process_request(&request).unwrap());
    assert_eq!(balance(&bank, "bob"), 30);
    assert_eq!(balance(&bank, "carol"), 10);
}

#[test]
fn test_balance_overflow_is_rejected() {
    let bank = create_bank();

    assert!(bank.fine_user("alice", i64::MAX, "everything").unwrap());
    assert_eq!(balance(&bank, "alice"), -i64::MAX);

    // Going further into debt would wrap around
    assert!(!bank.fine_user("alice", 2, "more").unwrap());
    assert_eq!(balance(&bank, "alice"), -i64::MAX);
    assert_eq!(balance(&bank, "hypebank"), i64::MAX);

    // As would crediting an account that is already full
    fund(&bank, "carol", 1);
    assert!(!bank
        .process_payment("carol", &["hypebank"], 1, "Tip", false, None)
        .unwrap());
    assert_eq!(balance(&bank, "carol"), 1);
    assert_eq!(balance(&bank, "hypebank"), i64::MAX);
}

// ============================================================================
// QUEUED PAYMENTS
// ============================================================================

fn queued(request: PaymentRequest) -> serde_json::Value {
    serde_json::to_value(request).unwrap()
}

#[test]
fn test_queued_payment_is_not_repeated_when_the_batch_replays() {
    let bank = create_bank();
    fund(&bank, "alice", 1000);
    let queue = DurableQueue::new(bank.store().clone(), "payments");
    let producer = DurableQueue::new(bank.store().clone(), "payments");
    queue
        .enqueue(queued(PaymentRequest::new("alice", &["bob"], 100)), None)
        .unwrap();

    let mut enqueued_late = false;
    let ran = queue
        .process(10, |payload, tx| {
            if !enqueued_late {
                // Lands while the batch is open, so the batch has to start over
                producer.enqueue(queued(PaymentRequest::new("alice", &["carol"], 50)), None)?;
                enqueued_late = true;
            }
            bank.settle_queued(payload, tx)
        })
        .unwrap();

    assert!(ran);
    assert!(queue.pending().unwrap().is_empty());
    assert_eq!(balance(&bank, "alice"), 850);
    assert_eq!(balance(&bank, "bob"), 100);
    assert_eq!(balance(&bank, "carol"), 50);
    assert_eq!(bank.get_transactions("bob").unwrap().len(), 1);
    assert!(bank.store().get_subkey(SETTLED_SUBKEY, None).unwrap().is_empty());
}

#[test]
fn test_failed_batch_does_not_repay_settled_requests() {
    let bank = create_bank();
    fund(&bank, "alice", 1000);
    let queue = DurableQueue::new(bank.store().clone(), "payments");
    queue
        .enqueue(queued(PaymentRequest::new("alice", &["bob"], 100)), None)
        .unwrap();
    queue
        .enqueue(
            queued(PaymentRequest::new("alice", &["bob", "carol"], 60).with_details("split")),
            None,
        )
        .unwrap();

    let result = queue.process(10, |payload, tx| {
        bank.settle_queued(payload, tx)?;
        if payload["details"] == "split" {
            return Err(BankError::Store(StoreError::Database("handler crashed".into())));
        }
        Ok(true)
    });
    assert!(result.is_err());
    assert_eq!(queue.pending().unwrap().len(), 2);
    assert_eq!(balance(&bank, "alice"), 840);

    assert!(queue.process(10, |payload, tx| bank.settle_queued(payload, tx)).unwrap());

    assert!(queue.pending().unwrap().is_empty());
    assert_eq!(balance(&bank, "alice"), 840);
    assert_eq!(balance(&bank, "bob"), 130);
    assert_eq!(balance(&bank, "carol"), 30);
    assert!(bank.store().get_subkey(SETTLED_SUBKEY, None).unwrap().is_empty());
}

#[test]
fn test_failed_queued_payment_is_acknowledged_once() {
    let bank = create_bank();
    fund(&bank, "alice", 10);
    let queue = DurableQueue::new(bank.store().clone(), "payments");
    queue
        .enqueue(queued(PaymentRequest::new("alice", &["bob"], 500)), None)
        .unwrap();
    queue.enqueue(serde_json::json!("not a request"), None).unwrap();

    assert!(queue.process(10, |payload, tx| bank.settle_queued(payload, tx)).unwrap());

    assert!(queue.pending().unwrap().is_empty());
    assert_eq!(balance(&bank, "bob"), 0);
    // One overdraft fee
    assert_eq!(balance(&bank, "alice"), 5);
}

// ============================================================================
// CONCURRENCY AND RETRIES
// ============================================================================

#[test]
fn test_retried_payment_is_applied_once() {
    let engine = Arc::new(FlakyEngine::new(0));
    let dyn_engine: Arc<dyn Engine> = engine.clone();
    let store = OptimisticStore::new(dyn_engine, RetryPolicy::new().with_base_delay_ms(1));
    let bank = Bank::new(Arc::new(store), BankConfig::default());
    fund(&bank, "alice", 100);

    engine.fail_next(2);
    assert!(bank
        .process_payment("alice", &["bob"], 30, "Retry me", false, None)
        .unwrap());

    assert_eq!(balance(&bank, "alice"), 70);
    assert_eq!(balance(&bank, "bob"), 30);
    assert_eq!(bank.get_transactions("bob").unwrap().len(), 1);
}

#[test]
fn test_concurrent_payments_conserve_coins() {
    let bank = create_bank();
    fund(&bank, "alice", 1000);
    fund(&bank, "bob", 1000);

    std::thread::scope(|scope| {
        for (from, to) in [("alice", "bob"), ("bob", "alice"), ("alice", "carol"), ("bob", "carol")] {
            let bank = &bank;
            scope.spawn(move || {
                for _ in 0..15 {
                    bank.process_payment(from, &[to], 7, "Ping", false, None)
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(bank.get_bank_stats(false, None).unwrap().1, 2000);
    assert_eq!(balance(&bank, "carol"), 2 * 15 * 7);
}

//! End-to-end bridge behavior: HTTP-side services, broker, ledger and back.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use banking::BankingError;
use banking::bridge::{CommandPublisher, CorrelationTable, IdempotencyGuard};
use banking::domain::TransactionStatus;
use banking::ledger::{InMemoryLedgerStore, LedgerStore};
use banking::messages::{
    ACCOUNT_CREATE, AccountCreated, RoutingKeys, TRANSACTION_COMPLETED, TransactionCompleted,
};
use banking::services::{RequestBridge, TransactionService};
use common::{Harness, account_request, balance_after, transaction_request};
use futures::future::join_all;
use ledger_bridge_core::environment::Clock;
use ledger_bridge_core::event::{Event, EventMetadata, SerializedEvent};
use ledger_bridge_core::event_bus::EventBus;
use ledger_bridge_testing::{UnavailableEventBus, test_clock};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn account_then_credit_then_overdraft() {
    let h = Harness::start().await;

    let account = h
        .accounts
        .create_account(account_request(&["EUR"]), "acc-1", "req-1")
        .await
        .unwrap();
    assert_eq!(account.customer_id, "CUST1");
    assert_eq!(account.country, "EE");
    assert_eq!(account.balances.len(), 1);
    assert_eq!(account.balances[0].available_amount.to_string(), "0.00");
    assert_eq!(account.balances[0].version, 1);

    let stored = h.open_account(&["EUR"]).await;
    let credit = h
        .transactions
        .create_transaction(transaction_request(&stored, "IN", dec!(100.00)), "tx-in", "req-2")
        .await
        .unwrap();
    assert_eq!(credit.status, TransactionStatus::Completed);
    assert_eq!(credit.balance_after_transaction.to_string(), "100.00");
    assert_eq!(balance_after(&credit), (dec!(100.00), 2));

    let overdraft = h
        .transactions
        .create_transaction(transaction_request(&stored, "OUT", dec!(150.00)), "tx-out", "req-3")
        .await
        .unwrap_err();
    assert!(matches!(overdraft, BankingError::InsufficientFunds(_)));
    assert!(!overdraft.is_retryable());

    let after = h.accounts.get_account(&stored.id.to_string()).await.unwrap();
    assert_eq!(after.balances[0].available_amount, dec!(100.00));
    assert_eq!(after.balances[0].version, 2);
    let history = h.transactions.list_transactions(&stored.id.to_string()).await.unwrap();
    assert_eq!(history.len(), 1);

    h.stop().await;
}

#[tokio::test]
async fn debit_of_exactly_the_balance_empties_it() {
    let h = Harness::start().await;
    let account = h.open_account(&["EUR"]).await;
    h.transactions
        .create_transaction(transaction_request(&account, "IN", dec!(25.50)), "in", "r")
        .await
        .unwrap();

    let emptied = h
        .transactions
        .create_transaction(transaction_request(&account, "OUT", dec!(25.50)), "out", "r")
        .await
        .unwrap();
    assert_eq!(balance_after(&emptied), (dec!(0.00), 3));

    let refused = h
        .transactions
        .create_transaction(transaction_request(&account, "OUT", dec!(0.01)), "out-2", "r")
        .await
        .unwrap_err();
    assert!(matches!(refused, BankingError::InsufficientFunds(_)));

    h.stop().await;
}

#[tokio::test]
async fn sequential_replay_is_byte_identical() {
    let h = Harness::start().await;
    let account = h.open_account(&["EUR"]).await;
    let request = transaction_request(&account, "IN", dec!(10.00));

    let first = h
        .transactions
        .create_transaction(request.clone(), "same-key", "r1")
        .await
        .unwrap();
    let second = h
        .transactions
        .create_transaction(request.clone(), "same-key", "r2")
        .await
        .unwrap();
    // A second API instance does not know the key and publishes again; the ledger
    // answers from its processed-message record.
    let third = h
        .transactions_with_fresh_guard()
        .create_transaction(request, "same-key", "r3")
        .await
        .unwrap();

    let bytes = serde_json::to_vec(&first).unwrap();
    assert_eq!(serde_json::to_vec(&second).unwrap(), bytes);
    assert_eq!(serde_json::to_vec(&third).unwrap(), bytes);
    assert_eq!(h.store.transaction_count().await, 1);
    assert_eq!(h.bus.publish_count(&h.routing.transaction_commands), 2);

    h.stop().await;
}

#[tokio::test]
async fn concurrent_duplicates_publish_once() {
    let h = Harness::start().await;
    let account = h.open_account(&["EUR"]).await;
    let request = transaction_request(&account, "IN", dec!(1.00));

    let results = join_all((0..16).map(|i| {
        let service = h.transactions.clone();
        let request = request.clone();
        async move {
            service
                .create_transaction(request, "collapsed", &format!("req-{i}"))
                .await
        }
    }))
    .await;

    let first = results[0].as_ref().unwrap();
    for result in &results {
        assert_eq!(result.as_ref().unwrap(), first);
    }
    assert_eq!(h.bus.publish_count(&h.routing.transaction_commands), 1);
    assert_eq!(h.store.transaction_count().await, 1);
    assert_eq!(h.table.pending_count(), 0);

    h.stop().await;
}

#[tokio::test]
async fn errors_reach_only_their_own_caller() {
    let h = Harness::start().await;
    let poor = h.open_account(&["EUR"]).await;
    let funded = h.open_account(&["EUR"]).await;

    let (refused, accepted) = tokio::join!(
        h.transactions
            .create_transaction(transaction_request(&poor, "OUT", dec!(5.00)), "poor", "r1"),
        h.transactions
            .create_transaction(transaction_request(&funded, "IN", dec!(5.00)), "funded", "r2"),
    );

    assert!(matches!(refused, Err(BankingError::InsufficientFunds(_))));
    assert_eq!(accepted.unwrap().account_id, *funded.id.as_uuid());
    assert!(!h.guard.is_processed("poor"));
    assert!(h.guard.completed("funded").is_some());

    h.stop().await;
}

#[tokio::test]
async fn ledger_side_errors_keep_their_identity() {
    let h = Harness::start().await;
    let account = h.open_account(&["USD"]).await;

    let wrong_currency = h
        .transactions
        .create_transaction(transaction_request(&account, "IN", dec!(1.00)), "cur", "r")
        .await
        .unwrap_err();
    assert!(matches!(wrong_currency, BankingError::CurrencyNotFound(_)));

    let mut missing = transaction_request(&account, "IN", dec!(1.00));
    missing.account_id = uuid::Uuid::new_v4().to_string();
    let missing = h
        .transactions
        .create_transaction(missing, "acc", "r")
        .await
        .unwrap_err();
    assert!(matches!(missing, BankingError::AccountNotFound(_)));

    h.stop().await;
}

#[tokio::test]
async fn amounts_past_the_storage_limit_are_validation_errors() {
    let h = Harness::start().await;
    let account = h.open_account(&["EUR"]).await;

    let huge = h
        .transactions
        .create_transaction(transaction_request(&account, "IN", rust_decimal::Decimal::MAX), "huge", "r")
        .await
        .unwrap_err();
    assert!(matches!(huge, BankingError::Validation(_)));
    assert_eq!(h.bus.publish_count(&h.routing.transaction_commands), 0);

    h.transactions
        .create_transaction(transaction_request(&account, "IN", dec!(99999999999999999.00)), "fill", "r")
        .await
        .unwrap();
    let over = h
        .transactions
        .create_transaction(transaction_request(&account, "IN", dec!(1.00)), "over", "r")
        .await
        .unwrap_err();
    assert!(matches!(over, BankingError::Validation(_)));
    assert!(!over.is_retryable());

    // The ledger consumer is still running.
    let debit = h
        .transactions
        .create_transaction(transaction_request(&account, "OUT", dec!(1.00)), "after", "r")
        .await
        .unwrap();
    assert_eq!(balance_after(&debit), (dec!(99999999999999998.00), 3));

    h.stop().await;
}

#[tokio::test]
async fn account_key_reused_for_a_transaction_is_refused() {
    let h = Harness::start().await;
    h.accounts
        .create_account(account_request(&["EUR"]), "shared", "r1")
        .await
        .unwrap();
    let account = h.open_account(&["EUR"]).await;
    let request = transaction_request(&account, "IN", dec!(5.00));

    // This instance saw the account complete and refuses before publishing.
    let warm = h
        .transactions
        .create_transaction(request.clone(), "shared", "r2")
        .await
        .unwrap_err();
    assert_eq!(
        warm,
        BankingError::Validation("Idempotency key 'shared' was already used for ACCOUNT_CREATE".to_string())
    );
    assert_eq!(h.bus.publish_count(&h.routing.transaction_commands), 0);

    // Another instance publishes; the ledger refuses from its processed-message record.
    let cold = h
        .transactions_with_fresh_guard()
        .create_transaction(request, "shared", "r3")
        .await
        .unwrap_err();
    assert!(matches!(cold, BankingError::Validation(ref m) if m.contains("ACCOUNT_CREATE")));

    assert_eq!(h.store.transaction_count().await, 0);
    assert_eq!(h.guard.completed("shared").unwrap().request_type, ACCOUNT_CREATE);

    h.stop().await;
}

#[tokio::test]
async fn timeout_releases_the_slot_and_a_late_outcome_is_kept() {
    let h = Harness::without_ledger(Duration::from_millis(100)).await;
    let account = h.open_account_directly().await;

    let err = h
        .transactions
        .create_transaction(transaction_request(&account, "IN", dec!(3.00)), "late", "r")
        .await
        .unwrap_err();
    assert!(matches!(err, BankingError::Timeout(_)));
    assert!(err.is_retryable());
    assert_eq!(h.table.pending_count(), 0);

    // The ledger answers after the caller gave up.
    let balance = account.balances[0].apply(
        banking::domain::Direction::In,
        dec!(3.00),
        test_clock().now(),
    )
    .unwrap();
    let outcome = TransactionCompleted {
        transaction: banking::domain::Transaction {
            id: banking::domain::TransactionId::new(),
            account_id: account.id,
            balance_id: balance.id,
            amount: dec!(3.00),
            currency: balance.currency,
            direction: banking::domain::Direction::In,
            description: "test".to_string(),
            balance_after: balance.available,
            status: TransactionStatus::Completed,
            idempotency_key: "late".to_string(),
            created_at: test_clock().now(),
            updated_at: test_clock().now(),
        },
        balance,
    };
    assert_eq!(outcome.event_type(), TRANSACTION_COMPLETED);
    let metadata = EventMetadata::for_request("late", "r", "TRANSACTION_CREATE", test_clock().now());
    h.bus
        .publish(
            &h.routing.transaction_completed,
            &SerializedEvent::from_event(&outcome, metadata).unwrap(),
        )
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(1), async {
        while h.guard.completed("late").is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    // The retry is answered without another publication.
    let retried = h
        .transactions
        .create_transaction(transaction_request(&account, "IN", dec!(3.00)), "late", "r")
        .await
        .unwrap();
    assert_eq!(retried.balance_after_transaction, dec!(3.00));
    assert_eq!(h.bus.publish_count(&h.routing.transaction_commands), 1);

    h.stop().await;
}

#[tokio::test]
async fn broker_outage_fails_fast_and_forgets_the_key() {
    let clock: Arc<dyn Clock> = Arc::new(test_clock());
    let guard = Arc::new(IdempotencyGuard::new(Arc::clone(&clock), chrono::Duration::hours(1)));
    let publisher = Arc::new(CommandPublisher::new(
        Arc::new(UnavailableEventBus) as Arc<dyn EventBus>,
        CorrelationTable::new(),
        clock,
    ));
    let store = InMemoryLedgerStore::new();
    let service = TransactionService::new(
        RequestBridge::new(
            publisher,
            Arc::clone(&guard),
            Arc::new(store.clone()) as Arc<dyn LedgerStore>,
            Duration::from_secs(30),
        ),
        &RoutingKeys::default(),
    );
    let account = banking::domain::Account::open(
        banking::domain::CustomerId::parse("CUST1").unwrap(),
        banking::domain::CountryCode::parse("EE").unwrap(),
        &[banking::domain::Currency::Eur],
        test_clock().now(),
    )
    .unwrap();

    let err = tokio::time::timeout(
        Duration::from_secs(1),
        service.create_transaction(transaction_request(&account, "IN", dec!(1.00)), "k", "r"),
    )
    .await
    .expect("publish failure must not wait for the timeout")
    .unwrap_err();

    assert!(matches!(err, BankingError::Internal(_)));
    assert!(err.is_retryable());
    assert!(!guard.is_processed("k"));
}

#[tokio::test]
async fn outcomes_are_pushed_to_topic_subscribers() {
    let h = Harness::start().await;
    let mut accounts = h.broadcaster.subscribe("/topic/accounts").await;

    let created = h
        .accounts
        .create_account(account_request(&["EUR", "SEK"]), "push", "r")
        .await
        .unwrap();

    let (topic, pushed) = tokio::time::timeout(Duration::from_secs(1), accounts.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(topic, "/topic/accounts");
    assert_eq!(pushed["accountId"], created.account_id.to_string());
    assert_eq!(pushed["balances"].as_array().unwrap().len(), 2);

    let commands = h.bus.published_to(&h.routing.account_commands);
    assert_eq!(commands[0].metadata.request_type.as_deref(), Some(ACCOUNT_CREATE));
    let outcome: AccountCreated = h.bus.published_to(&h.routing.account_completed)[0]
        .decode()
        .unwrap();
    assert_eq!(*outcome.account.id.as_uuid(), created.account_id);

    h.stop().await;
}

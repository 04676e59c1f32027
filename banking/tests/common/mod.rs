//! Both processes wired over one in-memory broker.
//!
//! The API half (services, notification routers) and the ledger half (command
//! processor, engine) run as real [`EventConsumer`]s on an [`InMemoryEventBus`], so a
//! request travels the same path it does in production.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use banking::bridge::{CommandPublisher, CorrelationTable, IdempotencyGuard, NotificationRouter};
use banking::domain::{Account, CountryCode, Currency, CustomerId};
use banking::ledger::{InMemoryLedgerStore, LedgerEngine, LedgerStore};
use banking::messages::RoutingKeys;
use banking::runtime::{EventConsumer, EventHandler, drain};
use banking::services::{
    AccountOutcomes, AccountService, CommandProcessor, CreateAccountRequest, CreateTransactionRequest,
    RequestBridge, TransactionOutcomes, TransactionResponse, TransactionService,
};
use ledger_bridge_core::environment::Clock;
use ledger_bridge_core::event_bus::EventBus;
use ledger_bridge_testing::{InMemoryEventBus, test_clock};
use ledger_bridge_web::TopicBroadcaster;
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub struct Harness {
    pub bus: Arc<InMemoryEventBus>,
    pub store: InMemoryLedgerStore,
    pub table: CorrelationTable,
    pub guard: Arc<IdempotencyGuard>,
    pub publisher: Arc<CommandPublisher>,
    pub broadcaster: TopicBroadcaster<Value>,
    pub routing: RoutingKeys,
    pub accounts: AccountService,
    pub transactions: TransactionService,
    pub timeout: Duration,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Harness {
    /// API and ledger both running.
    pub async fn start() -> Self {
        Self::build(true, TIMEOUT).await
    }

    /// API only: commands are published but nobody answers.
    pub async fn without_ledger(timeout: Duration) -> Self {
        Self::build(false, timeout).await
    }

    async fn build(with_ledger: bool, timeout: Duration) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(test_clock());
        let bus = Arc::new(InMemoryEventBus::new());
        let event_bus: Arc<dyn EventBus> = Arc::clone(&bus) as Arc<dyn EventBus>;
        let store = InMemoryLedgerStore::new();
        let routing = RoutingKeys::default();
        let table = CorrelationTable::new();
        let guard = Arc::new(IdempotencyGuard::new(Arc::clone(&clock), chrono::Duration::hours(24)));
        let broadcaster = TopicBroadcaster::new();
        let publisher = Arc::new(CommandPublisher::new(
            Arc::clone(&event_bus),
            table.clone(),
            Arc::clone(&clock),
        ));
        let bridge = RequestBridge::new(
            Arc::clone(&publisher),
            Arc::clone(&guard),
            Arc::new(store.clone()) as Arc<dyn LedgerStore>,
            timeout,
        );

        let (shutdown, _) = broadcast::channel(1);
        let mut harness = Self {
            bus,
            store,
            table: table.clone(),
            guard: Arc::clone(&guard),
            publisher,
            broadcaster: broadcaster.clone(),
            accounts: AccountService::new(bridge.clone(), &routing),
            transactions: TransactionService::new(bridge, &routing),
            routing: routing.clone(),
            timeout,
            shutdown,
            tasks: Vec::new(),
        };

        harness.consume(
            "account-outcomes",
            routing.account_outcome_topics(),
            Arc::new(NotificationRouter::new(
                AccountOutcomes,
                table.clone(),
                Arc::clone(&guard),
                broadcaster.clone(),
            )),
        );
        harness.consume(
            "transaction-outcomes",
            routing.transaction_outcome_topics(),
            Arc::new(NotificationRouter::new(TransactionOutcomes, table, guard, broadcaster)),
        );
        if with_ledger {
            let engine = Arc::new(LedgerEngine::new(
                Arc::new(harness.store.clone()),
                Arc::clone(&clock),
            ));
            harness.consume(
                "ledger-commands",
                routing.command_topics(),
                Arc::new(CommandProcessor::new(engine, event_bus, routing.clone(), clock)),
            );
        }

        let mut topics = [routing.account_outcome_topics(), routing.transaction_outcome_topics()].concat();
        if with_ledger {
            topics.extend(routing.command_topics());
        }
        for topic in topics {
            harness.bus.wait_for_subscribers(&topic, 1).await;
        }
        harness
    }

    fn consume(&mut self, name: &str, topics: Vec<String>, handler: Arc<dyn EventHandler>) {
        let consumer = EventConsumer::builder()
            .name(name)
            .topics(topics)
            .event_bus(Arc::clone(&self.bus) as Arc<dyn EventBus>)
            .handler(handler)
            .shutdown(self.shutdown.subscribe())
            .retry_delay(Duration::from_millis(10))
            .build()
            .unwrap();
        self.tasks.push((name.to_string(), consumer.spawn()));
    }

    /// Transaction service of a second API instance: same broker and correlation
    /// table, empty idempotency guard.
    pub fn transactions_with_fresh_guard(&self) -> TransactionService {
        let guard = Arc::new(IdempotencyGuard::new(Arc::new(test_clock()), chrono::Duration::hours(24)));
        let bridge = RequestBridge::new(
            Arc::clone(&self.publisher),
            guard,
            Arc::new(self.store.clone()) as Arc<dyn LedgerStore>,
            self.timeout,
        );
        TransactionService::new(bridge, &self.routing)
    }

    pub async fn open_account(&self, currencies: &[&str]) -> Account {
        let response = self
            .accounts
            .create_account(account_request(currencies), &uuid::Uuid::new_v4().to_string(), "req")
            .await
            .unwrap();
        let id = banking::domain::AccountId::from_uuid(response.account_id);
        self.store.find_account(id).await.unwrap().unwrap()
    }

    /// Write an account straight into the store, bypassing the broker.
    pub async fn open_account_directly(&self) -> Account {
        let account = Account::open(
            CustomerId::parse("CUST1").unwrap(),
            CountryCode::parse("EE").unwrap(),
            &[Currency::Eur],
            test_clock().now(),
        )
        .unwrap();
        let mut uow = self.store.begin().await.unwrap();
        uow.insert_account(&account).await.unwrap();
        for balance in &account.balances {
            uow.insert_balance(balance).await.unwrap();
        }
        uow.commit().await.unwrap();
        account
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        drain(self.tasks, Duration::from_secs(1)).await;
    }
}

pub fn account_request(currencies: &[&str]) -> CreateAccountRequest {
    CreateAccountRequest {
        customer_id: "CUST1".to_string(),
        country: "EE".to_string(),
        currencies: currencies.iter().map(ToString::to_string).collect(),
    }
}

pub fn transaction_request(account: &Account, direction: &str, amount: Decimal) -> CreateTransactionRequest {
    CreateTransactionRequest {
        account_id: account.id.to_string(),
        amount,
        currency: "EUR".to_string(),
        direction: direction.to_string(),
        description: "test".to_string(),
    }
}

pub fn balance_after(response: &TransactionResponse) -> (Decimal, i64) {
    let balance = response.balance.as_ref().unwrap();
    (balance.available_amount, balance.version)
}

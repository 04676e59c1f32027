//! Ledger-side command handling.
//!
//! Every command produces exactly one outcome: the success event on the domain's
//! `completed` topic or an [`ErrorNotification`] on its `failed` topic. The command's
//! metadata is copied onto the outcome so the API can correlate it. A command the
//! ledger already handled is answered again with the stored result.

use crate::ledger::{LedgerEngine, LedgerError};
use crate::messages::{
    AccountCreated, CREATE_ACCOUNT, CREATE_TRANSACTION, CreateAccountCommand, CreateTransactionCommand,
    ErrorCode, ErrorNotification, RoutingKeys, TransactionCompleted,
};
use crate::runtime::EventHandler;
use async_trait::async_trait;
use ledger_bridge_core::environment::Clock;
use ledger_bridge_core::event::{Event, EventMetadata, SerializedEvent};
use ledger_bridge_core::event_bus::{EventBus, EventBusError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a command message produced no outcome.
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// The message carries neither an idempotency key nor a request id.
    #[error("{0} carries no correlation key")]
    Uncorrelated(String),

    /// Not a command this processor knows.
    #[error("Unknown command type {0}")]
    UnknownCommand(String),

    /// The outcome could not be encoded.
    #[error("Outcome serialization failed: {0}")]
    Serialization(String),

    /// The outcome could not be published.
    #[error("Outcome publish failed: {0}")]
    Publish(#[from] EventBusError),
}

/// Consumes the command topics and drives the [`LedgerEngine`].
pub struct CommandProcessor {
    engine: Arc<LedgerEngine>,
    event_bus: Arc<dyn EventBus>,
    routing: RoutingKeys,
    clock: Arc<dyn Clock>,
}

/// Where one command's outcome goes.
struct OutcomeTopics<'a> {
    completed: &'a str,
    failed: &'a str,
}

impl CommandProcessor {
    /// Create a processor publishing outcomes on `routing`'s topics.
    #[must_use]
    pub fn new(
        engine: Arc<LedgerEngine>,
        event_bus: Arc<dyn EventBus>,
        routing: RoutingKeys,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine,
            event_bus,
            routing,
            clock,
        }
    }

    /// Handle one command message.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError`] when no outcome could be published. Business failures
    /// are not errors here: they are published as [`ErrorNotification`]s.
    pub async fn process(&self, event: &SerializedEvent) -> Result<(), ProcessorError> {
        let Some(key) = event.metadata.correlation_key() else {
            return Err(ProcessorError::Uncorrelated(event.event_type.clone()));
        };
        let metadata = event.metadata.restamped(self.clock.now());

        match event.event_type.as_str() {
            CREATE_ACCOUNT => {
                let topics = OutcomeTopics {
                    completed: &self.routing.account_completed,
                    failed: &self.routing.account_failed,
                };
                let result = match event.decode::<CreateAccountCommand>() {
                    Ok(command) => self
                        .engine
                        .open_account(&command, key)
                        .await
                        .map(|outcome| AccountCreated {
                            account: outcome.value,
                        }),
                    Err(e) => Err(LedgerError::Validation(e.to_string())),
                };
                self.publish_outcome(result, &topics, metadata).await
            },
            CREATE_TRANSACTION => {
                let topics = OutcomeTopics {
                    completed: &self.routing.transaction_completed,
                    failed: &self.routing.transaction_failed,
                };
                let result = match event.decode::<CreateTransactionCommand>() {
                    Ok(command) => self
                        .engine
                        .apply_transaction(&command, key)
                        .await
                        .map(|outcome| {
                            if !outcome.replayed {
                                crate::metrics::record_transaction_applied(command.direction);
                            }
                            TransactionCompleted {
                                transaction: outcome.value.transaction,
                                balance: outcome.value.balance,
                            }
                        }),
                    Err(e) => Err(LedgerError::Validation(e.to_string())),
                };
                self.publish_outcome(result, &topics, metadata).await
            },
            other => Err(ProcessorError::UnknownCommand(other.to_string())),
        }
    }

    async fn publish_outcome<E>(
        &self,
        result: Result<E, LedgerError>,
        topics: &OutcomeTopics<'_>,
        metadata: EventMetadata,
    ) -> Result<(), ProcessorError>
    where
        E: Event + Serialize,
    {
        match result {
            Ok(success) => self.publish(topics.completed, &success, metadata).await,
            Err(err) => {
                let code = err.error_code();
                crate::metrics::record_rejection(code);
                if code == ErrorCode::InternalError {
                    warn!(error = %err, idempotency_key = ?metadata.idempotency_key, "Command failed");
                } else {
                    info!(error_code = %code, idempotency_key = ?metadata.idempotency_key, "Command rejected");
                }
                let notification = ErrorNotification {
                    error_code: code,
                    error_message: err.to_string(),
                    request_id: metadata.request_id.clone(),
                    timestamp: self.clock.now(),
                };
                self.publish(topics.failed, &notification, metadata).await
            },
        }
    }

    async fn publish<E>(&self, topic: &str, outcome: &E, metadata: EventMetadata) -> Result<(), ProcessorError>
    where
        E: Event + Serialize,
    {
        let event = SerializedEvent::from_event(outcome, metadata)
            .map_err(|e| ProcessorError::Serialization(e.to_string()))?;
        self.event_bus.publish(topic, &event).await?;
        debug!(topic, event_type = %event.event_type, "Outcome published");
        Ok(())
    }
}

#[async_trait]
impl EventHandler for CommandProcessor {
    async fn handle(&self, event: &SerializedEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.process(event).await.map_err(|e| {
            warn!(event_type = %event.event_type, error = %e, "Command produced no outcome");
            Box::new(e) as Box<dyn std::error::Error + Send + Sync>
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::domain::{CountryCode, Currency, CustomerId, Direction};
    use crate::ledger::InMemoryLedgerStore;
    use crate::messages::{ACCOUNT_CREATE, TRANSACTION_CREATE};
    use ledger_bridge_testing::{InMemoryEventBus, test_clock};
    use rust_decimal_macros::dec;

    struct Fixture {
        processor: CommandProcessor,
        bus: Arc<InMemoryEventBus>,
        store: InMemoryLedgerStore,
        routing: RoutingKeys,
    }

    fn fixture() -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(test_clock());
        let store = InMemoryLedgerStore::new();
        let bus = Arc::new(InMemoryEventBus::new());
        let engine = Arc::new(LedgerEngine::new(Arc::new(store.clone()), Arc::clone(&clock)));
        let routing = RoutingKeys::default();
        Fixture {
            processor: CommandProcessor::new(engine, Arc::clone(&bus) as Arc<dyn EventBus>, routing.clone(), clock),
            bus,
            store,
            routing,
        }
    }

    fn command<E: Event + Serialize>(command: &E, key: &str, request_type: &str) -> SerializedEvent {
        SerializedEvent::from_event(
            command,
            EventMetadata::for_request(key, format!("req-{key}"), request_type, test_clock().now()),
        )
        .unwrap()
    }

    async fn open_account(f: &Fixture) -> crate::domain::Account {
        f.processor
            .process(&command(
                &CreateAccountCommand {
                    customer_id: CustomerId::parse("CUST1").unwrap(),
                    country: CountryCode::parse("EE").unwrap(),
                    currencies: vec![Currency::Eur],
                },
                "open",
                ACCOUNT_CREATE,
            ))
            .await
            .unwrap();
        let published = f.bus.published_to(&f.routing.account_completed);
        published.last().unwrap().decode::<AccountCreated>().unwrap().account
    }

    fn transaction(account: &crate::domain::Account, direction: Direction, amount: rust_decimal::Decimal) -> CreateTransactionCommand {
        CreateTransactionCommand {
            account_id: account.id,
            amount,
            currency: Currency::Eur,
            direction,
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn success_carries_the_command_metadata() {
        let f = fixture();
        let account = open_account(&f).await;

        f.processor
            .process(&command(&transaction(&account, Direction::In, dec!(100.00)), "t1", TRANSACTION_CREATE))
            .await
            .unwrap();

        let outcome = &f.bus.published_to(&f.routing.transaction_completed)[0];
        assert_eq!(outcome.metadata.idempotency_key.as_deref(), Some("t1"));
        assert_eq!(outcome.metadata.request_id.as_deref(), Some("req-t1"));
        assert_eq!(outcome.metadata.request_type.as_deref(), Some(TRANSACTION_CREATE));
        let completed: TransactionCompleted = outcome.decode().unwrap();
        assert_eq!(completed.balance.available, dec!(100.00));
        assert_eq!(completed.balance.version, 2);
    }

    #[tokio::test]
    async fn business_failure_is_published_as_a_notification() {
        let f = fixture();
        let account = open_account(&f).await;

        f.processor
            .process(&command(&transaction(&account, Direction::Out, dec!(150.00)), "t1", TRANSACTION_CREATE))
            .await
            .unwrap();

        let failed = f.bus.published_to(&f.routing.transaction_failed);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].metadata.idempotency_key.as_deref(), Some("t1"));
        let notification: ErrorNotification = failed[0].decode().unwrap();
        assert_eq!(notification.error_code, ErrorCode::InsufficientFunds);
        assert_eq!(notification.request_id.as_deref(), Some("req-t1"));
        assert_eq!(f.store.transaction_count().await, 0);
    }

    #[tokio::test]
    async fn oversized_amounts_are_validation_failures() {
        let f = fixture();
        let account = open_account(&f).await;

        f.processor
            .process(&command(&transaction(&account, Direction::In, rust_decimal::Decimal::MAX), "huge", TRANSACTION_CREATE))
            .await
            .unwrap();
        f.processor
            .process(&command(
                &transaction(&account, Direction::In, dec!(99999999999999999.99)),
                "fill",
                TRANSACTION_CREATE,
            ))
            .await
            .unwrap();
        f.processor
            .process(&command(&transaction(&account, Direction::In, dec!(0.01)), "over", TRANSACTION_CREATE))
            .await
            .unwrap();

        let failed = f.bus.published_to(&f.routing.transaction_failed);
        assert_eq!(failed.len(), 2);
        for (outcome, key) in failed.iter().zip(["huge", "over"]) {
            assert_eq!(outcome.metadata.idempotency_key.as_deref(), Some(key));
            let notification: ErrorNotification = outcome.decode().unwrap();
            assert_eq!(notification.error_code, ErrorCode::ValidationFailed);
        }
        assert_eq!(f.store.transaction_count().await, 1);
    }

    #[tokio::test]
    async fn key_reused_across_request_types_is_a_validation_failure() {
        let f = fixture();
        let account = open_account(&f).await;

        f.processor
            .process(&command(&transaction(&account, Direction::In, dec!(1.00)), "open", TRANSACTION_CREATE))
            .await
            .unwrap();

        let notification: ErrorNotification = f.bus.published_to(&f.routing.transaction_failed)[0]
            .decode()
            .unwrap();
        assert_eq!(notification.error_code, ErrorCode::ValidationFailed);
        assert_eq!(
            notification.error_message,
            "Validation failed: Idempotency key 'open' was already used for ACCOUNT_CREATE"
        );
        assert!(f.bus.published_to(&f.routing.transaction_completed).is_empty());
    }

    #[tokio::test]
    async fn redelivered_command_republishes_the_same_outcome() {
        let f = fixture();
        let account = open_account(&f).await;
        let message = command(&transaction(&account, Direction::In, dec!(10.00)), "t1", TRANSACTION_CREATE);

        f.processor.process(&message).await.unwrap();
        f.processor.process(&message).await.unwrap();

        let published = f.bus.published_to(&f.routing.transaction_completed);
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].data, published[1].data);
        assert_eq!(f.store.transaction_count().await, 1);
    }

    #[tokio::test]
    async fn undecodable_command_is_a_validation_failure() {
        let f = fixture();
        let message = SerializedEvent::new(
            CREATE_TRANSACTION.to_string(),
            br#"{"amount":"x"}"#.to_vec(),
            EventMetadata::for_request("bad", "req-bad", TRANSACTION_CREATE, test_clock().now()),
        );

        f.processor.process(&message).await.unwrap();

        let notification: ErrorNotification = f.bus.published_to(&f.routing.transaction_failed)[0]
            .decode()
            .unwrap();
        assert_eq!(notification.error_code, ErrorCode::ValidationFailed);
    }

    #[tokio::test]
    async fn messages_without_key_or_known_type_are_errors() {
        let f = fixture();

        let no_key = SerializedEvent::new(CREATE_ACCOUNT.to_string(), b"{}".to_vec(), EventMetadata::default());
        assert!(matches!(
            f.processor.process(&no_key).await,
            Err(ProcessorError::Uncorrelated(_))
        ));

        let unknown = SerializedEvent::new(
            "Other.v1".to_string(),
            b"{}".to_vec(),
            EventMetadata::for_request("k", "r", "OTHER", test_clock().now()),
        );
        assert!(matches!(
            f.processor.process(&unknown).await,
            Err(ProcessorError::UnknownCommand(_))
        ));
    }
}

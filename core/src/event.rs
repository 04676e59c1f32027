//! Event trait and the wire envelope shared by every broker message.
//!
//! Commands and outcomes cross the broker as a [`SerializedEvent`]: a versioned type
//! name, a JSON body and an [`EventMetadata`] block that travels as message headers.
//!
//! # Design
//!
//! Bodies are JSON rather than a binary format. Ledger payloads carry exact decimal
//! amounts and opaque result documents, both of which need a self-describing format
//! to round-trip without loss.
//!
//! # Example
//!
//! ```
//! use ledger_bridge_core::event::Event;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! enum AccountEvent {
//!     Opened { account_id: String },
//!     Closed { account_id: String },
//! }
//!
//! impl Event for AccountEvent {
//!     fn event_type(&self) -> &'static str {
//!         match self {
//!             AccountEvent::Opened { .. } => "AccountOpened.v1",
//!             AccountEvent::Closed { .. } => "AccountClosed.v1",
//!         }
//!     }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Header carrying the idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
/// Header carrying the originating request identifier.
pub const REQUEST_ID_HEADER: &str = "request-id";
/// Header carrying the request-type tag (e.g. `TRANSACTION_CREATE`).
pub const REQUEST_TYPE_HEADER: &str = "request-type";
/// Header carrying the RFC 3339 creation timestamp.
pub const TIMESTAMP_HEADER: &str = "timestamp";

/// Error types for event operations.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// Unknown event type encountered during deserialization.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// A message body that can be published on the broker.
///
/// # Event Naming Convention
///
/// The `event_type()` method should return a stable string identifier that includes
/// a version number, so consumers can dispatch on it and schemas can evolve:
///
/// - `"TransactionCreated.v1"`
/// - `"CommandRejected.v1"`
pub trait Event: Send + Sync + 'static {
    /// Returns the event type identifier for this event.
    fn event_type(&self) -> &'static str;

    /// Serialize this event to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        serde_json::to_vec(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize an event from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the bytes are not a valid
    /// encoding of this event type.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        serde_json::from_slice(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// Correlation metadata attached to every command and outcome.
///
/// Producers fill in what they know; consumers copy the block from a command onto the
/// outcome they emit so the publishing side can match the two up.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Idempotency key of the originating request.
    pub idempotency_key: Option<String>,
    /// Identifier of the originating request.
    pub request_id: Option<String>,
    /// Request-type tag (`ACCOUNT_CREATE`, `TRANSACTION_CREATE`).
    pub request_type: Option<String>,
    /// When the message was created.
    pub timestamp: Option<DateTime<Utc>>,
}

impl EventMetadata {
    /// Metadata for a fresh command.
    #[must_use]
    pub fn for_request(
        idempotency_key: impl Into<String>,
        request_id: impl Into<String>,
        request_type: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            idempotency_key: Some(idempotency_key.into()),
            request_id: Some(request_id.into()),
            request_type: Some(request_type.into()),
            timestamp: Some(timestamp),
        }
    }

    /// Copy of this metadata re-stamped with a new timestamp.
    #[must_use]
    pub fn restamped(&self, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp: Some(timestamp),
            ..self.clone()
        }
    }

    /// Header pairs for the broker, skipping absent fields.
    #[must_use]
    pub fn to_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::with_capacity(4);
        if let Some(key) = &self.idempotency_key {
            headers.push((IDEMPOTENCY_KEY_HEADER, key.clone()));
        }
        if let Some(id) = &self.request_id {
            headers.push((REQUEST_ID_HEADER, id.clone()));
        }
        if let Some(kind) = &self.request_type {
            headers.push((REQUEST_TYPE_HEADER, kind.clone()));
        }
        if let Some(ts) = &self.timestamp {
            headers.push((TIMESTAMP_HEADER, ts.to_rfc3339()));
        }
        headers
    }

    /// Rebuild metadata from broker headers.
    ///
    /// Unknown headers are ignored, as is a timestamp that does not parse.
    #[must_use]
    pub fn from_headers<'a, I>(headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut metadata = Self::default();
        for (name, value) in headers {
            match name {
                IDEMPOTENCY_KEY_HEADER => metadata.idempotency_key = Some(value.to_string()),
                REQUEST_ID_HEADER => metadata.request_id = Some(value.to_string()),
                REQUEST_TYPE_HEADER => metadata.request_type = Some(value.to_string()),
                TIMESTAMP_HEADER => {
                    metadata.timestamp = DateTime::parse_from_rfc3339(value)
                        .ok()
                        .map(|ts| ts.with_timezone(&Utc));
                },
                _ => {},
            }
        }
        metadata
    }

    /// Key used to correlate an outcome with its pending request.
    ///
    /// The idempotency key wins; the request id is the fallback for producers
    /// that only set the latter.
    #[must_use]
    pub fn correlation_key(&self) -> Option<&str> {
        self.idempotency_key
            .as_deref()
            .or(self.request_id.as_deref())
    }
}

/// A serialized event ready for the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerializedEvent {
    /// The event type identifier (e.g., "TransactionCompleted.v1").
    pub event_type: String,

    /// The JSON-serialized event body.
    pub data: Vec<u8>,

    /// Correlation metadata, carried as broker headers.
    pub metadata: EventMetadata,
}

impl SerializedEvent {
    /// Create a new serialized event.
    ///
    /// # Examples
    ///
    /// ```
    /// use ledger_bridge_core::event::{EventMetadata, SerializedEvent};
    ///
    /// let event = SerializedEvent::new(
    ///     "AccountOpened.v1".to_string(),
    ///     br#"{"account_id":"a-1"}"#.to_vec(),
    ///     EventMetadata::default(),
    /// );
    /// assert_eq!(event.event_type, "AccountOpened.v1");
    /// ```
    #[must_use]
    pub const fn new(event_type: String, data: Vec<u8>, metadata: EventMetadata) -> Self {
        Self {
            event_type,
            data,
            metadata,
        }
    }

    /// Create a serialized event from an `Event`.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    pub fn from_event<E: Event + Serialize>(
        event: &E,
        metadata: EventMetadata,
    ) -> Result<Self, EventError> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            data: event.to_bytes()?,
            metadata,
        })
    }

    /// Decode the body as `E`.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the body does not decode.
    pub fn decode<E: Event + DeserializeOwned>(&self) -> Result<E, EventError> {
        E::from_bytes(&self.data)
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, key: {}, size: {} bytes }}",
            self.event_type,
            self.metadata.correlation_key().unwrap_or("-"),
            self.data.len()
        )
    }
}

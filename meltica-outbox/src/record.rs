//! Outbox record value type (component C5 data model).

use chrono::{DateTime, Utc};
use meltica_core::EventEnvelope;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use smol_str::SmolStr;
use uuid::Uuid;

/// Headers copied out of the envelope so a record can be replayed without deserialising the
/// full payload just to log or route it.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct OutboxHeaders {
    pub provider: SmolStr,
    pub symbol: SmolStr,
    pub event_id: SmolStr,
}

/// A row in the outbox: enqueued before the inner publish, marked delivered on success or
/// failed (with an attempt bump and an error string) otherwise.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub aggregate_type: SmolStr,
    pub aggregate_id: SmolStr,
    pub event_type: SmolStr,
    pub payload: serde_json::Value,
    pub headers: OutboxHeaders,
    pub available_at: DateTime<Utc>,
    pub delivered: bool,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Builds a pending record from an envelope about to be published. Aggregate type defaults
    /// to the provider name; aggregate id defaults to the event id.
    pub fn pending(event: &EventEnvelope, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            aggregate_type: event.provider.clone(),
            aggregate_id: event.id.clone(),
            event_type: SmolStr::new(event.event_type.as_str()),
            payload,
            headers: OutboxHeaders {
                provider: event.provider.clone(),
                symbol: event.symbol.clone(),
                event_id: event.id.clone(),
            },
            available_at: now,
            delivered: false,
            attempts: 0,
            last_error: None,
            created_at: now,
            published_at: None,
        }
    }

    /// Idempotency fingerprint: a given envelope always hashes to the same digest, so a
    /// replay worker can de-duplicate rows reconstructed from the same source event.
    pub fn message_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.headers.event_id.as_bytes());
        hasher.update(self.aggregate_type.as_bytes());
        hasher.update(self.event_type.as_bytes());
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }

    pub fn mark_delivered(&mut self) {
        self.delivered = true;
        self.published_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.attempts += 1;
        self.last_error = Some(error.into());
    }
}

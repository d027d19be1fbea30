use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Budget for one endpoint. The address-scoped window runs at twice the
/// subject budget so a single address cannot be laundered across subjects
/// without eventually tripping its own limit.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub endpoint: &'static str,
    pub max_attempts: u32,
    pub window_minutes: i64,
}

impl RateLimitPolicy {
    pub const fn new(endpoint: &'static str, max_attempts: u32, window_minutes: i64) -> Self {
        Self {
            endpoint,
            max_attempts,
            window_minutes,
        }
    }

    pub fn address_budget(&self) -> u32 {
        self.max_attempts * 2
    }
}

#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Rate limit exceeded for {endpoint}")]
    Limited { endpoint: String },

    #[error("Rate limit store error: {0}")]
    Store(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitAttempt {
    pub id: Uuid,
    pub subject_key: String,
    pub endpoint: String,
    pub attempted_at: DateTime<Utc>,
}

/// One append-only audit record. Never mutated or deleted by this core.
#[derive(Debug, Clone, Serialize)]
pub struct NewAuditEvent {
    pub actor_id: String,
    pub actor_role: String,
    pub entity: String,
    pub entity_id: String,
    pub action: String,
    pub metadata: serde_json::Value,
}

impl NewAuditEvent {
    pub fn new(actor_id: &str, actor_role: &str, entity: &str, entity_id: &str, action: &str) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            actor_role: actor_role.to_string(),
            entity: entity.to_string(),
            entity_id: entity_id.to_string(),
            action: action.to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

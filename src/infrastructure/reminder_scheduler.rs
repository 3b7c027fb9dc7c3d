use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderRequest {
    pub identifier: String,
    pub fire_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
    pub category: String,
}

/// Local notification service. Scheduling an identifier that already has a
/// pending reminder replaces it.
#[async_trait]
pub trait ReminderScheduler: Send + Sync {
    async fn schedule(&self, request: &ReminderRequest) -> Result<(), InfraError>;
    async fn cancel(&self, identifier: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Default)]
pub struct InMemoryReminderScheduler {
    pending: Mutex<HashMap<String, ReminderRequest>>,
}

impl InMemoryReminderScheduler {
    pub fn pending(&self, identifier: &str) -> Result<Option<ReminderRequest>, InfraError> {
        let pending = self
            .pending
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("reminder lock poisoned: {error}")))?;
        Ok(pending.get(identifier).cloned())
    }

    pub fn pending_count(&self) -> Result<usize, InfraError> {
        let pending = self
            .pending
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("reminder lock poisoned: {error}")))?;
        Ok(pending.len())
    }
}

#[async_trait]
impl ReminderScheduler for InMemoryReminderScheduler {
    async fn schedule(&self, request: &ReminderRequest) -> Result<(), InfraError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("reminder lock poisoned: {error}")))?;
        pending.insert(request.identifier.clone(), request.clone());
        Ok(())
    }

    async fn cancel(&self, identifier: &str) -> Result<(), InfraError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("reminder lock poisoned: {error}")))?;
        pending.remove(identifier);
        Ok(())
    }
}

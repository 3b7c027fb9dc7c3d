use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_database;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Progress marker of the last successful exchange with a sync zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    pub change_token: Option<String>,
    pub last_sync_time: DateTime<Utc>,
}

pub trait SyncStateRepository: Send + Sync {
    fn load(&self, zone: &str) -> Result<Option<SyncState>, InfraError>;
    fn save(
        &self,
        zone: &str,
        change_token: Option<&str>,
        last_sync_time: DateTime<Utc>,
    ) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteSyncStateRepository {
    db_path: PathBuf,
}

impl SqliteSyncStateRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_database(&self.db_path)
    }
}

impl SyncStateRepository for SqliteSyncStateRepository {
    fn load(&self, zone: &str) -> Result<Option<SyncState>, InfraError> {
        let connection = self.connect()?;
        let row: Option<(Option<String>, String)> = connection
            .query_row(
                "SELECT change_token, last_sync_time FROM sync_state WHERE zone = ?1",
                params![zone],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((change_token, last_sync_time_raw)) = row else {
            return Ok(None);
        };

        let parsed = DateTime::parse_from_rfc3339(&last_sync_time_raw).map_err(|error| {
            InfraError::InvalidConfig(format!(
                "invalid sync_state.last_sync_time '{}' for zone {zone}: {error}",
                last_sync_time_raw
            ))
        })?;

        Ok(Some(SyncState {
            change_token,
            last_sync_time: parsed.with_timezone(&Utc),
        }))
    }

    fn save(
        &self,
        zone: &str,
        change_token: Option<&str>,
        last_sync_time: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO sync_state (zone, change_token, last_sync_time)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(zone) DO UPDATE SET
               change_token = excluded.change_token,
               last_sync_time = excluded.last_sync_time",
            params![zone, change_token, last_sync_time.to_rfc3339()],
        )?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySyncStateRepository {
    zones: Mutex<HashMap<String, SyncState>>,
}

impl SyncStateRepository for InMemorySyncStateRepository {
    fn load(&self, zone: &str) -> Result<Option<SyncState>, InfraError> {
        let zones = self
            .zones
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("sync state lock poisoned: {error}")))?;
        Ok(zones.get(zone).cloned())
    }

    fn save(
        &self,
        zone: &str,
        change_token: Option<&str>,
        last_sync_time: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let mut zones = self
            .zones
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("sync state lock poisoned: {error}")))?;
        zones.insert(
            zone.to_string(),
            SyncState {
                change_token: change_token.map(ToOwned::to_owned),
                last_sync_time,
            },
        );
        Ok(())
    }
}

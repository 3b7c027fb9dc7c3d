use crate::domain::models::{Location, Task};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_database;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Writes that must land together or not at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub upsert_tasks: Vec<Task>,
    pub delete_task_ids: Vec<String>,
    pub upsert_locations: Vec<Location>,
    pub delete_location_ids: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.upsert_tasks.is_empty()
            && self.delete_task_ids.is_empty()
            && self.upsert_locations.is_empty()
            && self.delete_location_ids.is_empty()
    }
}

pub trait TaskRepository: Send + Sync {
    fn load_tasks(&self) -> Result<Vec<Task>, InfraError>;
    fn load_locations(&self) -> Result<Vec<Location>, InfraError>;
    fn commit(&self, changes: &ChangeSet) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteTaskRepository {
    db_path: PathBuf,
}

impl SqliteTaskRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_database(&self.db_path)
    }
}

fn format_instant(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|instant| instant.to_rfc3339_opts(SecondsFormat::Nanos, true))
}

fn parse_instant(raw: Option<String>, field_name: &str) -> Result<Option<DateTime<Utc>>, InfraError> {
    raw.map(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|error| InfraError::InvalidConfig(format!("invalid {field_name} '{raw}': {error}")))
    })
    .transpose()
}

struct TaskRow {
    id: String,
    title: String,
    due_at: Option<String>,
    completed_at: Option<String>,
    archived: bool,
    location_id: Option<String>,
    pending_deletion: bool,
    needs_sync: bool,
    version: i64,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            due_at: row.get(2)?,
            completed_at: row.get(3)?,
            archived: row.get(4)?,
            location_id: row.get(5)?,
            pending_deletion: row.get(6)?,
            needs_sync: row.get(7)?,
            version: row.get(8)?,
        })
    }

    fn into_task(self) -> Result<Task, InfraError> {
        Ok(Task {
            due_at: parse_instant(self.due_at, "tasks.due_at")?,
            completed_at: parse_instant(self.completed_at, "tasks.completed_at")?,
            id: self.id,
            title: self.title,
            archived: self.archived,
            location_id: self.location_id,
            pending_deletion: self.pending_deletion,
            needs_sync: self.needs_sync,
            version: u64::try_from(self.version).unwrap_or_default(),
        })
    }
}

impl TaskRepository for SqliteTaskRepository {
    fn load_tasks(&self) -> Result<Vec<Task>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(
            "SELECT id, title, due_at, completed_at, archived, location_id, pending_deletion, needs_sync, version
             FROM tasks",
        )?;
        let rows = statement
            .query_map([], TaskRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    fn load_locations(&self) -> Result<Vec<Location>, InfraError> {
        let connection = self.connect()?;
        let mut statement =
            connection.prepare("SELECT id, title, latitude, longitude FROM locations")?;
        let locations = statement
            .query_map([], |row| {
                Ok(Location {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    latitude: row.get(2)?,
                    longitude: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(locations)
    }

    fn commit(&self, changes: &ChangeSet) -> Result<(), InfraError> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        for location in &changes.upsert_locations {
            transaction.execute(
                "INSERT INTO locations (id, title, latitude, longitude)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                   title = excluded.title,
                   latitude = excluded.latitude,
                   longitude = excluded.longitude",
                params![location.id, location.title, location.latitude, location.longitude],
            )?;
        }
        for task in &changes.upsert_tasks {
            transaction.execute(
                "INSERT INTO tasks (id, title, due_at, completed_at, archived, location_id, pending_deletion, needs_sync, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                   title = excluded.title,
                   due_at = excluded.due_at,
                   completed_at = excluded.completed_at,
                   archived = excluded.archived,
                   location_id = excluded.location_id,
                   pending_deletion = excluded.pending_deletion,
                   needs_sync = excluded.needs_sync,
                   version = excluded.version",
                params![
                    task.id,
                    task.title,
                    format_instant(task.due_at),
                    format_instant(task.completed_at),
                    task.archived,
                    task.location_id,
                    task.pending_deletion,
                    task.needs_sync,
                    i64::try_from(task.version).unwrap_or(i64::MAX),
                ],
            )?;
        }
        for task_id in &changes.delete_task_ids {
            transaction.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
        }
        for location_id in &changes.delete_location_ids {
            transaction.execute("DELETE FROM locations WHERE id = ?1", params![location_id])?;
        }
        transaction.commit()?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
    state: Mutex<InMemoryTables>,
}

#[derive(Debug, Default)]
struct InMemoryTables {
    tasks: HashMap<String, Task>,
    locations: HashMap<String, Location>,
}

impl InMemoryTaskRepository {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryTables>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("task repository lock poisoned: {error}")))
    }
}

impl TaskRepository for InMemoryTaskRepository {
    fn load_tasks(&self) -> Result<Vec<Task>, InfraError> {
        Ok(self.lock()?.tasks.values().cloned().collect())
    }

    fn load_locations(&self) -> Result<Vec<Location>, InfraError> {
        Ok(self.lock()?.locations.values().cloned().collect())
    }

    fn commit(&self, changes: &ChangeSet) -> Result<(), InfraError> {
        let mut tables = self.lock()?;
        for location in &changes.upsert_locations {
            tables.locations.insert(location.id.clone(), location.clone());
        }
        for task in &changes.upsert_tasks {
            tables.tasks.insert(task.id.clone(), task.clone());
        }
        for task_id in &changes.delete_task_ids {
            tables.tasks.remove(task_id);
        }
        for location_id in &changes.delete_location_ids {
            tables.locations.remove(location_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::initialize_database;
    use std::sync::atomic::{AtomicU64, Ordering};

    static NEXT_DB: AtomicU64 = AtomicU64::new(1);

    struct TempDatabase {
        path: PathBuf,
    }

    impl TempDatabase {
        fn new() -> Self {
            let sequence = NEXT_DB.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "todododo-repo-tests-{}-{}.sqlite",
                std::process::id(),
                sequence
            ));
            initialize_database(&path).expect("initialize database");
            Self { path }
        }
    }

    impl Drop for TempDatabase {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_location() -> Location {
        Location {
            id: "loc-1".to_string(),
            title: "Office".to_string(),
            latitude: 35.68,
            longitude: 139.76,
        }
    }

    fn sample_task() -> Task {
        let mut task = Task::new("tsk-1", "Ship release", Some(fixed_time("2026-02-16T09:00:00.123456789Z")));
        task.location_id = Some("loc-1".to_string());
        task.version = 4;
        task
    }

    #[test]
    fn sqlite_commit_then_load_preserves_fields() {
        let database = TempDatabase::new();
        let repository = SqliteTaskRepository::new(&database.path);

        repository
            .commit(&ChangeSet {
                upsert_tasks: vec![sample_task()],
                upsert_locations: vec![sample_location()],
                ..ChangeSet::default()
            })
            .expect("commit");

        assert_eq!(repository.load_tasks().expect("load tasks"), vec![sample_task()]);
        assert_eq!(
            repository.load_locations().expect("load locations"),
            vec![sample_location()]
        );
    }

    #[test]
    fn sqlite_commit_upserts_and_deletes() {
        let database = TempDatabase::new();
        let repository = SqliteTaskRepository::new(&database.path);
        repository
            .commit(&ChangeSet {
                upsert_tasks: vec![sample_task()],
                upsert_locations: vec![sample_location()],
                ..ChangeSet::default()
            })
            .expect("seed");

        let mut updated = sample_task();
        updated.completed_at = Some(fixed_time("2026-02-16T10:00:00Z"));
        updated.needs_sync = false;
        updated.version = 5;
        repository
            .commit(&ChangeSet {
                upsert_tasks: vec![updated.clone()],
                ..ChangeSet::default()
            })
            .expect("update");
        assert_eq!(repository.load_tasks().expect("load"), vec![updated]);

        repository
            .commit(&ChangeSet {
                delete_task_ids: vec!["tsk-1".to_string()],
                delete_location_ids: vec!["loc-1".to_string()],
                ..ChangeSet::default()
            })
            .expect("delete");
        assert!(repository.load_tasks().expect("load").is_empty());
        assert!(repository.load_locations().expect("load").is_empty());
    }

    #[test]
    fn in_memory_repository_applies_change_sets() {
        let repository = InMemoryTaskRepository::default();
        repository
            .commit(&ChangeSet {
                upsert_tasks: vec![sample_task()],
                ..ChangeSet::default()
            })
            .expect("commit");
        assert_eq!(repository.load_tasks().expect("load").len(), 1);

        repository
            .commit(&ChangeSet {
                delete_task_ids: vec!["tsk-1".to_string()],
                ..ChangeSet::default()
            })
            .expect("delete");
        assert!(repository.load_tasks().expect("load").is_empty());
    }
}

use crate::application::bootstrap::bootstrap_workspace;
use crate::application::housekeeping::{self, HousekeepingReport};
use crate::application::reminders::ReminderPlanner;
use crate::application::reorder::{MoveOutcome, ReorderError, ReorderService};
use crate::application::store::{ListSubscription, NowProvider, TaskStore};
use crate::application::sync::TaskSyncService;
use crate::domain::list_view::{GroupKey, IndexPath, OrderedListView, ViewKind};
use crate::domain::models::{Location, Task, TaskPatch};
use crate::infrastructure::config::Settings;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::reminder_scheduler::ReminderScheduler;
use crate::infrastructure::remote_task_client::RemoteTaskClient;
use crate::infrastructure::sync_state_repository::SqliteSyncStateRepository;
use crate::infrastructure::task_repository::SqliteTaskRepository;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Display;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    settings: Settings,
    store: Arc<TaskStore>,
    reminders: Arc<ReminderPlanner<dyn ReminderScheduler>>,
    reorder: ReorderService<dyn ReminderScheduler>,
    now_provider: NowProvider,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf, scheduler: Arc<dyn ReminderScheduler>) -> Result<Self, InfraError> {
        Self::with_now_provider(workspace_root, scheduler, Arc::new(Utc::now))
    }

    pub fn with_now_provider(
        workspace_root: PathBuf,
        scheduler: Arc<dyn ReminderScheduler>,
        now_provider: NowProvider,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let settings = bootstrap.settings;
        let calendar = settings.app.calendar;

        let repository = Arc::new(SqliteTaskRepository::new(&bootstrap.database_path));
        let store = Arc::new(
            TaskStore::open(repository, calendar)?.with_now_provider(Arc::clone(&now_provider)),
        );
        let reminders = Arc::new(
            ReminderPlanner::new(scheduler, settings.reminders.clone(), calendar)
                .with_now_provider(Arc::clone(&now_provider)),
        );
        let reorder = ReorderService::new(Arc::clone(&store), Arc::clone(&reminders), settings.reorder);

        Ok(Self {
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            logs_dir: bootstrap.logs_dir,
            settings,
            store,
            reminders,
            reorder,
            now_provider,
            log_guard: Mutex::new(()),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn command_error(&self, command: &str, error: &impl Display) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }

    fn record<T, E: Display>(&self, command: &str, result: Result<T, E>) -> Result<T, E> {
        if let Err(error) = &result {
            self.log_error(command, &error.to_string());
        }
        result
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SectionResponse {
    pub key: GroupKey,
    pub title: String,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ListViewResponse {
    pub kind: ViewKind,
    pub sections: Vec<SectionResponse>,
}

impl From<&OrderedListView> for ListViewResponse {
    fn from(view: &OrderedListView) -> Self {
        Self {
            kind: view.kind(),
            sections: view
                .sections()
                .iter()
                .map(|section| SectionResponse {
                    key: section.key.clone(),
                    title: section.title.clone(),
                    tasks: section.rows.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MoveTaskResponse {
    pub moved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
    pub renormalized: usize,
}

impl From<MoveOutcome> for MoveTaskResponse {
    fn from(outcome: MoveOutcome) -> Self {
        match outcome {
            MoveOutcome::NoOp => Self {
                moved: false,
                task: None,
                renormalized: 0,
            },
            MoveOutcome::Moved { task, renormalized } => Self {
                moved: true,
                task: Some(task),
                renormalized,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SyncTasksResponse {
    pub pushed: usize,
    pub acknowledged: usize,
    pub purged: usize,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_change_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SnoozeResponse {
    pub task_id: String,
    pub fire_at: String,
}

pub async fn create_task(
    state: &AppState,
    title: String,
    due_at: Option<DateTime<Utc>>,
    location_id: Option<String>,
) -> Result<Task, InfraError> {
    let result = create_task_inner(state, title, due_at, location_id).await;
    state.record("create_task", result)
}

async fn create_task_inner(
    state: &AppState,
    title: String,
    due_at: Option<DateTime<Utc>>,
    location_id: Option<String>,
) -> Result<Task, InfraError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(InfraError::InvalidConfig("title must not be empty".to_string()));
    }
    if let Some(location_id) = location_id.as_deref() {
        if state.store.location(location_id)?.is_none() {
            return Err(InfraError::NotFound(format!("location not found: {location_id}")));
        }
    }

    let due_at = due_at.unwrap_or_else(|| state.now() + state.settings.app.default_due_offset());
    let mut task = Task::new(next_id("tsk"), title, Some(due_at));
    task.location_id = location_id;

    let task = state.store.create_task(task).await?;
    state.reminders.sync_task(&task).await?;
    state.log_info("create_task", &format!("created task_id={}", task.id));
    Ok(task)
}

pub async fn update_task(state: &AppState, task_id: String, patch: TaskPatch) -> Result<Task, InfraError> {
    let result = update_task_inner(state, &task_id, &patch).await;
    state.record("update_task", result)
}

async fn update_task_inner(state: &AppState, task_id: &str, patch: &TaskPatch) -> Result<Task, InfraError> {
    if patch.is_empty() {
        return Err(InfraError::InvalidConfig("patch must change at least one field".to_string()));
    }
    let task = state.store.update_task(task_id, patch).await?;
    state.reminders.sync_task(&task).await?;
    state.log_info("update_task", &format!("updated task_id={task_id}"));
    Ok(task)
}

/// Marks the task done now, or reopens it.
pub async fn complete_task(state: &AppState, task_id: String, completed: bool) -> Result<Task, InfraError> {
    let patch = TaskPatch {
        completed_at: Some(completed.then(|| state.now())),
        ..TaskPatch::default()
    };
    let result = update_task_inner(state, &task_id, &patch).await;
    state.record("complete_task", result)
}

pub async fn delete_task(state: &AppState, task_id: String) -> Result<Task, InfraError> {
    let result: Result<Task, InfraError> = async {
        let task = state.store.soft_delete(&task_id).await?;
        state.reminders.cancel(&task.id).await?;
        state.log_info("delete_task", &format!("soft-deleted task_id={task_id}"));
        Ok(task)
    }
    .await;
    state.record("delete_task", result)
}

pub async fn create_location(
    state: &AppState,
    title: String,
    latitude: f64,
    longitude: f64,
) -> Result<Location, InfraError> {
    let location = Location {
        id: next_id("loc"),
        title: title.trim().to_string(),
        latitude,
        longitude,
    };
    let result = state.store.upsert_location(location).await;
    if let Ok(location) = &result {
        state.log_info("create_location", &format!("created location_id={}", location.id));
    }
    state.record("create_location", result)
}

pub fn list_locations(state: &AppState) -> Result<Vec<Location>, InfraError> {
    let result = state.store.locations();
    state.record("list_locations", result)
}

pub fn list_view(state: &AppState, kind: ViewKind) -> Result<ListViewResponse, InfraError> {
    let result = state.store.view(kind).map(|view| ListViewResponse::from(&view));
    state.record("list_view", result)
}

/// Live diff stream for `kind`; the receiver starts from the returned
/// subscription's initial snapshot.
pub fn subscribe_view(state: &AppState, kind: ViewKind) -> Result<ListSubscription, InfraError> {
    let result = state.store.subscribe(kind);
    state.record("subscribe_view", result)
}

/// Drag-to-reorder in the current snapshot of `kind`. `destination` is in
/// post-move coordinates.
pub async fn move_task(
    state: &AppState,
    kind: ViewKind,
    source: IndexPath,
    destination: IndexPath,
) -> Result<MoveTaskResponse, ReorderError> {
    let result: Result<MoveTaskResponse, ReorderError> = async {
        let view = state.store.view(kind)?;
        let outcome = state.reorder.move_task(&view, source, destination).await?;
        if let MoveOutcome::Moved { task, renormalized } = &outcome {
            state.log_info(
                "move_task",
                &format!(
                    "moved task_id={} from {source:?} to {destination:?} renormalized={renormalized}",
                    task.id
                ),
            );
        }
        Ok(MoveTaskResponse::from(outcome))
    }
    .await;
    state.record("move_task", result)
}

pub async fn move_task_to_group(
    state: &AppState,
    kind: ViewKind,
    task_id: String,
    destination: GroupKey,
    row: usize,
) -> Result<MoveTaskResponse, ReorderError> {
    let result = state
        .reorder
        .move_task_into_group(kind, &task_id, destination, row)
        .await;
    if let Ok(MoveOutcome::Moved { renormalized, .. }) = &result {
        state.log_info(
            "move_task_to_group",
            &format!("moved task_id={task_id} to row={row} renormalized={renormalized}"),
        );
    }
    state.record("move_task_to_group", result.map(MoveTaskResponse::from))
}

pub async fn run_housekeeping(state: &AppState) -> Result<HousekeepingReport, InfraError> {
    let result: Result<HousekeepingReport, InfraError> = async {
        let report = housekeeping::run_housekeeping(&state.store, &state.settings.housekeeping).await?;
        for task_id in &report.archived_task_ids {
            state.reminders.cancel(task_id).await?;
        }
        state.log_info(
            "run_housekeeping",
            &format!(
                "archived={} deleted_locations={}",
                report.archived_task_ids.len(),
                report.deleted_location_ids.len()
            ),
        );
        Ok(report)
    }
    .await;
    state.record("run_housekeeping", result)
}

pub async fn sync_tasks<C>(state: &AppState, client: Arc<C>) -> Result<SyncTasksResponse, InfraError>
where
    C: RemoteTaskClient,
{
    let result: Result<SyncTasksResponse, InfraError> = async {
        let sync_state_repository = Arc::new(SqliteSyncStateRepository::new(state.database_path()));
        let service = TaskSyncService::new(client, sync_state_repository, Arc::clone(&state.store))
            .with_now_provider(Arc::clone(&state.now_provider));
        let report = service.sync().await?;

        for task_id in report.touched_task_ids() {
            match state.store.task(task_id)? {
                Some(task) => {
                    state.reminders.sync_task(&task).await?;
                }
                None => state.reminders.cancel(task_id).await?,
            }
        }

        state.log_info(
            "sync_tasks",
            &format!(
                "pushed={} acknowledged={} added={} updated={} deleted={}",
                report.pushed,
                report.acknowledged.len(),
                report.added.len(),
                report.updated.len(),
                report.deleted.len()
            ),
        );
        Ok(SyncTasksResponse {
            pushed: report.pushed,
            acknowledged: report.acknowledged.len(),
            purged: report.purged.len(),
            added: report.added.len(),
            updated: report.updated.len(),
            deleted: report.deleted.len(),
            next_change_token: report.next_change_token,
        })
    }
    .await;
    state.record("sync_tasks", result)
}

pub async fn snooze_reminder(state: &AppState, task_id: String) -> Result<SnoozeResponse, InfraError> {
    let result: Result<SnoozeResponse, InfraError> = async {
        let task = state
            .store
            .task(&task_id)?
            .ok_or_else(|| InfraError::NotFound(format!("task not found: {task_id}")))?;
        let request = state.reminders.snooze(&task).await?;
        state.log_info(
            "snooze_reminder",
            &format!("snoozed task_id={task_id} until {}", request.fire_at.to_rfc3339()),
        );
        Ok(SnoozeResponse {
            task_id,
            fire_at: request.fire_at.to_rfc3339(),
        })
    }
    .await;
    state.record("snooze_reminder", result)
}

/// Re-derives observed views and reminders, e.g. after the app returns to
/// the foreground on a new day.
pub async fn refresh(state: &AppState) -> Result<usize, InfraError> {
    let result: Result<usize, InfraError> = async {
        state.store.refresh_observers()?;
        let tasks = state.store.tasks()?;
        let scheduled = state.reminders.sync_all(&tasks).await?;
        state.log_info("refresh", &format!("scheduled_reminders={scheduled}"));
        Ok(scheduled)
    }
    .await;
    state.record("refresh", result)
}

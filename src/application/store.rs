use crate::domain::diff::{diff_views, ListDiff};
use crate::domain::list_view::{OrderedListView, ViewKind};
use crate::domain::models::{Location, Task, TaskPatch};
use crate::domain::time_order::LocalCalendar;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::task_repository::{ChangeSet, TaskRepository};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Default)]
struct StoreSnapshot {
    tasks: HashMap<String, Task>,
    locations: HashMap<String, Location>,
    revision: u64,
}

impl StoreSnapshot {
    fn view(&self, kind: ViewKind, now: DateTime<Utc>, calendar: &LocalCalendar) -> OrderedListView {
        OrderedListView::build(kind, self.tasks.values(), &self.locations, now, calendar)
    }
}

struct Observer {
    kind: ViewKind,
    last: OrderedListView,
    sender: mpsc::UnboundedSender<ListDiff>,
}

struct StoreState {
    snapshot: Arc<StoreSnapshot>,
    observers: Vec<Observer>,
}

/// Result of a successful commit.
#[derive(Debug, Clone, Default)]
pub struct CommitReceipt {
    pub revision: u64,
    pub tasks: Vec<Task>,
    pub deleted_task_ids: Vec<String>,
    pub deleted_location_ids: Vec<String>,
}

impl CommitReceipt {
    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == task_id)
    }
}

/// Ordered task store. Every commit re-derives the observed views and pushes
/// the resulting diffs to their subscribers.
pub struct TaskStore {
    repository: Arc<dyn TaskRepository>,
    calendar: LocalCalendar,
    now_provider: NowProvider,
    state: Mutex<StoreState>,
    edit_gate: RwLock<()>,
}

impl TaskStore {
    pub fn open(repository: Arc<dyn TaskRepository>, calendar: LocalCalendar) -> Result<Self, InfraError> {
        let tasks = repository
            .load_tasks()?
            .into_iter()
            .map(|task| (task.id.clone(), task))
            .collect();
        let locations = repository
            .load_locations()?
            .into_iter()
            .map(|location| (location.id.clone(), location))
            .collect();

        Ok(Self {
            repository,
            calendar,
            now_provider: Arc::new(Utc::now),
            state: Mutex::new(StoreState {
                snapshot: Arc::new(StoreSnapshot {
                    tasks,
                    locations,
                    revision: 0,
                }),
                observers: Vec::new(),
            }),
            edit_gate: RwLock::new(()),
        })
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    pub fn calendar(&self) -> &LocalCalendar {
        &self.calendar
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, StoreState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("task store lock poisoned: {error}")))
    }

    fn snapshot(&self) -> Result<Arc<StoreSnapshot>, InfraError> {
        Ok(Arc::clone(&self.lock_state()?.snapshot))
    }

    pub fn revision(&self) -> Result<u64, InfraError> {
        Ok(self.snapshot()?.revision)
    }

    pub fn task(&self, task_id: &str) -> Result<Option<Task>, InfraError> {
        Ok(self.snapshot()?.tasks.get(task_id).cloned())
    }

    pub fn tasks(&self) -> Result<Vec<Task>, InfraError> {
        Ok(self.snapshot()?.tasks.values().cloned().collect())
    }

    pub fn location(&self, location_id: &str) -> Result<Option<Location>, InfraError> {
        Ok(self.snapshot()?.locations.get(location_id).cloned())
    }

    pub fn locations(&self) -> Result<Vec<Location>, InfraError> {
        let mut locations = self
            .snapshot()?
            .locations
            .values()
            .cloned()
            .collect::<Vec<_>>();
        locations.sort_by(|left, right| left.title.to_lowercase().cmp(&right.title.to_lowercase()));
        Ok(locations)
    }

    /// Current grouped and sorted snapshot of a view.
    pub fn view(&self, kind: ViewKind) -> Result<OrderedListView, InfraError> {
        Ok(self.snapshot()?.view(kind, self.now(), &self.calendar))
    }

    pub fn subscribe(&self, kind: ViewKind) -> Result<ListSubscription, InfraError> {
        let mut state = self.lock_state()?;
        let initial = state.snapshot.view(kind, self.now(), &self.calendar);
        let (sender, receiver) = mpsc::unbounded_channel();
        state.observers.push(Observer {
            kind,
            last: initial.clone(),
            sender,
        });
        Ok(ListSubscription {
            kind,
            initial,
            receiver,
        })
    }

    /// Re-derives observed views without a write, e.g. after the day rolls over.
    pub fn refresh_observers(&self) -> Result<(), InfraError> {
        let mut state = self.lock_state()?;
        let state = &mut *state;
        notify_observers(&mut state.observers, &state.snapshot, self.now(), &self.calendar);
        Ok(())
    }

    pub fn begin_edit(&self) -> Result<EditSession, InfraError> {
        Ok(EditSession {
            base: self.snapshot()?,
            now: self.now(),
            calendar: self.calendar,
            reads: HashMap::new(),
            location_reads: HashMap::new(),
            staged_tasks: HashMap::new(),
            purged_tasks: HashSet::new(),
            staged_locations: HashMap::new(),
            deleted_locations: HashSet::new(),
        })
    }

    /// Shared permit held by interactive edits.
    pub async fn interactive(&self) -> RwLockReadGuard<'_, ()> {
        self.edit_gate.read().await
    }

    /// Exclusive permit; waits for in-flight interactive edits to settle.
    pub async fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.edit_gate.write().await
    }

    pub async fn commit(&self, session: EditSession) -> Result<CommitReceipt, InfraError> {
        let _permit = self.interactive().await;
        self.apply_session(session)
    }

    pub async fn commit_exclusive(&self, session: EditSession) -> Result<CommitReceipt, InfraError> {
        let permit = self.exclusive().await;
        self.commit_under(&permit, session)
    }

    /// Commits while the caller already holds the exclusive permit, so a
    /// session staged under that permit cannot race an interactive commit.
    pub fn commit_under(
        &self,
        _permit: &RwLockWriteGuard<'_, ()>,
        session: EditSession,
    ) -> Result<CommitReceipt, InfraError> {
        self.apply_session(session)
    }

    /// Validates the session's reads, persists its writes atomically and only
    /// then publishes them. Any failure leaves the store untouched.
    fn apply_session(&self, session: EditSession) -> Result<CommitReceipt, InfraError> {
        let mut guard = self.lock_state()?;
        let state = &mut *guard;
        if session.is_empty() {
            return Ok(CommitReceipt {
                revision: state.snapshot.revision,
                ..CommitReceipt::default()
            });
        }

        for (task_id, expected) in &session.reads {
            let current = state.snapshot.tasks.get(task_id).map(|task| task.version);
            if current != *expected {
                return Err(InfraError::StaleWrite(format!(
                    "task {task_id} changed since it was read"
                )));
            }
        }
        for (location_id, existed) in &session.location_reads {
            if state.snapshot.locations.contains_key(location_id) != *existed {
                return Err(InfraError::StaleWrite(format!(
                    "location {location_id} changed since it was read"
                )));
            }
        }

        let mut changes = ChangeSet::default();
        for staged in session.staged_tasks.values() {
            let mut task = staged.clone();
            task.version = state
                .snapshot
                .tasks
                .get(&task.id)
                .map_or(1, |current| current.version + 1);
            task.validate().map_err(InfraError::InvalidConfig)?;
            changes.upsert_tasks.push(task);
        }
        changes.upsert_locations = session.staged_locations.values().cloned().collect();
        changes.delete_task_ids = session
            .purged_tasks
            .iter()
            .filter(|task_id| state.snapshot.tasks.contains_key(*task_id))
            .cloned()
            .collect();
        changes.delete_location_ids = session
            .deleted_locations
            .iter()
            .filter(|location_id| state.snapshot.locations.contains_key(*location_id))
            .cloned()
            .collect();
        // A location may only go once no live task points at it.
        let live_tasks = changes.upsert_tasks.iter().chain(state.snapshot.tasks.values().filter(|task| {
            !session.staged_tasks.contains_key(&task.id) && !session.purged_tasks.contains(&task.id)
        }));
        for task in live_tasks.filter(|task| !task.pending_deletion) {
            if let Some(location_id) = task
                .location_id
                .as_ref()
                .filter(|location_id| changes.delete_location_ids.contains(*location_id))
            {
                return Err(InfraError::StaleWrite(format!(
                    "location {location_id} is still used by task {}",
                    task.id
                )));
            }
        }

        self.repository.commit(&changes)?;

        let snapshot = Arc::make_mut(&mut state.snapshot);
        for location in &changes.upsert_locations {
            snapshot.locations.insert(location.id.clone(), location.clone());
        }
        for task in &changes.upsert_tasks {
            snapshot.tasks.insert(task.id.clone(), task.clone());
        }
        for task_id in &changes.delete_task_ids {
            snapshot.tasks.remove(task_id);
        }
        for location_id in &changes.delete_location_ids {
            snapshot.locations.remove(location_id);
        }
        snapshot.revision += 1;
        let revision = snapshot.revision;

        notify_observers(&mut state.observers, &state.snapshot, self.now(), &self.calendar);

        Ok(CommitReceipt {
            revision,
            tasks: changes.upsert_tasks,
            deleted_task_ids: changes.delete_task_ids,
            deleted_location_ids: changes.delete_location_ids,
        })
    }

    pub async fn create_task(&self, task: Task) -> Result<Task, InfraError> {
        let task_id = task.id.clone();
        let mut session = self.begin_edit()?;
        session.insert_task(task)?;
        let receipt = self.commit(session).await?;
        committed_task(&receipt, &task_id)
    }

    pub async fn update_task(&self, task_id: &str, patch: &TaskPatch) -> Result<Task, InfraError> {
        let mut session = self.begin_edit()?;
        session.update_task(task_id, |task| task.apply_patch(patch))?;
        let receipt = self.commit(session).await?;
        committed_task(&receipt, task_id)
    }

    /// Flags the task for deletion; the row stays until a sync pass purges it.
    pub async fn soft_delete(&self, task_id: &str) -> Result<Task, InfraError> {
        let mut session = self.begin_edit()?;
        session.update_task(task_id, |task| {
            task.mark_for_deletion();
            Ok(())
        })?;
        let receipt = self.commit(session).await?;
        committed_task(&receipt, task_id)
    }

    pub async fn upsert_location(&self, location: Location) -> Result<Location, InfraError> {
        let mut session = self.begin_edit()?;
        session.upsert_location(location.clone())?;
        self.commit(session).await?;
        Ok(location)
    }
}

fn committed_task(receipt: &CommitReceipt, task_id: &str) -> Result<Task, InfraError> {
    receipt
        .task(task_id)
        .cloned()
        .ok_or_else(|| InfraError::NotFound(format!("task not committed: {task_id}")))
}

fn notify_observers(
    observers: &mut Vec<Observer>,
    snapshot: &StoreSnapshot,
    now: DateTime<Utc>,
    calendar: &LocalCalendar,
) {
    observers.retain_mut(|observer| {
        if observer.sender.is_closed() {
            return false;
        }
        let view = snapshot.view(observer.kind, now, calendar);
        let diff = diff_views(&observer.last, &view);
        observer.last = view;
        diff.is_empty() || observer.sender.send(diff).is_ok()
    });
}

/// Diff stream for one view.
pub struct ListSubscription {
    kind: ViewKind,
    initial: OrderedListView,
    receiver: mpsc::UnboundedReceiver<ListDiff>,
}

impl ListSubscription {
    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    /// The view as it was when the subscription was created.
    pub fn initial(&self) -> &OrderedListView {
        &self.initial
    }

    pub async fn recv(&mut self) -> Option<ListDiff> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ListDiff> {
        self.receiver.try_recv().ok()
    }
}

/// Staged copy-on-write edit over a store snapshot. Reads record the version
/// they saw so that commit can reject writes based on stale data. Dropping
/// the session discards it.
pub struct EditSession {
    base: Arc<StoreSnapshot>,
    now: DateTime<Utc>,
    calendar: LocalCalendar,
    reads: HashMap<String, Option<u64>>,
    location_reads: HashMap<String, bool>,
    staged_tasks: HashMap<String, Task>,
    purged_tasks: HashSet<String>,
    staged_locations: HashMap<String, Location>,
    deleted_locations: HashSet<String>,
}

impl EditSession {
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn calendar(&self) -> &LocalCalendar {
        &self.calendar
    }

    pub fn base_revision(&self) -> u64 {
        self.base.revision
    }

    pub fn is_empty(&self) -> bool {
        self.staged_tasks.is_empty()
            && self.purged_tasks.is_empty()
            && self.staged_locations.is_empty()
            && self.deleted_locations.is_empty()
    }

    /// Current staged state of a task without recording a read.
    pub fn peek(&self, task_id: &str) -> Option<&Task> {
        if self.purged_tasks.contains(task_id) {
            return None;
        }
        self.staged_tasks
            .get(task_id)
            .or_else(|| self.base.tasks.get(task_id))
    }

    /// Records the version of `task_id` in the base snapshot as a dependency.
    pub fn observe(&mut self, task_id: &str) {
        if self.reads.contains_key(task_id) {
            return;
        }
        let version = self.base.tasks.get(task_id).map(|task| task.version);
        self.reads.insert(task_id.to_string(), version);
    }

    /// Records whether `location_id` exists in the base snapshot; commit
    /// fails if that changed in the meantime.
    pub fn observe_location(&mut self, location_id: &str) {
        if self.location_reads.contains_key(location_id) {
            return;
        }
        let exists = self.base.locations.contains_key(location_id);
        self.location_reads.insert(location_id.to_string(), exists);
    }

    pub fn task(&mut self, task_id: &str) -> Option<Task> {
        self.observe(task_id);
        self.peek(task_id).cloned()
    }

    pub fn tasks(&self) -> Vec<Task> {
        let mut tasks = self
            .base
            .tasks
            .values()
            .filter(|task| {
                !self.staged_tasks.contains_key(&task.id) && !self.purged_tasks.contains(&task.id)
            })
            .cloned()
            .collect::<Vec<_>>();
        tasks.extend(
            self.staged_tasks
                .values()
                .filter(|task| !self.purged_tasks.contains(&task.id))
                .cloned(),
        );
        tasks
    }

    pub fn locations(&self) -> HashMap<String, Location> {
        let mut locations = self.base.locations.clone();
        for location_id in &self.deleted_locations {
            locations.remove(location_id);
        }
        for location in self.staged_locations.values() {
            locations.insert(location.id.clone(), location.clone());
        }
        locations
    }

    /// The view as it would look if the session were committed now.
    pub fn view(&self, kind: ViewKind) -> OrderedListView {
        let tasks = self.tasks();
        OrderedListView::build(kind, &tasks, &self.locations(), self.now, &self.calendar)
    }

    pub fn insert_task(&mut self, task: Task) -> Result<(), InfraError> {
        if self.task(&task.id).is_some() {
            return Err(InfraError::InvalidConfig(format!(
                "task already exists: {}",
                task.id
            )));
        }
        task.validate().map_err(InfraError::InvalidConfig)?;
        if let Some(location_id) = task.location_id.as_deref() {
            self.observe_location(location_id);
        }
        self.purged_tasks.remove(&task.id);
        self.staged_tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Applies `edit` to a staged copy of the task. The staged copy is only
    /// replaced when the edit succeeds and the result is valid.
    pub fn update_task<F>(&mut self, task_id: &str, edit: F) -> Result<Task, InfraError>
    where
        F: FnOnce(&mut Task) -> Result<(), String>,
    {
        let Some(mut task) = self.task(task_id) else {
            return Err(InfraError::NotFound(format!("task not found: {task_id}")));
        };
        edit(&mut task).map_err(InfraError::InvalidConfig)?;
        task.validate().map_err(InfraError::InvalidConfig)?;
        if let Some(location_id) = task.location_id.as_deref() {
            self.observe_location(location_id);
        }
        self.staged_tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    /// Unconditional write of an externally authored record.
    pub fn put_task(&mut self, task: Task) {
        self.purged_tasks.remove(&task.id);
        self.staged_tasks.insert(task.id.clone(), task);
    }

    /// Unconditional hard removal.
    pub fn purge_task(&mut self, task_id: &str) {
        self.staged_tasks.remove(task_id);
        self.purged_tasks.insert(task_id.to_string());
    }

    pub fn upsert_location(&mut self, location: Location) -> Result<(), InfraError> {
        location.validate().map_err(InfraError::InvalidConfig)?;
        self.deleted_locations.remove(&location.id);
        self.staged_locations.insert(location.id.clone(), location);
        Ok(())
    }

    pub fn delete_location(&mut self, location_id: &str) {
        self.staged_locations.remove(location_id);
        self.deleted_locations.insert(location_id.to_string());
    }
}

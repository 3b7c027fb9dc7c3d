use crate::application::reminders::ReminderPlanner;
use crate::application::store::{EditSession, TaskStore};
use crate::domain::interpolation::{
    compute_new_due_date_within, respace, DegenerateInterpolation, InterpolationPolicy,
};
use crate::domain::list_view::{GroupKey, IndexPath, OrderedListView, ViewKind};
use crate::domain::models::Task;
use crate::domain::time_order::{bucket_window, DueWindow, TimeOrder};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::reminder_scheduler::ReminderScheduler;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum ReorderError {
    #[error("source and destination are the same position")]
    InvalidMoveNoOp,
    #[error(transparent)]
    DegenerateInterpolation(#[from] DegenerateInterpolation),
    #[error("failed to commit move: {0}")]
    StoreCommitFailure(#[from] InfraError),
    #[error("a neighbor changed while the move was in flight")]
    StaleNeighborReference,
    #[error("index path {0:?} is outside the view")]
    InvalidIndexPath(IndexPath),
    #[error("task {0} is not part of the view")]
    TaskNotInView(String),
    #[error("the {0:?} view cannot be reordered")]
    NotReorderable(ViewKind),
    #[error("no date currently falls in the {0} section")]
    EmptyBucket(TimeOrder),
}

/// A resolved drag: which task goes where, independent of row coordinates
/// that may shift before the move is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveTarget {
    pub task_id: String,
    pub source: GroupKey,
    pub destination: GroupKey,
    /// Row within the destination group once the task has been taken out of it.
    pub row: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    NoOp,
    Moved { task: Task, renormalized: usize },
}

/// Resolves a drag from `source` to `destination` against the snapshot the
/// user was looking at. `destination` is expressed in post-move coordinates.
pub fn plan_move(
    view: &OrderedListView,
    source: IndexPath,
    destination: IndexPath,
) -> Result<MoveTarget, ReorderError> {
    if !view.kind().is_reorderable() {
        return Err(ReorderError::NotReorderable(view.kind()));
    }
    let source_section = view
        .section(source.section)
        .ok_or(ReorderError::InvalidIndexPath(source))?;
    let task = source_section
        .rows
        .get(source.row)
        .ok_or(ReorderError::InvalidIndexPath(source))?;
    let destination_section = view
        .section(destination.section)
        .ok_or(ReorderError::InvalidIndexPath(destination))?;

    let capacity = if destination.section == source.section {
        destination_section.rows.len() - 1
    } else {
        destination_section.rows.len()
    };
    if destination.row > capacity {
        return Err(ReorderError::InvalidIndexPath(destination));
    }
    if source == destination {
        return Err(ReorderError::InvalidMoveNoOp);
    }

    Ok(MoveTarget {
        task_id: task.id.clone(),
        source: source_section.key.clone(),
        destination: destination_section.key.clone(),
        row: destination.row,
    })
}

struct StagedMove {
    task_id: String,
    renormalized: usize,
}

/// Applies drag-to-reorder moves. Moves touching the same group run one at a
/// time; a move between groups holds both group locks, taken in key order.
pub struct ReorderService<R>
where
    R: ReminderScheduler + ?Sized,
{
    store: Arc<TaskStore>,
    reminders: Arc<ReminderPlanner<R>>,
    policy: InterpolationPolicy,
    group_locks: DashMap<GroupKey, Arc<Mutex<()>>>,
}

impl<R> ReorderService<R>
where
    R: ReminderScheduler + ?Sized,
{
    pub fn new(
        store: Arc<TaskStore>,
        reminders: Arc<ReminderPlanner<R>>,
        policy: InterpolationPolicy,
    ) -> Self {
        Self {
            store,
            reminders,
            policy,
            group_locks: DashMap::new(),
        }
    }

    pub async fn move_task(
        &self,
        view: &OrderedListView,
        source: IndexPath,
        destination: IndexPath,
    ) -> Result<MoveOutcome, ReorderError> {
        let target = match plan_move(view, source, destination) {
            Ok(target) => target,
            Err(ReorderError::InvalidMoveNoOp) => return Ok(MoveOutcome::NoOp),
            Err(error) => return Err(error),
        };
        self.execute(view.kind(), target).await
    }

    /// Moves a task to `row` of the group identified by `destination`, which
    /// may currently hold no rows at all.
    pub async fn move_task_into_group(
        &self,
        kind: ViewKind,
        task_id: &str,
        destination: GroupKey,
        row: usize,
    ) -> Result<MoveOutcome, ReorderError> {
        if !kind.is_reorderable() {
            return Err(ReorderError::NotReorderable(kind));
        }
        let current = self.store.view(kind)?;
        let source = current
            .index_path_of(task_id)
            .ok_or_else(|| ReorderError::TaskNotInView(task_id.to_string()))?;
        let source_key = current
            .section(source.section)
            .map(|section| section.key.clone())
            .ok_or(ReorderError::InvalidIndexPath(source))?;
        if source_key == destination && source.row == row {
            return Ok(MoveOutcome::NoOp);
        }

        self.execute(
            kind,
            MoveTarget {
                task_id: task_id.to_string(),
                source: source_key,
                destination,
                row,
            },
        )
        .await
    }

    fn group_lock(&self, key: &GroupKey) -> Arc<Mutex<()>> {
        Arc::clone(self.group_locks.entry(key.clone()).or_default().value())
    }

    async fn execute(&self, kind: ViewKind, target: MoveTarget) -> Result<MoveOutcome, ReorderError> {
        let (first, second) = if target.source <= target.destination {
            (&target.source, &target.destination)
        } else {
            (&target.destination, &target.source)
        };
        let first_lock = self.group_lock(first);
        let _first_guard = first_lock.lock().await;
        let second_lock = (first != second).then(|| self.group_lock(second));
        let _second_guard = match &second_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let mut retried = false;
        loop {
            let mut session = self.store.begin_edit()?;
            let staged = self.stage_move(&mut session, kind, &target)?;
            match self.store.commit(session).await {
                Ok(receipt) => {
                    for task in &receipt.tasks {
                        if let Err(error) = self.reminders.sync_task(task).await {
                            tracing::warn!(task_id = %task.id, %error, "failed to reschedule reminder after move");
                        }
                    }
                    let task = receipt
                        .task(&staged.task_id)
                        .cloned()
                        .ok_or_else(|| ReorderError::TaskNotInView(staged.task_id.clone()))?;
                    return Ok(MoveOutcome::Moved {
                        task,
                        renormalized: staged.renormalized,
                    });
                }
                Err(InfraError::StaleWrite(message)) if !retried => {
                    tracing::warn!(task_id = %target.task_id, %message, "stale neighbor, retrying move");
                    retried = true;
                }
                Err(InfraError::StaleWrite(_)) => return Err(ReorderError::StaleNeighborReference),
                Err(error) => return Err(ReorderError::StoreCommitFailure(error)),
            }
        }
    }

    /// Stages the due date (and location) change for `target` on `session`,
    /// renormalizing the destination group once if the neighbors leave no room.
    fn stage_move(
        &self,
        session: &mut EditSession,
        kind: ViewKind,
        target: &MoveTarget,
    ) -> Result<StagedMove, ReorderError> {
        let Some(task) = session
            .task(&target.task_id)
            .filter(|task| kind.includes(task))
        else {
            return Err(ReorderError::StaleNeighborReference);
        };

        let view = session.view(kind);
        let current_group = view
            .index_path_of(&task.id)
            .and_then(|path| view.section(path.section))
            .map(|section| section.key.clone());
        let mut rows = view
            .section_index(&target.destination)
            .and_then(|index| view.section(index))
            .map(|section| {
                section
                    .rows
                    .iter()
                    .filter(|row| row.id != task.id)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let row = target.row.min(rows.len());
        for neighbor in neighbors(&rows, row).into_iter().flatten() {
            session.observe(&neighbor.id);
        }

        let now = session.now();
        let window = due_window(session, &target.destination)?;
        let mut renormalized = 0;
        let due_at = match self.interpolate(&rows, row, now, window) {
            Ok(due_at) => due_at,
            Err(degenerate) => {
                tracing::debug!(task_id = %task.id, %degenerate, "renormalizing destination group");
                renormalized = self.renormalize(session, &mut rows, window)?;
                self.interpolate(&rows, row, now, window).inspect_err(|error| {
                    tracing::warn!(task_id = %task.id, %error, "still no room after renormalizing");
                })?
            }
        };

        let location_id = (kind == ViewKind::ByLocation
            && current_group.as_ref() != Some(&target.destination))
        .then(|| {
            let [before, after] = neighbors(&rows, row);
            after
                .or(before)
                .map(|neighbor| neighbor.location_id.clone())
                .unwrap_or_else(|| target.destination.location_id().map(ToOwned::to_owned))
        });

        session.update_task(&task.id, |task| {
            task.due_at = due_at;
            if let Some(location_id) = location_id {
                task.location_id = location_id;
            }
            task.needs_sync = true;
            Ok(())
        })?;

        Ok(StagedMove {
            task_id: task.id,
            renormalized,
        })
    }

    /// Due date for a task dropped at `row`. An undated neighbor above makes
    /// the task undated; an undated neighbor below counts as no neighbor.
    fn interpolate(
        &self,
        rows: &[Task],
        row: usize,
        now: DateTime<Utc>,
        window: DueWindow,
    ) -> Result<Option<DateTime<Utc>>, DegenerateInterpolation> {
        let [before, after] = neighbors(rows, row);
        if before.is_some_and(|before| before.due_at.is_none()) {
            return Ok(None);
        }
        compute_new_due_date_within(
            before.and_then(|task| task.due_at),
            after.and_then(|task| task.due_at),
            &self.policy,
            now,
            window,
        )
        .map(Some)
    }

    /// Re-spaces the dated rows forward from the first one. A run that would
    /// spill past the end of `window` is left alone and reported degenerate.
    fn renormalize(
        &self,
        session: &mut EditSession,
        rows: &mut [Task],
        window: DueWindow,
    ) -> Result<usize, ReorderError> {
        let dated = rows
            .iter()
            .enumerate()
            .filter_map(|(index, task)| task.due_at.map(|due_at| (index, due_at)))
            .collect::<Vec<_>>();
        let dues = dated.iter().map(|(_, due_at)| *due_at).collect::<Vec<_>>();
        let spaced = respace(&dues, &self.policy);
        if let (Some(first), Some(last), Some(end)) = (spaced.first(), spaced.last(), window.end) {
            if *last >= end {
                return Err(DegenerateInterpolation {
                    before: *first,
                    after: end,
                }
                .into());
            }
        }

        let mut changed = 0;
        for ((index, due_at), respaced) in dated.into_iter().zip(spaced) {
            if due_at == respaced {
                continue;
            }
            rows[index] = session.update_task(&rows[index].id, |task| {
                task.due_at = Some(respaced);
                task.needs_sync = true;
                Ok(())
            })?;
            changed += 1;
        }
        tracing::debug!(changed, "respaced destination group");
        Ok(changed)
    }
}

/// Range the moved task's due date must stay in so it sorts into
/// `destination`. Only due-date sections constrain it.
fn due_window(session: &EditSession, destination: &GroupKey) -> Result<DueWindow, ReorderError> {
    match destination {
        GroupKey::DueBucket(order) => {
            bucket_window(*order, session.now(), session.calendar()).ok_or(ReorderError::EmptyBucket(*order))
        }
        _ => Ok(DueWindow::UNBOUNDED),
    }
}

fn neighbors(rows: &[Task], row: usize) -> [Option<&Task>; 2] {
    let before = row.checked_sub(1).and_then(|index| rows.get(index));
    [before, rows.get(row)]
}

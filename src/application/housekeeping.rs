use crate::application::store::{EditSession, TaskStore};
use crate::infrastructure::config::HousekeepingSettings;
use crate::infrastructure::error::InfraError;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HousekeepingReport {
    pub archived_task_ids: Vec<String>,
    pub deleted_location_ids: Vec<String>,
}

/// Archives tasks completed before today and drops locations no live task
/// references. The pass is staged and committed under one exclusive permit,
/// so no interactive commit can land between computing and applying it.
pub async fn run_housekeeping(
    store: &TaskStore,
    settings: &HousekeepingSettings,
) -> Result<HousekeepingReport, InfraError> {
    let permit = store.exclusive().await;
    let mut session = store.begin_edit()?;
    let report = stage_housekeeping(&mut session, settings)?;
    if session.is_empty() {
        return Ok(report);
    }
    store.commit_under(&permit, session)?;
    tracing::debug!(
        archived = report.archived_task_ids.len(),
        deleted_locations = report.deleted_location_ids.len(),
        "housekeeping committed"
    );
    Ok(report)
}

fn stage_housekeeping(
    session: &mut EditSession,
    settings: &HousekeepingSettings,
) -> Result<HousekeepingReport, InfraError> {
    let mut report = HousekeepingReport::default();
    let today = session.calendar().local_date(session.now());

    if settings.archive_past_completion {
        let mut candidates = session
            .tasks()
            .into_iter()
            .filter(|task| task.is_active())
            .filter(|task| {
                task.completed_at
                    .is_some_and(|completed_at| session.calendar().local_date(completed_at) < today)
            })
            .map(|task| task.id)
            .collect::<Vec<_>>();
        candidates.sort();
        for task_id in candidates {
            session.update_task(&task_id, |task| {
                task.archived = true;
                task.needs_sync = true;
                Ok(())
            })?;
            report.archived_task_ids.push(task_id);
        }
    }

    if settings.delete_unused_locations {
        let referenced = session
            .tasks()
            .into_iter()
            .filter(|task| !task.pending_deletion)
            .filter_map(|task| task.location_id)
            .collect::<HashSet<_>>();
        let mut unused = session
            .locations()
            .into_keys()
            .filter(|location_id| !referenced.contains(location_id))
            .collect::<Vec<_>>();
        unused.sort();
        for location_id in &unused {
            session.delete_location(location_id);
        }
        report.deleted_location_ids = unused;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::list_view::ViewKind;
    use crate::domain::models::{Location, Task, TaskPatch};
    use crate::domain::time_order::LocalCalendar;
    use crate::infrastructure::task_repository::InMemoryTaskRepository;
    use chrono::{DateTime, Utc};
    use std::sync::Arc;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn settings() -> HousekeepingSettings {
        HousekeepingSettings {
            archive_past_completion: true,
            delete_unused_locations: true,
        }
    }

    fn location(id: &str) -> Location {
        Location {
            id: id.to_string(),
            title: format!("Place {id}"),
            latitude: 0.0,
            longitude: 0.0,
        }
    }

    async fn seeded_store() -> Arc<TaskStore> {
        let store = Arc::new(
            TaskStore::open(Arc::new(InMemoryTaskRepository::default()), LocalCalendar::default())
                .expect("open store")
                .with_now_provider(Arc::new(|| fixed_time("2026-02-18T08:00:00Z"))),
        );
        for id in ["loc-used", "loc-deleted-only", "loc-free"] {
            store.upsert_location(location(id)).await.expect("seed location");
        }

        let mut yesterday = Task::new("done-yesterday", "Old", None);
        yesterday.completed_at = Some(fixed_time("2026-02-17T20:00:00Z"));
        yesterday.location_id = Some("loc-used".to_string());
        let mut today = Task::new("done-today", "Fresh", None);
        today.completed_at = Some(fixed_time("2026-02-18T07:00:00Z"));
        let pending = Task::new("pending", "Open", Some(fixed_time("2026-02-17T09:00:00Z")));
        let mut deleted = Task::new("deleted", "Gone", None);
        deleted.location_id = Some("loc-deleted-only".to_string());
        for task in [yesterday, today, pending, deleted] {
            store.create_task(task).await.expect("seed task");
        }
        store.soft_delete("deleted").await.expect("soft delete");
        store
    }

    #[tokio::test]
    async fn archives_tasks_completed_before_today() {
        let store = seeded_store().await;
        let mut subscription = store.subscribe(ViewKind::Archived).expect("subscribe");

        let report = run_housekeeping(&store, &settings()).await.expect("housekeeping");

        assert_eq!(report.archived_task_ids, vec!["done-yesterday".to_string()]);
        let archived = store.task("done-yesterday").expect("read").expect("exists");
        assert!(archived.archived);
        assert!(archived.needs_sync);
        assert!(!store.task("done-today").expect("read").expect("exists").archived);
        assert!(!store.task("pending").expect("read").expect("exists").archived);
        assert!(subscription.try_recv().is_some());
    }

    #[tokio::test]
    async fn deletes_locations_without_live_tasks() {
        let store = seeded_store().await;

        let report = run_housekeeping(&store, &settings()).await.expect("housekeeping");

        assert_eq!(
            report.deleted_location_ids,
            vec!["loc-deleted-only".to_string(), "loc-free".to_string()]
        );
        let remaining = store
            .locations()
            .expect("locations")
            .into_iter()
            .map(|location| location.id)
            .collect::<Vec<_>>();
        assert_eq!(remaining, vec!["loc-used".to_string()]);
    }

    #[tokio::test]
    async fn disabled_settings_leave_store_untouched() {
        let store = seeded_store().await;
        let revision = store.revision().expect("revision");

        let report = run_housekeeping(
            &store,
            &HousekeepingSettings {
                archive_past_completion: false,
                delete_unused_locations: false,
            },
        )
        .await
        .expect("housekeeping");

        assert_eq!(report, HousekeepingReport::default());
        assert_eq!(store.revision().expect("revision"), revision);
    }

    #[tokio::test]
    async fn second_pass_finds_nothing_to_do() {
        let store = seeded_store().await;
        run_housekeeping(&store, &settings()).await.expect("first pass");
        let revision = store.revision().expect("revision");

        let report = run_housekeeping(&store, &settings()).await.expect("second pass");

        assert_eq!(report, HousekeepingReport::default());
        assert_eq!(store.revision().expect("revision"), revision);
    }

    #[tokio::test]
    async fn location_linked_after_staging_is_not_deleted() {
        let store = seeded_store().await;
        let mut session = store.begin_edit().expect("begin edit");
        stage_housekeeping(&mut session, &settings()).expect("stage");

        let mut fresh = Task::new("fresh", "New errand", None);
        fresh.location_id = Some("loc-free".to_string());
        store.create_task(fresh).await.expect("create task");
        let result = store.commit_exclusive(session).await;

        assert!(matches!(result, Err(InfraError::StaleWrite(_))));
        assert!(store.location("loc-free").expect("read").is_some());

        let report = run_housekeeping(&store, &settings()).await.expect("housekeeping");
        assert_eq!(report.deleted_location_ids, vec!["loc-deleted-only".to_string()]);
        assert!(store.location("loc-free").expect("read").is_some());
    }

    #[tokio::test]
    async fn interactive_commit_waits_for_a_running_pass() {
        let store = seeded_store().await;
        let permit = store.exclusive().await;

        let mut fresh = Task::new("fresh", "New errand", None);
        fresh.location_id = Some("loc-free".to_string());
        let pending = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.create_task(fresh).await }
        });
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        let mut session = store.begin_edit().expect("begin edit");
        stage_housekeeping(&mut session, &settings()).expect("stage");
        store.commit_under(&permit, session).expect("commit");
        drop(permit);

        // The location vanished while the create was staged, so it is rejected.
        let created = pending.await.expect("join");
        assert!(matches!(created, Err(InfraError::StaleWrite(_))));
        assert!(store.task("fresh").expect("read").is_none());
    }

    #[tokio::test]
    async fn reopened_task_is_not_archived() {
        let store = seeded_store().await;
        store
            .update_task(
                "done-yesterday",
                &TaskPatch {
                    completed_at: Some(None),
                    ..TaskPatch::default()
                },
            )
            .await
            .expect("reopen");

        let report = run_housekeeping(&store, &settings()).await.expect("housekeeping");

        assert!(report.archived_task_ids.is_empty());
    }
}

use crate::application::store::{NowProvider, TaskStore};
use crate::domain::models::Task;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::remote_task_client::{
    FetchChangesResponse, PushRequest, PushResponse, RemoteChange, RemoteTaskClient,
};
use crate::infrastructure::sync_state_repository::SyncStateRepository;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::{sleep, Duration as TokioDuration};

pub const DEFAULT_SYNC_ZONE: &str = "TodododoZoneID";

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pushed: usize,
    pub acknowledged: Vec<String>,
    pub purged: Vec<String>,
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub next_change_token: Option<String>,
}

impl SyncReport {
    /// Tasks whose reminders may need to change after this pass.
    pub fn touched_task_ids(&self) -> impl Iterator<Item = &str> {
        self.added
            .iter()
            .chain(&self.updated)
            .chain(&self.deleted)
            .chain(&self.purged)
            .map(String::as_str)
    }
}

pub struct TaskSyncService<C, S>
where
    C: RemoteTaskClient,
    S: SyncStateRepository,
{
    client: Arc<C>,
    sync_state_repository: Arc<S>,
    store: Arc<TaskStore>,
    zone: String,
    retry_policy: RetryPolicy,
    now_provider: NowProvider,
}

impl<C, S> TaskSyncService<C, S>
where
    C: RemoteTaskClient,
    S: SyncStateRepository,
{
    pub fn new(client: Arc<C>, sync_state_repository: Arc<S>, store: Arc<TaskStore>) -> Self {
        Self {
            client,
            sync_state_repository,
            store,
            zone: DEFAULT_SYNC_ZONE.to_string(),
            retry_policy: RetryPolicy::default(),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = zone.into();
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Pushes local edits, then pulls remote changes since the saved token.
    pub async fn sync(&self) -> Result<SyncReport, InfraError> {
        let mut report = SyncReport::default();
        self.push(&mut report).await?;
        self.pull(&mut report).await?;
        Ok(report)
    }

    async fn push(&self, report: &mut SyncReport) -> Result<(), InfraError> {
        let mut changed = self
            .store
            .tasks()?
            .into_iter()
            .filter(|task| task.needs_sync)
            .collect::<Vec<_>>();
        if changed.is_empty() {
            return Ok(());
        }
        changed.sort_by(|left, right| left.id.cmp(&right.id));
        report.pushed = changed.len();

        let response = self
            .push_with_retry(PushRequest {
                changed: changed.clone(),
            })
            .await?;
        let accepted = response.accepted_ids.into_iter().collect::<HashSet<_>>();
        let pushed = changed
            .into_iter()
            .filter(|task| accepted.contains(&task.id))
            .collect::<Vec<_>>();

        let mut session = self.store.begin_edit()?;
        for task in &pushed {
            // An edit made while the push was in flight keeps its flag.
            let Some(current) = session.task(&task.id) else {
                continue;
            };
            if current.version != task.version {
                continue;
            }
            if current.pending_deletion {
                session.purge_task(&task.id);
                report.purged.push(task.id.clone());
            } else {
                session.update_task(&task.id, |task| {
                    task.needs_sync = false;
                    Ok(())
                })?;
                report.acknowledged.push(task.id.clone());
            }
        }

        match self.store.commit(session).await {
            Ok(_) => Ok(()),
            Err(InfraError::StaleWrite(message)) => {
                // The flags stay set and the tasks go out again next pass.
                tracing::debug!(zone = %self.zone, %message, "skipping push acknowledgement");
                report.acknowledged.clear();
                report.purged.clear();
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    async fn pull(&self, report: &mut SyncReport) -> Result<(), InfraError> {
        let previous_token = self
            .sync_state_repository
            .load(&self.zone)?
            .and_then(|state| state.change_token);

        let response = match self.fetch_with_retry(previous_token.as_deref()).await {
            Ok(response) => response,
            Err(InfraError::ChangeTokenExpired) if previous_token.is_some() => {
                tracing::warn!(zone = %self.zone, "change token expired, fetching all records");
                self.fetch_with_retry(None).await?
            }
            Err(error) => return Err(error),
        };

        self.apply_remote_changes(response.changes, report).await?;
        self.sync_state_repository.save(
            &self.zone,
            response.next_change_token.as_deref(),
            (self.now_provider)(),
        )?;
        report.next_change_token = response.next_change_token;
        Ok(())
    }

    /// Remote records replace local ones. Each write bumps the task version,
    /// so in-flight local edits that read the old record fail validation.
    async fn apply_remote_changes(
        &self,
        changes: Vec<RemoteChange>,
        report: &mut SyncReport,
    ) -> Result<(), InfraError> {
        let mut session = self.store.begin_edit()?;
        for change in changes {
            match change {
                RemoteChange::Upsert(mut task) => {
                    task.needs_sync = false;
                    if let Err(message) = task.validate() {
                        tracing::warn!(task_id = %task.id, %message, "skipping invalid remote record");
                        continue;
                    }
                    match session.peek(&task.id) {
                        None => {
                            report.added.push(task.id.clone());
                            session.put_task(task);
                        }
                        Some(existing) if !same_content(existing, &task) => {
                            report.updated.push(task.id.clone());
                            session.put_task(task);
                        }
                        Some(_) => {}
                    }
                }
                RemoteChange::Delete(task_id) => {
                    if session.peek(&task_id).is_some() {
                        session.purge_task(&task_id);
                        report.deleted.push(task_id);
                    }
                }
            }
        }
        self.store.commit(session).await?;
        Ok(())
    }

    async fn push_with_retry(&self, request: PushRequest) -> Result<PushResponse, InfraError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match self.client.push_changes(&self.zone, request.clone()).await {
                Ok(response) => return Ok(response),
                Err(error) if self.should_retry(&error) && attempt + 1 < max_attempts => {
                    self.backoff(attempt, &error).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn fetch_with_retry(&self, since_token: Option<&str>) -> Result<FetchChangesResponse, InfraError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match self.client.fetch_changes(&self.zone, since_token).await {
                Ok(response) => return Ok(response),
                Err(error) if self.should_retry(&error) && attempt + 1 < max_attempts => {
                    self.backoff(attempt, &error).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn backoff(&self, attempt: u8, error: &InfraError) {
        let delay = self
            .retry_policy
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt as u32));
        tracing::warn!(zone = %self.zone, attempt, delay_ms = delay, %error, "retrying sync request");
        sleep(TokioDuration::from_millis(delay)).await;
    }

    fn should_retry(&self, error: &InfraError) -> bool {
        match error {
            InfraError::Remote(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("network error")
                    || message.contains("timeout")
                    || message.contains("timed out")
                    || message.contains("temporarily unavailable")
                    || message.contains("connection reset")
            }
            _ => false,
        }
    }
}

fn same_content(local: &Task, remote: &Task) -> bool {
    local.title == remote.title
        && local.due_at == remote.due_at
        && local.completed_at == remote.completed_at
        && local.archived == remote.archived
        && local.location_id == remote.location_id
        && local.pending_deletion == remote.pending_deletion
}

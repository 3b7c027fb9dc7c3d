use crate::application::store::NowProvider;
use crate::domain::models::{Task, TaskLifecycle};
use crate::domain::time_order::LocalCalendar;
use crate::infrastructure::config::ReminderSettings;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::reminder_scheduler::{ReminderRequest, ReminderScheduler};
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderAction {
    Scheduled(DateTime<Utc>),
    Cancelled,
}

/// Keeps one pending reminder per open, dated task, keyed by task id.
pub struct ReminderPlanner<R>
where
    R: ReminderScheduler + ?Sized,
{
    scheduler: Arc<R>,
    settings: ReminderSettings,
    calendar: LocalCalendar,
    now_provider: NowProvider,
}

impl<R> ReminderPlanner<R>
where
    R: ReminderScheduler + ?Sized,
{
    pub fn new(scheduler: Arc<R>, settings: ReminderSettings, calendar: LocalCalendar) -> Self {
        Self {
            scheduler,
            settings,
            calendar,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Reminder the task should have right now, if any.
    pub fn request_for(&self, task: &Task) -> Option<ReminderRequest> {
        if task.pending_deletion || task.lifecycle() != TaskLifecycle::Pending {
            return None;
        }
        let due_at = task.due_at?;
        if due_at <= (self.now_provider)() {
            return None;
        }
        Some(self.build_request(task, due_at))
    }

    fn build_request(&self, task: &Task, fire_at: DateTime<Utc>) -> ReminderRequest {
        let body = match task.due_at {
            Some(due_at) => format!(
                "Due {}",
                due_at
                    .with_timezone(&self.calendar.time_zone)
                    .format("%a %b %-d, %H:%M")
            ),
            None => "Reminder".to_string(),
        };
        ReminderRequest {
            identifier: task.id.clone(),
            fire_at,
            title: task.title.clone(),
            body,
            category: self.settings.category.clone(),
        }
    }

    pub async fn sync_task(&self, task: &Task) -> Result<ReminderAction, InfraError> {
        match self.request_for(task) {
            Some(request) => {
                self.scheduler.schedule(&request).await?;
                Ok(ReminderAction::Scheduled(request.fire_at))
            }
            None => {
                self.scheduler.cancel(&task.id).await?;
                Ok(ReminderAction::Cancelled)
            }
        }
    }

    pub async fn cancel(&self, task_id: &str) -> Result<(), InfraError> {
        self.scheduler.cancel(task_id).await
    }

    /// Returns how many reminders ended up scheduled.
    pub async fn sync_all(&self, tasks: &[Task]) -> Result<usize, InfraError> {
        let mut scheduled = 0;
        for task in tasks {
            if matches!(self.sync_task(task).await?, ReminderAction::Scheduled(_)) {
                scheduled += 1;
            }
        }
        Ok(scheduled)
    }

    /// Re-fires the reminder one snooze interval from now.
    pub async fn snooze(&self, task: &Task) -> Result<ReminderRequest, InfraError> {
        if task.lifecycle() != TaskLifecycle::Pending || task.pending_deletion {
            return Err(InfraError::InvalidConfig(format!(
                "task {} has no open reminder to snooze",
                task.id
            )));
        }
        let fire_at = (self.now_provider)() + self.settings.snooze;
        let request = self.build_request(task, fire_at);
        self.scheduler.schedule(&request).await?;
        Ok(request)
    }
}

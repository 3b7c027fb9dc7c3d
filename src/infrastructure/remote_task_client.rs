use crate::domain::models::Task;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRequest {
    /// Tasks with local edits, including soft-deleted ones.
    pub changed: Vec<Task>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushResponse {
    /// Ids the remote side stored; only these lose their `needs_sync` flag.
    pub accepted_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteChange {
    Upsert(Task),
    Delete(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchChangesResponse {
    pub changes: Vec<RemoteChange>,
    pub next_change_token: Option<String>,
}

/// Cross-device sync transport.
#[async_trait]
pub trait RemoteTaskClient: Send + Sync {
    async fn push_changes(&self, zone: &str, request: PushRequest) -> Result<PushResponse, InfraError>;
    async fn fetch_changes(
        &self,
        zone: &str,
        since_token: Option<&str>,
    ) -> Result<FetchChangesResponse, InfraError>;
}

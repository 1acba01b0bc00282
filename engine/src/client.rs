//! The remote store contract consumed by the engine.
//!
//! The engine never talks to a concrete backend. Each collection is handed
//! an `Arc<dyn StoreClient>` and only uses the operations below.

use crate::{
    error::{AuthError, StoreError},
    event::ChangeEvent,
    NewTask, RecordId, Task, TaskPatch, UserId,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Sender half a store pushes change notifications into.
pub type EventSink = mpsc::UnboundedSender<ChangeEvent>;

/// Result type for store calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Sort order for selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    /// Newest first
    #[default]
    CreatedAtDesc,
    CreatedAtAsc,
}

/// A select against the task table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SelectQuery {
    /// Restrict to one list (`None` selects everything visible)
    pub list_id: Option<String>,
    pub order: OrderBy,
}

impl SelectQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn in_list(list_id: impl Into<String>) -> Self {
        Self {
            list_id: Some(list_id.into()),
            order: OrderBy::CreatedAtDesc,
        }
    }
}

/// Opaque handle for an open notification subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    /// Channel key the subscription was opened under
    pub channel: String,
    /// Store-assigned identifier, distinguishes re-subscriptions on one key
    pub id: String,
}

/// Operations the engine needs from a remote store.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Fetch every visible task matching `query`.
    async fn select(&self, query: &SelectQuery) -> StoreResult<Vec<Task>>;

    /// Insert a task; the store assigns its identifier and timestamps.
    async fn insert(&self, task: NewTask) -> StoreResult<Task>;

    /// Apply partial changes and return the authoritative row.
    async fn update(&self, id: &RecordId, patch: &TaskPatch) -> StoreResult<Task>;

    /// Delete a task.
    async fn delete(&self, id: &RecordId) -> StoreResult<()>;

    /// Owner of the current session.
    fn current_user_id(&self) -> Result<UserId, AuthError>;

    /// Open a change-notification subscription on `table` under `channel`.
    fn subscribe(
        &self,
        channel: &str,
        table: &str,
        sink: EventSink,
    ) -> StoreResult<SubscriptionHandle>;

    /// Close a subscription. Unknown handles are ignored.
    fn unsubscribe(&self, handle: &SubscriptionHandle);
}

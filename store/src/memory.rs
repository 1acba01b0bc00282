//! In-process task store.
//!
//! [`MemoryBackend`] plays the durable table plus its realtime feed: rows
//! live in a `DashMap`, identifiers are server-assigned UUIDs and every write
//! is broadcast through the [`RealtimeHub`]. Each client session is a
//! [`MemoryStore`] handle onto a shared backend, carrying its own signed-in
//! user so several sessions can mutate the same rows. Channel keys belong to
//! the session that subscribed with them, so sessions never displace each
//! other's subscriptions.
//!
//! Sessions also support fault injection and call gating so tests can make
//! a specific call fail or hold it until released.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tasksync_engine::{
    AuthError, ChangeEvent, EventSink, NewTask, OrderBy, RecordId, SelectQuery, StoreClient,
    StoreError, StoreResult, SubscriptionHandle, Task, TaskPatch, UserId,
};
use tokio::sync::oneshot;

use crate::hub::{RealtimeHub, SessionId};

/// Store calls that faults and gates can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOp {
    Select,
    Insert,
    Update,
    Delete,
}

/// Shared rows and realtime feed.
#[derive(Debug)]
pub struct MemoryBackend {
    table: String,
    rows: DashMap<RecordId, Task>,
    hub: Arc<RealtimeHub>,
    last_stamp: Mutex<DateTime<Utc>>,
}

impl MemoryBackend {
    /// Create an empty backend serving `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            rows: DashMap::new(),
            hub: RealtimeHub::new_shared(),
            last_stamp: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// Create a backend wrapped in Arc for sharing between sessions.
    pub fn new_shared(table: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(table))
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn hub(&self) -> &RealtimeHub {
        &self.hub
    }

    /// Strictly increasing server timestamp, so creation order is total.
    fn stamp(&self) -> DateTime<Utc> {
        let mut last = self.last_stamp.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now().max(*last + Duration::microseconds(1));
        *last = now;
        now
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.rows.get(id).map(|row| row.value().clone())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows owned by `user_id` matching `query`, in the requested order.
    pub fn rows_for(&self, user_id: &str, query: &SelectQuery) -> Vec<Task> {
        let mut rows: Vec<Task> = self
            .rows
            .iter()
            .map(|row| row.value().clone())
            .filter(|task| task.user_id == user_id)
            .filter(|task| match &query.list_id {
                Some(list_id) => task.list_id.as_ref() == Some(list_id),
                None => true,
            })
            .collect();

        match query.order {
            OrderBy::CreatedAtDesc => {
                rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)))
            }
            OrderBy::CreatedAtAsc => {
                rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            }
        }
        rows
    }

    fn insert_row(&self, new: NewTask) -> StoreResult<Task> {
        validate_title(&new.draft.title)?;
        let now = self.stamp();
        let draft = new.draft;
        let task = Task {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: new.user_id,
            list_id: draft.list_id,
            title: draft.title,
            description: draft.description,
            priority: draft.priority,
            due_date: draft.due_date,
            completed: false,
            created_at: now,
            updated_at: now,
        };

        self.rows.insert(task.id.clone(), task.clone());
        tracing::debug!(record_id = %task.id, "row inserted");
        self.hub.broadcast(&ChangeEvent::insert(&self.table, &task));
        Ok(task)
    }

    fn update_row(&self, user_id: &str, id: &str, patch: &TaskPatch) -> StoreResult<Task> {
        if let Some(title) = &patch.title {
            validate_title(title)?;
        }

        let (old, new) = {
            let mut row = self
                .rows
                .get_mut(id)
                .filter(|row| row.user_id == user_id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            let old = row.clone();
            row.apply_patch(patch);
            row.updated_at = self.stamp();
            (old, row.clone())
        };

        tracing::debug!(record_id = %id, "row updated");
        self.hub.broadcast(&ChangeEvent::update(&self.table, &old, &new));
        Ok(new)
    }

    fn delete_row(&self, user_id: &str, id: &str) -> StoreResult<()> {
        self.rows
            .remove_if(id, |_, row| row.user_id == user_id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        tracing::debug!(record_id = %id, "row deleted");
        self.hub.broadcast(&ChangeEvent::delete(&self.table, id));
        Ok(())
    }
}

fn validate_title(title: &str) -> StoreResult<()> {
    if title.trim().is_empty() {
        return Err(StoreError::Constraint("title must not be empty".to_string()));
    }
    Ok(())
}

/// Holds one gated call until released.
#[derive(Debug)]
pub struct Gate {
    tx: oneshot::Sender<()>,
}

impl Gate {
    /// Let the held call proceed.
    pub fn release(self) {
        let _ = self.tx.send(());
    }
}

/// One client session onto a [`MemoryBackend`].
#[derive(Debug)]
pub struct MemoryStore {
    backend: Arc<MemoryBackend>,
    /// Namespace for this session's channel keys
    id: SessionId,
    session: RwLock<Option<UserId>>,
    faults: Mutex<HashMap<StoreOp, VecDeque<StoreError>>>,
    gates: Mutex<HashMap<StoreOp, VecDeque<oneshot::Receiver<()>>>>,
    selects: DashMap<Option<String>, usize>,
}

impl MemoryStore {
    /// Open a signed-out session onto `backend`.
    pub fn connect(backend: Arc<MemoryBackend>) -> Self {
        Self {
            backend,
            id: uuid::Uuid::new_v4().to_string(),
            session: RwLock::new(None),
            faults: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            selects: DashMap::new(),
        }
    }

    /// Open a session already signed in as `user_id`.
    pub fn signed_in(backend: Arc<MemoryBackend>, user_id: impl Into<UserId>) -> Self {
        let store = Self::connect(backend);
        store.sign_in(user_id);
        store
    }

    pub fn backend(&self) -> &Arc<MemoryBackend> {
        &self.backend
    }

    pub fn session_id(&self) -> &str {
        &self.id
    }

    /// Whether this session has a live subscription on `channel`.
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.backend.hub.is_subscribed(&self.id, channel)
    }

    pub fn sign_in(&self, user_id: impl Into<UserId>) {
        let user_id = user_id.into();
        tracing::info!(user_id = %user_id, "session signed in");
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(user_id);
    }

    pub fn sign_out(&self) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Make the next call of `op` fail with `err`. Queued per op.
    pub fn fail_next(&self, op: StoreOp, err: StoreError) {
        lock(&self.faults).entry(op).or_default().push_back(err);
    }

    /// Hold the next call of `op` until the returned gate is released.
    pub fn hold_next(&self, op: StoreOp) -> Gate {
        let (tx, rx) = oneshot::channel();
        lock(&self.gates).entry(op).or_default().push_back(rx);
        Gate { tx }
    }

    /// Number of selects issued with the given list filter.
    pub fn select_count(&self, list_id: Option<&str>) -> usize {
        self.selects
            .get(&list_id.map(String::from))
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Number of selects issued with any filter.
    pub fn total_selects(&self) -> usize {
        self.selects.iter().map(|entry| *entry.value()).sum()
    }

    /// Wait on any gate, then surface any injected fault.
    async fn intercept(&self, op: StoreOp) -> StoreResult<()> {
        let gate = lock(&self.gates).get_mut(&op).and_then(VecDeque::pop_front);
        if let Some(gate) = gate {
            tracing::trace!(?op, "call held");
            // A dropped gate releases the call too.
            let _ = gate.await;
        }

        match lock(&self.faults).get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => {
                tracing::debug!(?op, error = %err, "injected fault");
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn owner(&self) -> StoreResult<UserId> {
        self.current_user_id()
            .map_err(|_| StoreError::Transport("not authenticated".to_string()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn select(&self, query: &SelectQuery) -> StoreResult<Vec<Task>> {
        *self.selects.entry(query.list_id.clone()).or_insert(0) += 1;
        self.intercept(StoreOp::Select).await?;
        let owner = self.owner()?;
        Ok(self.backend.rows_for(&owner, query))
    }

    async fn insert(&self, task: NewTask) -> StoreResult<Task> {
        self.intercept(StoreOp::Insert).await?;
        let owner = self.owner()?;
        if task.user_id != owner {
            return Err(StoreError::Constraint(
                "user_id must match the signed-in user".to_string(),
            ));
        }
        self.backend.insert_row(task)
    }

    async fn update(&self, id: &RecordId, patch: &TaskPatch) -> StoreResult<Task> {
        self.intercept(StoreOp::Update).await?;
        let owner = self.owner()?;
        self.backend.update_row(&owner, id, patch)
    }

    async fn delete(&self, id: &RecordId) -> StoreResult<()> {
        self.intercept(StoreOp::Delete).await?;
        let owner = self.owner()?;
        self.backend.delete_row(&owner, id)
    }

    fn current_user_id(&self) -> Result<UserId, AuthError> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(AuthError::NoSession)
    }

    fn subscribe(
        &self,
        channel: &str,
        table: &str,
        sink: EventSink,
    ) -> StoreResult<SubscriptionHandle> {
        Ok(self.backend.hub.subscribe(&self.id, channel, table, sink))
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.backend.hub.unsubscribe(&self.id, handle);
    }
}

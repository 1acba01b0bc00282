//! The reconciling task collection.
//!
//! A [`TaskCollection`] owns the in-memory view of one scope of tasks and
//! keeps it consistent with the remote store:
//!
//! 1. Mutations are applied optimistically the moment they are called.
//! 2. The store's answer replaces the optimistic guess, or the pre-mutation
//!    snapshot is restored when the store rejects it.
//! 3. Change notifications from any session trigger a full refetch when they
//!    can affect this scope.
//!
//! # Ordering
//!
//! State lives behind a mutex that is never held across an `.await`, so each
//! optimistic step is atomic. Remote completions may land in any order and
//! the last one to land wins; a completion that is older than a later
//! mutation on the same record is logged but still applied.
//!
//! # Lifecycle
//!
//! `Uninitialized -> Loading -> Ready <-> Loading`, with `TornDown` terminal.
//! After teardown the subscription is gone, new operations fail with
//! [`Error::TornDown`] and late completions are ignored.

use crate::{
    client::{SelectQuery, StoreClient, StoreResult, SubscriptionHandle},
    clock::TempIdClock,
    config::EngineConfig,
    error::Result,
    event::ChangeEvent,
    scope::{ChannelRegistry, ListScope},
    view::{CollectionView, Phase},
    Error, NewTask, RecordId, Task, TaskDraft, TaskPatch,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Mutable state of one collection.
#[derive(Debug)]
struct State {
    /// Tasks, newest first; identifiers are unique
    records: Vec<Task>,
    phase: Phase,
    error: Option<String>,
    fetches_in_flight: usize,
    /// Set once `initialize` has been called
    initialized: bool,
    subscription: Option<SubscriptionHandle>,
    listener: Option<JoinHandle<()>>,
    /// Latest mutation sequence issued per record, until that mutation completes
    latest_seq: HashMap<RecordId, u64>,
    next_seq: u64,
}

impl State {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            phase: Phase::Uninitialized,
            error: None,
            fetches_in_flight: 0,
            initialized: false,
            subscription: None,
            listener: None,
            latest_seq: HashMap::new(),
            next_seq: 0,
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|t| t.id == id)
    }

    fn issue_seq(&mut self, id: &str) -> u64 {
        self.next_seq += 1;
        self.latest_seq.insert(id.to_string(), self.next_seq);
        self.next_seq
    }

    /// Mark the mutation `seq` on `id` as completed, successfully or not.
    ///
    /// Returns whether a newer mutation on `id` was issued after it. The entry
    /// is dropped once the latest mutation completes.
    fn settle(&mut self, id: &str, seq: u64) -> bool {
        match self.latest_seq.get(id).copied() {
            Some(latest) if latest > seq => true,
            Some(_) => {
                self.latest_seq.remove(id);
                false
            }
            None => false,
        }
    }

    fn view(&self, temp_ids: &TempIdClock) -> CollectionView {
        CollectionView {
            records: self.records.clone(),
            loading: self.fetches_in_flight > 0,
            error: self.error.clone(),
            phase: self.phase,
            pending: self
                .records
                .iter()
                .filter(|t| temp_ids.is_temporary(&t.id))
                .count(),
        }
    }
}

struct Inner {
    client: Arc<dyn StoreClient>,
    channels: Arc<ChannelRegistry>,
    config: EngineConfig,
    scope: ListScope,
    channel_key: String,
    temp_ids: TempIdClock,
    state: Mutex<State>,
    view_tx: watch::Sender<CollectionView>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against live state and publish the resulting view.
    fn mutate<R>(&self, f: impl FnOnce(&mut State) -> R) -> Result<R> {
        let (out, view) = {
            let mut state = self.lock();
            if state.phase == Phase::TornDown {
                return Err(Error::TornDown);
            }
            let out = f(&mut state);
            (out, state.view(&self.temp_ids))
        };
        self.view_tx.send_replace(view);
        Ok(out)
    }

    /// Like [`Inner::mutate`] for remote completions: a torn-down collection
    /// silently drops them.
    fn complete(&self, f: impl FnOnce(&mut State)) {
        if self.mutate(f).is_err() {
            tracing::debug!(scope = %self.scope, "completion after teardown ignored");
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.lock().phase == Phase::TornDown {
            return Err(Error::TornDown);
        }
        Ok(())
    }

    fn record_error(&self, err: &Error) {
        let message = err.to_string();
        self.complete(|state| state.error = Some(message));
    }

    fn reset_initialized(&self) {
        let _ = self.mutate(|state| state.initialized = false);
    }

    fn select_query(&self) -> SelectQuery {
        match self.scope.list_id() {
            Some(list_id) => SelectQuery::in_list(list_id),
            None => SelectQuery::all(),
        }
    }

    fn fetch(self: &Arc<Self>) -> impl Future<Output = Result<()>> + Send + 'static {
        let inner = Arc::clone(self);
        let started = self.mutate(|state| {
            state.fetches_in_flight += 1;
            state.phase = Phase::Loading;
        });

        async move {
            started?;
            let query = inner.select_query();
            let result = inner.client.select(&query).await;
            inner.finish_fetch(result)
        }
    }

    fn finish_fetch(&self, result: StoreResult<Vec<Task>>) -> Result<()> {
        let outcome = self.mutate(|state| {
            state.fetches_in_flight = state.fetches_in_flight.saturating_sub(1);
            if state.fetches_in_flight == 0 {
                state.phase = Phase::Ready;
            }
            match result {
                Ok(records) => {
                    let mut seen = HashSet::with_capacity(records.len());
                    state.records = records
                        .into_iter()
                        .filter(|t| seen.insert(t.id.clone()))
                        .collect();
                    Ok(state.records.len())
                }
                Err(err) => {
                    state.error = Some(err.to_string());
                    Err(Error::from(err))
                }
            }
        });

        match outcome {
            Ok(Ok(count)) => {
                tracing::debug!(scope = %self.scope, records = count, "collection refetched");
                Ok(())
            }
            Ok(Err(err)) => {
                tracing::warn!(scope = %self.scope, error = %err, "fetch failed");
                Err(err)
            }
            Err(_) => {
                tracing::debug!(scope = %self.scope, "fetch completed after teardown");
                Ok(())
            }
        }
    }

    fn add(
        self: &Arc<Self>,
        draft: TaskDraft,
    ) -> impl Future<Output = Result<Task>> + Send + 'static {
        let inner = Arc::clone(self);
        let staged = self.stage_add(&draft);

        async move {
            let (temp_id, user_id) = staged?;
            match inner.client.insert(NewTask { user_id, draft }).await {
                Ok(task) => {
                    inner.confirm_add(&temp_id, task.clone());
                    Ok(task)
                }
                Err(err) => {
                    let err = Error::from(err);
                    tracing::warn!(scope = %inner.scope, temp_id = %temp_id, error = %err, "insert failed");
                    inner.complete(|state| state.records.retain(|t| t.id != temp_id));
                    // The fetch records its own failure; the insert error wins below.
                    let _ = inner.fetch().await;
                    inner.record_error(&err);
                    Err(err)
                }
            }
        }
    }

    fn stage_add(&self, draft: &TaskDraft) -> Result<(RecordId, String)> {
        self.ensure_live()?;
        let user_id = match self.client.current_user_id() {
            Ok(user_id) => user_id,
            Err(err) => {
                let err = Error::from(err);
                self.record_error(&err);
                return Err(err);
            }
        };

        let now = chrono::Utc::now();
        let temp_id = self.mutate(|state| {
            let mut temp_id = self.temp_ids.next_id();
            while state.position(&temp_id).is_some() {
                temp_id = self.temp_ids.next_id();
            }
            state
                .records
                .insert(0, Task::pending(temp_id.clone(), user_id.clone(), draft, now));
            temp_id
        })?;

        tracing::debug!(scope = %self.scope, temp_id = %temp_id, "pending task added");
        Ok((temp_id, user_id))
    }

    fn confirm_add(&self, temp_id: &str, task: Task) {
        self.complete(|state| {
            let Some(pos) = state.position(temp_id) else {
                tracing::debug!(temp_id = %temp_id, record_id = %task.id, "pending task already replaced by a refetch");
                return;
            };
            if state.position(&task.id).is_some() {
                state.records.remove(pos);
            } else {
                state.records[pos] = task;
            }
        });
    }

    fn update(
        self: &Arc<Self>,
        id: RecordId,
        patch: TaskPatch,
    ) -> impl Future<Output = Result<Task>> + Send + 'static {
        let staged = self.mutate(|state| {
            let snapshot = state.records.clone();
            if let Some(pos) = state.position(&id) {
                state.records[pos].apply_patch(&patch);
            }
            (snapshot, state.issue_seq(&id))
        });
        self.send_update(id, patch, staged)
    }

    fn toggle_completion(
        self: &Arc<Self>,
        id: RecordId,
        completed: bool,
    ) -> impl Future<Output = Result<Task>> + Send + 'static {
        let inner = Arc::clone(self);
        let staged = self.mutate(|state| {
            let snapshot = state.records.clone();
            if let Some(pos) = state.position(&id) {
                state.records[pos].completed = completed;
            }
            (snapshot, state.issue_seq(&id))
        });
        let update = self.send_update(id, TaskPatch::completed(completed), staged);

        async move {
            let result = update.await;
            if matches!(result, Err(Error::Store(_))) {
                let _ = inner.fetch().await;
            }
            result
        }
    }

    /// Remote half of an update whose optimistic step produced `staged`.
    fn send_update(
        self: &Arc<Self>,
        id: RecordId,
        patch: TaskPatch,
        staged: Result<(Vec<Task>, u64)>,
    ) -> impl Future<Output = Result<Task>> + Send + 'static {
        let inner = Arc::clone(self);

        async move {
            let (snapshot, seq) = staged?;
            match inner.client.update(&id, &patch).await {
                Ok(task) => {
                    inner.confirm_update(&id, seq, task.clone());
                    Ok(task)
                }
                Err(err) => {
                    let err = Error::from(err);
                    tracing::warn!(
                        scope = %inner.scope,
                        record_id = %id,
                        error = %err,
                        "update failed, restoring snapshot"
                    );
                    inner.restore(&id, seq, snapshot, &err);
                    Err(err)
                }
            }
        }
    }

    fn confirm_update(&self, id: &str, seq: u64, task: Task) {
        self.complete(|state| {
            if state.settle(id, seq) {
                tracing::debug!(record_id = %id, seq, "out-of-order completion applied");
            }
            if let Some(pos) = state.position(&task.id) {
                state.records[pos] = task;
            }
        });
    }

    fn remove(
        self: &Arc<Self>,
        id: RecordId,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let inner = Arc::clone(self);
        let staged = self.mutate(|state| {
            let snapshot = state.records.clone();
            state.records.retain(|t| t.id != id);
            (snapshot, state.issue_seq(&id))
        });

        async move {
            let (snapshot, seq) = staged?;
            match inner.client.delete(&id).await {
                Ok(()) => {
                    inner.complete(|state| {
                        state.settle(&id, seq);
                    });
                    Ok(())
                }
                Err(err) => {
                    let err = Error::from(err);
                    tracing::warn!(
                        scope = %inner.scope,
                        record_id = %id,
                        error = %err,
                        "delete failed, restoring snapshot"
                    );
                    inner.restore(&id, seq, snapshot, &err);
                    Err(err)
                }
            }
        }
    }

    fn restore(&self, id: &str, seq: u64, snapshot: Vec<Task>, err: &Error) {
        let message = err.to_string();
        self.complete(|state| {
            if state.settle(id, seq) {
                tracing::debug!(record_id = %id, seq, "out-of-order failure restored");
            }
            state.records = snapshot;
            state.error = Some(message);
        });
    }

    /// Close the subscription and free the channel key it was opened under.
    fn release(&self, subscription: Option<SubscriptionHandle>, listener: Option<JoinHandle<()>>) {
        if let Some(handle) = subscription {
            self.client.unsubscribe(&handle);
            self.channels.release(&self.channel_key);
        }
        if let Some(listener) = listener {
            listener.abort();
        }
    }

    fn teardown(&self) {
        let (subscription, listener, view) = {
            let mut state = self.lock();
            if state.phase == Phase::TornDown {
                return;
            }
            state.phase = Phase::TornDown;
            (
                state.subscription.take(),
                state.listener.take(),
                state.view(&self.temp_ids),
            )
        };

        self.release(subscription, listener);
        self.view_tx.send_replace(view);
        tracing::info!(scope = %self.scope, channel = %self.channel_key, "collection torn down");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.phase == Phase::TornDown {
            return;
        }
        state.phase = Phase::TornDown;
        let subscription = state.subscription.take();
        let listener = state.listener.take();
        self.release(subscription, listener);
    }
}

/// Drains change notifications and refetches when an event can affect the scope.
async fn listen(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<ChangeEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !event.requires_refetch(&inner.scope) {
            tracing::trace!(
                scope = %inner.scope,
                kind = ?event.kind,
                record_id = ?event.record_id(),
                "change outside scope ignored"
            );
            continue;
        }

        tracing::debug!(
            scope = %inner.scope,
            kind = ?event.kind,
            record_id = ?event.record_id(),
            "change notification, refetching"
        );
        let fetch = inner.fetch();
        drop(inner);
        // Failures are already recorded on the collection.
        let _ = fetch.await;
    }
}

/// Handle to a reconciling collection of tasks.
///
/// Cheap to clone; all clones share one state. Dropping the last clone tears
/// the collection down.
#[derive(Clone)]
pub struct TaskCollection {
    inner: Arc<Inner>,
}

impl TaskCollection {
    /// Create a collection for `scope` with the default configuration.
    pub fn new(
        client: Arc<dyn StoreClient>,
        channels: Arc<ChannelRegistry>,
        scope: ListScope,
    ) -> Self {
        Self::with_config(client, channels, scope, EngineConfig::default())
    }

    pub fn with_config(
        client: Arc<dyn StoreClient>,
        channels: Arc<ChannelRegistry>,
        scope: ListScope,
        config: EngineConfig,
    ) -> Self {
        let channel_key = scope.channel_key(&config);
        let temp_ids = TempIdClock::new(config.temp_id_prefix.clone());
        let state = State::new();
        let (view_tx, _) = watch::channel(state.view(&temp_ids));

        Self {
            inner: Arc::new(Inner {
                client,
                channels,
                config,
                scope,
                channel_key,
                temp_ids,
                state: Mutex::new(state),
                view_tx,
            }),
        }
    }

    /// Claim the channel key, subscribe to change notifications and run the
    /// first fetch.
    ///
    /// Fetch failures are recorded in the view rather than returned; only
    /// lifecycle problems are errors.
    pub async fn initialize(&self) -> Result<()> {
        let inner = &self.inner;
        let already = inner.mutate(|state| std::mem::replace(&mut state.initialized, true))?;
        if already {
            return Err(Error::AlreadyInitialized);
        }

        if let Err(err) = inner.channels.claim(&inner.channel_key) {
            inner.reset_initialized();
            return Err(err);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = match inner
            .client
            .subscribe(&inner.channel_key, &inner.config.table, tx)
        {
            Ok(handle) => handle,
            Err(err) => {
                inner.channels.release(&inner.channel_key);
                inner.reset_initialized();
                return Err(err.into());
            }
        };

        let listener = tokio::spawn(listen(Arc::downgrade(inner), rx));
        {
            let mut state = inner.lock();
            if state.phase == Phase::TornDown {
                drop(state);
                inner.release(Some(handle), Some(listener));
                return Err(Error::TornDown);
            }
            state.subscription = Some(handle);
            state.listener = Some(listener);
        }
        tracing::info!(scope = %inner.scope, channel = %inner.channel_key, "collection subscribed");

        if let Err(err) = inner.fetch().await {
            tracing::warn!(scope = %inner.scope, error = %err, "initial fetch failed");
        }
        Ok(())
    }

    /// Replace the collection with the store's current rows for this scope.
    pub fn fetch_all(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        self.inner.fetch()
    }

    /// Alias of [`TaskCollection::fetch_all`].
    pub fn refetch(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        self.fetch_all()
    }

    /// Insert a pending task at the front now; confirm it with the store.
    ///
    /// On failure the pending task is discarded and the collection refetched
    /// before the error is returned.
    pub fn add(&self, draft: TaskDraft) -> impl Future<Output = Result<Task>> + Send + 'static {
        self.inner.add(draft)
    }

    /// Apply `patch` now; replace with the store's row or restore on failure.
    pub fn update(
        &self,
        id: impl Into<RecordId>,
        patch: TaskPatch,
    ) -> impl Future<Output = Result<Task>> + Send + 'static {
        self.inner.update(id.into(), patch)
    }

    /// Remove now; restore on failure.
    pub fn remove(
        &self,
        id: impl Into<RecordId>,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        self.inner.remove(id.into())
    }

    /// Flip the completion flag now. A failure restores the prior state and
    /// forces a refetch.
    pub fn toggle_completion(
        &self,
        id: impl Into<RecordId>,
        completed: bool,
    ) -> impl Future<Output = Result<Task>> + Send + 'static {
        self.inner.toggle_completion(id.into(), completed)
    }

    /// Release the subscription and channel key. Idempotent.
    pub fn teardown(&self) {
        self.inner.teardown();
    }

    pub fn clear_error(&self) {
        self.inner.complete(|state| state.error = None);
    }

    /// Current observable state.
    pub fn view(&self) -> CollectionView {
        self.inner.lock().view(&self.inner.temp_ids)
    }

    /// Receiver yielding a fresh view after every state change.
    pub fn watch(&self) -> watch::Receiver<CollectionView> {
        self.inner.view_tx.subscribe()
    }

    pub fn records(&self) -> Vec<Task> {
        self.inner.lock().records.clone()
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        let state = self.inner.lock();
        state.position(id).map(|pos| state.records[pos].clone())
    }

    pub fn is_loading(&self) -> bool {
        self.inner.lock().fetches_in_flight > 0
    }

    pub fn error(&self) -> Option<String> {
        self.inner.lock().error.clone()
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock().phase
    }

    pub fn scope(&self) -> &ListScope {
        &self.inner.scope
    }

    pub fn channel_key(&self) -> &str {
        &self.inner.channel_key
    }

    /// Whether `id` is a temporary identifier issued by this collection.
    pub fn is_pending(&self, id: &str) -> bool {
        self.inner.temp_ids.is_temporary(id)
    }
}

impl fmt::Debug for TaskCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCollection")
            .field("scope", &self.inner.scope)
            .field("channel_key", &self.inner.channel_key)
            .field("phase", &self.phase())
            .finish()
    }
}

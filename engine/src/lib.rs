//! # Tasksync Engine
//!
//! Client-side synchronization for a personal task list.
//!
//! The engine keeps an in-memory collection of tasks consistent with a remote
//! store while the user mutates it, the store answers, and other sessions
//! push change notifications.
//!
//! ## Design Principles
//!
//! - **Optimistic**: every mutation is visible the moment it is called
//! - **Authoritative store**: server answers replace local guesses; failures
//!   restore the pre-mutation snapshot
//! - **Refetch to reconcile**: change notifications trigger a full refetch of
//!   the scope instead of patching from partial payloads
//! - **Injected client**: each collection is handed its [`StoreClient`]; there
//!   is no global connection
//!
//! ## Core Concepts
//!
//! ### Tasks
//!
//! A [`Task`] is one row of the remote table. New tasks start as pending
//! records with a temporary identifier from a [`TempIdClock`] until the
//! store assigns the real one.
//!
//! ### Scopes and channels
//!
//! A [`TaskCollection`] tracks one [`ListScope`]: every task, or the tasks of
//! one list. The scope fixes the channel key the collection subscribes
//! under; a [`ChannelRegistry`] rejects two live collections on one key.
//!
//! ### Change notifications
//!
//! A [`ChangeEvent`] tells a collection that a row changed somewhere. The
//! collection refetches unless the event provably lies outside its scope.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tasksync_engine::{ChannelRegistry, ListScope, TaskCollection, TaskDraft};
//!
//! let channels = ChannelRegistry::new_shared();
//! let todos = TaskCollection::new(client, channels, ListScope::list("groceries"));
//! todos.initialize().await?;
//!
//! // Visible immediately with a temporary id, confirmed when awaited.
//! let pending = todos.add(TaskDraft::new("Buy milk").in_list("groceries"));
//! assert_eq!(todos.view().pending, 1);
//! let task = pending.await?;
//!
//! todos.toggle_completion(task.id, true).await?;
//! todos.teardown();
//! ```

pub mod client;
pub mod clock;
pub mod collection;
pub mod config;
pub mod error;
pub mod event;
pub mod record;
pub mod scope;
pub mod view;

// Re-export main types at crate root
pub use client::{EventSink, OrderBy, SelectQuery, StoreClient, StoreResult, SubscriptionHandle};
pub use clock::TempIdClock;
pub use collection::TaskCollection;
pub use config::{ConfigError, EngineConfig};
pub use error::{AuthError, Error, StoreError};
pub use event::{ChangeEvent, ChangeKind, RowImage};
pub use record::{NewTask, Priority, Task, TaskDraft, TaskPatch};
pub use scope::{ChannelRegistry, ListScope};
pub use view::{CollectionView, Phase, StatusFilter};

/// Type aliases for clarity
pub type RecordId = String;
pub type ListId = String;
pub type UserId = String;
pub type Timestamp = chrono::DateTime<chrono::Utc>;

//! Collection scopes and the channel keys derived from them.
//!
//! Every live collection subscribes to change notifications under a key
//! derived from its scope. The store treats a key as a single subscriber
//! slot, so two collections sharing a key would silently disconnect each
//! other. [`ChannelRegistry`] makes that a hard error.

use crate::{config::EngineConfig, error::Result, Error, ListId};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The subset of tasks a collection tracks. Fixed for the collection's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "list_id", rename_all = "snake_case")]
pub enum ListScope {
    /// Every task the user can see
    #[default]
    All,
    /// Only tasks in one list
    List(ListId),
}

impl ListScope {
    pub fn list(list_id: impl Into<ListId>) -> Self {
        ListScope::List(list_id.into())
    }

    /// The list filter to send with a select, if any.
    pub fn list_id(&self) -> Option<&str> {
        match self {
            ListScope::All => None,
            ListScope::List(id) => Some(id),
        }
    }

    pub fn is_scoped(&self) -> bool {
        matches!(self, ListScope::List(_))
    }

    /// Whether a task with the given list membership belongs to this scope.
    pub fn contains(&self, list_id: Option<&str>) -> bool {
        match self {
            ListScope::All => true,
            ListScope::List(id) => list_id == Some(id.as_str()),
        }
    }

    /// Channel key for this scope under `config`.
    ///
    /// List keys carry a `list:` tag after the prefix. The unscoped token
    /// never contains `:`, so no list id can produce the unscoped key.
    pub fn channel_key(&self, config: &EngineConfig) -> String {
        match self {
            ListScope::All => format!("{}:{}", config.channel_prefix, config.unscoped_token),
            ListScope::List(id) => format!("{}:list:{}", config.channel_prefix, id),
        }
    }
}

impl fmt::Display for ListScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListScope::All => write!(f, "all"),
            ListScope::List(id) => write!(f, "list:{id}"),
        }
    }
}

/// Tracks which channel keys are held by live collections.
///
/// Shared (via `Arc`) by the collections of one session.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    held: DashSet<String>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            held: DashSet::new(),
        }
    }

    /// Create a registry wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Claim `key` for one collection. Fails if another live collection holds it.
    pub fn claim(&self, key: &str) -> Result<()> {
        if self.held.insert(key.to_string()) {
            tracing::debug!(channel = %key, "channel key claimed");
            Ok(())
        } else {
            Err(Error::ChannelInUse(key.to_string()))
        }
    }

    /// Release a key previously claimed.
    pub fn release(&self, key: &str) {
        if self.held.remove(key).is_some() {
            tracing::debug!(channel = %key, "channel key released");
        }
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held.contains(key)
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

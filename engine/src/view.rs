//! Read-only views of a collection's state for rendering.

use crate::Task;
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Uninitialized,
    /// At least one fetch is in flight
    Loading,
    Ready,
    /// Terminal; the subscription has been released
    TornDown,
}

/// Completion filter applied when rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Completed,
}

impl StatusFilter {
    pub fn matches(self, task: &Task) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Active => !task.completed,
            StatusFilter::Completed => task.completed,
        }
    }
}

/// A point-in-time copy of a collection's observable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionView {
    /// Tasks, newest first
    pub records: Vec<Task>,
    pub loading: bool,
    /// Last recorded error message
    pub error: Option<String>,
    pub phase: Phase,
    /// Tasks still waiting for the store to confirm them
    pub pending: usize,
}

impl CollectionView {
    pub fn active_count(&self) -> usize {
        self.records.iter().filter(|t| !t.completed).count()
    }

    pub fn completed_count(&self) -> usize {
        self.records.iter().filter(|t| t.completed).count()
    }

    /// Tasks passing `filter`, in collection order.
    pub fn filtered(&self, filter: StatusFilter) -> Vec<&Task> {
        self.records.iter().filter(|t| filter.matches(t)).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.records.iter().find(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

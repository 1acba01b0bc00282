//! Change notifications pushed by the store.
//!
//! Events are hints, not patches: the row images they carry may be partial
//! (a delete often only carries the identifier) and may already be stale by
//! the time they arrive. A collection only uses them to decide whether to
//! refetch.

use crate::{scope::ListScope, ListId, RecordId, Task};
use serde::{Deserialize, Serialize};

/// Kind of mutation that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// The parts of a row a notification may carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowImage {
    #[serde(default)]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub list_id: Option<ListId>,
}

impl From<&Task> for RowImage {
    fn from(task: &Task) -> Self {
        Self {
            id: Some(task.id.clone()),
            list_id: task.list_id.clone(),
        }
    }
}

/// A change notification for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "eventType")]
    pub kind: ChangeKind,
    pub table: String,
    #[serde(default)]
    pub old: Option<RowImage>,
    #[serde(default)]
    pub new: Option<RowImage>,
}

impl ChangeEvent {
    pub fn insert(table: impl Into<String>, row: &Task) -> Self {
        Self {
            kind: ChangeKind::Insert,
            table: table.into(),
            old: None,
            new: Some(row.into()),
        }
    }

    pub fn update(table: impl Into<String>, old: &Task, new: &Task) -> Self {
        Self {
            kind: ChangeKind::Update,
            table: table.into(),
            old: Some(old.into()),
            new: Some(new.into()),
        }
    }

    /// A delete carrying only the identifier of the removed row.
    pub fn delete(table: impl Into<String>, id: impl Into<RecordId>) -> Self {
        Self {
            kind: ChangeKind::Delete,
            table: table.into(),
            old: Some(RowImage {
                id: Some(id.into()),
                list_id: None,
            }),
            new: None,
        }
    }

    /// Identifier of the affected row, if any image carries one.
    pub fn record_id(&self) -> Option<&str> {
        self.new
            .as_ref()
            .and_then(|row| row.id.as_deref())
            .or_else(|| self.old.as_ref().and_then(|row| row.id.as_deref()))
    }

    /// Whether a collection with `scope` must refetch after this event.
    ///
    /// Unscoped collections always refetch. Scoped ones skip a non-delete
    /// event when neither image lists the scope's list. Deletes always count,
    /// since the old image may not carry list membership.
    pub fn requires_refetch(&self, scope: &ListScope) -> bool {
        let Some(list_id) = scope.list_id() else {
            return true;
        };
        if self.kind == ChangeKind::Delete {
            return true;
        }

        let in_list = |image: &Option<RowImage>| {
            image.as_ref().and_then(|row| row.list_id.as_deref()) == Some(list_id)
        };
        in_list(&self.old) || in_list(&self.new)
    }
}

//! Shared fixtures for store integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tasksync_engine::{
    ChannelRegistry, ListScope, NewTask, StoreClient, Task, TaskCollection, TaskDraft,
};
use tasksync_store::{MemoryBackend, MemoryStore};

pub const USER: &str = "user-1";

/// One backend, one signed-in session, one channel registry.
pub struct Fixture {
    pub backend: Arc<MemoryBackend>,
    pub session: Arc<MemoryStore>,
    pub channels: Arc<ChannelRegistry>,
}

impl Fixture {
    pub fn new() -> Self {
        let backend = MemoryBackend::new_shared("todos");
        let session = Arc::new(MemoryStore::signed_in(backend.clone(), USER));
        Self {
            backend,
            session,
            channels: ChannelRegistry::new_shared(),
        }
    }

    pub fn collection(&self, scope: ListScope) -> TaskCollection {
        let client: Arc<dyn StoreClient> = self.session.clone();
        TaskCollection::new(client, self.channels.clone(), scope)
    }

    /// A second session for the same user, as if on another device.
    pub fn other_device(&self) -> MemoryStore {
        MemoryStore::signed_in(self.backend.clone(), USER)
    }

    /// Insert directly through the session, bypassing any collection.
    pub async fn seed(&self, title: &str, list_id: Option<&str>) -> Task {
        let mut draft = TaskDraft::new(title);
        draft.list_id = list_id.map(String::from);
        self.session
            .insert(NewTask {
                user_id: USER.to_string(),
                draft,
            })
            .await
            .expect("seed insert")
    }
}

/// Wait until `check` holds, failing the test after two seconds.
pub async fn eventually(check: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Give in-flight notifications and refetches time to land.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub fn ids(records: &[Task]) -> Vec<String> {
    records.iter().map(|t| t.id.clone()).collect()
}

//! Tasksync demo - two sessions sharing one in-process store.
//!
//! Session A keeps two live collections (every task, and one list). Session B
//! writes to the same rows, and A's collections follow along through change
//! notifications.

use std::sync::Arc;

use tasksync_engine::{
    ChannelRegistry, ListScope, StoreClient, StoreError, TaskCollection, TaskDraft, TaskPatch,
};
use tasksync_store::{DemoConfig, MemoryBackend, MemoryStore, StoreOp};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tasksync_engine=debug,tasksync_store=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = DemoConfig::from_env()?;

    tracing::info!(user_id = %config.user_id, list_id = %config.list_id, "Starting Tasksync demo");

    let backend = MemoryBackend::new_shared(config.engine.table.clone());
    let session_a = Arc::new(MemoryStore::signed_in(backend.clone(), &config.user_id));
    let session_b = MemoryStore::signed_in(backend.clone(), &config.user_id);

    let channels = ChannelRegistry::new_shared();
    let client: Arc<dyn StoreClient> = session_a.clone();
    let everything = TaskCollection::with_config(
        client.clone(),
        channels.clone(),
        ListScope::All,
        config.engine.clone(),
    );
    let scoped = TaskCollection::with_config(
        client,
        channels.clone(),
        ListScope::list(config.list_id.clone()),
        config.engine.clone(),
    );
    everything.initialize().await?;
    scoped.initialize().await?;

    // Local add: visible at once, confirmed on await.
    let pending = scoped.add(TaskDraft::new("Buy milk").in_list(config.list_id.clone()));
    tracing::info!(pending = scoped.view().pending, "optimistic add applied");
    let milk = pending.await?;

    // A write from the other session reaches both collections.
    let bread = session_b
        .insert(tasksync_engine::NewTask {
            user_id: config.user_id.clone(),
            draft: TaskDraft::new("Buy bread").in_list(config.list_id.clone()),
        })
        .await?;
    tokio::time::sleep(config.settle).await;
    tracing::info!(
        all = everything.view().len(),
        scoped = scoped.view().len(),
        "remote insert observed"
    );

    scoped.toggle_completion(milk.id.clone(), true).await?;

    // A rejected edit is rolled back.
    session_a.fail_next(
        StoreOp::Update,
        StoreError::Transport("connection reset".to_string()),
    );
    if let Err(err) = scoped
        .update(bread.id.clone(), TaskPatch::default().title("Buy rye bread"))
        .await
    {
        tracing::warn!(error = %err, title = ?scoped.get(&bread.id).map(|t| t.title), "edit rolled back");
        scoped.clear_error();
    }

    session_b.delete(&bread.id).await?;
    tokio::time::sleep(config.settle).await;

    let view = scoped.view();
    tracing::info!(
        active = view.active_count(),
        completed = view.completed_count(),
        "final scoped view"
    );
    println!("{}", serde_json::to_string_pretty(&view)?);

    everything.teardown();
    scoped.teardown();
    tracing::info!(open_channels = channels.len(), "demo finished");

    Ok(())
}

//! Optimistic mutation tests against the in-memory store.

mod common;

use common::{ids, Fixture, USER};
use proptest::prelude::*;
use tasksync_engine::{
    Error, ListScope, SelectQuery, StoreClient, StoreError, Task, TaskDraft, TaskPatch,
};
use tasksync_store::StoreOp;

#[tokio::test]
async fn add_shows_pending_task_first_then_confirms() {
    let fx = Fixture::new();
    let existing = fx.seed("Existing", None).await;
    let todos = fx.collection(ListScope::All);
    todos.fetch_all().await.unwrap();

    let gate = fx.session.hold_next(StoreOp::Insert);
    let add = tokio::spawn(todos.add(TaskDraft::new("Buy milk")));

    let view = todos.view();
    assert_eq!(view.len(), 2);
    assert_eq!(view.pending, 1);
    let pending = &view.records[0];
    assert!(todos.is_pending(&pending.id));
    assert!(pending.id.starts_with("temp-"));
    assert_eq!(pending.title, "Buy milk");
    assert_eq!(pending.user_id, USER);
    assert!(!pending.completed);
    assert_eq!(view.records[1], existing);

    gate.release();
    let created = add.await.unwrap().unwrap();

    let records = todos.records();
    assert_eq!(records[0], created);
    assert_eq!(todos.view().pending, 0);
    assert_eq!(fx.backend.get(&created.id), Some(created));
}

#[tokio::test]
async fn rejected_add_leaves_no_pending_task() {
    let fx = Fixture::new();
    fx.seed("Existing", None).await;
    let todos = fx.collection(ListScope::All);
    todos.fetch_all().await.unwrap();
    let before = todos.records();
    let selects = fx.session.select_count(None);

    let err = todos.add(TaskDraft::new("   ")).await.unwrap_err();

    assert!(matches!(err, Error::Store(StoreError::Constraint(_))));
    assert_eq!(todos.records(), before);
    assert_eq!(todos.view().pending, 0);
    assert_eq!(fx.session.select_count(None), selects + 1);
    assert_eq!(todos.error(), Some(err.to_string()));
}

#[tokio::test]
async fn add_failing_in_transport_reports_that_error() {
    let fx = Fixture::new();
    let todos = fx.collection(ListScope::All);
    fx.session.fail_next(
        StoreOp::Insert,
        StoreError::Transport("connection reset".into()),
    );

    let err = todos.add(TaskDraft::new("Buy milk")).await.unwrap_err();

    assert_eq!(
        err,
        Error::Store(StoreError::Transport("connection reset".into()))
    );
    assert!(todos.records().is_empty());
    assert!(fx.backend.is_empty());
    assert_eq!(
        todos.error().as_deref(),
        Some("transport error: connection reset")
    );
}

#[tokio::test]
async fn add_when_signed_out_never_reaches_the_store() {
    let fx = Fixture::new();
    let todos = fx.collection(ListScope::All);
    fx.session.sign_out();

    let err = todos.add(TaskDraft::new("Buy milk")).await.unwrap_err();

    assert_eq!(err.to_string(), "no user found");
    assert!(todos.records().is_empty());
    assert!(fx.backend.is_empty());
    assert_eq!(todos.error().as_deref(), Some("no user found"));
}

#[tokio::test]
async fn toggle_resolves_to_the_store_record() {
    let fx = Fixture::new();
    let task = fx.seed("Buy milk", None).await;
    let todos = fx.collection(ListScope::All);
    todos.fetch_all().await.unwrap();

    let gate = fx.session.hold_next(StoreOp::Update);
    let toggle = tokio::spawn(todos.toggle_completion(task.id.clone(), true));

    let optimistic = todos.get(&task.id).unwrap();
    assert!(optimistic.completed);
    assert_eq!(optimistic.updated_at, task.updated_at);

    gate.release();
    let server = toggle.await.unwrap().unwrap();

    assert!(server.completed);
    assert!(server.updated_at > task.updated_at);
    assert_eq!(todos.records(), vec![server.clone()]);
    assert_eq!(fx.backend.get(&task.id), Some(server));
}

#[tokio::test]
async fn failed_toggle_restores_and_refetches() {
    let fx = Fixture::new();
    let task = fx.seed("Buy milk", None).await;
    fx.seed("Buy bread", None).await;
    let todos = fx.collection(ListScope::All);
    todos.fetch_all().await.unwrap();
    let before = todos.records();
    let selects = fx.session.select_count(None);

    fx.session
        .fail_next(StoreOp::Update, StoreError::Transport("timeout".into()));
    let result = todos.toggle_completion(task.id.clone(), true).await;

    assert!(result.is_err());
    assert_eq!(todos.records(), before);
    assert_eq!(fx.session.select_count(None), selects + 1);
    assert_eq!(todos.error().as_deref(), Some("transport error: timeout"));
    assert!(!fx.backend.get(&task.id).unwrap().completed);
}

#[tokio::test]
async fn failed_update_restores_without_refetch() {
    let fx = Fixture::new();
    let task = fx.seed("Buy milk", None).await;
    let todos = fx.collection(ListScope::All);
    todos.fetch_all().await.unwrap();
    let before = todos.records();
    let selects = fx.session.total_selects();

    let err = todos
        .update(task.id.clone(), TaskPatch::default().title(""))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Store(StoreError::Constraint(_))));
    assert_eq!(todos.records(), before);
    assert_eq!(fx.session.total_selects(), selects);
}

#[tokio::test]
async fn update_can_clear_nullable_fields() {
    let fx = Fixture::new();
    let task = fx
        .session
        .insert(tasksync_engine::NewTask {
            user_id: USER.into(),
            draft: TaskDraft::new("Report")
                .in_list("work")
                .with_description("quarterly"),
        })
        .await
        .unwrap();
    let todos = fx.collection(ListScope::All);
    todos.fetch_all().await.unwrap();

    let updated = todos
        .update(
            task.id.clone(),
            TaskPatch::default().description(None).list_id(None),
        )
        .await
        .unwrap();

    assert_eq!(updated.description, None);
    assert_eq!(updated.list_id, None);
    assert_eq!(updated.title, "Report");
    assert_eq!(todos.get(&task.id), Some(updated));
}

#[tokio::test]
async fn failed_remove_restores_the_record() {
    let fx = Fixture::new();
    let first = fx.seed("first", None).await;
    fx.seed("second", None).await;
    let todos = fx.collection(ListScope::All);
    todos.fetch_all().await.unwrap();
    let before = todos.records();

    let gate = fx.session.hold_next(StoreOp::Delete);
    fx.session
        .fail_next(StoreOp::Delete, StoreError::Transport("offline".into()));
    let remove = tokio::spawn(todos.remove(first.id.clone()));

    assert!(todos.get(&first.id).is_none());
    assert_eq!(todos.view().len(), 1);

    gate.release();
    assert!(remove.await.unwrap().is_err());
    assert_eq!(todos.records(), before);
    assert_eq!(fx.backend.len(), 2);
}

#[tokio::test]
async fn remove_deletes_from_store() {
    let fx = Fixture::new();
    let task = fx.seed("Buy milk", None).await;
    let todos = fx.collection(ListScope::All);
    todos.fetch_all().await.unwrap();

    todos.remove(task.id.clone()).await.unwrap();

    assert!(todos.records().is_empty());
    assert!(fx.backend.get(&task.id).is_none());
}

#[tokio::test]
async fn last_completion_to_land_wins() {
    let fx = Fixture::new();
    let task = fx.seed("draft", None).await;
    let todos = fx.collection(ListScope::All);
    todos.fetch_all().await.unwrap();

    let gate = fx.session.hold_next(StoreOp::Update);
    let first = tokio::spawn(todos.update(task.id.clone(), TaskPatch::default().title("first")));
    // Let the first update reach the held store call.
    tokio::task::yield_now().await;

    let second = todos
        .update(task.id.clone(), TaskPatch::default().title("second"))
        .await
        .unwrap();
    assert_eq!(second.title, "second");
    assert_eq!(todos.get(&task.id).unwrap().title, "second");

    gate.release();
    let first = first.await.unwrap().unwrap();

    assert_eq!(first.title, "first");
    assert_eq!(todos.get(&task.id), Some(first.clone()));
    assert_eq!(fx.backend.get(&task.id), Some(first));
}

#[tokio::test]
async fn scoped_collection_only_loads_its_list() {
    let fx = Fixture::new();
    let work = fx.seed("Report", Some("work")).await;
    fx.seed("Milk", Some("home")).await;
    fx.seed("Unfiled", None).await;

    let todos = fx.collection(ListScope::list("work"));
    todos.fetch_all().await.unwrap();

    assert_eq!(todos.records(), vec![work]);
    assert_eq!(fx.session.select_count(Some("work")), 1);
    assert_eq!(fx.session.select_count(None), 0);
}

#[derive(Debug, Clone)]
enum Op {
    Add(String),
    Rename(usize, String),
    Toggle(usize),
    Remove(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => "[a-z]{1,8}".prop_map(Op::Add),
        1 => (any::<usize>(), "[a-z]{1,8}").prop_map(|(i, t)| Op::Rename(i, t)),
        1 => any::<usize>().prop_map(Op::Toggle),
        1 => any::<usize>().prop_map(Op::Remove),
    ]
}

/// Apply `ops` through a collection; return its records and the store's rows.
async fn run_ops(ops: Vec<Op>) -> (Vec<Task>, Vec<Task>) {
    let fx = Fixture::new();
    let todos = fx.collection(ListScope::All);
    todos.fetch_all().await.unwrap();

    for op in ops {
        let records = todos.records();
        let pick = |i: usize| records.get(i % records.len().max(1)).map(|t| t.id.clone());
        match op {
            Op::Add(title) => {
                todos.add(TaskDraft::new(title)).await.unwrap();
            }
            Op::Rename(i, title) => {
                if let Some(id) = pick(i) {
                    todos
                        .update(id, TaskPatch::default().title(title))
                        .await
                        .unwrap();
                }
            }
            Op::Toggle(i) => {
                if let Some(id) = pick(i) {
                    let completed = !todos.get(&id).unwrap().completed;
                    todos.toggle_completion(id, completed).await.unwrap();
                }
            }
            Op::Remove(i) => {
                if let Some(id) = pick(i) {
                    todos.remove(id).await.unwrap();
                }
            }
        }
        assert_eq!(todos.view().pending, 0);
    }

    let remote = fx.session.select(&SelectQuery::all()).await.unwrap();
    (todos.records(), remote)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn successful_mutations_leave_collection_equal_to_store(
        ops in prop::collection::vec(op_strategy(), 1..16)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (local, remote) = runtime.block_on(run_ops(ops));

        prop_assert_eq!(ids(&local), ids(&remote));
        prop_assert_eq!(local, remote);
    }
}

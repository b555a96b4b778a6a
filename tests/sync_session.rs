use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_test::{assert_pending, assert_ready, task};

use overlap::aggregate::HeatBucket;
use overlap::document::{Document, Patch, Value};
use overlap::engine::Engine;
use overlap::matrix::CellState;
use overlap::model::{EventId, NewEvent, ParticipantKey};
use overlap::store::{DocumentStore, SetOptions, StoreError, Subscription};
use overlap::sync::{Session, SnapshotDiff, SyncClient, SyncError};

// ── Test infrastructure ──────────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("overlap_int_test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn start_store(name: &str) -> (Arc<Engine>, SyncClient<Engine>) {
    let engine = Arc::new(Engine::open(&test_wal_path(name)).unwrap());
    let client = SyncClient::new(engine.clone());
    (engine, client)
}

async fn create(client: &SyncClient<Engine>, end_time: &str, end_date: &str) -> EventId {
    let event = NewEvent::parse("Planning", "2024-01-01", end_date, "09:00", end_time).unwrap();
    client.create_event(event).await.unwrap()
}

async fn started(client: &SyncClient<Engine>, id: &EventId) -> Session<Engine> {
    let mut session = Session::new(client.clone(), id.clone());
    session.start().await.unwrap();
    session
}

/// Next remote snapshot, or fail instead of hanging.
async fn next(session: &mut Session<Engine>) -> SnapshotDiff {
    tokio::time::timeout(Duration::from_secs(5), session.next_state())
        .await
        .expect("timed out waiting for snapshot")
        .unwrap()
}

fn key(name: &str) -> ParticipantKey {
    ParticipantKey::normalize(name).unwrap()
}

/// Engine whose updates can be switched to fail.
struct FlakyStore {
    engine: Engine,
    fail_updates: AtomicBool,
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, id: &EventId) -> Result<Option<Document>, StoreError> {
        self.engine.get(id).await
    }

    async fn set(&self, id: &EventId, doc: Document, options: SetOptions) -> Result<(), StoreError> {
        self.engine.set(id, doc, options).await
    }

    async fn update(&self, id: &EventId, patches: Vec<Patch>) -> Result<(), StoreError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("update refused".into()));
        }
        self.engine.update(id, patches).await
    }

    async fn subscribe(&self, id: &EventId) -> Result<Subscription, StoreError> {
        self.engine.subscribe(id).await
    }
}

// ── End to end ───────────────────────────────────────────────

#[tokio::test]
async fn single_participant_single_cell_is_full() {
    let (_engine, client) = start_store("e2e.wal");
    let id = create(&client, "09:30", "2024-01-01").await;

    let mut bob = started(&client, &id).await;
    let view = bob.view().unwrap();
    let labels: Vec<&str> = view.slots().iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, ["09:00", "09:15", "09:30"]);
    assert_eq!(view.days().len(), 1);

    bob.join("bob").await.unwrap();
    bob.set_cell(0, 0, true).await.unwrap();

    let agg = bob.view().unwrap().aggregate();
    assert_eq!(agg.count(0, 0), 1);
    assert_eq!(agg.ratio(0, 0), Some(1.0));
    assert_eq!(agg.bucket(0, 0), HeatBucket::Full);
    assert_eq!(agg.bucket(1, 0), HeatBucket::None);

    // the store agrees with the local echo
    let agg = client.fetch(&id).await.unwrap().aggregate();
    assert_eq!(agg.count(0, 0), 1);
    assert_eq!(agg.bucket(0, 0), HeatBucket::Full);
}

#[tokio::test]
async fn sessions_see_each_others_writes() {
    let (_engine, client) = start_store("two_sessions.wal");
    let id = create(&client, "10:00", "2024-01-02").await;

    let mut alice = started(&client, &id).await;
    let mut bob = started(&client, &id).await;

    let alice_key = alice.join("Alice").await.unwrap();
    let diff = next(&mut bob).await;
    assert_eq!(diff.joined, [alice_key.clone()]);

    alice.set_cell(1, 1, true).await.unwrap();
    let diff = next(&mut bob).await;
    assert_eq!(diff.changed, [alice_key.clone()]);

    let view = bob.view().unwrap();
    assert_eq!(view.cell_state(&alice_key, 1, 1), CellState::Available);
    assert_eq!(view.cell_state(&alice_key, 0, 0), CellState::Unset);
    assert_eq!(view.aggregate().count(1, 1), 1);
}

// ── Participants ─────────────────────────────────────────────

#[tokio::test]
async fn join_twice_does_not_reset() {
    let (_engine, client) = start_store("join_twice.wal");
    let id = create(&client, "10:00", "2024-01-01").await;

    let mut session = started(&client, &id).await;
    let bob = session.join("bob").await.unwrap();
    session.paint(&[(0, 0), (1, 0), (2, 0)], true).await.unwrap();

    assert_eq!(session.join("bob").await.unwrap(), bob);
    assert_eq!(client.join(&id, "  Bob").await.unwrap(), bob);

    let state = client.fetch(&id).await.unwrap();
    assert_eq!(state.participants.len(), 1);
    assert_eq!(state.participant(&bob).unwrap().available_count(), 3);
}

#[tokio::test]
async fn differently_typed_names_share_a_record() {
    let (_engine, client) = start_store("collision.wal");
    let id = create(&client, "10:00", "2024-01-01").await;

    let mut first = started(&client, &id).await;
    let mut second = started(&client, &id).await;
    let a = first.join("Alice ").await.unwrap();
    let b = second.join("alice").await.unwrap();
    assert_eq!(a, b);

    first.set_cell(0, 0, true).await.unwrap();
    second.set_cell(1, 0, true).await.unwrap();

    let state = client.fetch(&id).await.unwrap();
    assert_eq!(state.participants.len(), 1);
    let record = state.participant(&a).unwrap();
    assert_eq!(record.get(0, 0), Some(true));
    assert_eq!(record.get(1, 0), Some(true));
}

#[tokio::test]
async fn remove_deletes_only_the_target() {
    let (_engine, client) = start_store("remove.wal");
    let id = create(&client, "10:00", "2024-01-01").await;

    let mut sessions = Vec::new();
    for name in ["alice", "bob", "carol"] {
        let mut s = started(&client, &id).await;
        s.join(name).await.unwrap();
        s.set_cell(0, 0, true).await.unwrap();
        s.set_cell(1, 0, false).await.unwrap();
        sessions.push(s);
    }
    let before = client.fetch(&id).await.unwrap();

    sessions[1].remove_participant(&key("alice")).await.unwrap();
    assert_eq!(sessions[1].identity(), Some(&key("bob")));

    let after = client.fetch(&id).await.unwrap();
    let keys: Vec<&ParticipantKey> = after.participants.keys().collect();
    assert_eq!(keys, [&key("bob"), &key("carol")]);
    assert_eq!(after.participant(&key("bob")), before.participant(&key("bob")));
    assert_eq!(after.participant(&key("carol")), before.participant(&key("carol")));

    // removing again is harmless
    client.remove_participant(&id, &key("alice")).await.unwrap();
}

#[tokio::test]
async fn removing_yourself_clears_identity() {
    let (_engine, client) = start_store("remove_self.wal");
    let id = create(&client, "10:00", "2024-01-01").await;

    let mut session = started(&client, &id).await;
    let me = session.join("dana").await.unwrap();
    session.set_cell(0, 0, true).await.unwrap();

    session.remove_participant(&me).await.unwrap();
    assert_eq!(session.identity(), None);
    assert!(session.view().unwrap().state().participants.is_empty());
    assert!(matches!(
        session.set_cell(0, 0, true).await,
        Err(SyncError::NotJoined)
    ));
}

// ── Session lifecycle ────────────────────────────────────────

#[tokio::test]
async fn stop_is_idempotent_and_releases_the_channel() {
    let (engine, client) = start_store("stop.wal");
    let id = create(&client, "10:00", "2024-01-01").await;

    let mut session = started(&client, &id).await;
    assert!(session.is_live());
    assert_eq!(engine.notify.listener_count(&id), 1);

    session.stop();
    session.stop();
    assert!(!session.is_live());
    assert_eq!(engine.notify.channel_count(), 0);
    assert!(session.view().is_some());
    assert!(matches!(session.next_state().await, Err(SyncError::NotStarted)));

    // restart picks up writes made while stopped
    client.join(&id, "erin").await.unwrap();
    let view = session.start().await.unwrap();
    assert_eq!(view.aggregate().total(), 1);
}

#[tokio::test]
async fn dropping_a_session_unsubscribes() {
    let (engine, client) = start_store("drop_session.wal");
    let id = create(&client, "10:00", "2024-01-01").await;

    let session = started(&client, &id).await;
    assert_eq!(engine.notify.listener_count(&id), 1);
    drop(session);
    assert_eq!(engine.notify.channel_count(), 0);
}

#[tokio::test]
async fn start_on_missing_event_is_not_found() {
    let (engine, client) = start_store("missing.wal");
    let mut session = Session::new(client, EventId::generate());

    let err = session.start().await.unwrap_err();
    assert!(err.is_not_found());
    assert!(!session.is_live());
    assert_eq!(engine.notify.channel_count(), 0);
}

#[tokio::test]
async fn writes_require_start_identity_and_range() {
    let (_engine, client) = start_store("write_guards.wal");
    let id = create(&client, "09:30", "2024-01-01").await;

    let mut session = Session::new(client.clone(), id.clone()).with_identity(key("bob"));
    assert!(matches!(session.set_cell(0, 0, true).await, Err(SyncError::NotStarted)));

    let mut session = started(&client, &id).await;
    assert!(matches!(session.toggle(0, 0).await, Err(SyncError::NotJoined)));

    session.join("bob").await.unwrap();
    assert!(matches!(
        session.set_cell(3, 0, true).await,
        Err(SyncError::CellOutOfRange { row: 3, col: 0 })
    ));
    assert!(matches!(
        session.paint(&[(0, 0), (0, 1)], true).await,
        Err(SyncError::CellOutOfRange { row: 0, col: 1 })
    ));
    // nothing from the rejected paint reached the store
    let state = client.fetch(&id).await.unwrap();
    assert!(state.participant(&key("bob")).unwrap().is_empty());
}

#[tokio::test]
async fn toggle_flips_between_available_and_not() {
    let (_engine, client) = start_store("toggle.wal");
    let id = create(&client, "09:30", "2024-01-01").await;

    let mut session = started(&client, &id).await;
    let bob = session.join("bob").await.unwrap();

    assert!(session.toggle(0, 0).await.unwrap());
    assert!(!session.toggle(0, 0).await.unwrap());
    assert!(session.toggle(0, 0).await.unwrap());

    let state = client.fetch(&id).await.unwrap();
    assert_eq!(state.participant(&bob).unwrap().get(0, 0), Some(true));
}

#[tokio::test]
async fn drag_writes_each_cell_once_with_the_start_value() {
    let (_engine, client) = start_store("drag.wal");
    let id = create(&client, "10:00", "2024-01-01").await;

    let mut session = started(&client, &id).await;
    let bob = session.join("bob").await.unwrap();

    assert!(session.begin_drag(0, 0).await.unwrap());
    session.drag_over(1, 0).await.unwrap();
    session.drag_over(1, 0).await.unwrap();
    session.drag_over(40, 9).await.unwrap();
    session.drag_over(2, 0).await.unwrap();
    assert_eq!(session.end_drag(), [(0, 0), (1, 0), (2, 0)]);

    // starting on an available cell paints unavailable
    assert!(!session.begin_drag(1, 0).await.unwrap());
    session.drag_over(2, 0).await.unwrap();
    session.drag_over(3, 0).await.unwrap();
    session.end_drag();

    // no drag in progress: ignored
    session.drag_over(4, 0).await.unwrap();

    let state = client.fetch(&id).await.unwrap();
    let record = state.participant(&bob).unwrap();
    assert_eq!(record.get(0, 0), Some(true));
    assert_eq!(record.get(1, 0), Some(false));
    assert_eq!(record.get(2, 0), Some(false));
    assert_eq!(record.get(3, 0), Some(false));
    assert_eq!(record.get(4, 0), None);
}

#[tokio::test]
async fn failed_drag_writes_can_be_retried() {
    let store = Arc::new(FlakyStore {
        engine: Engine::open(&test_wal_path("drag_flaky.wal")).unwrap(),
        fail_updates: AtomicBool::new(false),
    });
    let client = SyncClient::new(store.clone());
    let event = NewEvent::parse("Planning", "2024-01-01", "2024-01-01", "09:00", "10:00").unwrap();
    let id = client.create_event(event).await.unwrap();

    let mut session = Session::new(client.clone(), id.clone());
    session.start().await.unwrap();
    let bob = session.join("bob").await.unwrap();

    assert!(session.begin_drag(0, 0).await.unwrap());
    store.fail_updates.store(true, Ordering::SeqCst);
    assert!(session.drag_over(1, 0).await.is_err());
    store.fail_updates.store(false, Ordering::SeqCst);
    session.drag_over(1, 0).await.unwrap();
    assert_eq!(session.end_drag(), [(0, 0), (1, 0)]);

    // a press whose write fails starts no drag
    store.fail_updates.store(true, Ordering::SeqCst);
    assert!(session.begin_drag(2, 0).await.is_err());
    store.fail_updates.store(false, Ordering::SeqCst);
    session.drag_over(3, 0).await.unwrap();
    assert!(session.end_drag().is_empty());

    let state = client.fetch(&id).await.unwrap();
    let record = state.participant(&bob).unwrap();
    assert_eq!(record.get(1, 0), Some(true));
    assert_eq!(record.get(2, 0), None);
    assert_eq!(record.get(3, 0), None);
}

// ── Streams ──────────────────────────────────────────────────

#[tokio::test]
async fn stream_yields_only_after_a_write() {
    let (engine, client) = start_store("poll.wal");
    let id = create(&client, "09:30", "2024-01-01").await;
    let bob = client.join(&id, "bob").await.unwrap();

    let mut stream = task::spawn(client.subscribe(&id).await.unwrap().into_stream());
    let initial = assert_ready!(stream.poll_next()).unwrap();
    assert_eq!(initial.participants.len(), 1);
    assert_pending!(stream.poll_next());

    client.set_cell(&id, &bob, 2, 0, true).await.unwrap();
    assert!(stream.is_woken());
    let state = assert_ready!(stream.poll_next()).unwrap();
    assert_eq!(state.participant(&bob).unwrap().get(2, 0), Some(true));
    assert_pending!(stream.poll_next());

    drop(stream);
    assert_eq!(engine.notify.channel_count(), 0);
}

#[tokio::test]
async fn undecodable_snapshots_are_skipped() {
    let (engine, client) = start_store("garbage.wal");
    let id = create(&client, "09:30", "2024-01-01").await;
    let good = client.fetch(&id).await.unwrap();

    let mut session = started(&client, &id).await;

    let mut garbage = Document::new();
    garbage.insert("meta".into(), Value::from("not a map"));
    engine.set(&id, garbage, SetOptions::REPLACE).await.unwrap();
    engine
        .set(&id, good.to_document(), SetOptions::REPLACE)
        .await
        .unwrap();

    let diff = next(&mut session).await;
    assert!(diff.is_empty());
    assert_eq!(session.view().unwrap().metadata(), &good.metadata);
}

// ── Durability ───────────────────────────────────────────────

#[tokio::test]
async fn state_survives_reopen() {
    let path = test_wal_path("reopen.wal");
    let id;
    {
        let client = SyncClient::new(Arc::new(Engine::open(&path).unwrap()));
        id = create(&client, "10:00", "2024-01-03").await;
        let bob = client.join(&id, "bob").await.unwrap();
        client.paint(&id, &bob, &[(0, 0), (0, 1), (0, 2)], true).await.unwrap();
        client.join(&id, "carol").await.unwrap();
        client.remove_participant(&id, &key("carol")).await.unwrap();
    }

    let client = SyncClient::new(Arc::new(Engine::open(&path).unwrap()));
    let state = client.fetch(&id).await.unwrap();
    assert_eq!(state.metadata.title(), "Planning");
    assert_eq!(state.participants.len(), 1);
    assert_eq!(state.aggregate().counts()[0], vec![1, 1, 1]);
}

//! End-to-end session tests against the in-process module.
//!
//! Tests cover:
//! - connect → token persisted, identity assigned, `connected` fired once
//! - subscription applied → `subscription_applied` fired once, after `connected`
//! - border bars built from the config row and spawned into the scene
//! - missing config row surfaced as a fatal setup error
//! - connect errors, remote kicks and explicit disconnects
//! - restarting after either kind of disconnect without duplicating the border
//! - rejected subscriptions surfaced as fatal setup errors

use std::sync::Arc;

use blackholio_client::arena::{BORDER_OBJECT_NAME, Side, border_segments};
use blackholio_client::credentials::CredentialStore;
use blackholio_client::error::SessionError;
use blackholio_client::scene::SceneGraph;
use blackholio_client::session::{ArenaSession, SessionSettings};
use blackholio_sdk::ClientError;
use blackholio_sdk::loopback::LoopbackModule;
use nalgebra::Vector3;
use parking_lot::Mutex;

fn settings(thickness: f32) -> SessionSettings {
    SessionSettings {
        border_thickness: thickness,
        border_material: "border-mat".to_string(),
        ..SessionSettings::default()
    }
}

fn new_session(dir: &tempfile::TempDir) -> ArenaSession<SceneGraph> {
    ArenaSession::new(settings(2.0), store(dir), SceneGraph::new())
}

fn store(dir: &tempfile::TempDir) -> CredentialStore {
    CredentialStore::new(dir.path().join("prefs.toml"))
}

/// Pump events until the arena is built, the link closes, or we give up.
async fn run_setup(session: &ArenaSession<SceneGraph>) -> Result<(), SessionError> {
    for _ in 0..8 {
        if !session.borders().is_empty() {
            return Ok(());
        }
        if !session.advance().await? {
            break;
        }
    }
    Ok(())
}

/// Pump events until `done` holds, the link closes, or we give up.
async fn pump_until(
    session: &ArenaSession<SceneGraph>,
    done: impl Fn() -> bool,
) -> Result<(), SessionError> {
    for _ in 0..8 {
        if done() {
            return Ok(());
        }
        if !session.advance().await? {
            break;
        }
    }
    Ok(())
}

fn applied_count(log: &Mutex<Vec<&'static str>>) -> usize {
    log.lock().iter().filter(|e| **e == "subscription_applied").count()
}

fn record(session: &ArenaSession<SceneGraph>) -> Arc<Mutex<Vec<&'static str>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let l = log.clone();
    session.on_connected().subscribe(move || l.lock().push("connected"));
    let l = log.clone();
    session
        .on_subscription_applied()
        .subscribe(move || l.lock().push("subscription_applied"));
    log
}

#[tokio::test]
async fn connect_then_sync_builds_the_arena() {
    let dir = tempfile::tempdir().unwrap();
    let module = LoopbackModule::new("blackholio").with_config(100);
    let session = new_session(&dir);
    let log = record(&session);

    session.start(&module).unwrap();
    assert!(!session.is_connected());
    run_setup(&session).await.unwrap();

    assert!(session.is_connected());
    assert_eq!(*log.lock(), vec!["connected", "subscription_applied"]);

    let borders = session.borders();
    let sides: Vec<Side> = borders.iter().map(|b| b.side).collect();
    assert_eq!(sides, vec![Side::North, Side::South, Side::East, Side::West]);

    let scene = session.scene();
    let cubes: Vec<_> = scene.named(BORDER_OBJECT_NAME).collect();
    assert_eq!(cubes.len(), 4);
    assert_eq!(cubes[0].position, Vector3::new(50.0, 101.0, 1.0));
    assert_eq!(cubes[0].scale, Vector3::new(104.0, 2.0, 1.0));
    assert_eq!(cubes[1].position, Vector3::new(50.0, -1.0, 1.0));
    assert_eq!(cubes[2].position, Vector3::new(101.0, 50.0, 1.0));
    assert_eq!(cubes[2].scale, Vector3::new(2.0, 104.0, 1.0));
    assert_eq!(cubes[3].position, Vector3::new(-1.0, 50.0, 1.0));
    assert!(cubes.iter().all(|c| c.material == "border-mat"));
    drop(scene);
    assert_eq!(session.spawned().len(), 4);
}

#[tokio::test]
async fn identity_is_set_before_connected_fires() {
    let dir = tempfile::tempdir().unwrap();
    let module = LoopbackModule::new("blackholio").with_config(100);
    let session = new_session(&dir);

    let seen = Arc::new(Mutex::new(None));
    let (seen2, handle) = (seen.clone(), session.clone());
    session
        .on_connected()
        .subscribe(move || *seen2.lock() = Some(handle.local_identity()));

    session.start(&module).unwrap();
    run_setup(&session).await.unwrap();

    let at_emit = seen.lock().clone().expect("connected fired");
    assert!(at_emit.is_some());
    assert_eq!(at_emit, session.local_identity());
}

#[tokio::test]
async fn token_is_saved_and_reused_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let module = LoopbackModule::new("blackholio").with_config(100);

    let first = new_session(&dir);
    first.start(&module).unwrap();
    run_setup(&first).await.unwrap();
    let identity = first.local_identity().unwrap();
    let saved = store(&dir).load().unwrap();
    assert!(saved.is_some());
    first.disconnect();

    let second = new_session(&dir);
    second.start(&module).unwrap();
    run_setup(&second).await.unwrap();
    assert_eq!(second.local_identity(), Some(identity));
    assert_eq!(store(&dir).load().unwrap(), saved);
    assert_eq!(module.issued_tokens(), 1);
}

#[tokio::test]
async fn missing_config_row_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let module = LoopbackModule::new("blackholio");
    let session = new_session(&dir);
    let log = record(&session);

    session.start(&module).unwrap();
    let err = run_setup(&session).await.unwrap_err();

    assert!(matches!(err, SessionError::MissingConfigRow { id: 0 }));
    assert_eq!(*log.lock(), vec!["connected", "subscription_applied"]);
    assert!(session.borders().is_empty());
    assert!(session.scene().objects().is_empty());
}

#[tokio::test]
async fn connect_error_leaves_session_unconnected() {
    let dir = tempfile::tempdir().unwrap();
    let module = LoopbackModule::new("blackholio").with_config(100);
    module.refuse_connections("maintenance");
    let session = new_session(&dir);
    let log = record(&session);

    session.start(&module).unwrap();
    run_setup(&session).await.unwrap();

    assert!(!session.is_connected());
    assert!(session.local_identity().is_none());
    assert!(log.lock().is_empty());
    assert_eq!(store(&dir).load().unwrap(), None);
}

#[tokio::test]
async fn wrong_module_is_a_connect_error() {
    let dir = tempfile::tempdir().unwrap();
    let module = LoopbackModule::new("blackholio").with_config(100);
    let session = ArenaSession::new(
        SessionSettings {
            module_name: "nonexistent".to_string(),
            ..settings(2.0)
        },
        store(&dir),
        SceneGraph::new(),
    );

    session.start(&module).unwrap();
    run_setup(&session).await.unwrap();
    assert!(!session.is_connected());
    assert!(session.borders().is_empty());
}

#[tokio::test]
async fn explicit_disconnect_clears_the_handle() {
    let dir = tempfile::tempdir().unwrap();
    let module = LoopbackModule::new("blackholio").with_config(100);
    let session = new_session(&dir);
    session.start(&module).unwrap();
    run_setup(&session).await.unwrap();
    assert!(session.is_connected());

    session.disconnect();
    assert!(!session.is_connected());
    assert!(session.connection().is_none());
    // Nothing left to pump; updates stay quiet.
    assert!(!session.advance().await.unwrap());
    session.update().unwrap();
    // Identity and arena outlive the connection.
    assert!(session.local_identity().is_some());
    assert_eq!(session.borders().len(), 4);
}

#[tokio::test]
async fn remote_kick_keeps_the_handle() {
    let dir = tempfile::tempdir().unwrap();
    let module = LoopbackModule::new("blackholio").with_config(100);
    let session = new_session(&dir);
    session.start(&module).unwrap();
    run_setup(&session).await.unwrap();

    assert_eq!(module.kick_all("server restart"), 1);
    assert!(session.advance().await.unwrap());

    assert!(!session.is_connected());
    let conn = session.connection().expect("handle kept after remote disconnect");
    assert!(!conn.is_active());
    assert!(conn.is_closed());
}

#[tokio::test]
async fn thickness_drives_bar_dimensions() {
    let dir = tempfile::tempdir().unwrap();
    let module = LoopbackModule::new("blackholio").with_config(40);
    let session = ArenaSession::new(settings(5.0), store(&dir), SceneGraph::new());
    session.start(&module).unwrap();
    run_setup(&session).await.unwrap();

    for bar in session.borders() {
        let dims = [bar.size.x, bar.size.y];
        assert!(dims.contains(&5.0));
        assert!(dims.contains(&50.0));
    }
}

#[tokio::test]
async fn restart_after_disconnect_keeps_one_border() {
    let dir = tempfile::tempdir().unwrap();
    let module = LoopbackModule::new("blackholio").with_config(100);
    let session = new_session(&dir);
    let log = record(&session);
    session.start(&module).unwrap();
    run_setup(&session).await.unwrap();

    session.disconnect();
    session.start(&module).unwrap();
    pump_until(&session, || applied_count(&log) == 2).await.unwrap();

    assert!(session.is_connected());
    assert_eq!(
        *log.lock(),
        vec!["connected", "subscription_applied", "connected", "subscription_applied"]
    );
    assert_eq!(session.spawned().len(), 4);
    assert_eq!(session.scene().named(BORDER_OBJECT_NAME).count(), 4);
    assert_eq!(session.borders().len(), 4);
}

#[tokio::test]
async fn restart_after_kick_reconnects() {
    let dir = tempfile::tempdir().unwrap();
    let module = LoopbackModule::new("blackholio").with_config(100);
    let session = new_session(&dir);
    let log = record(&session);
    session.start(&module).unwrap();
    run_setup(&session).await.unwrap();
    let identity = session.local_identity();

    assert_eq!(module.kick_all("server restart"), 1);
    assert!(session.advance().await.unwrap());
    assert!(!session.is_connected());

    session.start(&module).unwrap();
    pump_until(&session, || applied_count(&log) == 2).await.unwrap();

    assert!(session.is_connected());
    assert_eq!(session.local_identity(), identity);
    assert_eq!(module.issued_tokens(), 1);
    assert_eq!(session.spawned().len(), 4);
    assert_eq!(session.scene().objects().len(), 4);
}

#[tokio::test]
async fn rejected_subscription_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let module = LoopbackModule::new("blackholio").with_config(100);
    module.reject_subscriptions("quota exceeded");
    let session = new_session(&dir);
    let log = record(&session);

    session.start(&module).unwrap();
    let err = run_setup(&session).await.unwrap_err();

    assert!(matches!(
        err,
        SessionError::Client(ClientError::SubscriptionFailed(ref reason)) if reason == "quota exceeded"
    ));
    assert_eq!(*log.lock(), vec!["connected"]);
    assert!(session.borders().is_empty());
}

#[tokio::test]
async fn disconnect_from_connected_listener_is_quiet() {
    let dir = tempfile::tempdir().unwrap();
    let module = LoopbackModule::new("blackholio").with_config(100);
    let session = new_session(&dir);
    let handle = session.clone();
    session.on_connected().subscribe(move || handle.disconnect());

    session.start(&module).unwrap();
    run_setup(&session).await.unwrap();
    session.update().unwrap();

    assert!(!session.is_connected());
    assert!(session.connection().is_none());
    assert!(session.local_identity().is_some());
    assert!(session.borders().is_empty());
}

#[tokio::test]
async fn unusable_thickness_uses_the_default() {
    let dir = tempfile::tempdir().unwrap();
    let module = LoopbackModule::new("blackholio").with_config(100);
    let session = ArenaSession::new(settings(-2.0), store(&dir), SceneGraph::new());
    session.start(&module).unwrap();
    run_setup(&session).await.unwrap();

    assert_eq!(session.borders(), border_segments(100.0, 2.0).to_vec());
    let north = session.borders()[0];
    assert_eq!(north.center.y - north.size.y / 2.0, 100.0);
}

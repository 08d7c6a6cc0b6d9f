//! Authentication sessions: single in-flight operation, cancellation,
//! state notifications and teardown.

#![allow(clippy::unwrap_used)]

use assert_matches::assert_matches;
use serde_json::Value;
use signon_client::{
    keys, AuthSession, AuthSessionState, Identity, SessionData, SessionPolicy, SignonError,
    StateChange, PROCESS_PENDING_MESSAGE,
};
use signon_testkit::*;

fn credentials() -> SessionData {
    let mut data = SessionData::new();
    data.insert(keys::USERNAME.to_string(), Value::from("standalone"));
    data.insert(keys::SECRET.to_string(), Value::from("hunter2"));
    SessionPolicy::NoUserInteraction.apply(&mut data);
    data
}

#[tokio::test]
async fn test_standalone_process_echoes_data() {
    init_test_tracing();
    let daemon = MockDaemon::new();
    let session = AuthSession::new(&client_for(&daemon), "ssotest").unwrap();
    assert_eq!(session.id(), 0);

    let reply = session.process(credentials(), "mech1").await.unwrap();
    assert_eq!(reply, credentials());

    let calls = daemon.process_calls();
    assert_eq!(calls[0].identity_id, 0);
    assert_eq!(calls[0].mechanism, "mech1");
}

#[tokio::test]
async fn test_empty_method_rejected() {
    let daemon = MockDaemon::new();
    assert_matches!(
        AuthSession::new(&client_for(&daemon), ""),
        Err(SignonError::MethodNotAvailable { .. })
    );
}

#[tokio::test]
async fn test_unknown_method_fails_registration() {
    init_test_tracing();
    let daemon = MockDaemon::new();
    let session = AuthSession::new(&client_for(&daemon), "nosuchmethod").unwrap();

    assert_matches!(
        session.process(SessionData::new(), "mech1").await,
        Err(SignonError::MethodNotAvailable { .. })
    );
    assert_matches!(
        session.list_available_mechanisms(&["mech1".to_string()]).await,
        Err(SignonError::MethodNotAvailable { .. })
    );
    assert_matches!(
        session.last_error(),
        Some(SignonError::MethodNotAvailable { .. })
    );
    assert_eq!(daemon.calls().session_registrations, 1);
}

#[tokio::test]
async fn test_operation_errors_are_not_sticky() {
    init_test_tracing();
    let daemon = MockDaemon::new();
    let session = AuthSession::new(&client_for(&daemon), "ssotest").unwrap();

    assert_matches!(
        session.process(SessionData::new(), "mech9").await,
        Err(SignonError::MechanismNotAvailable { .. })
    );
    session.process(SessionData::new(), "mech2").await.unwrap();
    assert_eq!(session.last_error(), None);
}

#[tokio::test]
async fn test_identity_session_reply_carries_username() {
    init_test_tracing();
    let daemon = MockDaemon::new();
    let identity = Identity::new(&client_for(&daemon));
    identity.store(&identity_info("vera")).await.unwrap();
    let session = identity.create_session("ssotest").unwrap();

    let reply = session.process(SessionData::new(), "BLOB").await.unwrap();
    assert_eq!(reply[keys::USERNAME], "vera");
}

#[tokio::test]
async fn test_cancel_without_pending_process_is_noop() {
    init_test_tracing();
    let daemon = MockDaemon::new();
    let session = AuthSession::new(&client_for(&daemon), "ssotest").unwrap();

    session.cancel();
    session.process(SessionData::new(), "mech1").await.unwrap();
    assert_eq!(daemon.calls().cancel, 0);
}

#[tokio::test]
async fn test_cancel_dispatched_process() {
    init_test_tracing();
    let daemon = MockDaemon::new();
    let session = AuthSession::new(&client_for(&daemon), "ssotest").unwrap();
    let mut states = session.subscribe_state_changes();

    daemon.hold_process();
    let running = tokio::spawn({
        let session = session.clone();
        async move { session.process(SessionData::new(), "mech1").await }
    });

    let pending = states.recv().await.unwrap();
    assert_eq!(pending.state(), Some(AuthSessionState::ProcessPending));
    assert_eq!(pending.message, PROCESS_PENDING_MESSAGE);

    session.cancel();
    assert_matches!(
        running.await.unwrap(),
        Err(SignonError::SessionCanceled { .. })
    );
    settle_until(|| daemon.calls().cancel == 1).await;

    // the session is usable again
    daemon.release_process();
    session.process(SessionData::new(), "mech1").await.unwrap();
}

#[tokio::test]
async fn test_cancel_before_dispatch() {
    init_test_tracing();
    let daemon = MockDaemon::new();
    let session = AuthSession::new(&client_for(&daemon), "ssotest").unwrap();

    daemon.hold_registrations();
    let queued = tokio::spawn({
        let session = session.clone();
        async move { session.process(SessionData::new(), "mech1").await }
    });
    settle_until(|| daemon.calls().session_registrations == 1).await;

    session.cancel();
    assert_matches!(
        queued.await.unwrap(),
        Err(SignonError::SessionCanceled { .. })
    );
    // nothing to cancel remotely yet
    assert_eq!(daemon.calls().cancel, 0);

    daemon.release_registrations();
    session.process(SessionData::new(), "mech1").await.unwrap();
    assert_eq!(daemon.calls().process, 1);
    assert_eq!(daemon.calls().session_registrations, 1);
}

#[tokio::test]
async fn test_concurrent_process_rejected() {
    init_test_tracing();
    let daemon = MockDaemon::new();
    let session = AuthSession::new(&client_for(&daemon), "ssotest").unwrap();
    let mut states = session.subscribe_state_changes();

    daemon.hold_process();
    let first = tokio::spawn({
        let session = session.clone();
        async move { session.process(SessionData::new(), "mech1").await }
    });
    states.recv().await.unwrap();

    assert_matches!(
        session.process(SessionData::new(), "mech2").await,
        Err(SignonError::WrongState { .. })
    );
    assert_matches!(
        session.list_available_mechanisms(&[]).await,
        Err(SignonError::WrongState { .. })
    );

    daemon.release_process();
    first.await.unwrap().unwrap();
    assert_eq!(daemon.process_calls().len(), 1);
}

#[tokio::test]
async fn test_list_available_mechanisms() {
    init_test_tracing();
    let daemon = MockDaemon::new();
    let session = AuthSession::new(&client_for(&daemon), "ssotest").unwrap();

    let wanted = ["mech1", "mechX", "BLOB"].map(String::from);
    let available = session.list_available_mechanisms(&wanted).await.unwrap();
    assert_eq!(available, vec!["mech1".to_string(), "BLOB".to_string()]);
}

#[tokio::test]
async fn test_state_changes_reemitted_verbatim() {
    init_test_tracing();
    let daemon = MockDaemon::new();
    let session = AuthSession::new(&client_for(&daemon), "ssotest").unwrap();
    session.process(SessionData::new(), "mech1").await.unwrap();

    let mut states = session.subscribe_state_changes();
    daemon.emit_session_state("ssotest", AuthSessionState::SendingData.code(), "sending");
    daemon.emit_session_state("ssotest", 42, "plugin specific");

    assert_eq!(
        states.recv().await.unwrap(),
        StateChange::new(3, "sending")
    );
    let custom = states.recv().await.unwrap();
    assert_eq!(custom.code, 42);
    assert_eq!(custom.state(), None);
}

#[tokio::test]
async fn test_teardown_reregisters_with_same_method() {
    init_test_tracing();
    let daemon = MockDaemon::new();
    let session = AuthSession::new(&client_for(&daemon), "password").unwrap();
    session.process(SessionData::new(), "password").await.unwrap();
    assert_eq!(daemon.session_observers("password"), 1);

    daemon.emit_session_unregistered("password");
    assert_eq!(daemon.session_observers("password"), 0);

    session.process(SessionData::new(), "password").await.unwrap();
    assert_eq!(daemon.calls().session_registrations, 2);
    assert_eq!(daemon.session_observers("password"), 1);
}

#[tokio::test]
async fn test_dropping_session_disconnects_observer() {
    init_test_tracing();
    let daemon = MockDaemon::new();
    let session = AuthSession::new(&client_for(&daemon), "ssotest").unwrap();
    session.process(SessionData::new(), "mech1").await.unwrap();
    assert_eq!(daemon.session_observers("ssotest"), 1);

    drop(session);
    assert_eq!(daemon.session_observers("ssotest"), 0);
}

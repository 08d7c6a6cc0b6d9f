//! In-memory signon daemon
//!
//! [`MockDaemon`] implements [`DaemonConnection`] on top of a record table
//! and a method table. Tests use it to:
//! - hold registrations or `process` calls, to observe queued operations
//! - inject registration failures
//! - fire remote notifications (state changes, object teardown)
//! - count and inspect the calls the client made

use crate::hold::Hold;
use crate::mock_remote::{MockAuthSession, MockIdentity};
use async_trait::async_trait;
use parking_lot::Mutex;
use signon_client::daemon::{
    DaemonConnection, RemoteAuthSession, RemoteIdentity, RemoteIdentityState,
};
use signon_client::{IdentityInfo, Result, SecurityContext, SignonError};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

const OBJECT_PATH_PREFIX: &str = "/com/google/code/AccountsSSO/SingleSignOn";

/// One `process` call as the daemon saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCall {
    /// Identity id the session object was routed with
    pub identity_id: u32,
    /// Authentication method of the session
    pub method: String,
    /// Mechanism requested by the client
    pub mechanism: String,
}

/// Snapshot of the daemon call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `register_new_identity` requests
    pub new_identities: usize,
    /// `get_identity` requests
    pub identity_fetches: usize,
    /// `get_auth_session` requests
    pub session_registrations: usize,
    /// `get_info` calls on identity objects
    pub get_info: usize,
    /// `process` calls, including rejected and canceled ones
    pub process: usize,
    /// `cancel` calls on session objects
    pub cancel: usize,
}

impl CallCounts {
    /// Registration requests of any kind
    pub fn registrations(&self) -> usize {
        self.new_identities + self.identity_fetches + self.session_registrations
    }
}

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) new_identities: AtomicUsize,
    pub(crate) identity_fetches: AtomicUsize,
    pub(crate) session_registrations: AtomicUsize,
    pub(crate) get_info: AtomicUsize,
    pub(crate) process: AtomicUsize,
    pub(crate) cancel: AtomicUsize,
}

#[derive(Default)]
struct DaemonState {
    next_id: u32,
    next_object: u64,
    records: BTreeMap<u32, IdentityInfo>,
    methods: BTreeMap<String, Vec<String>>,
    identities: Vec<Weak<MockIdentity>>,
    sessions: Vec<Weak<MockAuthSession>>,
    failures: VecDeque<SignonError>,
    contexts: Vec<SecurityContext>,
}

/// State shared between the daemon handle and the objects it hands out
pub(crate) struct DaemonShared {
    state: Mutex<DaemonState>,
    pub(crate) registration_hold: Hold,
    pub(crate) process_hold: Hold,
    pub(crate) counters: Counters,
    pub(crate) set_id_calls: Mutex<Vec<u32>>,
    pub(crate) processed: Mutex<Vec<ProcessCall>>,
    /// Tear the next identity object down as soon as an observer connects
    pub(crate) unregister_on_connect: AtomicBool,
}

impl DaemonShared {
    pub(crate) fn allocate_id(&self) -> u32 {
        let mut state = self.state.lock();
        state.next_id += 1;
        state.next_id
    }

    pub(crate) fn put_record(&self, info: IdentityInfo) {
        self.state.lock().records.insert(info.id, info);
    }

    pub(crate) fn record(&self, id: u32) -> Option<IdentityInfo> {
        self.state.lock().records.get(&id).cloned()
    }

    /// The record as returned to clients, without its secret
    pub(crate) fn public_record(&self, id: u32) -> Option<IdentityInfo> {
        self.record(id).map(|info| IdentityInfo {
            secret: None,
            ..info
        })
    }

    pub(crate) fn remove_record(&self, id: u32) -> bool {
        self.state.lock().records.remove(&id).is_some()
    }

    pub(crate) fn mechanisms(&self, method: &str) -> Option<Vec<String>> {
        self.state.lock().methods.get(method).cloned()
    }

    fn live_identities(&self, id: u32) -> Vec<Arc<MockIdentity>> {
        let mut state = self.state.lock();
        state.identities.retain(|weak| weak.strong_count() > 0);
        state
            .identities
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|identity| identity.id() == id)
            .collect()
    }

    fn live_sessions(&self, method: &str) -> Vec<Arc<MockAuthSession>> {
        let mut state = self.state.lock();
        state.sessions.retain(|weak| weak.strong_count() > 0);
        state
            .sessions
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|session| session.method() == method)
            .collect()
    }

    /// Notify every object serving record `id`
    pub(crate) fn broadcast_identity_state(&self, id: u32, state: RemoteIdentityState) {
        for identity in self.live_identities(id) {
            identity.notify_state(state);
        }
    }

    fn object_path(&self, kind: &str) -> String {
        let mut state = self.state.lock();
        state.next_object += 1;
        format!("{}/{}_{}", OBJECT_PATH_PREFIX, kind, state.next_object)
    }

    fn take_failure(&self) -> Result<()> {
        match self.state.lock().failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// In-memory daemon. Clones share state.
#[derive(Clone)]
pub struct MockDaemon {
    shared: Arc<DaemonShared>,
}

impl MockDaemon {
    /// Daemon with the `ssotest` and `password` methods installed
    pub fn new() -> Self {
        let daemon = Self::empty();
        daemon.add_method("ssotest", &["mech1", "mech2", "mech3", "BLOB"]);
        daemon.add_method("password", &["password"]);
        daemon
    }

    /// Daemon with no methods installed
    pub fn empty() -> Self {
        Self {
            shared: Arc::new(DaemonShared {
                state: Mutex::new(DaemonState::default()),
                registration_hold: Hold::new(),
                process_hold: Hold::new(),
                counters: Counters::default(),
                set_id_calls: Mutex::new(Vec::new()),
                processed: Mutex::new(Vec::new()),
                unregister_on_connect: AtomicBool::new(false),
            }),
        }
    }

    /// Install `method` offering `mechanisms`
    pub fn add_method(&self, method: &str, mechanisms: &[&str]) {
        self.shared.state.lock().methods.insert(
            method.to_string(),
            mechanisms.iter().map(|m| m.to_string()).collect(),
        );
    }

    /// Store a record directly, returning its id
    pub fn insert_identity(&self, info: IdentityInfo) -> u32 {
        let id = self.shared.allocate_id();
        self.shared.put_record(info.with_id(id));
        id
    }

    /// Stored record `id`, secret included
    pub fn stored(&self, id: u32) -> Option<IdentityInfo> {
        self.shared.record(id)
    }

    /// Fail the next registration request with `err`
    pub fn fail_next_registration(&self, err: SignonError) {
        self.shared.state.lock().failures.push_back(err);
    }

    /// Destroy the next identity object right after the client connects
    /// to it, before its registration answer reaches the client
    pub fn unregister_next_identity_on_connect(&self) {
        self.shared
            .unregister_on_connect
            .store(true, Ordering::SeqCst);
    }

    /// Park registration requests until [`MockDaemon::release_registrations`]
    pub fn hold_registrations(&self) {
        self.shared.registration_hold.close();
    }

    /// Let held and future registration requests through
    pub fn release_registrations(&self) {
        self.shared.registration_hold.open();
    }

    /// Park `process` calls until [`MockDaemon::release_process`]
    pub fn hold_process(&self) {
        self.shared.process_hold.close();
    }

    /// Let held and future `process` calls through
    pub fn release_process(&self) {
        self.shared.process_hold.open();
    }

    /// Current call counters
    pub fn calls(&self) -> CallCounts {
        let counters = &self.shared.counters;
        CallCounts {
            new_identities: counters.new_identities.load(Ordering::SeqCst),
            identity_fetches: counters.identity_fetches.load(Ordering::SeqCst),
            session_registrations: counters.session_registrations.load(Ordering::SeqCst),
            get_info: counters.get_info.load(Ordering::SeqCst),
            process: counters.process.load(Ordering::SeqCst),
            cancel: counters.cancel.load(Ordering::SeqCst),
        }
    }

    /// Ids passed to `set_id`, in call order
    pub fn set_id_calls(&self) -> Vec<u32> {
        self.shared.set_id_calls.lock().clone()
    }

    /// Completed `process` calls, in call order
    pub fn process_calls(&self) -> Vec<ProcessCall> {
        self.shared.processed.lock().clone()
    }

    /// Security contexts sent with registration requests
    pub fn contexts(&self) -> Vec<SecurityContext> {
        self.shared.state.lock().contexts.clone()
    }

    /// Observers connected to live objects serving record `id`
    pub fn identity_observers(&self, id: u32) -> usize {
        self.shared
            .live_identities(id)
            .iter()
            .map(|identity| identity.observers.len())
            .sum()
    }

    /// Observers connected to live session objects for `method`
    pub fn session_observers(&self, method: &str) -> usize {
        self.shared
            .live_sessions(method)
            .iter()
            .map(|session| session.observers.len())
            .sum()
    }

    /// Report a state change on every object serving record `id`
    pub fn emit_identity_state(&self, id: u32, state: RemoteIdentityState) {
        debug!(identity_id = id, ?state, "Emitting identity state");
        self.shared.broadcast_identity_state(id, state);
    }

    /// Destroy every object serving record `id`
    pub fn emit_identity_unregistered(&self, id: u32) {
        debug!(identity_id = id, "Unregistering identity objects");
        for identity in self.shared.live_identities(id) {
            identity.notify_unregistered();
        }
    }

    /// Report a state change on every session object for `method`
    pub fn emit_session_state(&self, method: &str, state: i32, message: &str) {
        for session in self.shared.live_sessions(method) {
            session.notify_state(state, message);
        }
    }

    /// Destroy every session object for `method`
    pub fn emit_session_unregistered(&self, method: &str) {
        debug!(method, "Unregistering session objects");
        for session in self.shared.live_sessions(method) {
            session.notify_unregistered();
        }
    }

    async fn admit(&self, counter: &AtomicUsize, context: &SecurityContext) -> Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        self.shared.state.lock().contexts.push(context.clone());
        self.shared.registration_hold.pass().await;
        self.shared.take_failure()
    }

    fn new_identity_object(&self, id: u32) -> Arc<MockIdentity> {
        let path = self.shared.object_path("Identity");
        let identity = Arc::new(MockIdentity::new(self.shared.clone(), id, path));
        self.shared
            .state
            .lock()
            .identities
            .push(Arc::downgrade(&identity));
        identity
    }
}

impl Default for MockDaemon {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DaemonConnection for MockDaemon {
    async fn register_new_identity(
        &self,
        context: &SecurityContext,
    ) -> Result<Arc<dyn RemoteIdentity>> {
        self.admit(&self.shared.counters.new_identities, context)
            .await?;
        Ok(self.new_identity_object(0))
    }

    async fn get_identity(
        &self,
        id: u32,
        context: &SecurityContext,
    ) -> Result<(Arc<dyn RemoteIdentity>, IdentityInfo)> {
        self.admit(&self.shared.counters.identity_fetches, context)
            .await?;
        let info = self
            .shared
            .public_record(id)
            .ok_or_else(|| SignonError::not_found(format!("Identity {} not found", id)))?;
        let identity: Arc<dyn RemoteIdentity> = self.new_identity_object(id);
        Ok((identity, info))
    }

    async fn get_auth_session(
        &self,
        identity_id: u32,
        context: &SecurityContext,
        method: &str,
    ) -> Result<Arc<dyn RemoteAuthSession>> {
        self.admit(&self.shared.counters.session_registrations, context)
            .await?;
        if self.shared.mechanisms(method).is_none() {
            return Err(SignonError::method_not_available(format!(
                "Method {} is not installed",
                method
            )));
        }

        let path = self.shared.object_path("AuthSession");
        let session = Arc::new(MockAuthSession::new(
            self.shared.clone(),
            identity_id,
            method,
            path,
        ));
        self.shared
            .state
            .lock()
            .sessions
            .push(Arc::downgrade(&session));
        Ok(session)
    }

    async fn query_methods(&self) -> Result<Vec<String>> {
        Ok(self.shared.state.lock().methods.keys().cloned().collect())
    }

    async fn query_mechanisms(&self, method: &str) -> Result<Vec<String>> {
        self.shared.mechanisms(method).ok_or_else(|| {
            SignonError::method_not_available(format!("Method {} is not installed", method))
        })
    }
}

//! In-memory remote identity and session objects handed out by
//! [`MockDaemon`](crate::MockDaemon)

use crate::mock_daemon::{DaemonShared, ProcessCall};
use async_trait::async_trait;
use parking_lot::Mutex;
use signon_client::daemon::{
    IdentityObserver, ObserverId, RemoteAuthSession, RemoteIdentity, RemoteIdentityState,
    SessionObserver,
};
use signon_client::{keys, IdentityInfo, Result, SessionData, SignonError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Observers connected to one remote object
pub(crate) struct Observers<O: ?Sized> {
    next: AtomicU64,
    list: Mutex<Vec<(ObserverId, Arc<O>)>>,
}

impl<O: ?Sized> Observers<O> {
    fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            list: Mutex::new(Vec::new()),
        }
    }

    fn connect(&self, observer: Arc<O>) -> ObserverId {
        let id = ObserverId(self.next.fetch_add(1, Ordering::Relaxed));
        self.list.lock().push((id, observer));
        id
    }

    fn disconnect(&self, id: ObserverId) {
        self.list.lock().retain(|(connected, _)| *connected != id);
    }

    /// Copy of the observer list, so callbacks run without the lock
    pub(crate) fn snapshot(&self) -> Vec<Arc<O>> {
        self.list.lock().iter().map(|(_, o)| o.clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.list.lock().len()
    }
}

/// Remote identity object backed by the mock daemon's record table
pub struct MockIdentity {
    daemon: Arc<DaemonShared>,
    id: Mutex<u32>,
    path: String,
    pub(crate) observers: Observers<dyn IdentityObserver>,
}

impl MockIdentity {
    pub(crate) fn new(daemon: Arc<DaemonShared>, id: u32, path: String) -> Self {
        Self {
            daemon,
            id: Mutex::new(id),
            path,
            observers: Observers::new(),
        }
    }

    /// Record id this object serves, 0 before the first store
    pub fn id(&self) -> u32 {
        *self.id.lock()
    }

    pub(crate) fn notify_state(&self, state: RemoteIdentityState) {
        for observer in self.observers.snapshot() {
            observer.state_changed(state);
        }
    }

    pub(crate) fn notify_unregistered(&self) {
        for observer in self.observers.snapshot() {
            observer.unregistered();
        }
    }

    fn stored_id(&self) -> Result<u32> {
        match self.id() {
            0 => Err(SignonError::not_found("Identity has not been stored")),
            id => Ok(id),
        }
    }
}

#[async_trait]
impl RemoteIdentity for MockIdentity {
    fn object_path(&self) -> String {
        self.path.clone()
    }

    fn connect(&self, observer: Arc<dyn IdentityObserver>) -> ObserverId {
        let id = self.observers.connect(observer.clone());
        if self.daemon.unregister_on_connect.swap(false, Ordering::SeqCst) {
            debug!(path = %self.path, "Unregistering identity object on connect");
            observer.unregistered();
        }
        id
    }

    fn disconnect(&self, id: ObserverId) {
        self.observers.disconnect(id);
    }

    async fn store(&self, info: &IdentityInfo) -> Result<u32> {
        let id = {
            let mut id = self.id.lock();
            if *id == 0 {
                *id = self.daemon.allocate_id();
            }
            *id
        };
        self.daemon.put_record(info.with_id(id));
        Ok(id)
    }

    async fn get_info(&self) -> Result<IdentityInfo> {
        self.daemon.counters.get_info.fetch_add(1, Ordering::SeqCst);
        let id = self.stored_id()?;
        self.daemon
            .public_record(id)
            .ok_or_else(|| SignonError::not_found(format!("Identity {} not found", id)))
    }

    async fn verify_secret(&self, secret: &str) -> Result<bool> {
        let id = self.stored_id()?;
        let record = self
            .daemon
            .record(id)
            .ok_or_else(|| SignonError::not_found(format!("Identity {} not found", id)))?;
        Ok(record.secret.as_deref() == Some(secret))
    }

    async fn remove(&self) -> Result<()> {
        let id = self.stored_id()?;
        if !self.daemon.remove_record(id) {
            return Err(SignonError::not_found(format!("Identity {} not found", id)));
        }
        self.daemon.broadcast_identity_state(id, RemoteIdentityState::Removed);
        Ok(())
    }

    async fn sign_out(&self) -> Result<bool> {
        match self.id() {
            0 => self.notify_state(RemoteIdentityState::SignedOut),
            id => self
                .daemon
                .broadcast_identity_state(id, RemoteIdentityState::SignedOut),
        }
        Ok(true)
    }
}

/// Remote authentication session object
pub struct MockAuthSession {
    daemon: Arc<DaemonShared>,
    id: Mutex<u32>,
    method: String,
    path: String,
    pub(crate) observers: Observers<dyn SessionObserver>,
}

impl MockAuthSession {
    pub(crate) fn new(daemon: Arc<DaemonShared>, id: u32, method: &str, path: String) -> Self {
        Self {
            daemon,
            id: Mutex::new(id),
            method: method.to_string(),
            path,
            observers: Observers::new(),
        }
    }

    /// Identity id requests are routed with
    pub fn id(&self) -> u32 {
        *self.id.lock()
    }

    /// Authentication method this object serves
    pub fn method(&self) -> &str {
        &self.method
    }

    pub(crate) fn notify_state(&self, state: i32, message: &str) {
        for observer in self.observers.snapshot() {
            observer.state_changed(state, message);
        }
    }

    pub(crate) fn notify_unregistered(&self) {
        for observer in self.observers.snapshot() {
            observer.unregistered();
        }
    }
}

#[async_trait]
impl RemoteAuthSession for MockAuthSession {
    fn object_path(&self) -> String {
        self.path.clone()
    }

    fn connect(&self, observer: Arc<dyn SessionObserver>) -> ObserverId {
        self.observers.connect(observer)
    }

    fn disconnect(&self, id: ObserverId) {
        self.observers.disconnect(id);
    }

    async fn set_id(&self, id: u32) -> Result<()> {
        self.daemon.set_id_calls.lock().push(id);
        *self.id.lock() = id;
        Ok(())
    }

    async fn process(&self, data: SessionData, mechanism: &str) -> Result<SessionData> {
        self.daemon.counters.process.fetch_add(1, Ordering::SeqCst);
        self.daemon.process_hold.pass().await;

        let mechanisms = self.daemon.mechanisms(&self.method).unwrap_or_default();
        if !mechanisms.iter().any(|m| m == mechanism) {
            return Err(SignonError::mechanism_not_available(format!(
                "{} does not offer {}",
                self.method, mechanism
            )));
        }

        let identity_id = self.id();
        self.daemon.processed.lock().push(ProcessCall {
            identity_id,
            method: self.method.clone(),
            mechanism: mechanism.to_string(),
        });

        let mut reply = data;
        if identity_id > 0 {
            if let Some(record) = self.daemon.record(identity_id) {
                reply.insert(
                    keys::USERNAME.to_string(),
                    serde_json::Value::from(record.username),
                );
            }
        }
        Ok(reply)
    }

    async fn cancel(&self) {
        self.daemon.counters.cancel.fetch_add(1, Ordering::SeqCst);
    }

    async fn query_available_mechanisms(&self, wanted: &[String]) -> Result<Vec<String>> {
        let offered = self.daemon.mechanisms(&self.method).unwrap_or_default();
        Ok(wanted
            .iter()
            .filter(|m| offered.contains(m))
            .cloned()
            .collect())
    }
}

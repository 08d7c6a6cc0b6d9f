//! Authentication session handles
//!
//! A session runs authentication steps for one method, either on behalf of
//! an identity or standalone (identity id 0). At most one operation runs at
//! a time; [`AuthSession::cancel`] makes the running one resolve with
//! [`SignonError::SessionCanceled`].

use crate::client::SignonClient;
use crate::daemon::{ObserverId, RemoteAuthSession, SessionObserver};
use crate::errors::{Result, SignonError};
use crate::identity::IdentityInner;
use crate::readiness::{self, ReadinessGate, Registrar, RemoteBinding};
use crate::runtime::{self, Cancellable, TaskSpawner};
use crate::types::{AuthSessionState, SecurityContext, SessionData, StateChange};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, oneshot};
use tracing::debug;

static NEXT_SESSION_KEY: AtomicU64 = AtomicU64::new(1);

/// Message sent with the `ProcessPending` state when a request is dispatched
pub const PROCESS_PENDING_MESSAGE: &str = "The request is added to queue.";

#[derive(Clone)]
pub(crate) struct SessionBinding {
    remote: Arc<dyn RemoteAuthSession>,
    observer: ObserverId,
    /// Identity id the remote object currently serves
    routed_id: Arc<AtomicU32>,
}

impl RemoteBinding for SessionBinding {
    fn detach(&self) {
        self.remote.disconnect(self.observer);
    }
}

#[derive(Default)]
struct SessionState {
    id: u32,
    busy: bool,
    canceled: bool,
    destroyed: bool,
    cancel_tx: Option<oneshot::Sender<()>>,
}

pub(crate) struct SessionInner {
    key: u64,
    client: SignonClient,
    context: SecurityContext,
    method: String,
    gate: ReadinessGate<SessionBinding>,
    token: Cancellable,
    state: Mutex<SessionState>,
    /// Owning identity, kept alive for as long as this session
    parent: Mutex<Option<Arc<IdentityInner>>>,
    events_tx: broadcast::Sender<StateChange>,
}

/// Handle to an authentication session.
///
/// Clones refer to the same session.
#[derive(Clone)]
pub struct AuthSession(Arc<SessionInner>);

impl AuthSession {
    /// Standalone session for `method`, not tied to a stored identity
    pub fn new(client: &SignonClient, method: &str) -> Result<Self> {
        if method.is_empty() {
            return Err(SignonError::method_not_available("Method name is empty"));
        }
        Ok(Self::create(client, None, 0, method))
    }

    pub(crate) fn create(
        client: &SignonClient,
        parent: Option<Arc<IdentityInner>>,
        id: u32,
        method: &str,
    ) -> Self {
        let config = client.config();
        let context = parent
            .as_ref()
            .map(|identity| identity.context().clone())
            .unwrap_or_else(|| config.security_context.clone());
        let (events_tx, _) = broadcast::channel(config.event_buffer);

        Self(Arc::new(SessionInner {
            key: NEXT_SESSION_KEY.fetch_add(1, Ordering::Relaxed),
            client: client.clone(),
            context,
            method: method.to_string(),
            gate: ReadinessGate::new(config.transient_retries),
            token: Cancellable::new(),
            state: Mutex::new(SessionState {
                id,
                ..SessionState::default()
            }),
            parent: Mutex::new(parent),
            events_tx,
        }))
    }

    pub(crate) fn key(&self) -> u64 {
        self.0.key
    }

    pub(crate) fn downgrade(&self) -> Weak<SessionInner> {
        Arc::downgrade(&self.0)
    }

    /// Identity id requests are routed with
    pub fn id(&self) -> u32 {
        self.0.id()
    }

    pub fn method(&self) -> &str {
        &self.0.method
    }

    /// Whether the session was destroyed by its identity signing out
    pub fn is_destroyed(&self) -> bool {
        self.0.state.lock().destroyed
    }

    /// Sticky registration error, if registration failed
    pub fn last_error(&self) -> Option<SignonError> {
        self.0.gate.last_error()
    }

    /// Receive the state changes the daemon reports for this session
    pub fn subscribe_state_changes(&self) -> broadcast::Receiver<StateChange> {
        self.0.events_tx.subscribe()
    }

    /// Run one authentication step with `mechanism`
    pub async fn process(&self, data: SessionData, mechanism: &str) -> Result<SessionData> {
        let inner = &self.0;
        let canceled = inner.begin()?;
        let _busy = BusyGuard(inner);

        inner
            .cancelable(canceled, async {
                let binding = readiness::when_ready(inner).await?;
                inner.route(&binding).await?;
                inner.emit(StateChange::new(
                    AuthSessionState::ProcessPending.code(),
                    PROCESS_PENDING_MESSAGE,
                ));
                debug!(
                    identity_id = binding.routed_id.load(Ordering::SeqCst),
                    method = %inner.method,
                    mechanism,
                    "Dispatching process request"
                );
                binding.remote.process(data, mechanism).await
            })
            .await
    }

    /// Subset of `wanted` the session's method supports
    pub async fn list_available_mechanisms(&self, wanted: &[String]) -> Result<Vec<String>> {
        let inner = &self.0;
        let canceled = inner.begin()?;
        let _busy = BusyGuard(inner);

        inner
            .cancelable(canceled, async {
                let binding = readiness::when_ready(inner).await?;
                inner.route(&binding).await?;
                binding.remote.query_available_mechanisms(wanted).await
            })
            .await
    }

    /// Cancel the running operation, if any.
    ///
    /// The operation resolves with [`SignonError::SessionCanceled`] whatever
    /// the daemon answers to the cancel request.
    pub fn cancel(&self) {
        let inner = &self.0;
        let sender = {
            let mut state = inner.state.lock();
            if !state.busy || state.canceled {
                return;
            }
            state.canceled = true;
            state.cancel_tx.take()
        };

        debug!(method = %inner.method, "Canceling authentication session");
        if let Some(tx) = sender {
            let _ = tx.send(());
        }
        if let Some(binding) = inner.gate.binding() {
            inner.client.spawner().spawn(Box::pin(async move {
                binding.remote.cancel().await;
            }));
        }
    }

    pub fn process_blocking(&self, data: SessionData, mechanism: &str) -> Result<SessionData> {
        runtime::block_on(self.process(data, mechanism))
    }

    pub fn list_available_mechanisms_blocking(&self, wanted: &[String]) -> Result<Vec<String>> {
        runtime::block_on(self.list_available_mechanisms(wanted))
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.lock();
        f.debug_struct("AuthSession")
            .field("id", &state.id)
            .field("method", &self.0.method)
            .field("busy", &state.busy)
            .field("destroyed", &state.destroyed)
            .finish_non_exhaustive()
    }
}

/// Clears the busy state when an operation finishes or is dropped
struct BusyGuard<'a>(&'a SessionInner);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        state.busy = false;
        state.canceled = false;
        state.cancel_tx = None;
    }
}

impl SessionInner {
    pub(crate) fn id(&self) -> u32 {
        self.state.lock().id
    }

    /// Re-route to the identity's newly assigned id
    pub(crate) fn set_id(&self, id: u32) {
        debug!(method = %self.method, identity_id = id, "Session bound to stored identity");
        self.state.lock().id = id;
    }

    /// Tear the session down on behalf of its identity
    pub(crate) fn destroy(&self) {
        self.state.lock().destroyed = true;
        if let Some(binding) = self.gate.reset_with(destroyed_error()) {
            binding.detach();
        }
        let parent = self.parent.lock().take();
        if let Some(parent) = parent {
            parent.forget_session(self.key);
        }
        debug!(method = %self.method, "Authentication session destroyed");
    }

    fn begin(&self) -> Result<oneshot::Receiver<()>> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(destroyed_error());
        }
        if state.busy {
            return Err(SignonError::wrong_state(
                "Authentication session is busy processing a request",
            ));
        }
        let (tx, rx) = oneshot::channel();
        state.busy = true;
        state.canceled = false;
        state.cancel_tx = Some(tx);
        Ok(rx)
    }

    async fn cancelable<T, F>(&self, canceled: oneshot::Receiver<()>, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            Ok(()) = canceled => {
                debug!(method = %self.method, "Request canceled");
                Err(SignonError::session_canceled("Authentication session was canceled"))
            }
            result = work => result,
        }
    }

    async fn route(&self, binding: &SessionBinding) -> Result<()> {
        let id = self.id();
        if binding.routed_id.load(Ordering::SeqCst) != id {
            binding.remote.set_id(id).await?;
            binding.routed_id.store(id, Ordering::SeqCst);
        }
        Ok(())
    }

    fn emit(&self, change: StateChange) {
        // no subscribers is fine
        let _ = self.events_tx.send(change);
    }

    fn torn_down(&self) {
        debug!(method = %self.method, "Remote session destroyed, resetting");
        if let Some(binding) = self.gate.reset() {
            binding.detach();
        }
    }
}

fn destroyed_error() -> SignonError {
    SignonError::wrong_state("Authentication session has been destroyed")
}

impl Registrar for SessionInner {
    type Binding = SessionBinding;

    fn gate(&self) -> &ReadinessGate<SessionBinding> {
        &self.gate
    }

    fn spawner(&self) -> &Arc<dyn TaskSpawner> {
        self.client.spawner()
    }

    fn cancellable(&self) -> &Cancellable {
        &self.token
    }

    fn describe(&self) -> String {
        format!("session {}/{}", self.id(), self.method)
    }

    fn register(self: &Arc<Self>, _generation: u64) -> BoxFuture<'static, Result<SessionBinding>> {
        let connection = self.client.connection().clone();
        let context = self.context.clone();
        let method = self.method.clone();
        let id = self.id();
        let owner = Arc::downgrade(self);

        Box::pin(async move {
            let remote = connection.get_auth_session(id, &context, &method).await?;
            debug!(identity_id = id, %method, path = %remote.object_path(), "Remote session registered");

            let owner = owner.upgrade().ok_or(SignonError::Cancelled)?;
            let observer = remote.connect(Arc::new(SessionEvents {
                owner: Arc::downgrade(&owner),
            }));
            Ok(SessionBinding {
                remote,
                observer,
                routed_id: Arc::new(AtomicU32::new(id)),
            })
        })
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(binding) = self.gate.binding() {
            binding.detach();
        }
        if let Some(parent) = self.parent.get_mut().take() {
            parent.forget_session(self.key);
        }
    }
}

struct SessionEvents {
    owner: Weak<SessionInner>,
}

impl SessionObserver for SessionEvents {
    fn state_changed(&self, state: i32, message: &str) {
        if let Some(owner) = self.owner.upgrade() {
            owner.emit(StateChange::new(state, message));
        }
    }

    fn unregistered(&self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.torn_down();
        }
    }
}

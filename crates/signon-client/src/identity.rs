//! Identity handles
//!
//! An [`Identity`] is a local handle to a credential record stored by the
//! daemon. It is registered lazily on its first operation: a new identity
//! asks the daemon for a fresh remote object, one loaded with
//! [`Identity::from_db`] fetches the object together with its record.
//!
//! Sessions created from an identity keep it alive; the identity only keeps
//! non-owning references to them. It uses those to re-route the sessions
//! when it is first stored and to destroy them on sign-out.

use crate::auth_session::{AuthSession, SessionInner};
use crate::client::SignonClient;
use crate::daemon::{IdentityObserver, ObserverId, RemoteIdentity, RemoteIdentityState};
use crate::errors::{Result, SignonError};
use crate::readiness::{self, ReadinessGate, Registrar, RemoteBinding};
use crate::runtime::{self, Cancellable, TaskSpawner};
use crate::types::{IdentityInfo, SecurityContext};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Bound remote identity object
#[derive(Clone)]
pub(crate) struct IdentityBinding {
    pub(crate) remote: Arc<dyn RemoteIdentity>,
    observer: ObserverId,
}

impl RemoteBinding for IdentityBinding {
    fn detach(&self) {
        self.remote.disconnect(self.observer);
    }
}

struct SessionEntry {
    key: u64,
    method: String,
    session: Weak<SessionInner>,
}

#[derive(Default)]
struct IdentityState {
    id: u32,
    removed: bool,
    signed_out: bool,
    /// The cached record reflects the daemon's copy
    updated: bool,
    info: Option<IdentityInfo>,
    sessions: Vec<SessionEntry>,
}

pub(crate) struct IdentityInner {
    client: SignonClient,
    context: SecurityContext,
    gate: ReadinessGate<IdentityBinding>,
    token: Cancellable,
    state: Mutex<IdentityState>,
    signed_out_tx: broadcast::Sender<()>,
}

/// Handle to a stored (or to-be-stored) credential record.
///
/// Clones refer to the same handle.
#[derive(Clone)]
pub struct Identity(Arc<IdentityInner>);

impl Identity {
    /// Handle for a new identity; it gets an id when first stored
    pub fn new(client: &SignonClient) -> Self {
        Self::new_with_context(client, client.security_context().clone())
    }

    /// Like [`Identity::new`], registering with an explicit security context
    pub fn new_with_context(client: &SignonClient, context: SecurityContext) -> Self {
        Self::build(client, context, 0)
    }

    /// Handle for the stored identity `id`
    pub fn from_db(client: &SignonClient, id: u32) -> Result<Self> {
        Self::from_db_with_context(client, id, client.security_context().clone())
    }

    pub fn from_db_with_context(
        client: &SignonClient,
        id: u32,
        context: SecurityContext,
    ) -> Result<Self> {
        if id == 0 {
            return Err(SignonError::not_found("Identity id 0 does not refer to a stored record"));
        }
        Ok(Self::build(client, context, id))
    }

    fn build(client: &SignonClient, context: SecurityContext, id: u32) -> Self {
        let config = client.config();
        let (signed_out_tx, _) = broadcast::channel(config.event_buffer);
        Self(Arc::new(IdentityInner {
            client: client.clone(),
            context,
            gate: ReadinessGate::new(config.transient_retries),
            token: Cancellable::new(),
            state: Mutex::new(IdentityState {
                id,
                ..IdentityState::default()
            }),
            signed_out_tx,
        }))
    }

    /// Daemon-assigned id, 0 while the identity has never been stored or
    /// after it was removed
    pub fn id(&self) -> u32 {
        self.0.state.lock().id
    }

    /// Sticky registration error, if registration failed
    pub fn last_error(&self) -> Option<SignonError> {
        self.0.gate.last_error()
    }

    pub fn is_removed(&self) -> bool {
        self.0.state.lock().removed
    }

    /// Receive a notification each time the identity is signed out
    pub fn subscribe_signed_out(&self) -> broadcast::Receiver<()> {
        self.0.signed_out_tx.subscribe()
    }

    /// Persist `info`, returning the id the daemon assigned
    pub async fn store(&self, info: &IdentityInfo) -> Result<u32> {
        let inner = &self.0;
        let binding = readiness::when_ready(inner).await?;
        if inner.state.lock().removed {
            return Err(SignonError::not_found("Identity has been removed"));
        }

        let id = binding.remote.store(info).await?;
        inner.stored(id, info);
        Ok(id)
    }

    /// The identity's record, from cache when it is current
    pub async fn query_info(&self) -> Result<IdentityInfo> {
        let inner = &self.0;
        let ready = readiness::when_ready(inner).await;
        if inner.state.lock().removed {
            return Err(SignonError::not_found("Identity has been removed"));
        }
        let binding = ready?;

        {
            let state = inner.state.lock();
            if state.id == 0 {
                return Err(SignonError::not_found("Identity has not been stored yet"));
            }
            if state.updated {
                if let Some(info) = &state.info {
                    return Ok(info.clone());
                }
            }
        }

        let info = binding.remote.get_info().await?;
        let mut state = inner.state.lock();
        state.info = Some(info.clone());
        state.updated = true;
        Ok(info)
    }

    /// Ask the daemon whether `secret` matches the stored one
    pub async fn verify_secret(&self, secret: &str) -> Result<bool> {
        let binding = self.ready_and_present().await?;
        binding.remote.verify_secret(secret).await
    }

    /// Delete the stored record
    pub async fn remove(&self) -> Result<()> {
        let binding = self.ready_and_present().await?;
        binding.remote.remove().await?;
        self.0.mark_removed();
        Ok(())
    }

    /// Invalidate every session of this identity, locally and in the daemon
    pub async fn sign_out(&self) -> Result<()> {
        let binding = readiness::when_ready(&self.0).await?;
        // the daemon's answer carries no information beyond success
        let _ = binding.remote.sign_out().await?;
        self.0.signed_out();
        Ok(())
    }

    /// Open an authentication session for `method` on this identity.
    ///
    /// Only one live session per method is allowed.
    pub fn create_session(&self, method: &str) -> Result<AuthSession> {
        let inner = &self.0;
        if method.is_empty() {
            return Err(SignonError::method_not_available("Method name is empty"));
        }

        let mut state = inner.state.lock();
        state.sessions.retain(|entry| entry.session.strong_count() > 0);
        if state.sessions.iter().any(|entry| entry.method == method) {
            return Err(SignonError::method_not_available(format!(
                "Authentication session for {} already requested",
                method
            )));
        }

        let session = AuthSession::create(&inner.client, Some(inner.clone()), state.id, method);
        state.sessions.push(SessionEntry {
            key: session.key(),
            method: method.to_string(),
            session: session.downgrade(),
        });
        state.signed_out = false;
        debug!(identity_id = state.id, method, "Created authentication session");
        Ok(session)
    }

    pub fn store_blocking(&self, info: &IdentityInfo) -> Result<u32> {
        runtime::block_on(self.store(info))
    }

    pub fn query_info_blocking(&self) -> Result<IdentityInfo> {
        runtime::block_on(self.query_info())
    }

    pub fn verify_secret_blocking(&self, secret: &str) -> Result<bool> {
        runtime::block_on(self.verify_secret(secret))
    }

    pub fn remove_blocking(&self) -> Result<()> {
        runtime::block_on(self.remove())
    }

    pub fn sign_out_blocking(&self) -> Result<()> {
        runtime::block_on(self.sign_out())
    }

    async fn ready_and_present(&self) -> Result<IdentityBinding> {
        let binding = readiness::when_ready(&self.0).await?;
        if self.0.state.lock().removed {
            return Err(SignonError::not_found("Identity has been removed"));
        }
        Ok(binding)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.lock();
        f.debug_struct("Identity")
            .field("id", &state.id)
            .field("removed", &state.removed)
            .field("sessions", &state.sessions.len())
            .finish_non_exhaustive()
    }
}

impl IdentityInner {
    fn stored(&self, id: u32, info: &IdentityInfo) {
        let sessions = {
            let mut state = self.state.lock();
            let changed = state.id != id;
            if state.id != 0 && changed {
                warn!(old = state.id, new = id, "Daemon reassigned identity id");
            }
            state.id = id;
            state.removed = false;
            state.info = Some(info.with_id(id));
            state.updated = true;
            if changed {
                live_sessions(&state)
            } else {
                Vec::new()
            }
        };

        for session in sessions {
            session.set_id(id);
        }
    }

    fn mark_removed(&self) {
        let mut state = self.state.lock();
        state.removed = true;
        state.info = None;
        state.updated = false;
        state.id = 0;
        debug!("Identity removed");
    }

    /// Destroy the owned sessions and notify subscribers, once per sign-out
    fn signed_out(&self) {
        let sessions = {
            let mut state = self.state.lock();
            if state.signed_out {
                return;
            }
            state.signed_out = true;
            let sessions = live_sessions(&state);
            state.sessions.clear();
            sessions
        };

        debug!(sessions = sessions.len(), "Identity signed out");
        for session in sessions {
            session.destroy();
        }
        let _ = self.signed_out_tx.send(());
    }

    fn torn_down(&self) {
        debug!(handle = %self.describe(), "Remote identity destroyed, resetting");
        if let Some(binding) = self.gate.reset() {
            binding.detach();
        }
        let mut state = self.state.lock();
        state.info = None;
        state.removed = false;
        state.signed_out = false;
        state.updated = false;
    }

    /// Drop the registry entry of a session that is going away
    pub(crate) fn forget_session(&self, key: u64) {
        self.state.lock().sessions.retain(|entry| entry.key != key);
    }

    pub(crate) fn id(&self) -> u32 {
        self.state.lock().id
    }

    pub(crate) fn context(&self) -> &SecurityContext {
        &self.context
    }
}

fn live_sessions(state: &IdentityState) -> Vec<Arc<SessionInner>> {
    state
        .sessions
        .iter()
        .filter_map(|entry| entry.session.upgrade())
        .collect()
}

impl Registrar for IdentityInner {
    type Binding = IdentityBinding;

    fn gate(&self) -> &ReadinessGate<IdentityBinding> {
        &self.gate
    }

    fn spawner(&self) -> &Arc<dyn TaskSpawner> {
        self.client.spawner()
    }

    fn cancellable(&self) -> &Cancellable {
        &self.token
    }

    fn describe(&self) -> String {
        format!("identity {}", self.id())
    }

    fn register(self: &Arc<Self>, generation: u64) -> BoxFuture<'static, Result<IdentityBinding>> {
        let connection = self.client.connection().clone();
        let context = self.context.clone();
        let id = self.id();
        let owner = Arc::downgrade(self);

        Box::pin(async move {
            let (remote, fetched) = if id == 0 {
                (connection.register_new_identity(&context).await?, None)
            } else {
                let (remote, info) = connection.get_identity(id, &context).await?;
                (remote, Some(info))
            };
            debug!(identity_id = id, path = %remote.object_path(), "Remote identity registered");

            let owner = owner.upgrade().ok_or(SignonError::Cancelled)?;
            let observer = remote.connect(Arc::new(IdentityEvents {
                owner: Arc::downgrade(&owner),
            }));

            if let Some(info) = fetched {
                let mut state = owner.state.lock();
                if owner.gate.is_current(generation) {
                    state.info = Some(info);
                    state.updated = true;
                }
            }

            Ok(IdentityBinding { remote, observer })
        })
    }
}

impl Drop for IdentityInner {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(binding) = self.gate.binding() {
            binding.detach();
        }
    }
}

/// Routes remote identity notifications back to the handle
struct IdentityEvents {
    owner: Weak<IdentityInner>,
}

impl IdentityObserver for IdentityEvents {
    fn state_changed(&self, state: RemoteIdentityState) {
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        debug!(identity_id = owner.id(), ?state, "Remote identity state changed");
        match state {
            RemoteIdentityState::DataUpdated => {
                let mut state = owner.state.lock();
                state.updated = false;
                state.info = None;
            }
            RemoteIdentityState::Removed => owner.mark_removed(),
            RemoteIdentityState::SignedOut => owner.signed_out(),
        }
    }

    fn unregistered(&self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.torn_down();
        }
    }
}

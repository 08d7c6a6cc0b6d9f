//! Daemon connection interface
//!
//! The client never talks to the bus directly. Everything it needs from the
//! daemon goes through the traits in this module: [`DaemonConnection`] for
//! the daemon's service object and [`RemoteIdentity`] / [`RemoteAuthSession`]
//! for the per-handle remote objects it hands out. Generated bus stubs, or the
//! in-memory double in `signon-testkit`, implement them.
//!
//! Remote notifications are delivered through observer traits. A remote
//! object calls its connected observers synchronously, in the thread that
//! received the notification, and must not hold its own locks while doing so.

use crate::errors::Result;
use crate::types::{IdentityInfo, SecurityContext, SessionData};
use async_trait::async_trait;
use std::sync::Arc;

/// Token identifying a connected observer on a remote object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub u64);

/// State notifications an identity object can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteIdentityState {
    /// The stored record changed
    DataUpdated,
    /// The record was deleted
    Removed,
    /// All sessions of the identity were signed out
    SignedOut,
}

/// Receives notifications from a [`RemoteIdentity`]
pub trait IdentityObserver: Send + Sync {
    /// The identity's stored state changed
    fn state_changed(&self, state: RemoteIdentityState);

    /// The remote object was destroyed by the daemon
    fn unregistered(&self);
}

/// Receives notifications from a [`RemoteAuthSession`]
pub trait SessionObserver: Send + Sync {
    /// The session reported progress
    fn state_changed(&self, state: i32, message: &str);

    /// The remote object was destroyed by the daemon
    fn unregistered(&self);
}

/// The daemon's service object, shared by every handle of a client
#[async_trait]
pub trait DaemonConnection: Send + Sync {
    /// Create a remote object for a new, not yet stored identity
    async fn register_new_identity(
        &self,
        context: &SecurityContext,
    ) -> Result<Arc<dyn RemoteIdentity>>;

    /// Fetch the remote object and record of a stored identity
    async fn get_identity(
        &self,
        id: u32,
        context: &SecurityContext,
    ) -> Result<(Arc<dyn RemoteIdentity>, IdentityInfo)>;

    /// Resolve the remote session object for `(identity_id, method)`
    async fn get_auth_session(
        &self,
        identity_id: u32,
        context: &SecurityContext,
        method: &str,
    ) -> Result<Arc<dyn RemoteAuthSession>>;

    /// Authentication methods installed in the daemon
    async fn query_methods(&self) -> Result<Vec<String>>;

    /// Mechanisms offered by `method`
    async fn query_mechanisms(&self, method: &str) -> Result<Vec<String>>;
}

/// Remote identity object
#[async_trait]
pub trait RemoteIdentity: Send + Sync {
    /// Bus object path, for logging
    fn object_path(&self) -> String;

    /// Connect an observer for state and teardown notifications
    fn connect(&self, observer: Arc<dyn IdentityObserver>) -> ObserverId;

    /// Disconnect a previously connected observer
    fn disconnect(&self, id: ObserverId);

    /// Persist `info`, returning the id the daemon assigned
    async fn store(&self, info: &IdentityInfo) -> Result<u32>;

    /// Fetch the stored record
    async fn get_info(&self) -> Result<IdentityInfo>;

    /// Compare `secret` against the stored one
    async fn verify_secret(&self, secret: &str) -> Result<bool>;

    /// Delete the stored record
    async fn remove(&self) -> Result<()>;

    /// Invalidate every session of the identity
    async fn sign_out(&self) -> Result<bool>;
}

/// Remote authentication session object
#[async_trait]
pub trait RemoteAuthSession: Send + Sync {
    fn object_path(&self) -> String;

    fn connect(&self, observer: Arc<dyn SessionObserver>) -> ObserverId;

    fn disconnect(&self, id: ObserverId);

    /// Re-route the session to another identity id
    async fn set_id(&self, id: u32) -> Result<()>;

    /// Run one authentication step
    async fn process(&self, data: SessionData, mechanism: &str) -> Result<SessionData>;

    /// Ask the daemon to abort the running step
    async fn cancel(&self);

    /// Intersect `wanted` with the mechanisms the method supports
    async fn query_available_mechanisms(&self, wanted: &[String]) -> Result<Vec<String>>;
}

#[async_trait]
impl<T: DaemonConnection + ?Sized> DaemonConnection for Arc<T> {
    async fn register_new_identity(
        &self,
        context: &SecurityContext,
    ) -> Result<Arc<dyn RemoteIdentity>> {
        (**self).register_new_identity(context).await
    }

    async fn get_identity(
        &self,
        id: u32,
        context: &SecurityContext,
    ) -> Result<(Arc<dyn RemoteIdentity>, IdentityInfo)> {
        (**self).get_identity(id, context).await
    }

    async fn get_auth_session(
        &self,
        identity_id: u32,
        context: &SecurityContext,
        method: &str,
    ) -> Result<Arc<dyn RemoteAuthSession>> {
        (**self).get_auth_session(identity_id, context, method).await
    }

    async fn query_methods(&self) -> Result<Vec<String>> {
        (**self).query_methods().await
    }

    async fn query_mechanisms(&self, method: &str) -> Result<Vec<String>> {
        (**self).query_mechanisms(method).await
    }
}

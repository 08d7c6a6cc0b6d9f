//! Signon Client
//!
//! Client-side access to the signon authentication daemon: handles to stored
//! credential records ([`Identity`]) and to authentication sessions
//! ([`AuthSession`]) that can be used before their remote objects exist.
//!
//! - Remote objects are registered lazily, on the first operation
//! - Operations issued while registration is in flight are queued and
//!   released in order once the daemon answers
//! - A session keeps the identity it was created from alive
//! - Remote teardown resets a handle; its next operation registers again
//!
//! The daemon itself is reached through [`DaemonConnection`], which bus
//! bindings (or the in-memory daemon in `signon-testkit`) implement.

#![allow(missing_docs)]

pub mod auth_service;
pub mod auth_session;
pub mod client;
pub mod config;
pub mod daemon;
pub mod errors;
pub mod identity;
pub mod readiness;
pub mod runtime;
pub mod types;

pub use auth_service::AuthService;
pub use auth_session::{AuthSession, PROCESS_PENDING_MESSAGE};
pub use client::SignonClient;
pub use config::ClientConfig;
pub use daemon::{
    DaemonConnection, IdentityObserver, ObserverId, RemoteAuthSession, RemoteIdentity,
    RemoteIdentityState, SessionObserver,
};
pub use errors::{Result, SignonError};
pub use identity::Identity;
pub use runtime::{Cancellable, TaskSpawner, TokioSpawner};
pub use types::{
    keys, AuthSessionState, IdentityInfo, IdentityType, SecurityContext, SessionData,
    SessionPolicy, StateChange,
};

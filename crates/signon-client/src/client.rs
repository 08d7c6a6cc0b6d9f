//! Shared client endpoint

use crate::config::ClientConfig;
use crate::daemon::DaemonConnection;
use crate::errors::Result;
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::types::SecurityContext;
use std::fmt;
use std::sync::Arc;

/// Entry point for creating identities, sessions and the auth service.
///
/// Cheap to clone; all clones share one daemon connection. Each handle
/// created from the client keeps its own registration state.
#[derive(Clone)]
pub struct SignonClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    connection: Arc<dyn DaemonConnection>,
    spawner: Arc<dyn TaskSpawner>,
    config: ClientConfig,
}

impl SignonClient {
    /// Create a client with the default configuration, spawning
    /// registrations on the current Tokio runtime
    pub fn new<C>(connection: C) -> Result<Self>
    where
        C: DaemonConnection + 'static,
    {
        Self::with_config(connection, ClientConfig::default())
    }

    pub fn with_config<C>(connection: C, config: ClientConfig) -> Result<Self>
    where
        C: DaemonConnection + 'static,
    {
        let spawner = TokioSpawner::try_current()?;
        Self::with_spawner(connection, config, Arc::new(spawner))
    }

    /// Create a client spawning registrations through `spawner`.
    ///
    /// Needed when the client is created outside a runtime, e.g. by code
    /// that only uses the `_blocking` wrappers.
    pub fn with_spawner<C>(
        connection: C,
        config: ClientConfig,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Result<Self>
    where
        C: DaemonConnection + 'static,
    {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                connection: Arc::new(connection),
                spawner,
                config,
            }),
        })
    }

    pub fn connection(&self) -> &Arc<dyn DaemonConnection> {
        &self.inner.connection
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn security_context(&self) -> &SecurityContext {
        &self.inner.config.security_context
    }

    pub(crate) fn spawner(&self) -> &Arc<dyn TaskSpawner> {
        &self.inner.spawner
    }
}

impl fmt::Debug for SignonClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignonClient")
            .field("service_name", &self.inner.config.service_name)
            .field("object_path", &self.inner.config.object_path)
            .finish_non_exhaustive()
    }
}

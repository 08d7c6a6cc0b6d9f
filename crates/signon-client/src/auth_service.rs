//! Daemon-wide queries that need no identity or session

use crate::client::SignonClient;
use crate::errors::Result;
use crate::runtime;
use tracing::debug;

/// Lists the authentication methods installed in the daemon
#[derive(Debug, Clone)]
pub struct AuthService {
    client: SignonClient,
}

impl AuthService {
    pub fn new(client: &SignonClient) -> Self {
        Self {
            client: client.clone(),
        }
    }

    /// Names of the installed authentication methods
    pub async fn query_methods(&self) -> Result<Vec<String>> {
        let methods = self.client.connection().query_methods().await?;
        debug!(count = methods.len(), "Queried authentication methods");
        Ok(methods)
    }

    /// Mechanisms offered by `method`
    pub async fn query_mechanisms(&self, method: &str) -> Result<Vec<String>> {
        self.client.connection().query_mechanisms(method).await
    }

    pub fn query_methods_blocking(&self) -> Result<Vec<String>> {
        runtime::block_on(self.query_methods())
    }

    pub fn query_mechanisms_blocking(&self, method: &str) -> Result<Vec<String>> {
        runtime::block_on(self.query_mechanisms(method))
    }
}

//! Common test fixtures

use crate::mock_daemon::MockDaemon;
use signon_client::{ClientConfig, IdentityInfo, IdentityType, SignonClient};
use std::sync::Arc;

/// Record for `username` with a stored secret and the `ssotest` method
pub fn identity_info(username: &str) -> IdentityInfo {
    let mut info = IdentityInfo::new();
    info.username = username.to_string();
    info.secret = Some(format!("{}-secret", username));
    info.store_secret = true;
    info.caption = format!("{}'s account", username);
    info.identity_type = IdentityType::App;
    info.methods.insert(
        "ssotest".to_string(),
        vec!["mech1".to_string(), "mech2".to_string()],
    );
    info.realms.push("example.com".to_string());
    info
}

/// Client on the current runtime with the default configuration
pub fn client_for(daemon: &MockDaemon) -> SignonClient {
    SignonClient::new(daemon.clone()).expect("client requires a tokio runtime")
}

/// Client spawning its registrations onto `runtime`, usable from threads
/// outside it through the `_blocking` wrappers
pub fn blocking_client_for(
    daemon: &MockDaemon,
    runtime: &tokio::runtime::Runtime,
) -> SignonClient {
    let spawner = signon_client::TokioSpawner::new(runtime.handle().clone());
    SignonClient::with_spawner(daemon.clone(), ClientConfig::default(), Arc::new(spawner))
        .expect("default config is valid")
}

/// Yield to the runtime until `condition` holds
pub async fn settle_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

/// Give every runnable task a few chances to make progress
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

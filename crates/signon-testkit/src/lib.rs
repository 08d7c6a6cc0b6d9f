//! Signon Testing Infrastructure
//!
//! An in-memory signon daemon ([`MockDaemon`]) that `signon-client` handles
//! can be pointed at, plus small fixtures shared by the integration tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
//!
//! # Usage
//!
//! ```rust,ignore
//! use signon_client::{Identity, SignonClient};
//! use signon_testkit::*;
//!
//! #[tokio::test]
//! async fn my_test() {
//!     init_test_tracing();
//!     let daemon = MockDaemon::new();
//!     let client = SignonClient::new(daemon.clone()).unwrap();
//!     let identity = Identity::new(&client);
//!     identity.store(&identity_info("alice")).await.unwrap();
//! }
//! ```

pub mod fixtures;
pub mod hold;
pub mod mock_daemon;
pub mod mock_remote;

pub use fixtures::*;
pub use hold::Hold;
pub use mock_daemon::{CallCounts, MockDaemon, ProcessCall};
pub use mock_remote::{MockAuthSession, MockIdentity};

/// Install a test-friendly tracing subscriber; `RUST_LOG` selects the level.
///
/// Safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

//! Plain data exchanged with the daemon

pub mod identity_info;
pub mod session_data;

pub use identity_info::{IdentityInfo, IdentityType, SecurityContext};
pub use session_data::{keys, AuthSessionState, SessionData, SessionPolicy, StateChange};

//! Authentication session payloads and state codes

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Key/value payload passed to and returned from `process`.
///
/// The daemon and its method plugins define the keys; the well-known ones
/// are listed in [`keys`].
pub type SessionData = BTreeMap<String, Value>;

/// Well-known session data keys
pub mod keys {
    pub const USERNAME: &str = "UserName";
    pub const SECRET: &str = "Secret";
    pub const REALM: &str = "Realm";
    pub const PROXY: &str = "NetworkProxy";
    pub const UI_POLICY: &str = "UiPolicy";
    pub const CAPTION: &str = "Caption";
    pub const TIMEOUT: &str = "NetworkTimeout";
    pub const WINDOW_ID: &str = "WindowId";
    pub const RENEW_TOKEN: &str = "RenewToken";
}

/// User interaction policy requested through [`keys::UI_POLICY`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionPolicy {
    #[default]
    Default = 0,
    RequestPassword = 1,
    NoUserInteraction = 2,
    Validation = 3,
}

impl SessionPolicy {
    /// Insert this policy into a session data map
    pub fn apply(self, data: &mut SessionData) {
        data.insert(keys::UI_POLICY.to_string(), Value::from(self as i32));
    }
}

/// State codes the daemon reports while a session works
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthSessionState {
    NotStarted = 0,
    ResolvingHost = 1,
    Connecting = 2,
    SendingData = 3,
    WaitingReply = 4,
    UserPending = 5,
    UiRefreshing = 6,
    ProcessPending = 7,
    Started = 8,
    ProcessCanceling = 9,
    ProcessDone = 10,
    Custom = 11,
}

impl AuthSessionState {
    /// Interpret a raw state code
    pub fn from_code(code: i32) -> Option<Self> {
        let state = match code {
            0 => Self::NotStarted,
            1 => Self::ResolvingHost,
            2 => Self::Connecting,
            3 => Self::SendingData,
            4 => Self::WaitingReply,
            5 => Self::UserPending,
            6 => Self::UiRefreshing,
            7 => Self::ProcessPending,
            8 => Self::Started,
            9 => Self::ProcessCanceling,
            10 => Self::ProcessDone,
            11 => Self::Custom,
            _ => return None,
        };
        Some(state)
    }

    /// Raw state code
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// A state change re-emitted verbatim from the remote session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub code: i32,
    pub message: String,
}

impl StateChange {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The known state for this code, if any
    pub fn state(&self) -> Option<AuthSessionState> {
        AuthSessionState::from_code(self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_codes() {
        for code in 0..=11 {
            let state = AuthSessionState::from_code(code).unwrap();
            assert_eq!(state.code(), code);
        }
        assert_eq!(AuthSessionState::from_code(12), None);
        assert_eq!(AuthSessionState::from_code(-1), None);
    }

    #[test]
    fn test_policy_apply() {
        let mut data = SessionData::new();
        SessionPolicy::NoUserInteraction.apply(&mut data);
        assert_eq!(data.get(keys::UI_POLICY), Some(&Value::from(2)));
    }

    #[test]
    fn test_custom_state_change_keeps_code() {
        let change = StateChange::new(42, "plugin specific");
        assert_eq!(change.state(), None);
        assert_eq!(change.code, 42);
    }
}

//! Unified error type for signon client operations
//!
//! Every asynchronous operation resolves with either a value or exactly one
//! [`SignonError`]. Registration errors are cloned out of the readiness gate
//! and replayed to later callers, so the type is `Clone`.

use serde::{Deserialize, Serialize};

/// Prefix of every bus error name raised by the signon daemon.
pub const DAEMON_ERROR_PREFIX: &str = "com.google.code.AccountsSSO.SingleSignOn.Error.";

/// Bus error raised when the daemon's well-known name has no owner.
pub const SERVICE_UNKNOWN_ERROR: &str = "org.freedesktop.DBus.Error.ServiceUnknown";

/// Errors surfaced by identities, authentication sessions and the auth service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum SignonError {
    /// Identity or record is absent, never stored, or already removed
    #[error("Identity not found: {message}")]
    NotFound {
        /// What was not found
        message: String,
    },

    /// Duplicate session for a method, or the method is unknown
    #[error("Method not available: {message}")]
    MethodNotAvailable {
        /// Description of the rejected method
        message: String,
    },

    /// The requested mechanism is not offered by the method
    #[error("Mechanism not available: {message}")]
    MechanismNotAvailable {
        /// Description of the rejected mechanism
        message: String,
    },

    /// The authentication session was canceled by `cancel()`
    #[error("Session canceled: {message}")]
    SessionCanceled {
        /// Cancellation detail
        message: String,
    },

    /// The daemon is not (yet) reachable on the bus
    #[error("Service temporarily unavailable: {message}")]
    ServiceTransientlyUnavailable {
        /// Bus-level failure detail
        message: String,
    },

    /// The daemon refused the operation for this client
    #[error("Permission denied: {message}")]
    PermissionDenied {
        /// Refusal detail
        message: String,
    },

    /// The handle is in a state where the operation is not allowed
    #[error("Wrong state: {message}")]
    WrongState {
        /// Which state rejected the operation
        message: String,
    },

    /// Invalid client configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong with the configuration
        message: String,
    },

    /// Generic remote or internal failure
    #[error("Runtime error: {message}")]
    Runtime {
        /// Error message describing the failure
        message: String,
    },

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,
}

impl SignonError {
    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a method not available error
    pub fn method_not_available(message: impl Into<String>) -> Self {
        Self::MethodNotAvailable {
            message: message.into(),
        }
    }

    /// Create a mechanism not available error
    pub fn mechanism_not_available(message: impl Into<String>) -> Self {
        Self::MechanismNotAvailable {
            message: message.into(),
        }
    }

    /// Create a session canceled error
    pub fn session_canceled(message: impl Into<String>) -> Self {
        Self::SessionCanceled {
            message: message.into(),
        }
    }

    /// Create a transient service error
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceTransientlyUnavailable {
            message: message.into(),
        }
    }

    /// Create a permission denied error
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Create a wrong state error
    pub fn wrong_state(message: impl Into<String>) -> Self {
        Self::WrongState {
            message: message.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a runtime error
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// Whether registration may be retried transparently after this error
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ServiceTransientlyUnavailable { .. })
    }

    /// Map a bus error name returned by the daemon onto an error kind.
    ///
    /// Names outside the daemon's namespace, other than the bus's own
    /// service-unknown error, become [`SignonError::Runtime`].
    pub fn from_remote(name: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        if name == SERVICE_UNKNOWN_ERROR {
            return Self::service_unavailable(message);
        }

        let Some(short) = name.strip_prefix(DAEMON_ERROR_PREFIX) else {
            return Self::runtime(format!("{name}: {message}"));
        };

        match short {
            "IdentityNotFound" => Self::not_found(message),
            "MethodNotAvailable" | "MethodNotKnown" => Self::method_not_available(message),
            "MechanismNotAvailable" => Self::mechanism_not_available(message),
            "SessionCanceled" => Self::session_canceled(message),
            "ServiceNotAvailable" => Self::service_unavailable(message),
            "PermissionDenied" | "NotAuthorized" => Self::permission_denied(message),
            "WrongState" => Self::wrong_state(message),
            _ => Self::runtime(message),
        }
    }

    /// The daemon error name corresponding to this kind, if any
    pub fn remote_name(&self) -> Option<String> {
        let short = match self {
            Self::NotFound { .. } => "IdentityNotFound",
            Self::MethodNotAvailable { .. } => "MethodNotAvailable",
            Self::MechanismNotAvailable { .. } => "MechanismNotAvailable",
            Self::SessionCanceled { .. } => "SessionCanceled",
            Self::ServiceTransientlyUnavailable { .. } => "ServiceNotAvailable",
            Self::PermissionDenied { .. } => "PermissionDenied",
            Self::WrongState { .. } => "WrongState",
            Self::Runtime { .. } => "Runtime",
            Self::InvalidConfig { .. } | Self::Cancelled => return None,
        };
        Some(format!("{DAEMON_ERROR_PREFIX}{short}"))
    }
}

/// Standard Result type for signon client operations
pub type Result<T> = std::result::Result<T, SignonError>;

impl From<std::io::Error> for SignonError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::permission_denied(err.to_string()),
            _ => Self::runtime(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = SignonError::not_found("identity 3");
        assert!(matches!(err, SignonError::NotFound { .. }));
        assert_eq!(err.to_string(), "Identity not found: identity 3");
    }

    #[test]
    fn test_remote_names_map_to_kinds() {
        let err = SignonError::from_remote(
            "com.google.code.AccountsSSO.SingleSignOn.Error.MethodNotKnown",
            "no such plugin",
        );
        assert!(matches!(err, SignonError::MethodNotAvailable { .. }));

        let err = SignonError::from_remote(SERVICE_UNKNOWN_ERROR, "signond not running");
        assert!(err.is_transient());

        let err = SignonError::from_remote(
            "com.google.code.AccountsSSO.SingleSignOn.Error.StoreFailed",
            "disk full",
        );
        assert_eq!(err, SignonError::runtime("disk full"));
    }

    #[test]
    fn test_foreign_names_keep_their_origin() {
        let err = SignonError::from_remote("org.example.Error.Boom", "bang");
        assert_eq!(err, SignonError::runtime("org.example.Error.Boom: bang"));
    }

    #[test]
    fn test_remote_name_round_trips_kind() {
        let err = SignonError::session_canceled("stop");
        let name = err.remote_name().unwrap();
        assert!(matches!(
            SignonError::from_remote(&name, "stop"),
            SignonError::SessionCanceled { .. }
        ));
        assert_eq!(SignonError::Cancelled.remote_name(), None);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked");
        let err = SignonError::from(io_err);
        assert!(matches!(err, SignonError::PermissionDenied { .. }));
    }
}

//! Identity records and the security contexts that guard them

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Access-control descriptor passed to the daemon on registration.
///
/// The client treats both fields as opaque strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecurityContext {
    /// System level context (e.g. a security label)
    pub system_context: String,
    /// Application level context (e.g. a script or plugin name)
    pub application_context: String,
}

impl SecurityContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context from optional parts; absent parts become empty strings
    pub fn from_values(system_context: Option<&str>, application_context: Option<&str>) -> Self {
        Self {
            system_context: system_context.unwrap_or_default().to_string(),
            application_context: application_context.unwrap_or_default().to_string(),
        }
    }

    /// The wildcard context used when the client does not restrict access
    pub fn wildcard() -> Self {
        Self::from_values(Some("*"), Some("*"))
    }
}

/// Kind of credential an identity stores
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityType {
    /// Unspecified
    #[default]
    Other,
    /// Application credential
    App,
    /// Web service credential
    Web,
    /// Network credential
    Network,
}

/// A stored credential record as exchanged with the daemon
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityInfo {
    /// Daemon-assigned id, 0 until first stored
    pub id: u32,
    pub username: String,
    /// Only sent to the daemon; never returned by queries
    pub secret: Option<String>,
    pub store_secret: bool,
    pub caption: String,
    /// Allowed mechanisms per method name
    pub methods: BTreeMap<String, Vec<String>>,
    pub realms: Vec<String>,
    pub access_control_list: Vec<SecurityContext>,
    pub identity_type: IdentityType,
}

impl IdentityInfo {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of this record carrying `id`
    pub fn with_id(&self, id: u32) -> Self {
        Self {
            id,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_context_from_values() {
        let ctx = SecurityContext::from_values(None, Some("plugin"));
        assert_eq!(ctx.system_context, "");
        assert_eq!(ctx.application_context, "plugin");
        assert_eq!(SecurityContext::wildcard().system_context, "*");
    }

    #[test]
    fn test_with_id_keeps_fields() {
        let mut info = IdentityInfo::new();
        info.username = "u".to_string();
        info.methods
            .insert("ssotest".to_string(), vec!["mech1".to_string()]);

        let stored = info.with_id(7);
        assert_eq!(stored.id, 7);
        assert_eq!(stored.username, "u");
        assert_eq!(stored.methods, info.methods);
    }

    #[test]
    fn test_identity_type_serializes_kebab_case() {
        let json = serde_json::to_string(&IdentityType::Network).unwrap();
        assert_eq!(json, "\"network\"");
    }
}

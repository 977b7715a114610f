use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::identity::ServiceIdentity;

/// Configuration fingerprint a login was made for. With security off, only the config directory
/// counts; with Kerberos on, principal and keytab must match too.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub config_directory: String,
    pub principal: Option<String>,
    pub keytab: Option<String>,
}

impl SessionKey {
    pub fn simple<D: Into<String>>(config_directory: D) -> Self {
        Self { config_directory: config_directory.into(), principal: None, keytab: None }
    }

    pub fn kerberos<D, P, K>(config_directory: D, principal: P, keytab: K) -> Self
    where
        D: Into<String>,
        P: Into<String>,
        K: Into<String>,
    {
        Self {
            config_directory: config_directory.into(),
            principal: Some(principal.into()),
            keytab: Some(keytab.into()),
        }
    }
}

/// An authenticated identity bound to one backend server.
#[derive(Clone)]
pub struct LoginSession {
    key: SessionKey,
    min_before_relogin: Duration,
    identity: Arc<ServiceIdentity>,
}

impl LoginSession {
    pub fn new(key: SessionKey, min_before_relogin: Duration, identity: Arc<ServiceIdentity>) -> Self {
        Self { key, min_before_relogin, identity }
    }

    pub fn key(&self) -> &SessionKey { &self.key }
    pub fn config_directory(&self) -> &str { &self.key.config_directory }
    pub fn principal(&self) -> Option<&str> { self.key.principal.as_deref() }
    pub fn keytab(&self) -> Option<&str> { self.key.keytab.as_deref() }
    pub fn min_before_relogin(&self) -> Duration { self.min_before_relogin }
    pub fn identity(&self) -> &Arc<ServiceIdentity> { &self.identity }

    /// Still valid for the configuration that produced `expected`?
    pub fn matches(&self, expected: &SessionKey) -> bool { &self.key == expected }
}

impl PartialEq for LoginSession {
    fn eq(&self, other: &Self) -> bool { self.key == other.key }
}

impl Eq for LoginSession {}

impl fmt::Debug for LoginSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginSession")
            .field("config_directory", &self.key.config_directory)
            .field("principal", &self.key.principal)
            .field("keytab", &self.key.keytab)
            .field("min_before_relogin", &self.min_before_relogin)
            .field("user", &self.identity.user_name())
            .finish()
    }
}

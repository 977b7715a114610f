//! Per-server configuration handle
//! --------------------------------
//! A flat, ordered key/value map handed by the configuration factory to the login and
//! impersonation layers. Typed getters parse on access; a malformed value is a
//! configuration error tagged with the server the configuration belongs to.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

pub const DEFAULT_SERVER_NAME: &str = "default";

// ---- security ----
pub const HADOOP_SECURITY_AUTHENTICATION: &str = "hadoop.security.authentication";
pub const AUTH_KERBEROS: &str = "kerberos";
pub const AUTH_SIMPLE: &str = "simple";
pub const KERBEROS_MIN_SECONDS_BEFORE_RELOGIN: &str = "hadoop.kerberos.min.seconds.before.relogin";
pub const DEFAULT_MIN_SECONDS_BEFORE_RELOGIN: u64 = 60;

// ---- service identity ----
pub const SERVICE_PRINCIPAL: &str = "dlagent.service.kerberos.principal";
pub const SERVICE_KEYTAB: &str = "dlagent.service.kerberos.keytab";
pub const SERVICE_USER_NAME: &str = "dlagent.service.user.name";
pub const SERVICE_USER_IMPERSONATION: &str = "dlagent.service.user.impersonation";
pub const TICKET_RENEW_WINDOW: &str = "dlagent.service.kerberos.ticket-renew-window";
pub const DEFAULT_TICKET_RENEW_WINDOW: f64 = 0.8;

// ---- retries ----
pub const SASL_CONNECTION_RETRIES: &str = "dlagent.sasl.connection.retries";
pub const DEFAULT_SASL_CONNECTION_RETRIES: i64 = 5;

// ---- recorded by the factory ----
pub const CONFIG_SERVER_NAME: &str = "dlagent.config.server.name";
pub const CONFIG_SERVER_DIRECTORY: &str = "dlagent.config.server.directory";
pub const SESSION_USER: &str = "dlagent.session.user";

/// Legacy single-cluster defaults, only consulted for the server named "default".
pub const LEGACY_PRINCIPAL_ENV: &str = "DLAGENT_PRINCIPAL";
pub const LEGACY_KEYTAB_ENV: &str = "DLAGENT_KEYTAB";

/// Key prefixes that decide who a request runs as. Only server-side files may set them;
/// request-supplied properties under these prefixes are rejected.
pub const PROTECTED_KEY_PREFIXES: &[&str] = &[
    "hadoop.security.",
    "hadoop.kerberos.",
    "dlagent.service.",
    "dlagent.sasl.",
    "dlagent.config.",
    "dlagent.session.",
];

pub fn is_protected_key(key: &str) -> bool {
    let key = key.trim().to_ascii_lowercase();
    PROTECTED_KEY_PREFIXES.iter().any(|p| key.starts_with(p))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    props: BTreeMap<String, String>,
}

impl Configuration {
    pub fn new() -> Self { Self::default() }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self { props: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }

    pub fn set<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.props.insert(key.into(), value.into());
    }

    pub fn unset(&mut self, key: &str) -> Option<String> { self.props.remove(key) }

    /// Overlay `other` on top of this configuration; `other` wins on conflicts.
    pub fn merge(&mut self, other: &Configuration) {
        for (k, v) in other.props.iter() {
            self.props.insert(k.clone(), v.clone());
        }
    }

    pub fn len(&self) -> usize { self.props.len() }

    pub fn is_empty(&self) -> bool { self.props.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.props.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Raw value, blank values treated as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> GatewayResult<bool> {
        match self.get(key) {
            None => Ok(default),
            Some(v) if v.eq_ignore_ascii_case("true") => Ok(true),
            Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
            Some(v) => Err(self.invalid(key, v, "a boolean")),
        }
    }

    pub fn get_i64(&self, key: &str, default: i64) -> GatewayResult<i64> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.parse::<i64>().map_err(|_| self.invalid(key, v, "an integer")),
        }
    }

    pub fn get_u64(&self, key: &str, default: u64) -> GatewayResult<u64> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.parse::<u64>().map_err(|_| self.invalid(key, v, "a non-negative integer")),
        }
    }

    pub fn get_f64(&self, key: &str, default: f64) -> GatewayResult<f64> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.parse::<f64>().map_err(|_| self.invalid(key, v, "a number")),
        }
    }

    /// Server this configuration was built for; "default" when the factory did not record one.
    pub fn server_name(&self) -> &str { self.get_or(CONFIG_SERVER_NAME, DEFAULT_SERVER_NAME) }

    pub fn server_directory(&self) -> Option<&str> { self.get(CONFIG_SERVER_DIRECTORY) }

    pub fn is_security_enabled(&self) -> bool {
        self.get(HADOOP_SECURITY_AUTHENTICATION)
            .map(|v| v.eq_ignore_ascii_case(AUTH_KERBEROS))
            .unwrap_or(false)
    }

    pub fn is_impersonation_enabled(&self) -> GatewayResult<bool> {
        self.get_bool(SERVICE_USER_IMPERSONATION, false)
    }

    fn invalid(&self, key: &str, value: &str, expected: &str) -> GatewayError {
        GatewayError::config(
            self.server_name(),
            format!("property '{}' has value '{}', expected {}", key, value, expected),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_flat_json_object() {
        let c = Configuration::from_pairs([(SERVICE_USER_NAME, "gpadmin"), (SASL_CONNECTION_RETRIES, "3")]);
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json[SERVICE_USER_NAME], "gpadmin");
        let back: Configuration = serde_json::from_value(json).unwrap();
        assert_eq!(back.get_i64(SASL_CONNECTION_RETRIES, 0).unwrap(), 3);
    }

    #[test]
    fn identity_keys_are_protected() {
        assert!(is_protected_key(HADOOP_SECURITY_AUTHENTICATION));
        assert!(is_protected_key(KERBEROS_MIN_SECONDS_BEFORE_RELOGIN));
        assert!(is_protected_key(SERVICE_USER_IMPERSONATION));
        assert!(is_protected_key(" DLAGENT.SERVICE.KERBEROS.PRINCIPAL"));
        assert!(is_protected_key(SASL_CONNECTION_RETRIES));
        assert!(is_protected_key(CONFIG_SERVER_DIRECTORY));
        assert!(is_protected_key(SESSION_USER));
        assert!(!is_protected_key("hive.metastore.uris"));
        assert!(!is_protected_key("fs.defaultFS"));
    }

    #[test]
    fn security_mode_is_case_insensitive() {
        let mut c = Configuration::new();
        assert!(!c.is_security_enabled());
        c.set(HADOOP_SECURITY_AUTHENTICATION, "Kerberos");
        assert!(c.is_security_enabled());
        c.set(HADOOP_SECURITY_AUTHENTICATION, AUTH_SIMPLE);
        assert!(!c.is_security_enabled());
    }

    #[test]
    fn typed_getters_fall_back_and_reject_garbage() {
        let mut c = Configuration::from_pairs([(CONFIG_SERVER_NAME, "hdfs1")]);
        assert_eq!(c.get_i64(SASL_CONNECTION_RETRIES, DEFAULT_SASL_CONNECTION_RETRIES).unwrap(), 5);
        assert!(!c.is_impersonation_enabled().unwrap());

        c.set(SASL_CONNECTION_RETRIES, "three");
        let err = c.get_i64(SASL_CONNECTION_RETRIES, 5).unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { ref server, .. } if server == "hdfs1"));

        c.set(SERVICE_USER_IMPERSONATION, "TRUE");
        assert!(c.is_impersonation_enabled().unwrap());
        c.set(SERVICE_USER_IMPERSONATION, "yes");
        assert!(c.is_impersonation_enabled().is_err());
    }

    #[test]
    fn blank_values_are_absent() {
        let mut c = Configuration::new();
        c.set(SERVICE_PRINCIPAL, "   ");
        assert_eq!(c.get(SERVICE_PRINCIPAL), None);
        assert_eq!(c.server_name(), DEFAULT_SERVER_NAME);
    }

    #[test]
    fn merge_overrides_existing_keys() {
        let mut base = Configuration::from_pairs([("a", "1"), ("b", "2")]);
        let over = Configuration::from_pairs([("b", "3"), ("c", "4")]);
        base.merge(&over);
        assert_eq!(base.get("a"), Some("1"));
        assert_eq!(base.get("b"), Some("3"));
        assert_eq!(base.len(), 3);
    }
}

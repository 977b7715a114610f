//! Produces the authenticated service identity for a backend server, logging in only when the
//! cache has nothing valid for the current configuration.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use tracing::{debug, info};

use super::backend::LoginBackend;
use super::hostname::canonical_hostname;
use super::identity::{ReloginPolicy, ServiceIdentity};
use super::login_session::{LoginSession, SessionKey};
use super::session_cache::LoginSessionCache;
use crate::config::{
    Configuration, DEFAULT_MIN_SECONDS_BEFORE_RELOGIN, DEFAULT_SERVER_NAME, DEFAULT_TICKET_RENEW_WINDOW,
    KERBEROS_MIN_SECONDS_BEFORE_RELOGIN, LEGACY_KEYTAB_ENV, LEGACY_PRINCIPAL_ENV, SERVICE_KEYTAB,
    SERVICE_PRINCIPAL, SERVICE_USER_NAME, TICKET_RENEW_WINDOW,
};
use crate::error::{GatewayError, GatewayResult};

/// Placeholder in a principal replaced by the local host name, e.g. `svc/_HOST@REALM`.
pub const HOSTNAME_PATTERN: &str = "_HOST";

pub type HostnameResolver = Arc<dyn Fn() -> std::io::Result<String> + Send + Sync>;

/// Principal/keytab used by single-cluster deployments that predate per-server configuration.
/// Only the server literally named "default" may fall back to these.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyDefaults {
    pub principal: Option<String>,
    pub keytab: Option<String>,
}

impl LegacyDefaults {
    pub fn from_env() -> Self {
        let read = |k: &str| std::env::var(k).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self { principal: read(LEGACY_PRINCIPAL_ENV), keytab: read(LEGACY_KEYTAB_ENV) }
    }
}

pub struct SecureLogin {
    cache: Arc<LoginSessionCache>,
    backend: Arc<dyn LoginBackend>,
    legacy: LegacyDefaults,
    resolve_hostname: HostnameResolver,
    hostname: OnceCell<String>,
}

impl SecureLogin {
    pub fn new(cache: Arc<LoginSessionCache>, backend: Arc<dyn LoginBackend>) -> Self {
        Self {
            cache,
            backend,
            legacy: LegacyDefaults::default(),
            resolve_hostname: Arc::new(canonical_hostname),
            hostname: OnceCell::new(),
        }
    }

    pub fn with_legacy_defaults(mut self, legacy: LegacyDefaults) -> Self {
        self.legacy = legacy;
        self
    }

    pub fn with_hostname_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn() -> std::io::Result<String> + Send + Sync + 'static,
    {
        self.resolve_hostname = Arc::new(resolver);
        self.hostname = OnceCell::new();
        self
    }

    pub fn cache(&self) -> &Arc<LoginSessionCache> { &self.cache }

    /// Authenticated identity for `server_name`, performing a login only on a cache miss or
    /// when the cached session no longer matches the configuration.
    pub fn get_login_user(
        &self,
        server_name: &str,
        config_directory: &str,
        configuration: &Configuration,
    ) -> GatewayResult<Arc<ServiceIdentity>> {
        let server = server_name.to_lowercase();
        let expected = self.expected_key(&server, config_directory, configuration)?;

        let session = match self.cache.lookup(&server, &expected) {
            Some(s) => s,
            None => {
                let _guard = self.cache.login_guard();
                match self.cache.lookup(&server, &expected) {
                    Some(s) => s,
                    None => {
                        let s = self.login(&server, expected, configuration)?;
                        self.cache.store(&server, s.clone());
                        s
                    }
                }
            }
        };

        if configuration.is_security_enabled() {
            self.refresh(&server, &session, configuration)?;
        }
        Ok(session.identity().clone())
    }

    /// Non-failing cache lookup: whatever would prevent deriving the expected session
    /// (missing principal, unresolvable host) is reported as a miss.
    pub fn lookup(&self, server_name: &str, config_directory: &str, configuration: &Configuration) -> Option<LoginSession> {
        let server = server_name.to_lowercase();
        let expected = self.expected_key(&server, config_directory, configuration).ok()?;
        self.cache.lookup(&server, &expected)
    }

    /// Service principal with `_HOST` already substituted. `None` when no principal is
    /// configured and the legacy fallback does not apply.
    pub fn service_principal(&self, server_name: &str, configuration: &Configuration) -> GatewayResult<Option<String>> {
        let configured = configuration.get(SERVICE_PRINCIPAL).map(str::to_string);
        let Some(principal) = configured.or_else(|| self.legacy_value(server_name, &self.legacy.principal)) else {
            return Ok(None);
        };
        if !principal.contains(HOSTNAME_PATTERN) {
            return Ok(Some(principal));
        }
        // resolved once per process; failures are retried on the next request
        let host = self
            .hostname
            .get_or_try_init(|| (self.resolve_hostname)().map(|h| h.to_lowercase()))
            .map_err(|e| {
                GatewayError::auth_with_source(server_name, "unable to resolve local hostname for service principal", e)
            })?;
        Ok(Some(principal.replace(HOSTNAME_PATTERN, host)))
    }

    pub fn service_keytab(&self, server_name: &str, configuration: &Configuration) -> Option<String> {
        configuration
            .get(SERVICE_KEYTAB)
            .map(str::to_string)
            .or_else(|| self.legacy_value(server_name, &self.legacy.keytab))
    }

    fn legacy_value(&self, server_name: &str, value: &Option<String>) -> Option<String> {
        if server_name == DEFAULT_SERVER_NAME { value.clone() } else { None }
    }

    fn expected_key(&self, server: &str, config_directory: &str, configuration: &Configuration) -> GatewayResult<SessionKey> {
        if !configuration.is_security_enabled() {
            return Ok(SessionKey::simple(config_directory));
        }
        let principal = self.service_principal(server, configuration)?;
        let keytab = self.service_keytab(server, configuration);
        match (principal, keytab) {
            (Some(p), Some(k)) => Ok(SessionKey::kerberos(config_directory, p, k)),
            (None, _) => Err(GatewayError::config(
                server,
                format!("Kerberos is enabled but property '{}' is not set", SERVICE_PRINCIPAL),
            )),
            (_, None) => Err(GatewayError::config(
                server,
                format!("Kerberos is enabled but property '{}' is not set", SERVICE_KEYTAB),
            )),
        }
    }

    fn min_before_relogin(&self, server: &str, configuration: &Configuration) -> GatewayResult<Duration> {
        let secs = configuration.get_u64(KERBEROS_MIN_SECONDS_BEFORE_RELOGIN, DEFAULT_MIN_SECONDS_BEFORE_RELOGIN)
            .map_err(|_| GatewayError::config(
                server,
                format!("property '{}' must be a non-negative number of seconds", KERBEROS_MIN_SECONDS_BEFORE_RELOGIN),
            ))?;
        Ok(Duration::from_secs(secs))
    }

    fn login(&self, server: &str, key: SessionKey, configuration: &Configuration) -> GatewayResult<LoginSession> {
        let min_before_relogin = self.min_before_relogin(server, configuration)?;
        let (Some(principal), Some(keytab)) = (key.principal.clone(), key.keytab.clone()) else {
            let user = configuration
                .get(SERVICE_USER_NAME)
                .map(str::to_string)
                .unwrap_or_else(whoami::username);
            info!(
                target: "dlagent::login",
                "server '{}' uses simple authentication as user '{}' (config '{}')",
                server, user, key.config_directory
            );
            return Ok(LoginSession::new(key, min_before_relogin, Arc::new(ServiceIdentity::simple(user))));
        };

        info!(
            target: "dlagent::login",
            "logging in server '{}' as principal '{}' with keytab '{}'",
            server, principal, keytab
        );
        let ticket = self.backend.login_from_keytab(&principal, &keytab).map_err(|e| {
            GatewayError::auth_with_source(
                server,
                format!("unable to login as principal '{}' using keytab '{}'", principal, keytab),
                e,
            )
        })?;
        let identity = ServiceIdentity::kerberos(ticket);
        info!(
            target: "dlagent::login",
            "server '{}' logged in as '{}' (short name '{}')",
            server, principal, identity.user_name()
        );
        Ok(LoginSession::new(key, min_before_relogin, Arc::new(identity)))
    }

    fn refresh(&self, server: &str, session: &LoginSession, configuration: &Configuration) -> GatewayResult<()> {
        let Some(keytab) = session.keytab() else { return Ok(()) };
        let renew_window = configuration.get_f64(TICKET_RENEW_WINDOW, DEFAULT_TICKET_RENEW_WINDOW)?;
        if !(0.0..=1.0).contains(&renew_window) {
            return Err(GatewayError::config(
                server,
                format!("property '{}' must be between 0 and 1, got {}", TICKET_RENEW_WINDOW, renew_window),
            ));
        }
        let policy = ReloginPolicy { renew_window, min_before_relogin: session.min_before_relogin() };
        let refreshed = session
            .identity()
            .relogin_if_needed(self.backend.as_ref(), keytab, &policy)
            .map_err(|e| GatewayError::auth_with_source(server, "unable to re-login from keytab", e))?;
        if refreshed {
            info!(target: "dlagent::login", "re-login for server '{}' refreshed credentials", server);
        } else {
            debug!(target: "dlagent::login", "re-login for server '{}' not needed", server);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "secure_login_tests.rs"]
mod secure_login_tests;

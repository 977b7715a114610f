use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use super::backend::{KerberosTicket, LoginBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Kerberos,
    Simple,
}

/// When a Kerberos login should be refreshed.
#[derive(Debug, Clone, Copy)]
pub struct ReloginPolicy {
    /// Fraction of the ticket lifetime after which a refresh is attempted.
    pub renew_window: f64,
    /// Never refresh more often than this.
    pub min_before_relogin: Duration,
}

#[derive(Debug)]
struct LoginState {
    ticket: Option<KerberosTicket>,
    last_login: Instant,
}

/// The identity the process authenticated as for one backend server. Shared by every request
/// to that server; a re-login swaps the ticket in place without changing who this is.
#[derive(Debug)]
pub struct ServiceIdentity {
    user_name: String,
    principal: Option<String>,
    auth_method: AuthMethod,
    state: Mutex<LoginState>,
}

impl ServiceIdentity {
    pub fn kerberos(ticket: KerberosTicket) -> Self {
        Self {
            user_name: short_name(&ticket.principal).to_string(),
            principal: Some(ticket.principal.clone()),
            auth_method: AuthMethod::Kerberos,
            state: Mutex::new(LoginState { ticket: Some(ticket), last_login: Instant::now() }),
        }
    }

    pub fn simple<U: Into<String>>(user_name: U) -> Self {
        Self {
            user_name: user_name.into(),
            principal: None,
            auth_method: AuthMethod::Simple,
            state: Mutex::new(LoginState { ticket: None, last_login: Instant::now() }),
        }
    }

    pub fn user_name(&self) -> &str { &self.user_name }
    pub fn principal(&self) -> Option<&str> { self.principal.as_deref() }
    pub fn auth_method(&self) -> AuthMethod { self.auth_method }
    pub fn ticket(&self) -> Option<KerberosTicket> { self.state.lock().ticket.clone() }
    pub fn last_login(&self) -> Instant { self.state.lock().last_login }

    /// Refresh the Kerberos ticket from the keytab when the policy says it is due.
    /// Returns whether a re-login happened. Simple identities never re-login.
    pub fn relogin_if_needed(
        &self,
        backend: &dyn LoginBackend,
        keytab: &str,
        policy: &ReloginPolicy,
    ) -> std::io::Result<bool> {
        let Some(principal) = self.principal.as_deref() else { return Ok(false) };
        // held across the backend call so concurrent requests do not refresh twice
        let mut state = self.state.lock();
        if state.last_login.elapsed() < policy.min_before_relogin {
            return Ok(false);
        }
        let due = match state.ticket.as_ref() {
            Some(t) => t.refresh_due(Utc::now(), policy.renew_window),
            None => true,
        };
        if !due {
            return Ok(false);
        }
        let ticket = backend.relogin(principal, keytab)?;
        state.ticket = Some(ticket);
        state.last_login = Instant::now();
        Ok(true)
    }
}

/// `svc/host.example.com@EXAMPLE.COM` -> `svc`
pub fn short_name(principal: &str) -> &str {
    principal.split(['/', '@']).next().unwrap_or(principal)
}

/// The identity one request's backend calls run under. Every instance gets a fresh id so
/// handles cached for it can be released without touching other requests, even for the same user.
#[derive(Debug, Clone)]
pub enum EffectiveIdentity {
    /// Impersonation: `user` acts through the service identity.
    Proxy { id: Uuid, user: String, real_user: Arc<ServiceIdentity> },
    /// No impersonation: the service user itself.
    Remote { id: Uuid, user: String, kerberos_authenticated: bool },
}

impl EffectiveIdentity {
    pub fn proxy<U: Into<String>>(user: U, real_user: Arc<ServiceIdentity>) -> Self {
        EffectiveIdentity::Proxy { id: Uuid::new_v4(), user: user.into(), real_user }
    }

    pub fn remote<U: Into<String>>(user: U, kerberos_authenticated: bool) -> Self {
        EffectiveIdentity::Remote { id: Uuid::new_v4(), user: user.into(), kerberos_authenticated }
    }

    pub fn id(&self) -> Uuid {
        match self {
            EffectiveIdentity::Proxy { id, .. } | EffectiveIdentity::Remote { id, .. } => *id,
        }
    }

    pub fn user_name(&self) -> &str {
        match self {
            EffectiveIdentity::Proxy { user, .. } | EffectiveIdentity::Remote { user, .. } => user.as_str(),
        }
    }

    pub fn real_user(&self) -> Option<&ServiceIdentity> {
        match self {
            EffectiveIdentity::Proxy { real_user, .. } => Some(real_user.as_ref()),
            EffectiveIdentity::Remote { .. } => None,
        }
    }

    pub fn is_proxy(&self) -> bool { matches!(self, EffectiveIdentity::Proxy { .. }) }

    pub fn is_kerberos_authenticated(&self) -> bool {
        match self {
            EffectiveIdentity::Proxy { real_user, .. } => real_user.auth_method() == AuthMethod::Kerberos,
            EffectiveIdentity::Remote { kerberos_authenticated, .. } => *kerberos_authenticated,
        }
    }
}

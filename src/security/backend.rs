//! Login backend seam. The Kerberos client library is opaque to the core: all it needs is
//! "log in from this keytab" and "refresh that login", each yielding a ticket with a validity window.

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KerberosTicket {
    pub principal: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl KerberosTicket {
    pub fn new<P: Into<String>>(principal: P, start: DateTime<Utc>, lifetime: Duration) -> Self {
        Self { principal: principal.into(), start, end: start + lifetime }
    }

    pub fn lifetime(&self) -> Duration { self.end - self.start }

    /// Refresh once `renew_window` (a fraction of the lifetime) has elapsed, or once expired.
    pub fn refresh_due(&self, now: DateTime<Utc>, renew_window: f64) -> bool {
        let window_ms = (self.lifetime().num_milliseconds() as f64 * renew_window.clamp(0.0, 1.0)) as i64;
        now >= self.start + Duration::milliseconds(window_ms) || now >= self.end
    }
}

pub trait LoginBackend: Send + Sync {
    fn login_from_keytab(&self, principal: &str, keytab: &str) -> std::io::Result<KerberosTicket>;

    /// Refresh an existing login. Defaults to a fresh keytab login, which is what keytab-based
    /// services do anyway.
    fn relogin(&self, principal: &str, keytab: &str) -> std::io::Result<KerberosTicket> {
        self.login_from_keytab(principal, keytab)
    }
}

/// Runs the system `kinit` against a per-principal credential cache.
#[derive(Debug, Clone)]
pub struct KinitLoginBackend {
    kinit: PathBuf,
    ccache_dir: PathBuf,
    ticket_lifetime: Duration,
}

impl KinitLoginBackend {
    pub fn new<P: Into<PathBuf>>(ccache_dir: P) -> Self {
        Self { kinit: PathBuf::from("kinit"), ccache_dir: ccache_dir.into(), ticket_lifetime: Duration::hours(24) }
    }

    pub fn with_kinit<P: Into<PathBuf>>(mut self, kinit: P) -> Self {
        self.kinit = kinit.into();
        self
    }

    pub fn with_ticket_lifetime(mut self, lifetime: Duration) -> Self {
        self.ticket_lifetime = lifetime;
        self
    }

    /// Credential cache for a principal; backend clients point KRB5CCNAME here.
    pub fn ccache_path(&self, principal: &str) -> PathBuf {
        let safe: String = principal
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.ccache_dir.join(format!("krb5cc_{}", safe))
    }

    fn run_kinit(&self, principal: &str, keytab: &str) -> std::io::Result<()> {
        if !Path::new(keytab).is_file() {
            return Err(std::io::Error::new(std::io::ErrorKind::NotFound, format!("keytab '{}' not found", keytab)));
        }
        std::fs::create_dir_all(&self.ccache_dir)?;
        let ccache = self.ccache_path(principal);
        let output = Command::new(&self.kinit)
            .arg("-k")
            .arg("-t")
            .arg(keytab)
            .arg("-c")
            .arg(&ccache)
            .arg(principal)
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("kinit exited with {}: {}", output.status, stderr.trim()),
            ));
        }
        debug!(target: "dlagent::login", "kinit ok principal='{}' ccache='{}'", principal, ccache.display());
        Ok(())
    }
}

impl LoginBackend for KinitLoginBackend {
    fn login_from_keytab(&self, principal: &str, keytab: &str) -> std::io::Result<KerberosTicket> {
        self.run_kinit(principal, keytab)?;
        Ok(KerberosTicket::new(principal, Utc::now(), self.ticket_lifetime))
    }
}

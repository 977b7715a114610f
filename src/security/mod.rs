//! Request-scoped identity for backend calls: per-server service login (cached, refreshed),
//! the effective identity a request runs as, and release of whatever was opened under it.
//! Keep the public surface thin and split implementation across sub-modules.

mod backend;
mod executor;
mod handle_cache;
mod hostname;
mod identity;
mod login_session;
mod secure_login;
mod session_cache;

pub use backend::{KerberosTicket, KinitLoginBackend, LoginBackend};
pub use executor::{IdentityExecutor, ResourceReleaser};
pub use handle_cache::HandleCache;
pub use hostname::canonical_hostname;
pub use identity::{short_name, AuthMethod, EffectiveIdentity, ReloginPolicy, ServiceIdentity};
pub use login_session::{LoginSession, SessionKey};
pub use secure_login::{HostnameResolver, LegacyDefaults, SecureLogin, HOSTNAME_PATTERN};
pub use session_cache::LoginSessionCache;

use std::collections::HashMap;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::debug;

use super::login_session::{LoginSession, SessionKey};
use crate::tprintln;

/// Process-wide map of server name -> login session. Owned by whoever builds the `SecureLogin`
/// and passed by reference; there is no hidden global instance.
///
/// Lookups never wait on an in-flight login. The miss path goes through `login_guard`, one
/// coarse lock for all servers: logins are rare and must not race.
#[derive(Debug, Default)]
pub struct LoginSessionCache {
    sessions: RwLock<HashMap<String, LoginSession>>,
    login_lock: Mutex<()>,
}

impl LoginSessionCache {
    pub fn new() -> Self { Self::default() }

    /// Cached session for `server_name` if it still matches `expected`. Misses and stale
    /// entries both return `None`.
    pub fn lookup(&self, server_name: &str, expected: &SessionKey) -> Option<LoginSession> {
        let key = server_name.to_lowercase();
        let map = self.sessions.read();
        let session = map.get(&key)?;
        if session.matches(expected) {
            Some(session.clone())
        } else {
            debug!(
                target: "dlagent::login",
                "cached session for server '{}' is stale: cached={:?} expected={:?}",
                key, session.key(), expected
            );
            None
        }
    }

    /// Replace the entry for `server_name` (case-insensitive).
    pub fn store(&self, server_name: &str, session: LoginSession) {
        tprintln!("login.cache.store server={} key={:?}", server_name, session.key());
        self.sessions.write().insert(server_name.to_lowercase(), session);
    }

    /// Exclusive section for check -> login -> store.
    pub fn login_guard(&self) -> MutexGuard<'_, ()> { self.login_lock.lock() }

    pub fn len(&self) -> usize { self.sessions.read().len() }

    pub fn is_empty(&self) -> bool { self.sessions.read().is_empty() }

    /// Forget every session. Test fixtures use this; production code never destroys sessions.
    pub fn reset(&self) {
        let _guard = self.login_guard();
        self.sessions.write().clear();
    }
}

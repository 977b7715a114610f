//! Runs one unit of work as the request's effective identity.
//!
//! The identity is passed to the action explicitly instead of being attached to the thread.
//! Everything opened under it is released by `IdentityScope` when the scope drops, which
//! happens exactly once whether the action returns `Ok`, returns `Err`, or panics.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use super::identity::EffectiveIdentity;
use super::secure_login::SecureLogin;
use crate::context::RequestContext;
use crate::error::{GatewayError, GatewayResult};

/// Frees resources tied to an effective identity (cached connections and the like).
pub trait ResourceReleaser: Send + Sync {
    fn release(&self, identity: &EffectiveIdentity) -> GatewayResult<()>;
}

pub struct IdentityExecutor {
    login: Arc<SecureLogin>,
    releasers: Vec<Arc<dyn ResourceReleaser>>,
}

impl IdentityExecutor {
    pub fn new(login: Arc<SecureLogin>) -> Self { Self { login, releasers: Vec::new() } }

    pub fn with_releaser(mut self, releaser: Arc<dyn ResourceReleaser>) -> Self {
        self.releasers.push(releaser);
        self
    }

    pub fn secure_login(&self) -> &Arc<SecureLogin> { &self.login }

    /// Resolve the login identity for the request's server and derive the identity the
    /// request runs as: the end user when impersonating, the service user otherwise.
    pub fn effective_identity(&self, ctx: &RequestContext) -> GatewayResult<EffectiveIdentity> {
        let conf = ctx.configuration();
        let config_directory = conf.server_directory().unwrap_or(ctx.config());
        let login_user = self.login.get_login_user(ctx.server_name(), config_directory, conf)?;

        if conf.is_impersonation_enabled()? {
            if ctx.user().trim().is_empty() {
                return Err(GatewayError::config(
                    ctx.server_name(),
                    "impersonation is enabled but the request carries no user",
                ));
            }
            debug!(
                target: "dlagent::doas",
                "creating proxy identity user='{}' real_user='{}' server='{}'",
                ctx.user(), login_user.user_name(), ctx.server_name()
            );
            Ok(EffectiveIdentity::proxy(ctx.user(), login_user))
        } else {
            debug!(
                target: "dlagent::doas",
                "creating remote identity user='{}' server='{}' (impersonation disabled)",
                login_user.user_name(), ctx.server_name()
            );
            Ok(EffectiveIdentity::remote(login_user.user_name(), conf.is_security_enabled()))
        }
    }

    /// Run `action` as the request's effective identity. Failures from identity resolution or
    /// from the action propagate unchanged; release failures are only logged.
    pub fn do_as<T, F>(&self, ctx: &RequestContext, action: F) -> GatewayResult<T>
    where
        F: FnOnce(&EffectiveIdentity) -> GatewayResult<T>,
    {
        let identity = self.effective_identity(ctx)?;
        let scope = IdentityScope { identity, releasers: &self.releasers };
        action(&scope.identity)
    }
}

struct IdentityScope<'a> {
    identity: EffectiveIdentity,
    releasers: &'a [Arc<dyn ResourceReleaser>],
}

impl Drop for IdentityScope<'_> {
    fn drop(&mut self) {
        // nothing may unwind out of drop
        for releaser in self.releasers.iter() {
            match catch_unwind(AssertUnwindSafe(|| releaser.release(&self.identity))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    target: "dlagent::doas",
                    "error releasing resources for user '{}': {}",
                    self.identity.user_name(), e
                ),
                Err(_) => warn!(
                    target: "dlagent::doas",
                    "releaser panicked while releasing resources for user '{}'",
                    self.identity.user_name()
                ),
            }
        }
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod executor_tests;

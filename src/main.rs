use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use dlagent::config_factory::{BaseConfigurationFactory, ConfigurationFactory};
use dlagent::context::RequestContext;
use dlagent::retry::RetryingOperationExecutor;
use dlagent::security::{IdentityExecutor, KinitLoginBackend, LegacyDefaults, LoginSessionCache, SecureLogin};

#[derive(Debug, Serialize)]
struct ProbeReport {
    server: String,
    config_dir: String,
    user: String,
    identity_id: uuid::Uuid,
    proxy: bool,
    kerberos: bool,
    real_user: Option<String>,
}

/// Identity probe: builds the configuration for one server, logs in, and reports which
/// identity a request from `DLAGENT_USER` would run as.
fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let servers_dir = std::env::var("DLAGENT_SERVERS_DIR").unwrap_or_else(|_| "servers".to_string());
    let server = std::env::var("DLAGENT_SERVER").ok();
    let user = std::env::var("DLAGENT_USER").unwrap_or_else(|_| whoami::username());
    let ccache_dir = std::env::var("DLAGENT_CCACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("dlagent-ccache"));
    info!(
        target: "dlagent",
        "dlagent probe starting: RUST_LOG='{}', servers_dir='{}', server={:?}, user='{}', ccache_dir='{}'",
        rust_log, servers_dir, server, user, ccache_dir.display()
    );

    let factory = BaseConfigurationFactory::new(&servers_dir);
    let ctx = RequestContext::new(server.as_deref(), user)?.with_operation("probe");
    let ctx = factory
        .configure(ctx)
        .with_context(|| format!("While building configuration under servers_dir: {}", servers_dir))?;

    let login = SecureLogin::new(Arc::new(LoginSessionCache::new()), Arc::new(KinitLoginBackend::new(ccache_dir)))
        .with_legacy_defaults(LegacyDefaults::from_env());
    let executor = IdentityExecutor::new(Arc::new(login));
    let retry = RetryingOperationExecutor::new();

    let report = executor
        .do_as(&ctx, |identity| {
            retry.execute(ctx.configuration(), "probe", || {
                Ok(ProbeReport {
                    server: ctx.server_name().to_string(),
                    config_dir: ctx.config().to_string(),
                    user: identity.user_name().to_string(),
                    identity_id: identity.id(),
                    proxy: identity.is_proxy(),
                    kerberos: identity.is_kerberos_authenticated(),
                    real_user: identity.real_user().map(|u| u.user_name().to_string()),
                })
            })
        })
        .with_context(|| format!("identity probe failed for server '{}'", ctx.server_name()))?;

    info!(target: "dlagent", "probe ok: server='{}' user='{}' proxy={}", report.server, report.user, report.proxy);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

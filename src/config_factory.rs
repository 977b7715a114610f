//! Builds the per-server `Configuration` from the servers root directory.
//!
//! Layout under the servers root:
//!   <root>/<config_dir>/*-site.json     flat JSON objects, applied in file-name order
//!   <root>/<config_dir>/<user>-user.json  per-user overrides
//! Request-supplied properties are applied last, except that they may never touch identity or
//! security keys (`config::PROTECTED_KEY_PREFIXES`). A missing server directory is not an
//! error: the server simply runs with an empty base configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::{is_protected_key, Configuration, CONFIG_SERVER_DIRECTORY, CONFIG_SERVER_NAME, SESSION_USER};
use crate::context::{is_valid_user_file_name, RequestContext};
use crate::error::{GatewayError, GatewayResult};

const SITE_SUFFIX: &str = "-site.json";
const USER_SUFFIX: &str = "-user.json";

pub trait ConfigurationFactory: Send + Sync {
    fn init_configuration(
        &self,
        config_dir: &str,
        server_name: &str,
        user: Option<&str>,
        additional: &BTreeMap<String, String>,
    ) -> GatewayResult<Configuration>;

    fn for_request(&self, ctx: &RequestContext) -> GatewayResult<Configuration> {
        self.init_configuration(ctx.config(), ctx.server_name(), Some(ctx.user()), ctx.additional_config_props())
    }

    /// Build the request's configuration and attach it to the context.
    fn configure(&self, ctx: RequestContext) -> GatewayResult<RequestContext> {
        let conf = self.for_request(&ctx)?;
        Ok(ctx.with_configuration(conf))
    }
}

#[derive(Debug, Clone)]
pub struct BaseConfigurationFactory {
    servers_root: PathBuf,
}

impl BaseConfigurationFactory {
    pub fn new<P: Into<PathBuf>>(servers_root: P) -> Self { Self { servers_root: servers_root.into() } }

    pub fn servers_root(&self) -> &Path { &self.servers_root }

    fn load_json_file(&self, path: &Path, server_name: &str, into: &mut Configuration) -> GatewayResult<()> {
        let text = std::fs::read_to_string(path)?;
        let json: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
            GatewayError::config(server_name, format!("unable to parse '{}': {}", path.display(), e))
        })?;
        let serde_json::Value::Object(obj) = json else {
            return Err(GatewayError::config(server_name, format!("'{}' must contain a JSON object", path.display())));
        };
        for (k, v) in obj.into_iter() {
            match v {
                serde_json::Value::String(s) => into.set(k, s),
                serde_json::Value::Bool(b) => into.set(k, b.to_string()),
                serde_json::Value::Number(n) => into.set(k, n.to_string()),
                serde_json::Value::Null => {}
                other => {
                    return Err(GatewayError::config(
                        server_name,
                        format!("property '{}' in '{}' must be a scalar, got {}", k, path.display(), other),
                    ));
                }
            }
        }
        debug!(target: "dlagent::config", "loaded '{}' for server '{}'", path.display(), server_name);
        Ok(())
    }

    fn site_files(dir: &Path) -> GatewayResult<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| p.file_name().and_then(|n| n.to_str()).map(|n| n.ends_with(SITE_SUFFIX)).unwrap_or(false))
            .collect();
        files.sort();
        Ok(files)
    }
}

impl ConfigurationFactory for BaseConfigurationFactory {
    fn init_configuration(
        &self,
        config_dir: &str,
        server_name: &str,
        user: Option<&str>,
        additional: &BTreeMap<String, String>,
    ) -> GatewayResult<Configuration> {
        if let Some(key) = additional.keys().find(|k| is_protected_key(k)) {
            warn!(target: "dlagent::config", "rejecting request property '{}' for server '{}'", key, server_name);
            return Err(GatewayError::config(
                server_name,
                format!("property '{}' cannot be set by a request", key),
            ));
        }

        let mut conf = Configuration::new();
        let server_dir = self.servers_root.join(config_dir);

        if server_dir.is_dir() {
            for file in Self::site_files(&server_dir)? {
                self.load_json_file(&file, server_name, &mut conf)?;
            }
            match user {
                Some(u) if is_valid_user_file_name(u) => {
                    let user_file = server_dir.join(format!("{}{}", u, USER_SUFFIX));
                    if user_file.is_file() {
                        self.load_json_file(&user_file, server_name, &mut conf)?;
                    }
                }
                Some(u) => warn!(
                    target: "dlagent::config",
                    "user '{}' cannot name a per-user file, skipping user overrides for server '{}'",
                    u, server_name
                ),
                None => {}
            }
        } else {
            warn!(
                target: "dlagent::config",
                "unable to find server configuration directory '{}' for server '{}', using default configuration",
                server_dir.display(), server_name
            );
        }

        for (k, v) in additional.iter() {
            conf.set(k.clone(), v.clone());
        }

        conf.set(CONFIG_SERVER_NAME, server_name);
        conf.set(CONFIG_SERVER_DIRECTORY, server_dir.to_string_lossy().to_string());
        if let Some(u) = user {
            conf.set(SESSION_USER, u);
        }
        Ok(conf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SERVICE_PRINCIPAL, SERVICE_USER_IMPERSONATION};

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn site_files_then_user_file_then_request_props() {
        let tmp = tempfile::tempdir().unwrap();
        let hive = tmp.path().join("hive");
        std::fs::create_dir_all(&hive).unwrap();
        write(&hive, "core-site.json", r#"{"hadoop.security.authentication": "kerberos", "fs.defaultFS": "hdfs://nn:8020"}"#);
        write(&hive, "dlagent-site.json", r#"{"dlagent.service.user.impersonation": true, "dlagent.sasl.connection.retries": 3}"#);
        write(&hive, "alice-user.json", r#"{"dlagent.service.user.impersonation": false}"#);
        write(&hive, "notes.txt", "ignored");

        let factory = BaseConfigurationFactory::new(tmp.path());
        let mut extra = BTreeMap::new();
        extra.insert("fs.defaultFS".to_string(), "hdfs://other:8020".to_string());
        let conf = factory.init_configuration("hive", "hive", Some("alice"), &extra).unwrap();

        assert!(conf.is_security_enabled());
        assert_eq!(conf.get(SERVICE_USER_IMPERSONATION), Some("false"));
        assert_eq!(conf.get("dlagent.sasl.connection.retries"), Some("3"));
        assert_eq!(conf.get("fs.defaultFS"), Some("hdfs://other:8020"));
        assert_eq!(conf.server_name(), "hive");
        assert_eq!(conf.get(SESSION_USER), Some("alice"));
        assert!(conf.server_directory().unwrap().ends_with("hive"));
    }

    #[test]
    fn missing_directory_yields_empty_configuration() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = BaseConfigurationFactory::new(tmp.path());
        let conf = factory.init_configuration("default", "default", None, &BTreeMap::new()).unwrap();
        assert!(!conf.is_security_enabled());
        assert_eq!(conf.get(SERVICE_PRINCIPAL), None);
        assert_eq!(conf.server_name(), "default");
    }

    #[test]
    fn malformed_json_is_a_configuration_error() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("broken");
        std::fs::create_dir_all(&dir).unwrap();
        write(&dir, "core-site.json", "{ not json");
        let factory = BaseConfigurationFactory::new(tmp.path());
        let err = factory.init_configuration("broken", "broken", None, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { ref server, .. } if server == "broken"));
    }

    #[test]
    fn request_props_cannot_override_identity_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = BaseConfigurationFactory::new(tmp.path());
        for key in ["dlagent.service.user.impersonation", "Hadoop.Security.Authentication", "dlagent.sasl.connection.retries"] {
            let mut extra = BTreeMap::new();
            extra.insert(key.to_string(), "false".to_string());
            let err = factory.init_configuration("hive", "hive", Some("alice"), &extra).unwrap_err();
            assert!(matches!(err, GatewayError::Configuration { ref server, .. } if server == "hive"), "{}", key);
        }
    }

    #[test]
    fn user_outside_server_directory_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let servers = tmp.path().join("servers");
        let hive = servers.join("hive");
        std::fs::create_dir_all(&hive).unwrap();
        write(&hive, "dlagent-site.json", r#"{"dlagent.service.user.impersonation": true}"#);
        write(tmp.path(), "evil-user.json", r#"{"dlagent.service.user.impersonation": false}"#);

        let factory = BaseConfigurationFactory::new(&servers);
        let conf = factory.init_configuration("hive", "hive", Some("../../evil"), &BTreeMap::new()).unwrap();
        assert_eq!(conf.get(SERVICE_USER_IMPERSONATION), Some("true"));
    }

    #[test]
    fn nested_values_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("s");
        std::fs::create_dir_all(&dir).unwrap();
        write(&dir, "core-site.json", r#"{"a": {"b": 1}}"#);
        let factory = BaseConfigurationFactory::new(tmp.path());
        assert!(factory.init_configuration("s", "s", None, &BTreeMap::new()).is_err());
    }
}

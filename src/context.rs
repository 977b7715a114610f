//! Per-request parameter bag.
//! Built once from the inbound request and read-only afterwards; never shared across requests.

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{Configuration, DEFAULT_SERVER_NAME};
use crate::error::{GatewayError, GatewayResult};

static RESTRICTED_DIRECTORY_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_\-.]+$").expect("static directory-name pattern"));

static USER_FILE_COMPONENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.@$\-]*$").expect("static user-name pattern"));

/// Server names double as configuration directory names, so they must not escape the
/// servers root: only `[a-z0-9_-.]`, and never "." or "..".
pub fn is_valid_restricted_directory_name(name: &str) -> bool {
    name != "." && name != ".." && RESTRICTED_DIRECTORY_NAME.is_match(name)
}

/// Whether `user` can name a per-user override file inside a server directory: a single path
/// component starting with a letter or digit, so no separators and no "." or "..".
pub fn is_valid_user_file_name(user: &str) -> bool {
    USER_FILE_COMPONENT.is_match(user)
}

/// Lower-case a server name (or fall back to "default") and validate it.
pub fn normalize_server_name(name: Option<&str>) -> GatewayResult<String> {
    let normalized = match name.map(str::trim) {
        Some(n) if !n.is_empty() => n.to_lowercase(),
        _ => DEFAULT_SERVER_NAME.to_string(),
    };
    if !is_valid_restricted_directory_name(&normalized) {
        return Err(GatewayError::InvalidServerName(normalized));
    }
    Ok(normalized)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub type_name: String,
    pub index: usize,
    pub projected: bool,
}

impl ColumnDescriptor {
    pub fn new<N: Into<String>, T: Into<String>>(name: N, type_name: T, index: usize) -> Self {
        Self { name: name.into(), type_name: type_name.into(), index, projected: true }
    }
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    server_name: String,
    config: String,
    user: String,
    data_source: String,
    operation: String,
    columns: Vec<ColumnDescriptor>,
    transaction_id: Option<String>,
    session_id: Option<String>,
    segment_id: Option<u32>,
    total_segments: Option<u32>,
    additional_config_props: BTreeMap<String, String>,
    configuration: Arc<Configuration>,
}

impl RequestContext {
    /// Fails with `InvalidServerName` when the (lower-cased) server name would not be a
    /// safe directory name. The configuration directory defaults to the server name.
    pub fn new<U: Into<String>>(server_name: Option<&str>, user: U) -> GatewayResult<Self> {
        let server_name = normalize_server_name(server_name)?;
        Ok(Self {
            config: server_name.clone(),
            server_name,
            user: user.into(),
            data_source: String::new(),
            operation: String::new(),
            columns: Vec::new(),
            transaction_id: None,
            session_id: None,
            segment_id: None,
            total_segments: None,
            additional_config_props: BTreeMap::new(),
            configuration: Arc::new(Configuration::new()),
        })
    }

    /// Point the request at a different configuration directory than the server name.
    pub fn with_config(mut self, config: &str) -> GatewayResult<Self> {
        let config = config.trim();
        if !is_valid_restricted_directory_name(config) {
            return Err(GatewayError::InvalidServerName(config.to_string()));
        }
        self.config = config.to_string();
        Ok(self)
    }

    pub fn with_data_source<S: Into<String>>(mut self, data_source: S) -> Self {
        self.data_source = data_source.into();
        self
    }

    pub fn with_operation<S: Into<String>>(mut self, operation: S) -> Self {
        self.operation = operation.into();
        self
    }

    pub fn with_columns(mut self, columns: Vec<ColumnDescriptor>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_transaction_id<S: Into<String>>(mut self, xid: S) -> Self {
        self.transaction_id = Some(xid.into());
        self
    }

    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_segment(mut self, segment_id: u32, total_segments: u32) -> Self {
        self.segment_id = Some(segment_id);
        self.total_segments = Some(total_segments);
        self
    }

    pub fn with_config_prop<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.additional_config_props.insert(key.into(), value.into());
        self
    }

    /// Attach the server configuration built for this request.
    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = Arc::new(configuration);
        self
    }

    pub fn server_name(&self) -> &str { &self.server_name }
    pub fn config(&self) -> &str { &self.config }
    pub fn user(&self) -> &str { &self.user }
    pub fn data_source(&self) -> &str { &self.data_source }
    pub fn operation(&self) -> &str { &self.operation }
    pub fn columns(&self) -> &[ColumnDescriptor] { &self.columns }
    pub fn transaction_id(&self) -> Option<&str> { self.transaction_id.as_deref() }
    pub fn session_id(&self) -> Option<&str> { self.session_id.as_deref() }
    pub fn segment_id(&self) -> Option<u32> { self.segment_id }
    pub fn total_segments(&self) -> Option<u32> { self.total_segments }
    pub fn additional_config_props(&self) -> &BTreeMap<String, String> { &self.additional_config_props }
    pub fn configuration(&self) -> &Configuration { &self.configuration }

    /// Columns the engine actually asked for.
    pub fn projected_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| c.projected)
    }
}

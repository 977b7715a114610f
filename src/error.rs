//! Gateway error taxonomy and mapping helpers.
//! Every failure that leaves the identity/retry core is one of these variants. Configuration
//! and authentication failures carry the server name so an operator can tell which backend
//! cluster is misconfigured.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Fatal, never retried: bad retry count, missing principal/keytab, malformed values.
    #[error("configuration error for server '{server}': {message}")]
    Configuration { server: String, message: String },

    /// Server name failed the restricted directory-name check.
    #[error("invalid server name '{0}'")]
    InvalidServerName(String),

    /// Login or hostname resolution failed.
    #[error("authentication failed for server '{server}': {message}")]
    Authentication {
        server: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O-class failure reported by a backend client. The only class the retry
    /// executor inspects for the transient GSS signature.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Any other backend failure.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn config<S: Into<String>, M: Into<String>>(server: S, message: M) -> Self {
        GatewayError::Configuration { server: server.into(), message: message.into() }
    }

    pub fn auth<S: Into<String>, M: Into<String>>(server: S, message: M) -> Self {
        GatewayError::Authentication { server: server.into(), message: message.into(), source: None }
    }

    pub fn auth_with_source<S, M, E>(server: S, message: M, source: E) -> Self
    where
        S: Into<String>,
        M: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        GatewayError::Authentication {
            server: server.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn code_str(&self) -> &'static str {
        match self {
            GatewayError::Configuration { .. } => "configuration_error",
            GatewayError::InvalidServerName(_) => "invalid_server_name",
            GatewayError::Authentication { .. } => "authentication_error",
            GatewayError::Io(_) => "backend_io_error",
            GatewayError::Backend(_) => "backend_error",
        }
    }

    /// Server name attached to the failure, when there is one.
    pub fn server(&self) -> Option<&str> {
        match self {
            GatewayError::Configuration { server, .. } | GatewayError::Authentication { server, .. } => Some(server.as_str()),
            GatewayError::InvalidServerName(name) => Some(name.as_str()),
            GatewayError::Io(_) | GatewayError::Backend(_) => None,
        }
    }

    /// Map to the HTTP status the service layer answers with.
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::InvalidServerName(_) => 400,
            GatewayError::Authentication { .. } => 401,
            GatewayError::Configuration { .. } => 500,
            GatewayError::Io(_) => 503,
            GatewayError::Backend(_) => 500,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;

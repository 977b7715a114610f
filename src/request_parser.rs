//! Builds a `RequestContext` from the `X-GP-*` headers the query engine sends.
//! Header names are matched case-insensitively; the transport layer hands us a plain map.

use std::collections::HashMap;

use tracing::debug;

use crate::context::{ColumnDescriptor, RequestContext};
use crate::error::{GatewayError, GatewayResult};

const PREFIX: &str = "x-gp-";
const OPTIONS_PREFIX: &str = "options-";

const USER: &str = "user";
const OPTIONS_SERVER: &str = "options-server";
const OPTIONS_CONFIG: &str = "options-config";
const DATA_DIR: &str = "data-dir";
const OPERATION: &str = "operation";
const XID: &str = "xid";
const SESSION_ID: &str = "session-id";
const SEGMENT_ID: &str = "segment-id";
const SEGMENT_COUNT: &str = "segment-count";
const ATTRS: &str = "attrs";

/// Upper bound on `X-GP-ATTRS`; matches the widest table the query engine can describe.
pub const MAX_COLUMNS: usize = 1600;

#[derive(Debug, Default, Clone, Copy)]
pub struct RequestParser;

impl RequestParser {
    pub fn parse(&self, headers: &HashMap<String, String>) -> GatewayResult<RequestContext> {
        // strip the prefix once so lookups below use the short names
        let params: HashMap<String, &str> = headers
            .iter()
            .filter_map(|(k, v)| {
                let k = k.to_ascii_lowercase();
                k.strip_prefix(PREFIX).map(|short| (short.to_string(), v.as_str()))
            })
            .collect();

        let server = params.get(OPTIONS_SERVER).copied();
        let user = required(&params, USER, server)?;
        let mut ctx = RequestContext::new(server, user)?
            .with_data_source(required(&params, DATA_DIR, server)?);

        if let Some(config) = params.get(OPTIONS_CONFIG) {
            ctx = ctx.with_config(config)?;
        }
        if let Some(op) = params.get(OPERATION) {
            ctx = ctx.with_operation(*op);
        }
        if let Some(xid) = params.get(XID) {
            ctx = ctx.with_transaction_id(*xid);
        }
        if let Some(sid) = params.get(SESSION_ID) {
            ctx = ctx.with_session_id(*sid);
        }
        if let Some(seg) = params.get(SEGMENT_ID) {
            let total = required(&params, SEGMENT_COUNT, server)?;
            let segment_id = number(seg, SEGMENT_ID, ctx.server_name())?;
            let total_segments = number(total, SEGMENT_COUNT, ctx.server_name())?;
            ctx = ctx.with_segment(segment_id, total_segments);
        }

        let columns = parse_columns(&params, ctx.server_name())?;
        ctx = ctx.with_columns(columns);

        let mut extra: Vec<(&String, &&str)> = params
            .iter()
            .filter(|(k, _)| k.starts_with(OPTIONS_PREFIX) && k.as_str() != OPTIONS_SERVER && k.as_str() != OPTIONS_CONFIG)
            .collect();
        extra.sort();
        for (k, v) in extra {
            ctx = ctx.with_config_prop(&k[OPTIONS_PREFIX.len()..], *v);
        }

        debug!(
            target: "dlagent::request",
            "parsed request server='{}' config='{}' user='{}' operation='{}' columns={}",
            ctx.server_name(), ctx.config(), ctx.user(), ctx.operation(), ctx.columns().len()
        );
        Ok(ctx)
    }
}

fn required<'a>(params: &HashMap<String, &'a str>, name: &str, server: Option<&str>) -> GatewayResult<&'a str> {
    params
        .get(name)
        .copied()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| GatewayError::config(
            server.unwrap_or(crate::config::DEFAULT_SERVER_NAME),
            format!("missing required header X-GP-{}", name.to_ascii_uppercase()),
        ))
}

fn number(value: &str, name: &str, server: &str) -> GatewayResult<u32> {
    value.trim().parse::<u32>().map_err(|_| {
        GatewayError::config(server, format!("header X-GP-{} must be a number, got '{}'", name.to_ascii_uppercase(), value))
    })
}

fn parse_columns(params: &HashMap<String, &str>, server: &str) -> GatewayResult<Vec<ColumnDescriptor>> {
    let Some(count) = params.get(ATTRS) else { return Ok(Vec::new()) };
    let count = number(count, ATTRS, server)? as usize;
    if count > MAX_COLUMNS {
        return Err(GatewayError::config(
            server,
            format!("header X-GP-ATTRS declares {} columns, at most {} are supported", count, MAX_COLUMNS),
        ));
    }
    let mut columns = Vec::with_capacity(count);
    for i in 0..count {
        let name = required(params, &format!("attr-name{}", i), Some(server))?;
        let type_name = required(params, &format!("attr-typename{}", i), Some(server))?;
        let mut col = ColumnDescriptor::new(name, type_name, i);
        if let Some(p) = params.get(&format!("attr-projected{}", i)) {
            col.projected = p.eq_ignore_ascii_case("true");
        }
        columns.push(col);
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parses_full_request() {
        let h = headers(&[
            ("X-GP-USER", "alice"),
            ("X-GP-OPTIONS-SERVER", "Hive_Prod"),
            ("X-GP-DATA-DIR", "sales.orders"),
            ("X-GP-OPERATION", "fragments"),
            ("X-GP-XID", "1234"),
            ("X-GP-SESSION-ID", "77"),
            ("X-GP-SEGMENT-ID", "2"),
            ("X-GP-SEGMENT-COUNT", "8"),
            ("X-GP-ATTRS", "2"),
            ("X-GP-ATTR-NAME0", "id"),
            ("X-GP-ATTR-TYPENAME0", "int8"),
            ("X-GP-ATTR-NAME1", "note"),
            ("X-GP-ATTR-TYPENAME1", "text"),
            ("X-GP-ATTR-PROJECTED1", "false"),
            ("x-gp-options-hive.metastore.uris", "thrift://hms:9083"),
        ]);
        let ctx = RequestParser.parse(&h).unwrap();
        assert_eq!(ctx.server_name(), "hive_prod");
        assert_eq!(ctx.user(), "alice");
        assert_eq!(ctx.data_source(), "sales.orders");
        assert_eq!(ctx.operation(), "fragments");
        assert_eq!(ctx.transaction_id(), Some("1234"));
        assert_eq!(ctx.session_id(), Some("77"));
        assert_eq!((ctx.segment_id(), ctx.total_segments()), (Some(2), Some(8)));
        assert_eq!(ctx.columns().len(), 2);
        assert!(!ctx.columns()[1].projected);
        assert_eq!(
            ctx.additional_config_props().get("hive.metastore.uris").map(String::as_str),
            Some("thrift://hms:9083")
        );
    }

    #[test]
    fn missing_user_is_a_configuration_error() {
        let h = headers(&[("X-GP-DATA-DIR", "t")]);
        let err = RequestParser.parse(&h).unwrap_err();
        assert!(err.to_string().contains("X-GP-USER"));
    }

    #[test]
    fn bad_server_name_fails() {
        let h = headers(&[("X-GP-USER", "a"), ("X-GP-DATA-DIR", "t"), ("X-GP-OPTIONS-SERVER", "../../etc")]);
        assert!(matches!(RequestParser.parse(&h), Err(GatewayError::InvalidServerName(_))));
    }

    #[test]
    fn oversized_column_count_rejected_without_allocating() {
        let h = headers(&[("X-GP-USER", "a"), ("X-GP-DATA-DIR", "t"), ("X-GP-ATTRS", "4294967295")]);
        let err = RequestParser.parse(&h).unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
        assert!(err.to_string().contains("X-GP-ATTRS"));

        let over = (MAX_COLUMNS + 1).to_string();
        let h = headers(&[("X-GP-USER", "a"), ("X-GP-DATA-DIR", "t"), ("X-GP-ATTRS", over.as_str())]);
        assert!(RequestParser.parse(&h).is_err());
    }

    #[test]
    fn non_numeric_segment_rejected() {
        let h = headers(&[
            ("X-GP-USER", "a"),
            ("X-GP-DATA-DIR", "t"),
            ("X-GP-SEGMENT-ID", "one"),
            ("X-GP-SEGMENT-COUNT", "3"),
        ]);
        assert!(matches!(RequestParser.parse(&h), Err(GatewayError::Configuration { .. })));
    }
}

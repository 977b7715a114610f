//! Canonical local host name for `_HOST` principals.
//!
//! Kerberos service principals are registered under the fully qualified name, while
//! `gethostname` often yields the short one. Forward-resolve the raw name and take the reverse
//! name of the first non-loopback address; fall back to the raw name when DNS has nothing.

use std::net::IpAddr;

use tracing::{debug, warn};

pub fn canonical_hostname() -> std::io::Result<String> {
    let raw = whoami::fallible::hostname()?;
    Ok(canonicalize(
        &raw,
        |host| dns_lookup::lookup_host(host).ok().map(|addrs| addrs.into_iter().collect()),
        |ip| dns_lookup::lookup_addr(ip).ok(),
    ))
}

pub(crate) fn canonicalize<F, R>(raw: &str, forward: F, reverse: R) -> String
where
    F: Fn(&str) -> Option<Vec<IpAddr>>,
    R: Fn(&IpAddr) -> Option<String>,
{
    let addrs = forward(raw).unwrap_or_default();
    let canonical = addrs
        .iter()
        .filter(|ip| !ip.is_loopback())
        .find_map(|ip| reverse(ip).map(|name| name.trim_end_matches('.').to_string()).filter(|name| is_host_name(name)));

    match canonical {
        Some(name) => {
            debug!(target: "dlagent::login", "canonical hostname for '{}' is '{}'", raw, name);
            name
        }
        None => {
            warn!(
                target: "dlagent::login",
                "unable to canonicalize hostname '{}' through DNS, using it as is",
                raw
            );
            raw.to_string()
        }
    }
}

fn is_host_name(name: &str) -> bool {
    !name.is_empty() && name.parse::<IpAddr>().is_err() && !name.eq_ignore_ascii_case("localhost")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const LAN: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 4, 17));
    const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn short_name_resolves_to_fqdn() {
        let name = canonicalize(
            "gw-01",
            |_| Some(vec![LOOPBACK, LAN]),
            |ip| if *ip == LAN { Some("gw-01.corp.example.com.".to_string()) } else { Some("localhost".to_string()) },
        );
        assert_eq!(name, "gw-01.corp.example.com");
    }

    #[test]
    fn falls_back_to_raw_name() {
        assert_eq!(canonicalize("gw-01", |_| None, |_| None), "gw-01");
        assert_eq!(canonicalize("gw-01", |_| Some(vec![LOOPBACK]), |_| Some("localhost".to_string())), "gw-01");
        // reverse lookup without a PTR record hands back the address itself
        assert_eq!(canonicalize("gw-01", |_| Some(vec![LAN]), |ip| Some(ip.to_string())), "gw-01");
    }
}

//! Endpoint parsing.
//!
//! Accepts `scheme://host[:port]`, bare `host:port` and IPv6 bracket
//! notation (`[::1]:port`).

use url::Url;

/// Whether the string starts with something that looks like a URI scheme
/// (e.g. `https://`, `grpc://`).
fn has_scheme(endpoint: &str) -> bool {
    match endpoint.find("//") {
        Some(idx) if idx > 0 => endpoint[..idx]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == ':' || c == '_' || c == '-'),
        _ => false,
    }
}

/// Whether the authority part of a URI spells out a port.
fn has_explicit_port(uri: &str) -> bool {
    let authority = uri.split_once("//").map(|(_, rest)| rest).unwrap_or(uri);
    let authority = authority.split(['/', '?', '#']).next().unwrap_or("");
    match authority.rfind(':') {
        Some(idx) => {
            idx > authority.rfind(']').unwrap_or(0)
                && idx + 1 < authority.len()
                && authority[idx + 1..].chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Split an endpoint into hostname and port.
///
/// The default port is 443 for `https`-prefixed endpoints, 80 for `http`,
/// and -1 otherwise. A missing or out-of-range port collapses to the
/// default. IPv6 hosts are returned without brackets.
pub fn extract_host_and_port(endpoint: &str) -> (String, i32) {
    let lower = endpoint.to_lowercase();
    let default_port = if lower.starts_with("https") {
        443
    } else if lower.starts_with("http") {
        80
    } else {
        -1
    };

    let uri = if has_scheme(endpoint) {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    };

    match Url::parse(&uri) {
        Ok(url) => {
            let host = url
                .host_str()
                .unwrap_or_default()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_string();
            // the parser strips scheme-default ports, but an explicitly
            // written :80 or :443 still counts as a port here
            let port = url
                .port()
                .map(i32::from)
                .or_else(|| {
                    has_explicit_port(&uri)
                        .then(|| url.port_or_known_default().map(i32::from))
                        .flatten()
                })
                .unwrap_or(default_port);
            (host, port)
        }
        Err(_) => {
            // Unparseable endpoint; salvage `[host]:port` by hand.
            let (host, rest) = match (endpoint.find('['), endpoint.find(']')) {
                (Some(open), Some(close)) if close > open => (
                    endpoint[open + 1..close].to_string(),
                    &endpoint[close + 1..],
                ),
                _ => match endpoint.split_once(':') {
                    Some((host, _)) => (host.to_string(), &endpoint[host.len()..]),
                    None => (endpoint.to_string(), ""),
                },
            };
            let port = rest
                .trim_start_matches(':')
                .parse::<i32>()
                .ok()
                .filter(|p| (0..=65535).contains(p))
                .unwrap_or(default_port);
            (host, port)
        }
    }
}

// Best-effort client address for request logging
//
// Order: RFC 7239 `Forwarded: for=`, first hop of `X-Forwarded-For`,
// `X-Real-IP`, then the socket address from ConnectInfo.

use axum::{extract::ConnectInfo, http::HeaderMap, http::Extensions};
use std::net::SocketAddr;

/// Pick the most specific client address available
#[must_use]
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> String {
    if let Some(ip) = headers
        .get("forwarded")
        .and_then(|h| h.to_str().ok())
        .and_then(forwarded_for)
    {
        return ip;
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    if let Some(ip) = headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return ip.to_string();
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |ci| ci.0.ip().to_string())
}

/// Extract the first `for=` node of a `Forwarded` header
///
/// Handles `for="[2001:db8::1]:4711"`, `for=192.0.2.60` and
/// `for="192.0.2.60:8080"`. Obfuscated identifiers are returned as-is.
fn forwarded_for(value: &str) -> Option<String> {
    let node = value
        .split([',', ';'])
        .map(str::trim)
        .find_map(|pair| {
            let (key, val) = pair.split_once('=')?;
            key.trim().eq_ignore_ascii_case("for").then_some(val.trim())
        })?
        .trim_matches('"');

    let ip = if let Some(rest) = node.strip_prefix('[') {
        rest.split_once(']')?.0
    } else if node.matches(':').count() == 1 {
        node.split_once(':').map_or(node, |(host, _port)| host)
    } else {
        node
    };

    (!ip.is_empty()).then(|| ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_forwarded_bracketed_ipv6() {
        let h = headers(&[("forwarded", "for=\"[2001:db8:cafe::17]:4711\";proto=https")]);
        assert_eq!(client_ip(&h, &Extensions::new()), "2001:db8:cafe::17");
    }

    #[test]
    fn test_forwarded_plain_and_with_port() {
        assert_eq!(forwarded_for("for=192.0.2.60;proto=http").as_deref(), Some("192.0.2.60"));
        assert_eq!(forwarded_for("for=\"192.0.2.60:8080\"").as_deref(), Some("192.0.2.60"));
        assert_eq!(
            forwarded_for("proto=http; For=198.51.100.17, for=10.0.0.1").as_deref(),
            Some("198.51.100.17")
        );
        assert_eq!(forwarded_for("proto=http"), None);
    }

    #[test]
    fn test_header_precedence() {
        let h = headers(&[
            ("x-forwarded-for", "203.0.113.7, 10.0.0.2"),
            ("x-real-ip", "198.51.100.1"),
        ]);
        assert_eq!(client_ip(&h, &Extensions::new()), "203.0.113.7");

        let h = headers(&[("x-real-ip", "198.51.100.1")]);
        assert_eq!(client_ip(&h, &Extensions::new()), "198.51.100.1");
    }

    #[test]
    fn test_socket_fallback() {
        let mut ext = Extensions::new();
        ext.insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 50000))));
        assert_eq!(client_ip(&HeaderMap::new(), &ext), "127.0.0.1");
        assert_eq!(client_ip(&HeaderMap::new(), &Extensions::new()), "unknown");
    }
}

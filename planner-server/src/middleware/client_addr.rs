use actix_web::http::header::{self, HeaderMap};
use actix_web::HttpRequest;
use std::net::{IpAddr, SocketAddr};

const X_REAL_IP: &str = "x-real-ip";
const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Every source of a client address an inbound request can carry. A field is `None` when the
/// source is missing or does not hold a usable address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InboundAddrs {
    /// `for=` of the first element of the RFC 7239 `Forwarded` header.
    pub framework_ip: Option<IpAddr>,
    /// `X-Real-IP`, as recorded by the reverse proxy.
    pub proxy_remote_addr: Option<IpAddr>,
    /// Address of the peer on the other end of the TCP connection.
    pub socket_addr: Option<IpAddr>,
    /// Left-most entry of `X-Forwarded-For`.
    pub forwarded_for: Option<IpAddr>,
}

impl InboundAddrs {
    pub fn from_request(req: &HttpRequest) -> Self {
        let headers = req.headers();

        Self {
            framework_ip: header_str(headers, header::FORWARDED.as_str())
                .and_then(client_ip_from_forwarded),
            proxy_remote_addr: header_str(headers, X_REAL_IP).and_then(parse_ip_maybe_with_port),
            socket_addr: req.peer_addr().map(|a| a.ip()),
            forwarded_for: header_str(headers, X_FORWARDED_FOR).and_then(client_ip_from_xff),
        }
    }

    pub fn client_ip(&self) -> Option<IpAddr> {
        self.framework_ip
            .or(self.proxy_remote_addr)
            .or(self.socket_addr)
            .or(self.forwarded_for)
    }
}

#[inline]
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[inline]
fn client_ip_from_xff(xff: &str) -> Option<IpAddr> {
    // Left-most IP is the original client
    let left_most_ip = xff.split_once(',').map(|(a, _)| a).unwrap_or(xff);
    left_most_ip.trim().parse::<IpAddr>().ok()
}

fn client_ip_from_forwarded(forwarded: &str) -> Option<IpAddr> {
    // The first element was added by the proxy closest to the client
    let first_element = forwarded.split(',').next()?;

    let for_value = first_element.split(';').find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("for") {
            Some(value.trim().trim_matches('"'))
        } else {
            None
        }
    })?;

    parse_ip_maybe_with_port(for_value)
}

fn parse_ip_maybe_with_port(value: &str) -> Option<IpAddr> {
    let value = value.trim();

    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(ip);
    }

    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Some(addr.ip());
    }

    value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .and_then(|v| v.parse::<IpAddr>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn client_ip_of(req: &HttpRequest) -> Option<IpAddr> {
        InboundAddrs::from_request(req).client_ip()
    }

    #[test]
    fn test_fallback_order() {
        let req = TestRequest::default()
            .insert_header(("forwarded", "for=1.1.1.1"))
            .insert_header(("x-real-ip", "2.2.2.2"))
            .insert_header(("x-forwarded-for", "4.4.4.4"))
            .peer_addr("3.3.3.3:4000".parse().unwrap())
            .to_http_request();
        assert_eq!(client_ip_of(&req), Some(ip("1.1.1.1")));

        let req = TestRequest::default()
            .insert_header(("x-real-ip", "2.2.2.2"))
            .insert_header(("x-forwarded-for", "4.4.4.4"))
            .peer_addr("3.3.3.3:4000".parse().unwrap())
            .to_http_request();
        assert_eq!(client_ip_of(&req), Some(ip("2.2.2.2")));

        let req = TestRequest::default()
            .insert_header(("x-forwarded-for", "4.4.4.4"))
            .peer_addr("3.3.3.3:4000".parse().unwrap())
            .to_http_request();
        assert_eq!(client_ip_of(&req), Some(ip("3.3.3.3")));

        let req = TestRequest::default()
            .insert_header(("x-forwarded-for", "4.4.4.4, 10.0.0.9"))
            .to_http_request();
        assert_eq!(client_ip_of(&req), Some(ip("4.4.4.4")));
    }

    #[test]
    fn test_no_usable_address() {
        let req = TestRequest::default().to_http_request();
        assert_eq!(InboundAddrs::from_request(&req).client_ip(), None);

        let req = TestRequest::default()
            .insert_header(("forwarded", "for=unknown"))
            .insert_header(("x-real-ip", "not-an-ip"))
            .insert_header(("x-forwarded-for", "garbage, 1.2.3.4"))
            .to_http_request();
        let addrs = InboundAddrs::from_request(&req);
        assert_eq!(addrs, InboundAddrs::default());
        assert_eq!(addrs.client_ip(), None);
    }

    #[test]
    fn test_unusable_source_falls_through() {
        let req = TestRequest::default()
            .insert_header(("forwarded", "for=_hidden;proto=https"))
            .insert_header(("x-real-ip", "5.6.7.8"))
            .to_http_request();
        assert_eq!(client_ip_of(&req), Some(ip("5.6.7.8")));
    }

    #[test]
    fn test_forwarded_formats() {
        assert_eq!(
            client_ip_from_forwarded("for=192.0.2.60;proto=http;by=203.0.113.43"),
            Some(ip("192.0.2.60"))
        );
        assert_eq!(
            client_ip_from_forwarded("For=\"[2001:db8:cafe::17]:4711\""),
            Some(ip("2001:db8:cafe::17"))
        );
        assert_eq!(
            client_ip_from_forwarded("proto=https; for=\"192.0.2.43:47011\", for=198.51.100.17"),
            Some(ip("192.0.2.43"))
        );
        assert_eq!(
            client_ip_from_forwarded("for=\"[2001:db8::1]\""),
            Some(ip("2001:db8::1"))
        );
        assert_eq!(client_ip_from_forwarded("by=203.0.113.43"), None);
    }

    #[test]
    fn xff_leftmost_used() {
        assert_eq!(client_ip_from_xff("1.2.3.4, 10.0.0.9"), Some(ip("1.2.3.4")));
        assert_eq!(client_ip_from_xff(" 2001:db8::2 "), Some(ip("2001:db8::2")));
    }
}

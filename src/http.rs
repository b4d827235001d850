//! HTTP 辅助工具：客户端 IP 识别与安全头。

use axum::body::Body as AxumBody;
use axum::http::{HeaderMap, HeaderValue, Request, header};
use axum::{middleware, response::Response};
use std::net::IpAddr;

/// 从 `x-forwarded-for` 的第一跳解析客户端 IP。
pub fn extract_forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<IpAddr>().ok())
}

/// 计数与封禁使用的客户端 IP；仅在信任反向代理时采用转发头。
pub fn resolve_client_ip(headers: &HeaderMap, peer: IpAddr, trust_forwarded: bool) -> IpAddr {
    if trust_forwarded {
        extract_forwarded_ip(headers).unwrap_or(peer)
    } else {
        peer
    }
}

/// 添加基础安全响应头。
pub async fn add_security_headers(request: Request<AxumBody>, next: middleware::Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn forwarded(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn forwarded_header_needs_trust() {
        let peer = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let headers = forwarded("203.0.113.7, 10.0.0.1");
        assert_eq!(resolve_client_ip(&headers, peer, false), peer);
        assert_eq!(
            resolve_client_ip(&headers, peer, true),
            "203.0.113.7".parse::<IpAddr>().expect("ip")
        );
    }

    #[test]
    fn garbage_forwarded_header_falls_back_to_peer() {
        let peer = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
        assert_eq!(resolve_client_ip(&forwarded("unknown"), peer, true), peer);
        assert_eq!(resolve_client_ip(&HeaderMap::new(), peer, true), peer);
    }
}

use crate::error::{NotifyError, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tracing::warn;
use url::{Host, Url};

/// 校验通知目标地址
///
/// 只接受 http/https；拒绝 localhost 以及回环、私有、链路本地、未指定、
/// 广播和文档保留地址。
pub fn validate_endpoint_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| NotifyError::invalid_endpoint(raw, e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(NotifyError::invalid_endpoint(
                raw,
                format!("unsupported scheme: {}", other),
            ))
        }
    }

    match url.host() {
        None => Err(NotifyError::invalid_endpoint(raw, "missing host")),
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            if domain == "localhost" || domain.ends_with(".localhost") {
                Err(NotifyError::invalid_endpoint(raw, "localhost is not allowed"))
            } else {
                Ok(url)
            }
        }
        Some(Host::Ipv4(ip)) => check_ip(raw, IpAddr::V4(ip)).map(|_| url),
        Some(Host::Ipv6(ip)) => check_ip(raw, IpAddr::V6(ip)).map(|_| url),
    }
}

/// 发送前检查域名解析出的地址，防止 DNS 指向内网
///
/// 返回通过检查的地址，发送时应只连接这些地址；字面 IP 返回空列表。
pub async fn ensure_public_resolution(url: &Url) -> Result<Vec<SocketAddr>> {
    let Some(Host::Domain(domain)) = url.host() else {
        return Ok(Vec::new());
    };
    let port = url.port_or_known_default().unwrap_or(443);

    let addrs = tokio::net::lookup_host((domain, port)).await.map_err(|e| {
        NotifyError::invalid_endpoint(url.as_str(), format!("resolution failed: {}", e))
    })?;

    let addrs: Vec<SocketAddr> = addrs.collect();
    if addrs.is_empty() {
        return Err(NotifyError::invalid_endpoint(url.as_str(), "resolved to no addresses"));
    }

    for addr in &addrs {
        if is_blocked_ip(addr.ip()) {
            warn!(url = %url, resolved = %addr.ip(), "Endpoint resolves to a blocked address");
            return Err(NotifyError::invalid_endpoint(
                url.as_str(),
                format!("resolves to blocked address {}", addr.ip()),
            ));
        }
    }

    Ok(addrs)
}

fn check_ip(raw: &str, ip: IpAddr) -> Result<()> {
    if is_blocked_ip(ip) {
        return Err(NotifyError::invalid_endpoint(
            raw,
            format!("address {} is not allowed", ip),
        ));
    }
    Ok(())
}

pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => is_blocked_v6(v6),
    }
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
}

fn is_blocked_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_v4(v4);
    }

    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7
        || (first & 0xfe00) == 0xfc00
        // fe80::/10
        || (first & 0xffc0) == 0xfe80
        // 2001:db8::/32
        || (first == 0x2001 && ip.segments()[1] == 0x0db8)
}

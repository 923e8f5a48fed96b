use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::redirect::{Attempt, Policy};
use reqwest::{Client, Url};

/// 全局复用的 HTTP Client（统一连接池/Keep-Alive），避免每次请求重复创建。
///
/// 说明：
/// - 头像拉取的整体超时按请求粒度设置（`RequestBuilder::timeout`），这里只限制建连阶段。
/// - `Client` 本身是线程安全的，适合全局复用。
/// - 头像地址来自不可信的调用方：默认 Client 只会连接公网地址，
///   DNS 解析结果与每一跳重定向都会重新校验。
static CLIENT_AVATAR: OnceCell<Client> = OnceCell::new();

/// 允许访问内网地址的 Client，仅在 `avatar_allow_private_hosts` 开启时使用。
static CLIENT_AVATAR_PRIVATE: OnceCell<Client> = OnceCell::new();

/// 建连超时上限，整体超时仍以配置为准。
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// 最多跟随的重定向次数
const MAX_REDIRECTS: usize = 3;

/// 拉取外部头像用的 HTTP Client。
pub fn client_avatar(allow_private_hosts: bool) -> Result<&'static Client, reqwest::Error> {
    let cell = if allow_private_hosts {
        &CLIENT_AVATAR_PRIVATE
    } else {
        &CLIENT_AVATAR
    };
    cell.get_or_try_init(|| {
        let builder = Client::builder()
            .user_agent(concat!("devimpact-og/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(redirect_policy(allow_private_hosts));
        if allow_private_hosts {
            builder.build()
        } else {
            builder.dns_resolver(Arc::new(PublicOnlyResolver)).build()
        }
    })
}

fn redirect_policy(allow_private_hosts: bool) -> Policy {
    Policy::custom(move |attempt: Attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            return attempt.error("重定向次数过多");
        }
        if !matches!(attempt.url().scheme(), "http" | "https") {
            return attempt.error("重定向到不支持的协议");
        }
        if !allow_private_hosts && let Err(reason) = check_public_host(attempt.url()) {
            return attempt.error(reason);
        }
        attempt.follow()
    })
}

/// 校验 URL 的主机部分。
///
/// IP 字面量不经过 DNS 解析器，必须在这里拦截；域名的解析结果由
/// `PublicOnlyResolver` 过滤。
pub fn check_public_host(url: &Url) -> Result<(), String> {
    let host = url.host_str().ok_or_else(|| "缺少主机".to_string())?;
    // IPv6 字面量以 `[..]` 形式出现
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return if is_private_ip(&ip) {
            Err(ip.to_string())
        } else {
            Ok(())
        };
    }
    let domain = host.trim_end_matches('.').to_ascii_lowercase();
    if domain == "localhost" || domain.ends_with(".localhost") {
        return Err(domain);
    }
    Ok(())
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 只返回公网地址的 DNS 解析器；全部解析结果都是内网地址时报错。
struct PublicOnlyResolver;

impl Resolve for PublicOnlyResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            let host = name.as_str().to_string();
            let resolved: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
                .await?
                .filter(|addr| !is_private_ip(&addr.ip()))
                .collect();
            if resolved.is_empty() {
                return Err(format!("{host} 未解析到任何公网地址").into());
            }
            let addrs: Addrs = Box::new(resolved.into_iter());
            Ok::<Addrs, BoxError>(addrs)
        })
    }
}

/// 回环、内网、链路本地、未指定、组播及各类保留地址都不是合法的头像来源。
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_ipv4(*v4),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_private_ipv4(v4);
            }
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                || is_ipv6_link_local(*v6)
                || is_ipv6_unique_local(*v6)
                || is_ipv6_documentation(*v6)
        }
    }
}

fn is_private_ipv4(ip: Ipv4Addr) -> bool {
    let o = ip.octets();
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_link_local()
        || ip.is_private()
        || ip.is_multicast()
        || ip.is_documentation()
        // 100.64.0.0/10 运营商级 NAT
        || (o[0] == 100 && (64..=127).contains(&o[1]))
        // 198.18.0.0/15 基准测试
        || (o[0] == 198 && (18..=19).contains(&o[1]))
        // 0.0.0.0/8 与 240.0.0.0/4
        || o[0] == 0
        || o[0] >= 240
}

fn is_ipv6_link_local(ip: Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

fn is_ipv6_unique_local(ip: Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

fn is_ipv6_documentation(ip: Ipv6Addr) -> bool {
    let s = ip.segments();
    s[0] == 0x2001 && s[1] == 0x0db8
}

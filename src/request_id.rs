use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

/// 请求追踪头
pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

tokio::task_local! {
    /// 当前请求绑定的 request_id，供渲染兜底日志关联请求。
    static CURRENT: String;
}

/// 获取当前请求上下文中的 request_id（不在请求任务内时为 None）。
pub fn current_request_id() -> Option<String> {
    CURRENT.try_with(Clone::clone).ok()
}

/// CDN/前置代理透传的 id 只接受短的安全字符集，其余一律重新生成。
fn accept_upstream_id(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    let ok = (1..=128).contains(&raw.len())
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    ok.then_some(raw)
}

fn pick_request_id(req: &Request) -> String {
    req.headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(accept_upstream_id)
        .map(str::to_string)
        .unwrap_or_else(|| format!("og_{}", Uuid::new_v4().simple()))
}

/// request_id 中间件：选定 id 后在 tracing span 与 task-local 中同时可见，并回写响应头。
pub async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = pick_request_id(&req);
    let span = tracing::info_span!("request", request_id = %request_id);

    let mut res = CURRENT
        .scope(request_id.clone(), next.run(req).instrument(span))
        .await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        res.headers_mut().insert(REQUEST_ID_HEADER.clone(), value);
    }
    res
}

#[cfg(test)]
mod tests {
    use super::accept_upstream_id;

    #[test]
    fn upstream_id_with_safe_chars_is_kept() {
        assert_eq!(accept_upstream_id(" cdn-123_abc.def "), Some("cdn-123_abc.def"));
    }

    #[test]
    fn upstream_id_empty_unsafe_or_long_is_rejected() {
        assert_eq!(accept_upstream_id(""), None);
        assert_eq!(accept_upstream_id("bad id"), None);
        assert_eq!(accept_upstream_id("bad/xx"), None);
        assert_eq!(accept_upstream_id(&"a".repeat(129)), None);
    }
}

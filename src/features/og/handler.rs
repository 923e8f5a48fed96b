use axum::{
    Router,
    extract::{Query, State, rejection::QueryRejection},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::IntoResponse,
    routing::get,
};

use crate::state::AppState;

use super::service::RenderedImage;
use super::types::OgQuery;

/// 共享缓存策略：CDN 与爬虫可缓存 1 小时，过期后 1 天内可先返回旧图再后台刷新
pub const OG_CACHE_CONTROL: &str = "public, max-age=3600, stale-while-revalidate=86400";

/// 标记本次响应使用的布局（profile|custom|default|fallback）
pub static OG_VARIANT_HEADER: HeaderName = HeaderName::from_static("x-og-variant");

#[utoipa::path(
    get,
    path = "/og",
    summary = "生成 Open Graph 预览图",
    description = "根据查询参数渲染 1200x630 的社交分享预览图。按 username+name / title / 无参数 选择个人主页、自定义页面或默认品牌布局。任何参数组合均返回 200 与一张合法图片，渲染失败时返回品牌兜底图。",
    params(OgQuery),
    responses(
        (status = 200, description = "PNG/JPEG/WebP/SVG 图片字节",
            headers(
                ("Cache-Control" = String, description = "public, max-age=3600, stale-while-revalidate=86400"),
                ("ETag" = String, description = "图片内容摘要"),
                ("X-OG-Variant" = String, description = "profile | custom | default | fallback")
            )
        )
    ),
    tag = "OG"
)]
pub async fn og_image(
    State(state): State<AppState>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> impl IntoResponse {
    // 无法解析的 query 按无参数处理，接口不返回 4xx
    let q = match query {
        Ok(Query(pairs)) => OgQuery::from_pairs(pairs),
        Err(e) => {
            tracing::warn!("query 解析失败，按无参数处理: {}", e);
            OgQuery::default()
        }
    };

    let img = state.renderer.render(&q).await;
    (StatusCode::OK, image_headers(&img), img.bytes)
}

fn image_headers(img: &RenderedImage) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(img.content_type()),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(OG_CACHE_CONTROL),
    );
    if let Ok(etag) = HeaderValue::from_str(&img.etag()) {
        headers.insert(header::ETAG, etag);
    }
    headers.insert(
        OG_VARIANT_HEADER.clone(),
        HeaderValue::from_static(img.variant),
    );
    headers
}

pub fn create_og_router() -> Router<AppState> {
    Router::new().route("/og", get(og_image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::og::types::OutputFormat;
    use axum::body::Bytes;

    #[test]
    fn headers_carry_type_cache_etag_and_variant() {
        let img = RenderedImage {
            bytes: Bytes::from_static(b"\x89PNG"),
            format: OutputFormat::Png,
            variant: "profile",
            fallback: false,
        };
        let h = image_headers(&img);
        assert_eq!(h[header::CONTENT_TYPE], "image/png");
        assert_eq!(h[header::CACHE_CONTROL], OG_CACHE_CONTROL);
        assert_eq!(h[&OG_VARIANT_HEADER], "profile");
        assert_eq!(h[header::ETAG], img.etag().as_str());
    }
}

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use futures_util::FutureExt;
use moka::future::Cache;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;

use crate::config::{BrandingConfig, ImageRenderConfig};
use crate::error::{AppError, error_chain};
use crate::request_id::current_request_id;

use super::avatar::{AvatarImage, fetch_avatar};
use super::fallback::FallbackImages;
use super::layout::{Layout, LayoutVariant};
use super::raster;
use super::svg::build_svg;
use super::types::{OgQuery, OutputFormat};

/// 头像缓存容量（按 Data URI 字节数加权）
const AVATAR_CACHE_MAX_BYTES: u64 = 16 * 1024 * 1024;

/// 兜底图对应的变体标签
pub const FALLBACK_VARIANT: &str = "fallback";

/// 一次渲染的最终结果
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub bytes: Bytes,
    pub format: OutputFormat,
    /// profile | custom | default | fallback
    pub variant: &'static str,
    pub fallback: bool,
}

impl RenderedImage {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    /// 基于内容的 ETag（带引号）。
    ///
    /// SVG 响应可能被压缩层改写字节，因此只给出弱校验值。
    pub fn etag(&self) -> String {
        let digest = Sha256::digest(&self.bytes);
        let tag = hex::encode(&digest[..16]);
        match self.format {
            OutputFormat::Svg => format!("W/\"{tag}\""),
            _ => format!("\"{tag}\""),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedImage {
    bytes: Bytes,
    variant: &'static str,
}

/// OG 图渲染服务：参数 -> 布局 -> SVG -> 栅格化 -> 编码，失败时统一替换为兜底图。
pub struct OgRenderer {
    branding: BrandingConfig,
    image: ImageRenderConfig,
    default_format: OutputFormat,
    render_semaphore: Arc<Semaphore>,
    output_cache: Option<Cache<String, CachedImage>>,
    avatar_cache: Cache<String, Arc<AvatarImage>>,
    fallbacks: Arc<FallbackImages>,
    #[cfg(test)]
    fault: Option<Fault>,
}

/// 测试用：在 SVG 生成之后、栅格化之前注入失败
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
enum Fault {
    Error,
    Panic,
}

impl OgRenderer {
    pub fn new(branding: BrandingConfig, image: ImageRenderConfig) -> Self {
        let default_format = OutputFormat::parse(&image.default_format).unwrap_or_else(|| {
            tracing::warn!("未知的默认输出格式 {:?}，使用 png", image.default_format);
            OutputFormat::Png
        });

        let output_cache = image.cache_enabled.then(|| {
            Cache::builder()
                .weigher(|_k, v: &CachedImage| v.bytes.len().try_into().unwrap_or(u32::MAX))
                .max_capacity(image.cache_max_bytes)
                .time_to_live(Duration::from_secs(image.cache_ttl_secs))
                .time_to_idle(Duration::from_secs(image.cache_tti_secs))
                .build()
        });
        let avatar_cache = Cache::builder()
            .weigher(|_k, v: &Arc<AvatarImage>| v.data_uri.len().try_into().unwrap_or(u32::MAX))
            .max_capacity(AVATAR_CACHE_MAX_BYTES)
            .time_to_live(Duration::from_secs(image.cache_ttl_secs))
            .build();

        Self {
            render_semaphore: Arc::new(Semaphore::new(image.effective_parallelism())),
            fallbacks: Arc::new(FallbackImages::new(branding.clone(), image.clone())),
            branding,
            image,
            default_format,
            output_cache,
            avatar_cache,
            #[cfg(test)]
            fault: None,
        }
    }

    pub fn fallbacks(&self) -> &Arc<FallbackImages> {
        &self.fallbacks
    }

    /// 当前空闲的渲染许可数
    pub fn available_permits(&self) -> usize {
        self.render_semaphore.available_permits()
    }

    /// 输出缓存条目数（未启用缓存时为 None）
    pub fn cached_images(&self) -> Option<u64> {
        self.output_cache.as_ref().map(|c| c.entry_count())
    }

    /// 渲染 OG 图。任何错误（包括 panic）都被记录并替换为兜底图，因此不会失败。
    pub async fn render(&self, q: &OgQuery) -> RenderedImage {
        let format = q.output_format(self.default_format);
        let result = AssertUnwindSafe(self.try_render(q, format))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(AppError::Internal(panic_message(&*panic))));
        match result {
            Ok(img) => img,
            Err(e) => self.fallback_for(format, &e),
        }
    }

    /// 构造兜底响应并记录导致兜底的错误
    pub fn fallback_for(&self, format: OutputFormat, err: &AppError) -> RenderedImage {
        let request_id = current_request_id();
        let chain = error_chain(err);
        tracing::error!(
            request_id = request_id.as_deref().unwrap_or("-"),
            format = format.code(),
            error = %chain,
            detail = ?err,
            "OG 图渲染失败，返回兜底图"
        );
        let img = self.fallbacks.get(format);
        RenderedImage {
            bytes: img.bytes,
            format: img.format,
            variant: FALLBACK_VARIANT,
            fallback: true,
        }
    }

    /// 正常渲染路径，错误向上传播
    pub async fn try_render(
        &self,
        q: &OgQuery,
        format: OutputFormat,
    ) -> Result<RenderedImage, AppError> {
        let t0 = Instant::now();
        let variant = LayoutVariant::classify(q);
        let label = variant.label();
        let key = cache_key(&variant, format);

        if let Some(cache) = &self.output_cache
            && let Some(hit) = cache.get(&key).await
        {
            tracing::debug!(variant = hit.variant, format = format.code(), "OG 图缓存命中");
            return Ok(RenderedImage {
                bytes: hit.bytes,
                format,
                variant: hit.variant,
                fallback: false,
            });
        }

        let avatar = match variant.avatar_url() {
            Some(url) => self.load_avatar(url).await,
            None => None,
        };
        let avatar_omitted = variant.avatar_url().is_some() && avatar.is_none();

        let layout = Layout::compose(&variant, &self.branding, avatar.is_some());
        let svg = build_svg(&layout, avatar.as_deref(), &self.branding)?;
        #[cfg(test)]
        self.inject_fault()?;

        // 栅格化受信号量限制，避免 CPU 被打满
        let permit = self
            .render_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| AppError::Internal(format!("渲染信号量已关闭: {e}")))?;
        let wait = t0.elapsed();
        let cfg = self.image.clone();
        let bytes = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            raster::rasterize(&svg, format, &cfg)
        })
        .await??;
        let bytes = Bytes::from(bytes);

        // 头像失败时的结果不缓存，下次请求仍会尝试拉取
        if let Some(cache) = &self.output_cache
            && !avatar_omitted
        {
            cache
                .insert(
                    key,
                    CachedImage {
                        bytes: bytes.clone(),
                        variant: label,
                    },
                )
                .await;
        }

        tracing::info!(
            variant = label,
            format = format.code(),
            bytes = bytes.len(),
            wait_ms = wait.as_millis() as u64,
            total_ms = t0.elapsed().as_millis() as u64,
            "OG 图渲染完成"
        );
        Ok(RenderedImage {
            bytes,
            format,
            variant: label,
            fallback: false,
        })
    }

    #[cfg(test)]
    fn inject_fault(&self) -> Result<(), AppError> {
        match self.fault {
            Some(Fault::Error) => Err(AppError::ImageRendererError("注入的渲染失败".to_string())),
            Some(Fault::Panic) => panic!("注入的渲染 panic"),
            None => Ok(()),
        }
    }

    /// 拉取头像，失败时返回 None 并记录告警；成功结果按 URL 缓存。
    async fn load_avatar(&self, url: &str) -> Option<Arc<AvatarImage>> {
        let cfg = &self.image;
        let loaded = self
            .avatar_cache
            .try_get_with(url.to_string(), async {
                fetch_avatar(url, cfg).await.map(Arc::new)
            })
            .await;
        match loaded {
            Ok(avatar) => Some(avatar),
            Err(e) => {
                let request_id = current_request_id();
                tracing::warn!(
                    request_id = request_id.as_deref().unwrap_or("-"),
                    code = e.code(),
                    error = %e,
                    "头像拉取失败，已省略头像"
                );
                None
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let msg = panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("未知 panic");
    format!("渲染过程 panic: {msg}")
}

/// 缓存键：归一化后的布局参数 + 输出格式的 SHA-256。
///
/// 字段以长度前缀拼接，不同字段组合不会产生相同输入。
fn cache_key(variant: &LayoutVariant, format: OutputFormat) -> String {
    fn field(h: &mut Sha256, value: Option<&str>) {
        match value {
            Some(v) => {
                h.update((v.len() as u64).to_le_bytes());
                h.update(v.as_bytes());
            }
            None => h.update(u64::MAX.to_le_bytes()),
        }
    }

    let mut h = Sha256::new();
    h.update(variant.label().as_bytes());
    match variant {
        LayoutVariant::Profile {
            name,
            username,
            description,
            projects,
            achievements,
            avatar,
        } => {
            field(&mut h, Some(name));
            field(&mut h, Some(username));
            field(&mut h, description.as_deref());
            field(&mut h, Some(projects));
            field(&mut h, Some(achievements));
            field(&mut h, avatar.as_deref());
        }
        LayoutVariant::CustomPage { title, description } => {
            field(&mut h, Some(title));
            field(&mut h, description.as_deref());
        }
        LayoutVariant::Default { description } => field(&mut h, description.as_deref()),
    }
    field(&mut h, Some(format.code()));
    format!("og:{}", hex::encode(h.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer(cache_enabled: bool) -> OgRenderer {
        OgRenderer::new(
            BrandingConfig::default(),
            ImageRenderConfig {
                optimize_speed: true,
                cache_enabled,
                avatar_timeout_ms: 500,
                ..ImageRenderConfig::default()
            },
        )
    }

    fn query(pairs: &[(&str, &str)]) -> OgQuery {
        OgQuery::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn cache_key_separates_fields_and_formats() {
        let a = LayoutVariant::classify(&query(&[("title", "ab"), ("description", "c")]));
        let b = LayoutVariant::classify(&query(&[("title", "a"), ("description", "bc")]));
        assert_ne!(cache_key(&a, OutputFormat::Png), cache_key(&b, OutputFormat::Png));
        assert_ne!(cache_key(&a, OutputFormat::Png), cache_key(&a, OutputFormat::Webp));
        assert_eq!(cache_key(&a, OutputFormat::Png), cache_key(&a, OutputFormat::Png));
    }

    #[test]
    fn cache_key_ignores_unused_parameters() {
        let a = LayoutVariant::classify(&query(&[("title", "Docs")]));
        let b = LayoutVariant::classify(&query(&[("title", "Docs"), ("projects", "9")]));
        assert_eq!(cache_key(&a, OutputFormat::Png), cache_key(&b, OutputFormat::Png));
    }

    #[tokio::test]
    async fn render_is_deterministic_without_cache() {
        let r = renderer(false);
        let q = query(&[("title", "Changelog"), ("description", "What shipped")]);
        let a = r.render(&q).await;
        let b = r.render(&q).await;
        assert!(!a.fallback);
        assert_eq!(a.variant, "custom");
        assert_eq!(a.bytes, b.bytes);
    }

    #[tokio::test]
    async fn cached_render_reports_original_variant() {
        let r = renderer(true);
        let q = query(&[("username", "octo"), ("name", "Octo Cat")]);
        let first = r.render(&q).await;
        let second = r.render(&q).await;
        assert_eq!(first.variant, "profile");
        assert_eq!(second.variant, "profile");
        assert_eq!(first.bytes, second.bytes);
    }

    #[tokio::test]
    async fn unreachable_avatar_is_omitted_not_fallback() {
        let r = renderer(true);
        let q = query(&[
            ("username", "octo"),
            ("name", "Octo"),
            ("avatar", "http://127.0.0.1:9/avatar.png"),
            ("format", "svg"),
        ]);
        let img = r.render(&q).await;
        assert!(!img.fallback);
        assert_eq!(img.variant, "profile");
        let svg = String::from_utf8(img.bytes.to_vec()).expect("utf8");
        assert!(!svg.contains("avatar-clip"));
    }

    #[tokio::test]
    async fn fallback_uses_requested_format() {
        let r = renderer(false);
        let img = r.fallback_for(
            OutputFormat::Jpeg,
            &AppError::ImageRendererError("boom".to_string()),
        );
        assert!(img.fallback);
        assert_eq!(img.variant, FALLBACK_VARIANT);
        assert_eq!(img.content_type(), "image/jpeg");
        assert_eq!(
            image::guess_format(&img.bytes).expect("guess"),
            image::ImageFormat::Jpeg
        );
    }

    #[test]
    fn etag_is_quoted_hex() {
        let img = RenderedImage {
            bytes: Bytes::from_static(b"abc"),
            format: OutputFormat::Png,
            variant: "default",
            fallback: false,
        };
        let etag = img.etag();
        assert!(etag.starts_with('"') && etag.ends_with('"'));
        assert_eq!(etag.len(), 34);
    }

    #[test]
    fn svg_etag_is_weak() {
        let png = RenderedImage {
            bytes: Bytes::from_static(b"<svg/>"),
            format: OutputFormat::Png,
            variant: "default",
            fallback: false,
        };
        let svg = RenderedImage {
            format: OutputFormat::Svg,
            ..png.clone()
        };
        assert_eq!(svg.etag(), format!("W/{}", png.etag()));
    }

    fn faulty_renderer(fault: Fault) -> OgRenderer {
        let mut r = renderer(true);
        r.fault = Some(fault);
        r
    }

    #[tokio::test]
    async fn render_error_mid_pipeline_returns_fallback() {
        let r = faulty_renderer(Fault::Error);
        let q = query(&[("title", "Changelog"), ("format", "webp")]);
        let img = r.render(&q).await;
        assert!(img.fallback);
        assert_eq!(img.variant, FALLBACK_VARIANT);
        assert_eq!(img.content_type(), "image/webp");
        let decoded = image::load_from_memory(&img.bytes).expect("decode fallback");
        assert_eq!((decoded.width(), decoded.height()), (1200, 630));
        // 失败结果不进入输出缓存
        r.output_cache.as_ref().expect("cache").run_pending_tasks().await;
        assert_eq!(r.cached_images(), Some(0));
    }

    #[tokio::test]
    async fn render_panic_mid_pipeline_returns_fallback() {
        let r = faulty_renderer(Fault::Panic);
        let img = r.render(&query(&[("username", "octo"), ("name", "Octo")])).await;
        assert!(img.fallback);
        assert_eq!(img.content_type(), "image/png");
        assert!(image::load_from_memory(&img.bytes).is_ok());
        // panic 之后渲染许可没有泄漏
        assert_eq!(r.available_permits(), r.image.effective_parallelism());
    }

    #[tokio::test]
    async fn failing_render_still_answers_200_over_http() {
        use axum::body::{Body, to_bytes};
        use axum::http::{Request, StatusCode};
        use tower::ServiceExt;

        for fault in [Fault::Error, Fault::Panic] {
            let app = crate::build_app(crate::AppState::new(faulty_renderer(fault)), "/api");
            let resp = app
                .oneshot(
                    Request::builder()
                        .uri("/og?title=Docs&format=jpeg")
                        .body(Body::empty())
                        .expect("request"),
                )
                .await
                .expect("response");
            assert_eq!(resp.status(), StatusCode::OK, "{fault:?}");
            assert_eq!(resp.headers()["x-og-variant"], "fallback");
            assert_eq!(resp.headers()["content-type"], "image/jpeg");
            let body = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
            assert_eq!(
                image::guess_format(&body).expect("guess"),
                image::ImageFormat::Jpeg
            );
        }
    }
}

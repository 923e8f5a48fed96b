//! 外部头像拉取：唯一的外部 I/O 步骤。
//!
//! 失败策略固定为“省略头像继续渲染”，不重试；整体耗时受 `avatar_timeout_ms` 约束。
//! 默认只允许访问公网地址，见 [`crate::http::client_avatar`]。

use std::io::Cursor;

use base64::{Engine as _, engine::general_purpose::STANDARD as base64_engine};
use image::imageops::FilterType;
use image::{ImageFormat, ImageReader, Limits};
use reqwest::Url;

use crate::config::ImageRenderConfig;
use crate::error::AvatarError;
use crate::http;

/// 头像位图边长（显示尺寸的 2 倍，保证缩放后清晰）
const AVATAR_PIXELS: u32 = 320;

/// 解码时允许的最大源图边长
const MAX_SOURCE_DIMENSION: u32 = 4096;

/// 已处理好的头像（PNG Data URI）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarImage {
    pub data_uri: String,
}

/// 校验头像地址：仅允许 http/https
pub fn parse_avatar_url(raw: &str) -> Result<Url, AvatarError> {
    let url = Url::parse(raw.trim()).map_err(|e| AvatarError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(AvatarError::UnsupportedScheme(other.to_string())),
    }
}

/// 拉取并处理头像
pub async fn fetch_avatar(raw_url: &str, cfg: &ImageRenderConfig) -> Result<AvatarImage, AvatarError> {
    let url = parse_avatar_url(raw_url)?;
    let allow_private = cfg.avatar_allow_private_hosts;
    if !allow_private {
        http::check_public_host(&url).map_err(AvatarError::BlockedHost)?;
    }
    let client =
        http::client_avatar(allow_private).map_err(|e| AvatarError::Network(e.to_string()))?;

    let mut resp = client
        .get(url)
        .timeout(cfg.avatar_timeout())
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(AvatarError::Status(resp.status().as_u16()));
    }

    let limit = cfg.avatar_max_bytes;
    if let Some(len) = resp.content_length()
        && len > limit
    {
        return Err(AvatarError::TooLarge(len));
    }

    // 按块读取，超过上限立即中止（content-length 可能缺失或不可信）
    let mut body = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        if (body.len() + chunk.len()) as u64 > limit {
            return Err(AvatarError::TooLarge((body.len() + chunk.len()) as u64));
        }
        body.extend_from_slice(&chunk);
    }

    // 解码与缩放是 CPU 密集型操作，移出 tokio worker
    let speed = cfg.optimize_speed;
    tokio::task::spawn_blocking(move || encode_avatar(&body, speed))
        .await
        .map_err(|e| AvatarError::Decode(format!("头像处理任务失败: {e}")))?
}

/// 解码任意常见格式的头像，居中裁剪为正方形并重编码为 PNG Data URI。
pub fn encode_avatar(bytes: &[u8], optimize_speed: bool) -> Result<AvatarImage, AvatarError> {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_SOURCE_DIMENSION);
    limits.max_image_height = Some(MAX_SOURCE_DIMENSION);

    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| AvatarError::Decode(e.to_string()))?;
    if reader.format().is_none() {
        return Err(AvatarError::Decode("无法识别的图片格式".to_string()));
    }
    reader.limits(limits);
    let img = reader.decode()?;

    let filter = if optimize_speed {
        FilterType::Triangle
    } else {
        FilterType::Lanczos3
    };
    let square = img.resize_to_fill(AVATAR_PIXELS, AVATAR_PIXELS, filter);

    let mut out = Vec::new();
    square.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(AvatarImage {
        data_uri: format!("data:image/png;base64,{}", base64_engine.encode(out)),
    })
}

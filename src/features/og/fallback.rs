//! 兜底图片：任何渲染失败都以它替代，保证接口始终返回一张合法图片。
//!
//! 每种格式只生成一次并常驻内存。

use axum::body::Bytes;
use once_cell::sync::OnceCell;
use tiny_skia::{Color, Pixmap};

use crate::config::{BrandColors, BrandingConfig, ImageRenderConfig};
use crate::error::AppError;

use super::layout::{CANVAS_HEIGHT, CANVAS_WIDTH};
use super::raster;
use super::svg::{fallback_svg, parse_hex_rgb};
use super::types::OutputFormat;

/// 兜底图片字节及其实际格式（极端情况下可能与请求格式不同）
#[derive(Debug, Clone)]
pub struct FallbackImage {
    pub bytes: Bytes,
    pub format: OutputFormat,
}

#[derive(Debug)]
pub struct FallbackImages {
    branding: BrandingConfig,
    image: ImageRenderConfig,
    png: OnceCell<FallbackImage>,
    jpeg: OnceCell<FallbackImage>,
    webp: OnceCell<FallbackImage>,
    svg: OnceCell<FallbackImage>,
}

impl FallbackImages {
    pub fn new(branding: BrandingConfig, image: ImageRenderConfig) -> Self {
        Self {
            branding,
            image,
            png: OnceCell::new(),
            jpeg: OnceCell::new(),
            webp: OnceCell::new(),
            svg: OnceCell::new(),
        }
    }

    /// 获取指定格式的兜底图（首次调用时生成，CPU 密集）
    pub fn get(&self, format: OutputFormat) -> FallbackImage {
        let cell = match format {
            OutputFormat::Png => &self.png,
            OutputFormat::Jpeg => &self.jpeg,
            OutputFormat::Webp => &self.webp,
            OutputFormat::Svg => &self.svg,
        };
        cell.get_or_init(|| self.build(format)).clone()
    }

    /// 预生成全部格式，启动阶段调用
    pub fn prewarm(&self) {
        for format in [
            OutputFormat::Png,
            OutputFormat::Jpeg,
            OutputFormat::Webp,
            OutputFormat::Svg,
        ] {
            let img = self.get(format);
            tracing::debug!("兜底图已生成: {} ({}B)", format.code(), img.bytes.len());
        }
    }

    fn build(&self, format: OutputFormat) -> FallbackImage {
        let svg = fallback_svg(&self.branding);
        match raster::rasterize(&svg, format, &self.image) {
            Ok(bytes) => FallbackImage {
                bytes: Bytes::from(bytes),
                format,
            },
            Err(e) => {
                tracing::error!("兜底 SVG 渲染失败，改用纯色画布: {}", e);
                self.solid(format)
            }
        }
    }

    /// 最后手段：纯色背景画布，不依赖 SVG 解析与字体
    fn solid(&self, format: OutputFormat) -> FallbackImage {
        let encoded = solid_pixmap(&self.branding.colors).and_then(|pixmap| {
            let target = if format == OutputFormat::Svg {
                OutputFormat::Png
            } else {
                format
            };
            raster::encode_pixmap(&pixmap, target, &self.image).map(|b| (b, target))
        });
        match encoded {
            Ok((bytes, format)) => FallbackImage {
                bytes: Bytes::from(bytes),
                format,
            },
            Err(e) => {
                tracing::error!("纯色兜底图编码失败: {}", e);
                FallbackImage {
                    bytes: Bytes::new(),
                    format,
                }
            }
        }
    }
}

fn solid_pixmap(colors: &BrandColors) -> Result<Pixmap, AppError> {
    let (r, g, b) = parse_hex_rgb(&colors.background)
        .or_else(|| parse_hex_rgb(&BrandColors::default_background()))
        .unwrap_or((0x0d, 0x11, 0x17));
    let mut pixmap = Pixmap::new(CANVAS_WIDTH, CANVAS_HEIGHT)
        .ok_or_else(|| AppError::ImageRendererError("Failed to create pixmap".to_string()))?;
    pixmap.fill(Color::from_rgba8(r, g, b, 255));
    Ok(pixmap)
}

use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use resvg::{
    render,
    tiny_skia::{Pixmap, Transform},
    usvg::{self, Options as UsvgOptions, fontdb},
};

use crate::config::ImageRenderConfig;
use crate::error::AppError;

use super::layout::{CANVAS_HEIGHT, CANVAS_WIDTH};
use super::types::OutputFormat;

/// 栅格化时的默认字体族（SVG 中未命中的字体回退到这里）
const DEFAULT_FONT_FAMILY: &str = "Inter";

static GLOBAL_FONT_DB: OnceLock<Arc<fontdb::Database>> = OnceLock::new();

fn load_font_db(fonts_dir: &Path) -> Arc<fontdb::Database> {
    let mut font_db = fontdb::Database::new();
    font_db.load_system_fonts();

    if let Ok(entries) = fs::read_dir(fonts_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let is_font = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "ttf" | "otf" | "ttc"));
            if path.is_file()
                && is_font
                && let Err(e) = font_db.load_font_file(&path)
            {
                tracing::error!("加载字体文件失败 '{}': {}", path.display(), e);
            }
        }
    }

    tracing::info!("字体库已加载: {} 个字体", font_db.len());
    Arc::new(font_db)
}

/// 全局字体库：首次调用时按配置目录加载，之后复用。
pub fn font_db(cfg: &ImageRenderConfig) -> Arc<fontdb::Database> {
    GLOBAL_FONT_DB
        .get_or_init(|| load_font_db(&cfg.fonts_path()))
        .clone()
}

fn parse_tree(svg: &str, cfg: &ImageRenderConfig) -> Result<usvg::Tree, AppError> {
    let speed = cfg.optimize_speed;
    let opts = UsvgOptions {
        fontdb: font_db(cfg),
        font_family: DEFAULT_FONT_FAMILY.to_string(),
        languages: vec!["en".to_string(), "zh-CN".to_string()],
        shape_rendering: if speed {
            usvg::ShapeRendering::OptimizeSpeed
        } else {
            usvg::ShapeRendering::GeometricPrecision
        },
        text_rendering: if speed {
            usvg::TextRendering::OptimizeSpeed
        } else {
            usvg::TextRendering::OptimizeLegibility
        },
        image_rendering: if speed {
            usvg::ImageRendering::OptimizeSpeed
        } else {
            usvg::ImageRendering::OptimizeQuality
        },
        ..Default::default()
    };
    usvg::Tree::from_data(svg.as_bytes(), &opts)
        .map_err(|e| AppError::render("Failed to parse SVG", e))
}

/// 将 SVG 绘制到固定 1200x630 画布。
///
/// 输入 SVG 的声明尺寸若不一致，按比例缩放铺满画布，保证输出尺寸恒定。
pub fn rasterize_pixmap(svg: &str, cfg: &ImageRenderConfig) -> Result<Pixmap, AppError> {
    let tree = parse_tree(svg, cfg)?;

    let size = tree.size();
    let sx = CANVAS_WIDTH as f32 / size.width();
    let sy = CANVAS_HEIGHT as f32 / size.height();

    let mut pixmap = Pixmap::new(CANVAS_WIDTH, CANVAS_HEIGHT)
        .ok_or_else(|| AppError::ImageRendererError("Failed to create pixmap".to_string()))?;
    render(&tree, Transform::from_scale(sx, sy), &mut pixmap.as_mut());
    Ok(pixmap)
}

/// PNG 编码：速度优先时用 Fast 压缩 + 无滤波
pub fn encode_png(pixmap: &Pixmap, optimize_speed: bool) -> Result<Vec<u8>, AppError> {
    let (w, h) = (pixmap.width(), pixmap.height());
    let mut out = Vec::with_capacity((w * h) as usize);
    {
        let mut encoder = png::Encoder::new(&mut out, w, h);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        if optimize_speed {
            encoder.set_compression(png::Compression::Fast);
            encoder.set_filter(png::FilterType::NoFilter);
        } else {
            encoder.set_compression(png::Compression::Default);
            encoder.set_filter(png::FilterType::Paeth);
        }
        let mut writer = encoder
            .write_header()
            .map_err(|e| AppError::render("PNG write_header error", e))?;
        writer
            .write_image_data(pixmap.data())
            .map_err(|e| AppError::render("PNG write_image_data error", e))?;
        writer
            .finish()
            .map_err(|e| AppError::render("PNG finish error", e))?;
    }
    Ok(out)
}

/// JPEG 编码（无透明通道，预乘像素直接丢弃 alpha 即为黑底合成结果）
pub fn encode_jpeg(pixmap: &Pixmap, quality: u8) -> Result<Vec<u8>, AppError> {
    let rgb: Vec<u8> = pixmap
        .data()
        .chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect();

    let mut out = Vec::new();
    let mut enc = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    enc.encode(&rgb, pixmap.width(), pixmap.height(), ExtendedColorType::Rgb8)
        .map_err(|e| AppError::render("JPEG encode error", e))?;
    Ok(out)
}

/// WebP 无损编码
pub fn encode_webp(pixmap: &Pixmap) -> Result<Vec<u8>, AppError> {
    let mut out = Vec::new();
    let enc = WebPEncoder::new_lossless(&mut out);
    enc.encode(
        pixmap.data(),
        pixmap.width(),
        pixmap.height(),
        ExtendedColorType::Rgba8,
    )
    .map_err(|e| AppError::render("WebP encode error", e))?;
    Ok(out)
}

/// 按目标格式编码已绘制的画布。SVG 不经过此处。
pub fn encode_pixmap(
    pixmap: &Pixmap,
    format: OutputFormat,
    cfg: &ImageRenderConfig,
) -> Result<Vec<u8>, AppError> {
    match format {
        OutputFormat::Png => encode_png(pixmap, cfg.optimize_speed),
        OutputFormat::Jpeg => encode_jpeg(pixmap, cfg.jpeg_quality),
        OutputFormat::Webp => encode_webp(pixmap),
        OutputFormat::Svg => Err(AppError::Internal(
            "SVG 输出不需要栅格化编码".to_string(),
        )),
    }
}

/// 统一入口：SVG 原样返回字节，其余格式栅格化后编码。
pub fn rasterize(
    svg: &str,
    format: OutputFormat,
    cfg: &ImageRenderConfig,
) -> Result<Vec<u8>, AppError> {
    if format == OutputFormat::Svg {
        // 确认标记可被解析，避免把坏图当作正常结果返回
        parse_tree(svg, cfg)?;
        return Ok(svg.as_bytes().to_vec());
    }

    let t0 = std::time::Instant::now();
    let pixmap = rasterize_pixmap(svg, cfg)?;
    let t_raster = t0.elapsed();
    let out = encode_pixmap(&pixmap, format, cfg)?;

    tracing::debug!(
        "OG 栅格化完成: 格式={}, 栅格化={:?}, 总计={:?}, 大小={}B",
        format.code(),
        t_raster,
        t0.elapsed(),
        out.len()
    );
    Ok(out)
}

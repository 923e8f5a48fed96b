use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::features::og::{OgRenderer, raster};

/// 执行启动检查
///
/// 1. 检查字体目录（缺失时仅告警，渲染回退到系统字体）
/// 2. 预热字体库与兜底图，避免首个请求承担加载耗时
pub async fn run_startup_checks(
    config: &AppConfig,
    renderer: &Arc<OgRenderer>,
) -> Result<(), AppError> {
    tracing::info!("🔍 开始执行启动检查...");

    let font_count = check_font_resources(&config.image.fonts_path());
    if font_count == 0 {
        tracing::warn!(
            "⚠️ 字体目录 {:?} 中没有可用字体，将仅使用系统字体",
            config.image.fonts_path()
        );
    } else {
        tracing::info!("✅ 发现 {} 个自定义字体文件", font_count);
    }

    let t_prewarm = std::time::Instant::now();
    let image_cfg = config.image.clone();
    let fallbacks = renderer.fallbacks().clone();
    tokio::task::spawn_blocking(move || {
        let _ = raster::font_db(&image_cfg);
        fallbacks.prewarm();
    })
    .await?;
    tracing::info!("字体库与兜底图预热完成: {}ms", t_prewarm.elapsed().as_millis());

    tracing::info!("✅ 启动检查完成");
    Ok(())
}

/// 统计字体目录中的字体文件数量；目录不存在时返回 0
fn check_font_resources(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    matches!(ext.to_ascii_lowercase().as_str(), "ttf" | "otf" | "ttc")
                })
        })
        .count()
}

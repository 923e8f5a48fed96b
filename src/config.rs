use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 全局配置单例
static CONFIG: OnceCell<AppConfig> = OnceCell::new();

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    /// 监听端口
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
}

impl ServerConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }
    fn default_port() -> u16 {
        3939
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（未设置 RUST_LOG 时生效）
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }

    /// 组装默认的 EnvFilter 指令
    pub fn default_directive(&self) -> String {
        format!("devimpact_og={},tower_http=info", self.level)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API 路由前缀
    #[serde(default = "ApiConfig::default_prefix")]
    pub prefix: String,
}

impl ApiConfig {
    fn default_prefix() -> String {
        "/api".to_string()
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            prefix: Self::default_prefix(),
        }
    }
}

/// 品牌配色（均为 `#rrggbb` / `#rgb` 形式，非法值在渲染时回退为内置默认色）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrandColors {
    #[serde(default = "BrandColors::default_background")]
    pub background: String,
    #[serde(default = "BrandColors::default_background_accent")]
    pub background_accent: String,
    #[serde(default = "BrandColors::default_headline")]
    pub headline: String,
    #[serde(default = "BrandColors::default_text")]
    pub text: String,
    #[serde(default = "BrandColors::default_muted")]
    pub muted: String,
    #[serde(default = "BrandColors::default_accent")]
    pub accent: String,
}

impl BrandColors {
    pub(crate) fn default_background() -> String {
        "#0d1117".to_string()
    }
    pub(crate) fn default_background_accent() -> String {
        "#161b22".to_string()
    }
    pub(crate) fn default_headline() -> String {
        "#ffffff".to_string()
    }
    pub(crate) fn default_text() -> String {
        "#c9d1d9".to_string()
    }
    pub(crate) fn default_muted() -> String {
        "#8b949e".to_string()
    }
    pub(crate) fn default_accent() -> String {
        "#3fb950".to_string()
    }
}

impl Default for BrandColors {
    fn default() -> Self {
        Self {
            background: Self::default_background(),
            background_accent: Self::default_background_accent(),
            headline: Self::default_headline(),
            text: Self::default_text(),
            muted: Self::default_muted(),
            accent: Self::default_accent(),
        }
    }
}

/// 品牌/展示配置：OG 图中所有固定文案与配色的唯一来源
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrandingConfig {
    /// 产品名（Default 布局标题、兜底图字标）
    #[serde(default = "BrandingConfig::default_product_name")]
    pub product_name: String,
    /// 对外域名（个人主页页脚 `{domain}/{username}`）
    #[serde(default = "BrandingConfig::default_domain")]
    pub domain: String,
    /// 默认副标题
    #[serde(default = "BrandingConfig::default_tagline")]
    pub tagline: String,
    /// Default 布局副标题下方的第二行文案
    #[serde(default = "BrandingConfig::default_secondary_tagline")]
    pub secondary_tagline: String,
    /// 右下角固定品牌标识
    #[serde(default = "BrandingConfig::default_footer_mark")]
    pub footer_mark: String,
    #[serde(default)]
    pub colors: BrandColors,
}

impl BrandingConfig {
    fn default_product_name() -> String {
        "dev-impact".to_string()
    }
    fn default_domain() -> String {
        "dev-impact.io".to_string()
    }
    fn default_tagline() -> String {
        "Show your real developer impact".to_string()
    }
    fn default_secondary_tagline() -> String {
        "Projects, metrics and GitHub activity in one shareable page".to_string()
    }
    fn default_footer_mark() -> String {
        "dev-impact.io".to_string()
    }
}

impl Default for BrandingConfig {
    fn default() -> Self {
        Self {
            product_name: Self::default_product_name(),
            domain: Self::default_domain(),
            tagline: Self::default_tagline(),
            secondary_tagline: Self::default_secondary_tagline(),
            footer_mark: Self::default_footer_mark(),
            colors: BrandColors::default(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub api: ApiConfig,
    /// 品牌/展示配置
    #[serde(default)]
    pub branding: BrandingConfig,
    /// 图片渲染配置
    #[serde(default)]
    pub image: ImageRenderConfig,
    /// 优雅退出配置
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl AppConfig {
    /// 从配置文件加载配置，支持环境变量覆盖
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path();

        tracing::info!("正在从 {:?} 加载配置文件", config_path);

        let builder = ConfigBuilder::builder()
            // 配置文件可缺省，全部字段均有默认值
            .add_source(File::from(config_path).required(false))
            // 支持环境变量覆盖，例如：APP_SERVER_PORT
            .add_source(
                Environment::with_prefix("APP")
                    .separator("_")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = builder.try_deserialize()?;

        tracing::debug!(
            "配置加载完成: prefix = {}, format = {:?}, cache = {}",
            config.api.prefix,
            config.image.default_format,
            config.image.cache_enabled
        );

        Ok(config)
    }

    /// 获取全局配置单例
    pub fn global() -> &'static AppConfig {
        CONFIG.get().expect("配置未初始化，请先调用 init_global()")
    }

    /// 初始化全局配置
    pub fn init_global() -> Result<(), ConfigError> {
        let config = Self::load()?;
        CONFIG
            .set(config)
            .map_err(|_| ConfigError::Message("配置已经被初始化".to_string()))?;
        Ok(())
    }

    /// 获取配置文件路径
    fn get_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    /// 获取服务器监听地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// 图片渲染配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRenderConfig {
    /// 是否优先速度渲染（OptimizeSpeed），提升栅格化性能，可能略降画质
    #[serde(default)]
    pub optimize_speed: bool,
    /// 未指定 format 时的输出格式：png|jpeg|webp|svg
    #[serde(default = "ImageRenderConfig::default_format")]
    pub default_format: String,
    /// JPEG 质量（1-100）
    #[serde(default = "ImageRenderConfig::default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// 是否启用输出图片缓存
    #[serde(default = "ImageRenderConfig::default_cache_enabled")]
    pub cache_enabled: bool,
    /// 缓存最大容量（字节），按图片字节大小加权
    #[serde(default = "ImageRenderConfig::default_cache_max_bytes")]
    pub cache_max_bytes: u64,
    /// 缓存 TTL（秒）
    #[serde(default = "ImageRenderConfig::default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// 缓存 TTI（秒）
    #[serde(default = "ImageRenderConfig::default_cache_tti")]
    pub cache_tti_secs: u64,
    /// 并发渲染许可数（0=自动，取 CPU 核心数）
    #[serde(default)]
    pub max_parallel: u32,
    /// 头像拉取超时（毫秒），覆盖连接到读完响应体的全过程
    #[serde(default = "ImageRenderConfig::default_avatar_timeout_ms")]
    pub avatar_timeout_ms: u64,
    /// 头像响应体大小上限（字节）
    #[serde(default = "ImageRenderConfig::default_avatar_max_bytes")]
    pub avatar_max_bytes: u64,
    /// 是否允许头像地址指向回环/内网/链路本地地址（仅用于本地开发与测试）
    #[serde(default)]
    pub avatar_allow_private_hosts: bool,
    /// 自定义字体目录（.ttf/.otf/.ttc）
    #[serde(default = "ImageRenderConfig::default_fonts_dir")]
    pub fonts_dir: String,
}

impl ImageRenderConfig {
    fn default_format() -> String {
        "png".to_string()
    }
    fn default_jpeg_quality() -> u8 {
        85
    }
    fn default_cache_enabled() -> bool {
        true
    }
    fn default_cache_max_bytes() -> u64 {
        64 * 1024 * 1024
    }
    fn default_cache_ttl() -> u64 {
        3600
    }
    fn default_cache_tti() -> u64 {
        600
    }
    fn default_avatar_timeout_ms() -> u64 {
        3000
    }
    fn default_avatar_max_bytes() -> u64 {
        5 * 1024 * 1024
    }
    fn default_fonts_dir() -> String {
        "resources/fonts".to_string()
    }

    /// 实际并发渲染许可数
    pub fn effective_parallelism(&self) -> usize {
        let m = self.max_parallel as usize;
        if m == 0 { num_cpus::get() } else { m }
    }

    /// 头像拉取超时
    pub fn avatar_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.avatar_timeout_ms.max(1))
    }

    /// 获取字体目录
    pub fn fonts_path(&self) -> PathBuf {
        PathBuf::from(&self.fonts_dir)
    }
}

impl Default for ImageRenderConfig {
    fn default() -> Self {
        Self {
            optimize_speed: false,
            default_format: Self::default_format(),
            jpeg_quality: Self::default_jpeg_quality(),
            cache_enabled: Self::default_cache_enabled(),
            cache_max_bytes: Self::default_cache_max_bytes(),
            cache_ttl_secs: Self::default_cache_ttl(),
            cache_tti_secs: Self::default_cache_tti(),
            max_parallel: 0,
            avatar_timeout_ms: Self::default_avatar_timeout_ms(),
            avatar_max_bytes: Self::default_avatar_max_bytes(),
            avatar_allow_private_hosts: false,
            fonts_dir: Self::default_fonts_dir(),
        }
    }
}

/// 优雅退出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// 优雅退出超时时间（秒）
    #[serde(default = "ShutdownConfig::default_timeout")]
    pub timeout_secs: u64,
}

impl ShutdownConfig {
    fn default_timeout() -> u64 {
        30
    }

    /// 获取优雅退出超时时间
    pub fn timeout_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_deserialize_from_empty_source() {
        let cfg: AppConfig = ConfigBuilder::builder()
            .build()
            .and_then(|c| c.try_deserialize())
            .expect("empty config should deserialize");
        assert_eq!(cfg.server.port, 3939);
        assert_eq!(cfg.api.prefix, "/api");
        assert_eq!(cfg.branding, BrandingConfig::default());
        assert_eq!(cfg.image.default_format, "png");
        assert!(!cfg.image.avatar_allow_private_hosts);
    }

    #[test]
    fn partial_branding_keeps_remaining_defaults() {
        let toml = r##"
            [branding]
            product_name = "acme"
            [branding.colors]
            accent = "#ff0000"
        "##;
        let cfg: AppConfig = ConfigBuilder::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .expect("partial config");
        assert_eq!(cfg.branding.product_name, "acme");
        assert_eq!(cfg.branding.domain, "dev-impact.io");
        assert_eq!(cfg.branding.colors.accent, "#ff0000");
        assert_eq!(cfg.branding.colors.background, "#0d1117");
    }

    #[test]
    fn effective_parallelism_uses_cpus_when_zero() {
        let img = ImageRenderConfig::default();
        assert!(img.effective_parallelism() >= 1);
        let img = ImageRenderConfig {
            max_parallel: 3,
            ..ImageRenderConfig::default()
        };
        assert_eq!(img.effective_parallelism(), 3);
    }
}

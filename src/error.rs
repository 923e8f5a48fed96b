use std::error::Error as StdError;

use thiserror::Error;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// 应用统一错误类型
///
/// OG 接口不会把任何错误透传给调用方：渲染链路中的错误统一在
/// `OgRenderer::render` 内被记录并替换为兜底图片。
#[derive(Error, Debug)]
pub enum AppError {
    /// 图像渲染错误（无底层错误）
    #[error("图像渲染错误: {0}")]
    ImageRendererError(String),

    /// 图像渲染错误，保留底层错误链
    #[error("图像渲染错误: {context}")]
    Render {
        context: &'static str,
        #[source]
        source: BoxError,
    },

    /// 阻塞渲染任务 panic 或被取消
    #[error("阻塞渲染任务执行失败")]
    Join(#[from] tokio::task::JoinError),

    /// 内部服务器错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl AppError {
    pub fn render(context: &'static str, source: impl Into<BoxError>) -> Self {
        AppError::Render {
            context,
            source: source.into(),
        }
    }
}

/// 把错误及其全部 source 展开为一行，用于日志
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut cur = err.source();
    while let Some(e) = cur {
        out.push_str(": ");
        out.push_str(&e.to_string());
        cur = e.source();
    }
    out
}

/// 头像拉取/解码错误类型
///
/// 头像是可选装饰：该错误只用于日志，调用方据此省略头像后继续渲染。
#[derive(Error, Debug)]
pub enum AvatarError {
    /// URL 无法解析
    #[error("无效的头像地址: {0}")]
    InvalidUrl(String),

    /// 仅允许 http/https
    #[error("不支持的协议: {0}")]
    UnsupportedScheme(String),

    /// 上游返回非 2xx
    #[error("上游状态码异常: {0}")]
    Status(u16),

    /// 响应体超过上限
    #[error("头像体积超限: {0} 字节")]
    TooLarge(u64),

    /// 网络请求错误
    #[error("网络错误: {0}")]
    Network(String),

    /// 超时
    #[error("超时")]
    Timeout,

    /// 目标主机是回环/内网/链路本地等非公网地址
    #[error("禁止访问的主机: {0}")]
    BlockedHost(String),

    /// 图片解码/重编码失败
    #[error("解码失败: {0}")]
    Decode(String),
}

impl AvatarError {
    /// 稳定的错误码，用于日志字段
    pub fn code(&self) -> &'static str {
        match self {
            AvatarError::InvalidUrl(_) | AvatarError::UnsupportedScheme(_) => "AVATAR_BAD_URL",
            AvatarError::Status(_) => "AVATAR_UPSTREAM_STATUS",
            AvatarError::TooLarge(_) => "AVATAR_TOO_LARGE",
            AvatarError::Network(_) => "AVATAR_UPSTREAM_ERROR",
            AvatarError::Timeout => "AVATAR_TIMEOUT",
            AvatarError::BlockedHost(_) => "AVATAR_BLOCKED_HOST",
            AvatarError::Decode(_) => "AVATAR_DECODE_FAILED",
        }
    }
}

// =============== Error conversions for common external errors ===============

impl From<reqwest::Error> for AvatarError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AvatarError::Timeout
        } else {
            AvatarError::Network(err.to_string())
        }
    }
}

impl From<image::ImageError> for AvatarError {
    fn from(err: image::ImageError) -> Self {
        AvatarError::Decode(err.to_string())
    }
}

use serde::Serialize;

/// 输出图片格式
#[derive(Debug, Clone, Copy, Serialize, utoipa::ToSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG（默认，保真）
    #[default]
    Png,
    /// JPEG（有损压缩，体积更小）
    Jpeg,
    /// WebP（无损）
    Webp,
    /// 原始 SVG 标记
    Svg,
}

impl OutputFormat {
    /// 宽松解析：大小写不敏感，无法识别时返回 None（由调用方决定默认值）。
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpeg" | "jpg" => Some(Self::Jpeg),
            "webp" => Some(Self::Webp),
            "svg" => Some(Self::Svg),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
            Self::Svg => "image/svg+xml; charset=utf-8",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
            Self::Svg => "svg",
        }
    }
}

/// OG 图片请求参数（全部可选）。
///
/// 空字符串与缺省等价；同名参数以第一次出现为准。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OgQuery {
    /// 自定义页面标题（非个人主页时生效）
    pub title: Option<String>,
    /// 副标题，缺省为品牌标语
    pub description: Option<String>,
    /// 用户名（与 name 同时存在时选择个人主页布局）
    pub username: Option<String>,
    /// 展示名
    pub name: Option<String>,
    /// 项目数（按原样展示，缺省 "0"）
    pub projects: Option<String>,
    /// 成就数（按原样展示，缺省 "0"）
    pub achievements: Option<String>,
    /// 头像 URL（仅个人主页布局）
    pub avatar: Option<String>,
    /// 输出格式：png|jpeg|webp|svg
    pub format: Option<String>,
}

impl OgQuery {
    /// 从原始 query 键值对构建。
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut q = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_ref() {
                "title" => &mut q.title,
                "description" => &mut q.description,
                "username" => &mut q.username,
                "name" => &mut q.name,
                "projects" => &mut q.projects,
                "achievements" => &mut q.achievements,
                "avatar" => &mut q.avatar,
                "format" => &mut q.format,
                _ => continue,
            };
            if slot.is_some() {
                continue;
            }
            let value: String = value.into();
            if !value.is_empty() {
                *slot = Some(value);
            }
        }
        q
    }

    /// 解析最终输出格式
    pub fn output_format(&self, default: OutputFormat) -> OutputFormat {
        self.format
            .as_deref()
            .and_then(OutputFormat::parse)
            .unwrap_or(default)
    }
}

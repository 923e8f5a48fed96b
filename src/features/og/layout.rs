use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::config::BrandingConfig;

use super::types::OgQuery;

/// 三选一的布局变体，由身份字段的有无唯一决定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutVariant {
    /// 个人主页卡片：username 与 name 同时存在
    Profile {
        name: String,
        username: String,
        description: Option<String>,
        projects: String,
        achievements: String,
        avatar: Option<String>,
    },
    /// 自定义标题页
    CustomPage {
        title: String,
        description: Option<String>,
    },
    /// 品牌默认卡片
    Default { description: Option<String> },
}

impl LayoutVariant {
    /// 根据请求参数选择布局（全函数，不会失败）。
    pub fn classify(q: &OgQuery) -> Self {
        match (&q.username, &q.name, &q.title) {
            (Some(username), Some(name), _) => Self::Profile {
                name: name.clone(),
                username: username.clone(),
                description: q.description.clone(),
                projects: q.projects.clone().unwrap_or_else(|| "0".to_string()),
                achievements: q.achievements.clone().unwrap_or_else(|| "0".to_string()),
                avatar: q.avatar.clone(),
            },
            (_, _, Some(title)) => Self::CustomPage {
                title: title.clone(),
                description: q.description.clone(),
            },
            _ => Self::Default {
                description: q.description.clone(),
            },
        }
    }

    /// 用于响应头/日志的短标签
    pub fn label(&self) -> &'static str {
        match self {
            Self::Profile { .. } => "profile",
            Self::CustomPage { .. } => "custom",
            Self::Default { .. } => "default",
        }
    }

    /// 个人主页布局下的头像地址
    pub fn avatar_url(&self) -> Option<&str> {
        match self {
            Self::Profile { avatar, .. } => avatar.as_deref(),
            _ => None,
        }
    }
}

/// 仅字符串 "1" 为单数；不做数值解析。
pub fn stat_line(projects: &str, achievements: &str) -> String {
    let noun = if projects == "1" { "project" } else { "projects" };
    format!("{projects} {noun} · {achievements} achievements")
}

/// 一段已换行的文本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBlock {
    pub lines: Vec<String>,
    pub font_size: u32,
}

/// 排版结果：各区域的纯文本内容（尚未转义）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub variant: &'static str,
    pub headline: TextBlock,
    pub subheadline: TextBlock,
    /// Profile: 项目/成就统计行
    pub stats: Option<String>,
    /// Default: 副标题下方的第二行标语
    pub secondary: Option<TextBlock>,
    /// Profile: `{domain}/{username}`
    pub profile_url: Option<String>,
    /// 右下角固定品牌标识
    pub footer_mark: String,
    /// 是否为头像预留左侧区域
    pub has_avatar: bool,
}

/// 画布与区域尺寸
pub const CANVAS_WIDTH: u32 = 1200;
pub const CANVAS_HEIGHT: u32 = 630;
pub const PADDING: u32 = 80;
pub const AVATAR_SIZE: u32 = 160;
pub const AVATAR_GAP: u32 = 48;

/// 平均字宽与字号的比例（按显示宽度 1 计），用于估算每行可容纳的列数
const GLYPH_WIDTH_RATIO: f64 = 0.56;

const HEADLINE_MAX_LINES: usize = 2;
const SUBHEADLINE_MAX_LINES: usize = 2;

impl Layout {
    /// 将布局变体与品牌配置组合为具体文案与换行。
    ///
    /// `has_avatar` 为 true 时文本区域右移，为头像让出位置；否则不预留任何空白。
    pub fn compose(variant: &LayoutVariant, branding: &BrandingConfig, has_avatar: bool) -> Self {
        let has_avatar = has_avatar && matches!(variant, LayoutVariant::Profile { .. });
        let text_width = text_area_width(has_avatar);
        let or_tagline = |d: &Option<String>| {
            d.as_deref()
                .map(clean_text)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| clean_text(&branding.tagline))
        };

        let (headline, subheadline, stats, secondary, profile_url) = match variant {
            LayoutVariant::Profile {
                name,
                username,
                description,
                projects,
                achievements,
                ..
            } => {
                let username = clean_text(username);
                (
                    clean_text(name).to_uppercase(),
                    format!("@{username} · {}", or_tagline(description)),
                    Some(truncate_with_ellipsis(
                        &clean_text(&stat_line(projects, achievements)),
                        columns_for(text_width, 30),
                    )),
                    None,
                    Some(truncate_with_ellipsis(
                        &format!("{}/{username}", clean_text(&branding.domain)),
                        columns_for(CANVAS_WIDTH - 2 * PADDING - 360, 26),
                    )),
                )
            }
            LayoutVariant::CustomPage { title, description } => {
                (clean_text(title), or_tagline(description), None, None, None)
            }
            LayoutVariant::Default { description } => (
                clean_text(&branding.product_name),
                or_tagline(description),
                None,
                Some(clean_text(&branding.secondary_tagline)),
                None,
            ),
        };

        let headline_size = headline_font_size(&headline, text_width);
        Self {
            variant: variant.label(),
            headline: TextBlock {
                lines: wrap_by_display_width(
                    &headline,
                    columns_for(text_width, headline_size),
                    HEADLINE_MAX_LINES,
                ),
                font_size: headline_size,
            },
            subheadline: TextBlock {
                lines: wrap_by_display_width(
                    &subheadline,
                    columns_for(text_width, 34),
                    SUBHEADLINE_MAX_LINES,
                ),
                font_size: 34,
            },
            stats,
            secondary: secondary.map(|s| TextBlock {
                lines: wrap_by_display_width(&s, columns_for(text_width, 28), 1),
                font_size: 28,
            }),
            profile_url,
            footer_mark: truncate_with_ellipsis(&clean_text(&branding.footer_mark), 32),
            has_avatar,
        }
    }

    /// 文本区域左边界
    pub fn text_x(&self) -> u32 {
        if self.has_avatar {
            PADDING + AVATAR_SIZE + AVATAR_GAP
        } else {
            PADDING
        }
    }
}

fn text_area_width(has_avatar: bool) -> u32 {
    let left = if has_avatar {
        PADDING + AVATAR_SIZE + AVATAR_GAP
    } else {
        PADDING
    };
    CANVAS_WIDTH - left - PADDING
}

fn columns_for(width_px: u32, font_size: u32) -> usize {
    ((width_px as f64) / (font_size as f64 * GLYPH_WIDTH_RATIO)).floor() as usize
}

/// 短标题用大字号，放不下一行时降级
fn headline_font_size(text: &str, width_px: u32) -> u32 {
    if text.width() <= columns_for(width_px, 72) {
        72
    } else {
        56
    }
}

/// 清理输入文本：换行/制表折叠为空格，移除 XML 1.0 不允许的控制字符，去掉首尾空白。
pub fn clean_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\n' | '\r' | '\t' => out.push(' '),
            c if c.is_control() => {}
            '\u{FFFE}' | '\u{FFFF}' => {}
            c => out.push(c),
        }
    }
    out.trim().to_string()
}

/// 按显示宽度换行；超出 `max_lines` 时末行以省略号截断。
pub fn wrap_by_display_width(text: &str, max_width: usize, max_lines: usize) -> Vec<String> {
    if max_width == 0 || max_lines == 0 {
        return vec![String::new()];
    }

    let mut out = Vec::<String>::new();
    let mut current = String::new();
    let mut current_w = 0usize;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        let ch_w = UnicodeWidthChar::width(ch).unwrap_or(0);
        if current_w + ch_w > max_width && !current.is_empty() {
            // 当前字符不是空格时，优先在最近的空格处断行
            let split_at = if ch == ' ' { None } else { current.rfind(' ') };
            let (line, rest) = match split_at {
                Some(idx) if idx > 0 => {
                    let rest = current[idx + 1..].to_string();
                    (current[..idx].trim_end().to_string(), rest)
                }
                _ => (std::mem::take(&mut current), String::new()),
            };
            out.push(line);
            if out.len() == max_lines {
                let mut remaining = rest;
                remaining.push(ch);
                remaining.extend(chars.by_ref());
                let last = out.pop().unwrap_or_default();
                out.push(truncate_with_ellipsis(
                    &format!("{last} {remaining}"),
                    max_width,
                ));
                return out;
            }
            current = rest.trim_start().to_string();
            current_w = current.width();
            if current.is_empty() && ch == ' ' {
                continue;
            }
        }
        current.push(ch);
        current_w += ch_w;
    }
    if !current.is_empty() || out.is_empty() {
        out.push(current);
    }
    out
}

/// 按显示宽度截断并追加省略号（省略号宽度按 1 计）
pub fn truncate_with_ellipsis(text: &str, max_width: usize) -> String {
    if max_width == 0 {
        return String::new();
    }
    if text.width() <= max_width {
        return text.to_string();
    }
    let target = max_width.saturating_sub(1);
    let mut acc = String::new();
    let mut w = 0usize;
    for ch in text.chars() {
        let cw = UnicodeWidthChar::width(ch).unwrap_or(0);
        if w + cw > target {
            break;
        }
        acc.push(ch);
        w += cw;
    }
    let mut acc = acc.trim_end().to_string();
    acc.push('…');
    acc
}

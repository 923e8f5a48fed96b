use std::fmt::Write;

use crate::config::{BrandColors, BrandingConfig};
use crate::error::AppError;

use super::avatar::AvatarImage;
use super::layout::{
    AVATAR_SIZE, CANVAS_HEIGHT, CANVAS_WIDTH, Layout, PADDING, TextBlock, clean_text,
};

/// SVG 文本字体栈
const FONT_FAMILY: &str = "Inter, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif";

/// 正文区域下边界（其下为页脚）
const CONTENT_BOTTOM: f64 = (CANVAS_HEIGHT - 130) as f64;
const FOOTER_BASELINE: u32 = CANVAS_HEIGHT - 56;

const HEADLINE_LINE_HEIGHT: f64 = 1.12;
const BODY_LINE_HEIGHT: f64 = 1.35;
const GAP_AFTER_HEADLINE: f64 = 28.0;
const GAP_BEFORE_STATS: f64 = 30.0;
const GAP_BEFORE_SECONDARY: f64 = 18.0;
const STATS_FONT_SIZE: u32 = 30;
const FOOTER_FONT_SIZE: u32 = 26;

/// XML 转义：所有插值文本必须经过这里
pub fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 8);
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// 校验后的配色，非法值回退为内置默认色
struct Palette {
    background: String,
    background_accent: String,
    headline: String,
    text: String,
    muted: String,
    accent: String,
}

fn is_hex_color(s: &str) -> bool {
    let Some(hex) = s.strip_prefix('#') else {
        return false;
    };
    matches!(hex.len(), 3 | 6) && hex.bytes().all(|b| b.is_ascii_hexdigit())
}

fn pick_color(value: &str, fallback: fn() -> String) -> String {
    if is_hex_color(value) {
        value.to_string()
    } else {
        tracing::warn!("品牌配色非法，已回退默认值: {:?}", value);
        fallback()
    }
}

impl Palette {
    fn from_colors(c: &BrandColors) -> Self {
        Self {
            background: pick_color(&c.background, BrandColors::default_background),
            background_accent: pick_color(
                &c.background_accent,
                BrandColors::default_background_accent,
            ),
            headline: pick_color(&c.headline, BrandColors::default_headline),
            text: pick_color(&c.text, BrandColors::default_text),
            muted: pick_color(&c.muted, BrandColors::default_muted),
            accent: pick_color(&c.accent, BrandColors::default_accent),
        }
    }
}

/// 解析 `#rgb` / `#rrggbb`，供兜底纯色画布使用
pub fn parse_hex_rgb(s: &str) -> Option<(u8, u8, u8)> {
    if !is_hex_color(s) {
        return None;
    }
    let hex = &s[1..];
    let channel = |i: usize, len: usize| u8::from_str_radix(&hex[i..i + len], 16).ok();
    if hex.len() == 3 {
        let (r, g, b) = (channel(0, 1)?, channel(1, 1)?, channel(2, 1)?);
        Some((r * 17, g * 17, b * 17))
    } else {
        Some((channel(0, 2)?, channel(2, 2)?, channel(4, 2)?))
    }
}

fn block_height(block: &TextBlock, line_height: f64) -> f64 {
    block.lines.len() as f64 * block.font_size as f64 * line_height
}

fn write_header(svg: &mut String, p: &Palette) -> Result<(), std::fmt::Error> {
    write!(
        svg,
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"##,
        w = CANVAS_WIDTH,
        h = CANVAS_HEIGHT,
    )?;
    write!(
        svg,
        r##"<defs><linearGradient id="bg" x1="0%" y1="0%" x2="100%" y2="100%"><stop offset="0%" stop-color="{}"/><stop offset="100%" stop-color="{}"/></linearGradient>"##,
        p.background, p.background_accent
    )?;
    Ok(())
}

/// 逐行写出多行文本，返回最后一行之后的 y
fn write_lines(
    svg: &mut String,
    block: &TextBlock,
    x: u32,
    top: f64,
    line_height: f64,
    attrs: &str,
) -> Result<f64, std::fmt::Error> {
    let step = block.font_size as f64 * line_height;
    for (i, line) in block.lines.iter().enumerate() {
        // 行框中线下移约 0.35em 作为基线
        let baseline = top + (i as f64 + 0.5) * step + block.font_size as f64 * 0.35;
        write!(
            svg,
            r##"<text x="{x}" y="{baseline:.1}" font-family="{FONT_FAMILY}" font-size="{}" {attrs}>{}</text>"##,
            block.font_size,
            escape_xml(line)
        )?;
    }
    Ok(top + block.lines.len() as f64 * step)
}

/// 生成 OG 图 SVG。三种布局共用同一套骨架，仅由 `Layout` 中的可选区域决定差异。
pub fn build_svg(
    layout: &Layout,
    avatar: Option<&AvatarImage>,
    branding: &BrandingConfig,
) -> Result<String, AppError> {
    let fmt_err = |e: std::fmt::Error| AppError::render("SVG formatting error", e);
    let p = Palette::from_colors(&branding.colors);
    let avatar = avatar.filter(|_| layout.has_avatar);

    // 正文块总高度，用于在内容区内垂直居中
    let mut total = block_height(&layout.headline, HEADLINE_LINE_HEIGHT)
        + GAP_AFTER_HEADLINE
        + block_height(&layout.subheadline, BODY_LINE_HEIGHT);
    if layout.stats.is_some() {
        total += GAP_BEFORE_STATS + STATS_FONT_SIZE as f64 * BODY_LINE_HEIGHT;
    }
    if let Some(sec) = &layout.secondary {
        total += GAP_BEFORE_SECONDARY + block_height(sec, BODY_LINE_HEIGHT);
    }
    let region_top = PADDING as f64;
    let top = region_top + ((CONTENT_BOTTOM - region_top - total) / 2.0).max(0.0);
    let center_y = region_top + (CONTENT_BOTTOM - region_top) / 2.0;

    let mut svg = String::with_capacity(8 * 1024);
    write_header(&mut svg, &p).map_err(fmt_err)?;
    if avatar.is_some() {
        let r = AVATAR_SIZE as f64 / 2.0;
        write!(
            svg,
            r##"<clipPath id="avatar-clip"><circle cx="{cx:.1}" cy="{center_y:.1}" r="{r:.1}"/></clipPath>"##,
            cx = PADDING as f64 + r,
        )
        .map_err(fmt_err)?;
    }
    svg.push_str("</defs>");

    write!(
        svg,
        r##"<rect width="{w}" height="{h}" fill="url(#bg)"/><rect width="{w}" height="8" fill="{accent}"/>"##,
        w = CANVAS_WIDTH,
        h = CANVAS_HEIGHT,
        accent = p.accent,
    )
    .map_err(fmt_err)?;

    if let Some(avatar) = avatar {
        let r = AVATAR_SIZE as f64 / 2.0;
        let x = PADDING;
        let y = center_y - r;
        write!(
            svg,
            r##"<circle cx="{cx:.1}" cy="{center_y:.1}" r="{ring:.1}" fill="{accent}"/><image href="{href}" x="{x}" y="{y:.1}" width="{s}" height="{s}" clip-path="url(#avatar-clip)" preserveAspectRatio="xMidYMid slice"/>"##,
            cx = x as f64 + r,
            ring = r + 4.0,
            accent = p.accent,
            href = escape_xml(&avatar.data_uri),
            s = AVATAR_SIZE,
        )
        .map_err(fmt_err)?;
    }

    let x = layout.text_x();
    let headline_attrs = format!(r##"font-weight="800" fill="{}""##, p.headline);
    let mut y = write_lines(
        &mut svg,
        &layout.headline,
        x,
        top,
        HEADLINE_LINE_HEIGHT,
        &headline_attrs,
    )
    .map_err(fmt_err)?;

    y += GAP_AFTER_HEADLINE;
    let body_attrs = format!(r##"font-weight="400" fill="{}""##, p.text);
    y = write_lines(
        &mut svg,
        &layout.subheadline,
        x,
        y,
        BODY_LINE_HEIGHT,
        &body_attrs,
    )
    .map_err(fmt_err)?;

    if let Some(stats) = &layout.stats {
        y += GAP_BEFORE_STATS;
        let block = TextBlock {
            lines: vec![stats.clone()],
            font_size: STATS_FONT_SIZE,
        };
        let stats_attrs = format!(r##"font-weight="600" fill="{}""##, p.accent);
        y = write_lines(&mut svg, &block, x, y, BODY_LINE_HEIGHT, &stats_attrs)
            .map_err(fmt_err)?;
    }

    if let Some(sec) = &layout.secondary {
        y += GAP_BEFORE_SECONDARY;
        let muted_attrs = format!(r##"font-weight="400" fill="{}""##, p.muted);
        write_lines(&mut svg, sec, x, y, BODY_LINE_HEIGHT, &muted_attrs).map_err(fmt_err)?;
    }

    if let Some(url) = &layout.profile_url {
        write!(
            svg,
            r##"<text x="{PADDING}" y="{FOOTER_BASELINE}" font-family="{FONT_FAMILY}" font-size="{FOOTER_FONT_SIZE}" font-weight="500" fill="{}">{}</text>"##,
            p.muted,
            escape_xml(url)
        )
        .map_err(fmt_err)?;
    }

    write_footer_mark(&mut svg, &layout.footer_mark, &p).map_err(fmt_err)?;
    svg.push_str("</svg>");
    Ok(svg)
}

/// 右下角固定品牌标识，与其余内容无关
fn write_footer_mark(svg: &mut String, mark: &str, p: &Palette) -> Result<(), std::fmt::Error> {
    let x = CANVAS_WIDTH - PADDING;
    write!(
        svg,
        r##"<text x="{x}" y="{FOOTER_BASELINE}" text-anchor="end" font-family="{FONT_FAMILY}" font-size="24" font-weight="700" fill="{}">{}</text>"##,
        p.muted,
        escape_xml(mark)
    )
}

/// 兜底图：纯色背景 + 居中字标，尺寸与正常输出一致
pub fn fallback_svg(branding: &BrandingConfig) -> String {
    let p = Palette::from_colors(&branding.colors);
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}"><rect width="{w}" height="{h}" fill="{bg}"/><text x="{cx}" y="{cy}" text-anchor="middle" dominant-baseline="central" font-family="{FONT_FAMILY}" font-size="96" font-weight="900" fill="{fg}">{name}</text></svg>"##,
        w = CANVAS_WIDTH,
        h = CANVAS_HEIGHT,
        bg = p.background,
        fg = p.headline,
        cx = CANVAS_WIDTH / 2,
        cy = CANVAS_HEIGHT / 2,
        name = escape_xml(&clean_text(&branding.product_name)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::og::layout::LayoutVariant;
    use crate::features::og::types::OgQuery;

    fn svg_for(pairs: &[(&str, &str)], avatar: Option<&AvatarImage>) -> String {
        let branding = BrandingConfig::default();
        let variant = LayoutVariant::classify(&OgQuery::from_pairs(pairs.iter().copied()));
        let layout = Layout::compose(&variant, &branding, avatar.is_some());
        build_svg(&layout, avatar, &branding).expect("build svg")
    }

    #[test]
    fn escape_xml_covers_markup_characters() {
        assert_eq!(
            escape_xml(r#"<a href="x">&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&apos;&lt;/a&gt;"
        );
    }

    #[test]
    fn hostile_title_is_rendered_as_text() {
        let svg = svg_for(&[("title", r#"<script>&"</script>"#)], None);
        assert!(!svg.contains("<script"));
        assert!(svg.contains("&lt;script&gt;&amp;&quot;&lt;/script&gt;"));

        let svg = svg_for(
            &[("title", r#"</text><svg onload="alert(1)"><image href="x"/></svg>"#)],
            None,
        );
        assert!(!svg.contains("onload=\""));
        assert_eq!(svg.matches("<svg").count(), 1);
        assert_eq!(svg.matches("<image").count(), 0);
    }

    #[test]
    fn hostile_profile_fields_are_escaped() {
        let svg = svg_for(
            &[
                ("username", r#"a"onload="x"#),
                ("name", "<b>"),
                ("projects", "<1>"),
                ("achievements", "&"),
            ],
            None,
        );
        assert!(svg.contains("&lt;B&gt;"));
        assert!(svg.contains("@a&quot;onload=&quot;x"));
        assert!(svg.contains("&lt;1&gt; projects · &amp; achievements"));
        assert!(!svg.contains(r#""onload="#));
    }

    #[test]
    fn canvas_is_fixed_size_for_every_variant() {
        let long = "x".repeat(5000);
        for pairs in [
            vec![],
            vec![("title", long.as_str())],
            vec![("username", long.as_str()), ("name", long.as_str())],
        ] {
            let svg = svg_for(&pairs, None);
            assert!(svg.starts_with(r#"<svg xmlns="http://www.w3.org/2000/svg" width="1200" height="630""#));
        }
    }

    #[test]
    fn default_variant_has_secondary_tagline_custom_does_not() {
        let branding = BrandingConfig::default();
        let default_svg = svg_for(&[], None);
        assert!(default_svg.contains(&branding.secondary_tagline));
        assert!(default_svg.contains(&branding.tagline));
        let custom_svg = svg_for(&[("title", "Hello")], None);
        assert!(!custom_svg.contains(&branding.secondary_tagline));
        assert!(custom_svg.contains(&branding.footer_mark));
    }

    #[test]
    fn avatar_is_clipped_circle_and_absent_without_avatar() {
        let avatar = AvatarImage {
            data_uri: "data:image/png;base64,AAAA".to_string(),
        };
        let with = svg_for(&[("username", "u"), ("name", "n")], Some(&avatar));
        assert!(with.contains(r#"clip-path="url(#avatar-clip)""#));
        assert!(with.contains("data:image/png;base64,AAAA"));

        let without = svg_for(&[("username", "u"), ("name", "n")], None);
        assert!(!without.contains("<image"));
        assert!(!without.contains("avatar-clip"));
        assert!(without.contains(&format!(r#"<text x="{PADDING}""#)));
    }

    #[test]
    fn invalid_brand_color_falls_back() {
        let mut branding = BrandingConfig::default();
        branding.colors.background = r#"red"/><script/>"#.to_string();
        let svg = fallback_svg(&branding);
        assert!(!svg.contains("<script"));
        assert!(svg.contains(&format!(r#"fill="{}""#, BrandColors::default_background())));
    }

    #[test]
    fn parse_hex_rgb_supports_short_and_long_forms() {
        assert_eq!(parse_hex_rgb("#fff"), Some((255, 255, 255)));
        assert_eq!(parse_hex_rgb("#0d1117"), Some((13, 17, 23)));
        assert_eq!(parse_hex_rgb("0d1117"), None);
        assert_eq!(parse_hex_rgb("#zzzzzz"), None);
    }
}

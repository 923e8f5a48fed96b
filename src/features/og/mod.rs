//! Open Graph 预览图：查询参数 -> 布局 -> SVG -> 位图。

pub mod avatar;
pub mod fallback;
pub mod handler;
pub mod layout;
pub mod raster;
pub mod service;
pub mod svg;
pub mod types;

pub use handler::create_og_router;
pub use service::{OgRenderer, RenderedImage};
pub use types::{OgQuery, OutputFormat};

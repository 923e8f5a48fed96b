use std::sync::Arc;

use crate::features::og::OgRenderer;

/// 聚合的应用共享状态
#[derive(Clone)]
pub struct AppState {
    /// OG 图渲染服务（内含渲染信号量、输出缓存与头像缓存）
    pub renderer: Arc<OgRenderer>,
}

impl AppState {
    pub fn new(renderer: OgRenderer) -> Self {
        Self {
            renderer: Arc::new(renderer),
        }
    }
}

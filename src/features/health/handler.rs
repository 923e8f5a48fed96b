use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;

use crate::state::AppState;

/// 健康检查响应
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    /// 服务状态
    #[schema(example = "healthy")]
    pub status: &'static str,
    /// 服务名称
    #[schema(example = "devimpact-og")]
    pub service: &'static str,
    /// 当前版本（Cargo package version）
    #[schema(example = "0.1.0")]
    pub version: &'static str,
    /// 空闲渲染许可数
    pub render_permits_available: usize,
    /// 输出缓存条目数（缓存关闭时为 null）
    pub cached_images: Option<u64>,
}

#[utoipa::path(
    get,
    path = "/health",
    summary = "健康检查",
    description = "用于探活的健康检查端点，返回服务状态、版本与渲染队列概况。",
    responses((status = 200, description = "服务健康", body = HealthResponse)),
    tag = "Health"
)]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy",
            service: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            render_permits_available: state.renderer.available_permits(),
            cached_images: state.renderer.cached_images(),
        }),
    )
}

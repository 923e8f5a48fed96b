use utoipa::openapi::server::{ServerBuilder, ServerVariableBuilder};
use utoipa::{Modify, OpenApi};

/// Swagger UI 的 Servers 配置。
///
/// `/og` 同时挂载在根路径与 `config.api.prefix`（默认 /api）下，两个 server 均可直接调试。
struct ApiServers;

impl Modify for ApiServers {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let root = ServerBuilder::new()
            .url("/")
            .description(Some("根路径（社交平台抓取使用的地址）"))
            .build();

        let api = ServerBuilder::new()
            .url("{api_prefix}")
            .description(Some("带前缀的业务路径"))
            .parameter(
                "api_prefix",
                ServerVariableBuilder::new()
                    .default_value("/api")
                    .description(Some("对应 config.api.prefix（可通过 APP_API_PREFIX 覆盖）")),
            )
            .build();

        openapi.servers = Some(vec![root, api]);
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::features::og::handler::og_image,
        crate::features::health::handler::health_check,
    ),
    components(schemas(
        crate::features::og::types::OutputFormat,
        crate::features::health::handler::HealthResponse,
    )),
    modifiers(&ApiServers),
    tags(
        (name = "OG", description = "Open Graph 预览图：个人主页、自定义页面与默认品牌卡片。"),
        (name = "Health", description = "健康检查：服务探活。"),
    ),
    info(
        title = "dev-impact OG Image API",
        version = env!("CARGO_PKG_VERSION"),
        description = "为 dev-impact 页面生成 1200x630 社交分享预览图（Axum + resvg）。"
    )
)]
pub struct ApiDoc;

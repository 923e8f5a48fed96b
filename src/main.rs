use std::sync::Arc;

use devimpact_og::{
    AppState, OgRenderer, ShutdownManager, build_app, config::AppConfig,
    shutdown::drain_with_timeout, startup::run_startup_checks,
};

#[tokio::main]
async fn main() {
    // 配置先于日志加载，日志级别可由配置给出；RUST_LOG 优先
    let config_result = AppConfig::init_global();
    let default_directive = match &config_result {
        Ok(()) => AppConfig::global().logging.default_directive(),
        Err(_) => "devimpact_og=info,tower_http=info".to_string(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .init();

    if let Err(e) = config_result {
        tracing::error!("Config init failed: {}", e);
        std::process::exit(1);
    }
    let config = AppConfig::global();

    let shutdown_manager = ShutdownManager::new();
    if let Err(e) = shutdown_manager.start_signal_handler() {
        tracing::error!("信号处理器启动失败: {}", e);
        std::process::exit(1);
    }

    let state = AppState::new(OgRenderer::new(
        config.branding.clone(),
        config.image.clone(),
    ));
    let renderer: Arc<OgRenderer> = state.renderer.clone();

    if let Err(e) = run_startup_checks(config, &renderer).await {
        tracing::error!("Startup checks failed: {}", e);
        std::process::exit(1);
    }

    let app = build_app(state, &config.api.prefix);

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Bind address failed {}: {}", addr, e);
            std::process::exit(1);
        });

    tracing::info!("Server: http://{}", addr);
    tracing::info!("Docs: http://{}/docs", addr);
    tracing::info!("Health: http://{}/health", addr);
    tracing::info!("OG: http://{}/og (also {}/og)", addr, config.api.prefix);
    tracing::info!(
        "渲染并发 {}，输出缓存 {}，默认格式 {}",
        config.image.effective_parallelism(),
        if config.image.cache_enabled { "开启" } else { "关闭" },
        config.image.default_format
    );

    let shutdown_timeout = config.shutdown.timeout_duration();
    let signal_manager = shutdown_manager.clone();
    let graceful = axum::serve(listener, app).with_graceful_shutdown(async move {
        let reason = signal_manager.wait_for_shutdown().await;
        tracing::info!("接收到退出信号: {:?}，开始优雅关闭HTTP服务器...", reason);
    });

    // 收到退出信号后，服务端最多再运行 shutdown_timeout 用于完成进行中的请求
    let server = async {
        if let Err(e) = graceful.await {
            tracing::error!("服务器运行错误: {}", e);
            std::process::exit(1);
        }
    };
    tokio::pin!(server);
    tokio::select! {
        _ = &mut server => {}
        _ = shutdown_manager.wait_for_shutdown() => {
            tracing::info!("优雅退出超时时间: {}秒", shutdown_timeout.as_secs());
            if drain_with_timeout(shutdown_timeout, server).await {
                tracing::info!("优雅退出完成");
            }
        }
    }

    tracing::info!("服务器已优雅关闭");
}

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::middleware;
use chrono::Utc;
use dotenv::dotenv;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use common::config::AppConfig;
use common::service_discovery::{EndpointCache, ServiceDiscovery};
use statistics_service::metrics;
use statistics_service::routes::{self, AppState};
use statistics_service::subscription::SubscriptionService;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载.env文件
    dotenv().ok();

    // 加载配置，CONFIG_PATH环境变量优先于默认路径
    let config_path = std::env::var("CONFIG_PATH").ok();
    let config = AppConfig::from_file(config_path.as_deref())?;

    // 初始化日志系统
    common::logging::init_from_config(&config)?;
    info!("正在启动统计服务...");

    // 初始化Prometheus指标
    metrics::init_metrics();

    // 端点缓存跟踪订阅服务的可用实例
    let endpoint_cache = Arc::new(EndpointCache::new(vec![config
        .subscription
        .service_name
        .clone()]));

    // Redis键值缓存与订阅鉴权服务
    let subscription =
        Arc::new(SubscriptionService::from_config(&config, endpoint_cache.clone()).await?);
    info!("订阅鉴权服务已就绪: {}", config.subscription.service_name);

    let state = AppState {
        server: config.server.clone(),
        started_at: Utc::now(),
        subscription,
    };

    let app = routes::router(state)
        .layer(middleware::from_fn(metrics::track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(config.server.server_url()).await?;
    info!("统计服务监听地址: {}", config.server.url());

    // 注册到服务注册中心并启动心跳与端点刷新
    let (discovery, mut shutdown_rx) = ServiceDiscovery::from_config(&config, endpoint_cache);
    let starter = discovery.clone();
    tokio::spawn(async move {
        if let Err(e) = starter.start().await {
            error!("Service discovery initialization aborted: {}", e);
        }
    });

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    // 等待关闭信号、注册重试耗尽的致命通知或服务器退出
    let exit_code = tokio::select! {
        reason = common::service::shutdown_signal() => reason.exit_code(),
        code = shutdown_rx.recv() => {
            let code = code.unwrap_or(config.service_center.fatal_exit_code);
            error!("Discovery client failed fatally, exiting with code {}", code);
            code
        }
        result = server.into_future() => {
            match result {
                Ok(()) => 0,
                Err(e) => {
                    error!("服务器错误: {}", e);
                    1
                }
            }
        }
    };

    // 注销服务等清理动作必须在限定时间内完成
    common::service::cleanup_with_grace(Duration::from_secs(5), async {
        discovery.shutdown().await;
    })
    .await;

    info!("统计服务已关闭，退出码: {}", exit_code);
    std::process::exit(exit_code);
}

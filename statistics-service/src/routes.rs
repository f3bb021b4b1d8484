use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use common::config::ServerConfig;
use common::utils;

use crate::metrics;
use crate::subscription::SubscriptionService;

/// 路由共享状态
///
/// 订阅鉴权服务挂在这里，供统计查询路由做访问控制
#[derive(Clone)]
pub struct AppState {
    pub server: ServerConfig,
    pub started_at: DateTime<Utc>,
    pub subscription: Arc<SubscriptionService>,
}

/// 组装服务的HTTP路由
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/health", get(health))
        .route("/info", get(info))
        .route("/metrics", get(metrics::metrics_handler))
        .with_state(state)
}

/// GET /ping
async fn ping(ConnectInfo(addr): ConnectInfo<SocketAddr>) -> Json<Value> {
    Json(json!({
        "status_code": 200,
        "message": "PONG",
        "params": { "ip": addr.ip().to_string() },
    }))
}

/// GET /health
async fn health(ConnectInfo(addr): ConnectInfo<SocketAddr>) -> Json<Value> {
    Json(json!({
        "status_code": 200,
        "message": "Server is UP and running",
        "params": { "ip": addr.ip().to_string() },
    }))
}

/// GET /info
///
/// 注册到Eureka时实例的状态页就指向这里
async fn info(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "app": {
            "name": state.server.name,
            "version": env!("CARGO_PKG_VERSION"),
            "description": env!("CARGO_PKG_DESCRIPTION"),
        },
        "build": {
            "compiler.arch": std::env::consts::ARCH,
            "compiler.os": std::env::consts::OS,
        },
        "runtime": {
            "ip": utils::local_ip(),
            "port": state.server.port,
            "started_at": state.started_at.to_rfc3339(),
        },
    }))
}

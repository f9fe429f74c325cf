//! HTTP 路由模块

pub mod health;
pub mod metrics;

use axum::{routing::get, Router};

use crate::http::HttpServerState;

/// 创建所有路由
pub fn create_routes() -> Router<HttpServerState> {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
}

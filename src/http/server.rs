//! HTTP 服务器 - 健康检查与指标

use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::http::routes;
use crate::infra::{Database, HandlerLimiter, RedisClient};

/// HTTP 服务共享状态
#[derive(Clone)]
pub struct HttpServerState {
    pub started_at: Instant,
    /// 运行模式（run / replay）
    pub mode: &'static str,
    pub limiter: HandlerLimiter,
    pub redis: Option<Arc<RedisClient>>,
    pub database: Option<Database>,
}

/// 运维 HTTP 服务器
pub struct OpsHttpServer {
    state: HttpServerState,
    port: u16,
}

impl OpsHttpServer {
    pub fn new(state: HttpServerState, port: u16) -> Self {
        Self { state, port }
    }

    /// 构建路由（测试中可直接调用）
    pub fn router(&self) -> Router {
        Router::new()
            .merge(routes::create_routes())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// 启动 HTTP 服务器（在单独的 tokio task 中运行）
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let app = self.router();

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!("🌐 运维 HTTP 服务启动在端口 {}", self.port);

        axum::serve(listener, app).await?;
        Ok(())
    }
}

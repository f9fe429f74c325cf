//! GET /health - 存活检查

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::http::HttpServerState;
use crate::infra::metrics;

/// 返回运行时长、处理中的事件数和连接池状态
///
/// 连接池的数字顺便刷新到指标里，抓取 /metrics 前访问一次即可拿到最新值。
pub async fn health_handler(State(state): State<HttpServerState>) -> (StatusCode, Json<Value>) {
    let redis = state.redis.as_ref().map(|redis| {
        let pool = redis.pool_state();
        let idle = pool.idle_connections;
        let active = pool.connections.saturating_sub(idle);
        metrics::record_redis_pool(active, idle);
        json!({ "connections": pool.connections, "idle": idle })
    });
    let database = state.database.as_ref().map(|db| {
        let size = db.pool().size();
        let idle = db.pool().num_idle() as u32;
        metrics::record_db_pool(size.saturating_sub(idle), idle);
        json!({ "size": size, "idle": idle })
    });

    let body = json!({
        "status": "ok",
        "mode": state.mode,
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "inflight": state.limiter.inflight(),
        "max_inflight": state.limiter.max_inflight(),
        "rejected": state.limiter.rejected_total(),
        "redis": redis,
        "database": database,
    });
    (StatusCode::OK, Json(body))
}

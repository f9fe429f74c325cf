//! HTTP 服务模块 - 使用 Axum 提供运维接口
//!
//! - `/health` 存活与依赖状态
//! - `/metrics` Prometheus 抓取端点

pub mod routes;
pub mod server;

pub use server::{HttpServerState, OpsHttpServer};

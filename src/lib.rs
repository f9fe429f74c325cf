#![allow(async_fn_in_trait)]

pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod domain;  // 审计事件
pub mod error;
pub mod http;  // 健康检查 / 指标
pub mod infra;
pub mod logging;
pub mod model;
pub mod platform;  // 宿主平台接口
pub mod repository;
pub mod server;
pub mod service;

pub use config::GatekeeperConfig;
pub use dispatcher::{DispatchOutcome, ModerationDispatcher};
pub use error::{GuardError, Result};
pub use model::*;
pub use server::{assemble, Backends, GatekeeperServer};

// Infrastructure layer - 基础设施层
// 共享缓存、数据库、延时任务、重试、限流、指标、审计事件总线

pub mod cache;
pub mod database;
pub mod event_bus;
pub mod handler_limiter;
pub mod memory_cache;
pub mod metrics;
pub mod redis;
pub mod retry;
pub mod timer;

pub use cache::SharedCache;
pub use database::Database;
pub use event_bus::{AuditSink, EventBus};
pub use handler_limiter::HandlerLimiter;
pub use memory_cache::MemoryCache;
pub use redis::RedisClient;
pub use retry::RetryPolicy;
pub use timer::{TimerHandle, TimerRegistry};

//! 宿主平台接口
//!
//! 核心只依赖 [`PlatformApi`]，具体传输由外部适配器负责。

pub mod api;
pub mod dry_run;
pub mod gateway;
pub mod redis_outbox;

pub use api::{PlatformApi, PlatformCommand, PlatformError, PlatformResult};
pub use dry_run::DryRunPlatform;
pub use gateway::PlatformGateway;
pub use redis_outbox::RedisOutboxPlatform;

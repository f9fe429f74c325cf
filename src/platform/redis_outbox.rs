use async_trait::async_trait;
use std::sync::Arc;

use crate::infra::redis::RedisClient;
use crate::model::MessageId;
use crate::platform::api::{PlatformApi, PlatformCommand, PlatformError, PlatformResult};

/// 通过 Redis 频道把指令交给外部传输适配器
///
/// 发布即视为成功；适配器侧的失败不回传，消息 ID 也无法同步拿到。
pub struct RedisOutboxPlatform {
    redis: Arc<RedisClient>,
    channel: String,
}

impl RedisOutboxPlatform {
    pub fn new(redis: Arc<RedisClient>, channel: impl Into<String>) -> Self {
        Self {
            redis,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl PlatformApi for RedisOutboxPlatform {
    async fn execute(&self, command: &PlatformCommand) -> PlatformResult<Option<MessageId>> {
        let payload = serde_json::to_string(command)
            .map_err(|e| PlatformError::permanent(format!("指令序列化失败: {}", e)))?;
        self.redis
            .publish(&self.channel, &payload)
            .await
            .map_err(|e| PlatformError::transient(e.to_string()))?;
        tracing::debug!(op = command.op_name(), channel = %self.channel, "📤 指令已发布");
        Ok(None)
    }
}

//! 平台事件去重
//!
//! 平台至少投递一次，同一个 update_id 可能重复到达。
//! 处理前用 SET NX 占位 `dedup:update:{id}`；处理失败时释放占位，重投时可以再处理。

use std::sync::Arc;
use std::time::Duration;

use crate::infra::{metrics, SharedCache};
use crate::model::UpdateId;

/// 占位结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// 首次出现，继续处理
    Fresh,
    /// 重复事件，丢弃
    Duplicate,
    /// 缓存不可用，放行处理（降级）
    Unavailable,
}

/// 去重服务
pub struct UpdateDedupService {
    cache: Arc<dyn SharedCache>,
    ttl: Duration,
}

impl UpdateDedupService {
    pub fn new(cache: Arc<dyn SharedCache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    fn key(update_id: UpdateId) -> String {
        format!("dedup:update:{}", update_id)
    }

    /// 尝试占位
    pub async fn claim(&self, update_id: UpdateId) -> Claim {
        match self.cache.set_nx(&Self::key(update_id), "1", self.ttl).await {
            Ok(true) => Claim::Fresh,
            Ok(false) => {
                tracing::debug!(update_id, "🔄 重复事件，已忽略");
                metrics::record_duplicate_event();
                Claim::Duplicate
            }
            Err(e) => {
                tracing::warn!(update_id, "⚠️ 去重缓存不可用，照常处理: {}", e);
                metrics::record_degraded("dedup");
                Claim::Unavailable
            }
        }
    }

    /// 处理失败后释放占位
    pub async fn release(&self, update_id: UpdateId) {
        if let Err(e) = self.cache.delete(&Self::key(update_id)).await {
            tracing::warn!(update_id, "⚠️ 释放去重占位失败: {}", e);
        }
    }
}

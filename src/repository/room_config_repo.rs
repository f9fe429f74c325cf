//! Room Config Store 与配置解析
//!
//! Store 只负责读出群设置覆盖项；[`RoomConfigResolver`] 把覆盖项和服务级默认策略
//! 合并成 [`RoomConfig`]，并用 moka 做短期缓存。

use async_trait::async_trait;
use moka::future::Cache;
use sqlx::types::Json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{GuardError, Result};
use crate::model::{RoomConfig, RoomId, RoomPolicy, RoomSettings};

/// 群设置读取接口
#[async_trait]
pub trait RoomConfigStore: Send + Sync {
    /// 群没有设置记录时返回 None
    async fn load(&self, room_id: RoomId) -> Result<Option<RoomSettings>>;
}

/// 群设置 (PostgreSQL 实现，JSONB 覆盖项)
#[derive(Clone)]
pub struct PgRoomConfigStore {
    pool: Arc<PgPool>,
}

impl PgRoomConfigStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoomConfigStore for PgRoomConfigStore {
    async fn load(&self, room_id: RoomId) -> Result<Option<RoomSettings>> {
        let row: Option<(Json<RoomSettings>,)> =
            sqlx::query_as("SELECT settings FROM room_settings WHERE room_id = $1")
                .bind(room_id)
                .fetch_optional(self.pool.as_ref())
                .await
                .map_err(|e| GuardError::Persistence(format!("读取群设置失败: {}", e)))?;
        Ok(row.map(|(Json(settings),)| settings))
    }
}

/// 群配置解析器
pub struct RoomConfigResolver {
    store: Arc<dyn RoomConfigStore>,
    defaults: RoomPolicy,
    cache: Cache<RoomId, RoomConfig>,
}

impl RoomConfigResolver {
    pub fn new(store: Arc<dyn RoomConfigStore>, defaults: RoomPolicy, ttl: Duration) -> Self {
        Self {
            store,
            defaults,
            cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// 解析某群的配置
    ///
    /// 读取失败时按"未配置"处理（功能关闭），不缓存该结果。
    pub async fn resolve(&self, room_id: RoomId) -> RoomConfig {
        if let Some(cached) = self.cache.get(&room_id).await {
            return cached;
        }

        match self.store.load(room_id).await {
            Ok(settings) => {
                if settings.is_none() {
                    tracing::debug!(room_id, "群没有设置记录，功能全部关闭");
                }
                let config = RoomConfig::resolve(room_id, &self.defaults, settings.as_ref());
                self.cache.insert(room_id, config).await;
                config
            }
            Err(e) => {
                tracing::warn!(room_id, "⚠️ 读取群设置失败，按未配置处理: {}", e);
                RoomConfig::unconfigured(room_id)
            }
        }
    }

    /// 设置变更后失效缓存
    pub async fn invalidate(&self, room_id: RoomId) {
        self.cache.invalidate(&room_id).await;
    }

    pub fn defaults(&self) -> &RoomPolicy {
        &self.defaults
    }
}

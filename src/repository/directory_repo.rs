//! 群管理员目录 - PostgreSQL 实现（表由外部同步程序维护，这里只读）

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

use crate::error::{GuardError, Result};
use crate::model::{RoomId, UserId};

/// 管理员目录
#[async_trait]
pub trait Directory: Send + Sync {
    /// `user_id` 在 `room_id` 是否拥有处罚权限
    async fn is_admin(&self, room_id: RoomId, user_id: UserId) -> Result<bool>;

    /// `user_id` 拥有处罚权限的所有群
    async fn privileged_rooms(&self, user_id: UserId) -> Result<Vec<RoomId>>;
}

#[derive(Clone)]
pub struct PgDirectory {
    pool: Arc<PgPool>,
}

impl PgDirectory {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Directory for PgDirectory {
    async fn is_admin(&self, room_id: RoomId, user_id: UserId) -> Result<bool> {
        let found: Option<bool> = sqlx::query_scalar(
            "SELECT can_restrict FROM room_admins WHERE room_id = $1 AND user_id = $2",
        )
        .bind(room_id)
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| GuardError::Persistence(format!("查询管理员失败: {}", e)))?;
        Ok(found.unwrap_or(false))
    }

    async fn privileged_rooms(&self, user_id: UserId) -> Result<Vec<RoomId>> {
        let rooms: Vec<i64> = sqlx::query_scalar(
            "SELECT room_id FROM room_admins WHERE user_id = $1 AND can_restrict ORDER BY room_id",
        )
        .bind(user_id)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(|e| GuardError::Persistence(format!("查询管理群列表失败: {}", e)))?;
        Ok(rooms)
    }
}

//! 入群申请关联记录
//!
//! 收到入群申请时写 `join_request:{room}:{subject}`（短 TTL），
//! 随后的 absent → present 变更读取并删除它，作为分类器的"有待处理申请"输入。

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::infra::SharedCache;
use crate::model::{RoomId, UserId};

pub struct JoinRequestTracker {
    cache: Arc<dyn SharedCache>,
    ttl: Duration,
}

impl JoinRequestTracker {
    pub fn new(cache: Arc<dyn SharedCache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    fn key(room_id: RoomId, subject_id: UserId) -> String {
        format!("join_request:{}:{}", room_id, subject_id)
    }

    pub async fn record(&self, room_id: RoomId, subject_id: UserId) -> Result<()> {
        self.cache
            .set_ex(&Self::key(room_id, subject_id), "1", self.ttl)
            .await
    }

    /// 读取并删除；存在返回 true
    pub async fn consume(&self, room_id: RoomId, subject_id: UserId) -> Result<bool> {
        Ok(self
            .cache
            .take(&Self::key(room_id, subject_id))
            .await?
            .is_some())
    }

    pub async fn has_pending(&self, room_id: RoomId, subject_id: UserId) -> Result<bool> {
        self.cache.exists(&Self::key(room_id, subject_id)).await
    }
}

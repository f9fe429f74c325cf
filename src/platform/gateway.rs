//! 平台调用网关：统一重试、错误分类和指标

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::infra::metrics;
use crate::infra::retry::{retry_platform, RetryPolicy};
use crate::model::{MessageId, RoomId, UserId};
use crate::platform::api::{PlatformApi, PlatformCommand};

/// 带重试的平台网关
#[derive(Clone)]
pub struct PlatformGateway {
    api: Arc<dyn PlatformApi>,
    retry: RetryPolicy,
}

impl PlatformGateway {
    pub fn new(api: Arc<dyn PlatformApi>, retry: RetryPolicy) -> Self {
        Self { api, retry }
    }

    /// 执行一条指令：临时错误退避重试，永久错误直接返回
    pub async fn execute(&self, command: PlatformCommand) -> Result<Option<MessageId>> {
        let op = command.op_name();
        let result = retry_platform(&self.retry, op, || self.api.execute(&command)).await;
        match result {
            Ok(message_id) => {
                metrics::record_platform_call(op, "ok");
                Ok(message_id)
            }
            Err(err) => {
                let outcome = if err.is_transient() { "transient" } else { "permanent" };
                metrics::record_platform_call(op, outcome);
                tracing::warn!(op, chat_id = command.chat_id(), "❌ 平台调用失败: {}", err);
                Err(err.into_guard(op))
            }
        }
    }

    pub async fn restrict(
        &self,
        room_id: RoomId,
        user_id: UserId,
        duration: Option<Duration>,
    ) -> Result<()> {
        self.execute(PlatformCommand::RestrictMember {
            room_id,
            user_id,
            until: until(duration),
        })
        .await
        .map(|_| ())
    }

    pub async fn lift_restriction(&self, room_id: RoomId, user_id: UserId) -> Result<()> {
        self.execute(PlatformCommand::LiftRestriction { room_id, user_id })
            .await
            .map(|_| ())
    }

    pub async fn ban(&self, room_id: RoomId, user_id: UserId, duration: Option<Duration>) -> Result<()> {
        self.execute(PlatformCommand::BanMember {
            room_id,
            user_id,
            until: until(duration),
        })
        .await
        .map(|_| ())
    }

    pub async fn unban(&self, room_id: RoomId, user_id: UserId) -> Result<()> {
        self.execute(PlatformCommand::UnbanMember { room_id, user_id })
            .await
            .map(|_| ())
    }

    pub async fn remove(&self, room_id: RoomId, user_id: UserId) -> Result<()> {
        self.execute(PlatformCommand::RemoveMember { room_id, user_id })
            .await
            .map(|_| ())
    }

    pub async fn approve_join_request(&self, room_id: RoomId, user_id: UserId) -> Result<()> {
        self.execute(PlatformCommand::ApproveJoinRequest { room_id, user_id })
            .await
            .map(|_| ())
    }

    pub async fn decline_join_request(&self, room_id: RoomId, user_id: UserId) -> Result<()> {
        self.execute(PlatformCommand::DeclineJoinRequest { room_id, user_id })
            .await
            .map(|_| ())
    }

    pub async fn send_message(&self, chat_id: i64, text: impl Into<String>) -> Result<Option<MessageId>> {
        self.execute(PlatformCommand::SendMessage {
            chat_id,
            text: text.into(),
        })
        .await
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: MessageId) -> Result<()> {
        self.execute(PlatformCommand::DeleteMessage {
            chat_id,
            message_id,
        })
        .await
        .map(|_| ())
    }
}

fn until(duration: Option<Duration>) -> Option<DateTime<Utc>> {
    duration
        .and_then(|d| chrono::Duration::from_std(d).ok())
        .map(|d| Utc::now() + d)
}

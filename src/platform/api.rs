use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::error::GuardError;
use crate::model::{MessageId, RoomId, UserId};

/// 平台调用错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// 超时、限流等，可重试
    #[error("临时错误: {reason}")]
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },
    /// 群或用户已不存在、无权限等，不可重试
    #[error("永久错误: {reason}")]
    Permanent { reason: String },
}

impl PlatformError {
    pub fn transient(reason: impl Into<String>) -> Self {
        PlatformError::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }

    /// 平台返回的限流提示
    pub fn rate_limited(retry_after: Duration) -> Self {
        PlatformError::Transient {
            reason: "rate limited".to_string(),
            retry_after: Some(retry_after),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        PlatformError::Permanent {
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Transient { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PlatformError::Transient { retry_after, .. } => *retry_after,
            PlatformError::Permanent { .. } => None,
        }
    }

    pub fn into_guard(self, op: &str) -> GuardError {
        match self {
            PlatformError::Transient { reason, .. } => GuardError::PlatformTransient {
                op: op.to_string(),
                reason,
            },
            PlatformError::Permanent { reason } => GuardError::PlatformPermanent {
                op: op.to_string(),
                reason,
            },
        }
    }
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// 发往宿主平台的指令
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlatformCommand {
    /// 限制发言，`until` 为空表示无限期
    RestrictMember {
        room_id: RoomId,
        user_id: UserId,
        until: Option<DateTime<Utc>>,
    },
    LiftRestriction {
        room_id: RoomId,
        user_id: UserId,
    },
    BanMember {
        room_id: RoomId,
        user_id: UserId,
        until: Option<DateTime<Utc>>,
    },
    UnbanMember {
        room_id: RoomId,
        user_id: UserId,
    },
    /// 移出群，之后仍可再次加入
    RemoveMember {
        room_id: RoomId,
        user_id: UserId,
    },
    ApproveJoinRequest {
        room_id: RoomId,
        user_id: UserId,
    },
    DeclineJoinRequest {
        room_id: RoomId,
        user_id: UserId,
    },
    SendMessage {
        chat_id: i64,
        text: String,
    },
    DeleteMessage {
        chat_id: i64,
        message_id: MessageId,
    },
}

impl PlatformCommand {
    pub fn op_name(&self) -> &'static str {
        match self {
            PlatformCommand::RestrictMember { .. } => "restrict_member",
            PlatformCommand::LiftRestriction { .. } => "lift_restriction",
            PlatformCommand::BanMember { .. } => "ban_member",
            PlatformCommand::UnbanMember { .. } => "unban_member",
            PlatformCommand::RemoveMember { .. } => "remove_member",
            PlatformCommand::ApproveJoinRequest { .. } => "approve_join_request",
            PlatformCommand::DeclineJoinRequest { .. } => "decline_join_request",
            PlatformCommand::SendMessage { .. } => "send_message",
            PlatformCommand::DeleteMessage { .. } => "delete_message",
        }
    }

    /// 指令作用的群 / 会话
    pub fn chat_id(&self) -> i64 {
        match self {
            PlatformCommand::RestrictMember { room_id, .. }
            | PlatformCommand::LiftRestriction { room_id, .. }
            | PlatformCommand::BanMember { room_id, .. }
            | PlatformCommand::UnbanMember { room_id, .. }
            | PlatformCommand::RemoveMember { room_id, .. }
            | PlatformCommand::ApproveJoinRequest { room_id, .. }
            | PlatformCommand::DeclineJoinRequest { room_id, .. } => *room_id,
            PlatformCommand::SendMessage { chat_id, .. }
            | PlatformCommand::DeleteMessage { chat_id, .. } => *chat_id,
        }
    }
}

/// 宿主平台接口
///
/// 传输层不在本服务范围内，这里只约定指令和错误分类。
/// `SendMessage` 成功时返回消息 ID（传输层无法同步给出时返回 None）。
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn execute(&self, command: &PlatformCommand) -> PlatformResult<Option<MessageId>>;
}

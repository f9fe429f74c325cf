//! 入站事件
//!
//! `RawEvent` 是宿主平台适配器投递过来的 JSON 形态（至少一次投递，可能重复），
//! `InboundEvent` 是分发器解码后的显式和类型，后续处理只按变体分支。

use serde::{Deserialize, Serialize};

use super::membership::{
    ArrivalChannel, MemberStatus, MembershipEvent, MessageId, RoomId, UpdateId, UserId,
};
use super::profile::ProfileSignals;

/// 平台适配器投递的原始事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawEvent {
    /// 用户通过申请通道请求入群
    JoinRequest {
        update_id: UpdateId,
        room_id: RoomId,
        subject: ProfileSignals,
    },
    /// 成员状态变更（加入、退出、被踢等）
    ChatMember {
        update_id: UpdateId,
        room_id: RoomId,
        subject: ProfileSignals,
        #[serde(default)]
        actor_id: Option<UserId>,
        old_status: MemberStatus,
        new_status: MemberStatus,
        #[serde(default)]
        channel: ArrivalChannel,
    },
    /// 某用户给消息添加了表情回应
    ReactionAdded {
        update_id: UpdateId,
        room_id: RoomId,
        actor_id: UserId,
        message_id: MessageId,
    },
    /// 验证答案提交
    ChallengeAnswer {
        update_id: UpdateId,
        room_id: RoomId,
        subject_id: UserId,
        submitter_id: UserId,
        answer: String,
    },
    /// 管理员手动处罚命令
    ModerationCommand {
        update_id: UpdateId,
        room_id: RoomId,
        issuer_id: UserId,
        target_id: UserId,
        action: ManualAction,
        #[serde(default)]
        reason: Option<String>,
    },
}

impl RawEvent {
    pub fn update_id(&self) -> UpdateId {
        match self {
            RawEvent::JoinRequest { update_id, .. }
            | RawEvent::ChatMember { update_id, .. }
            | RawEvent::ReactionAdded { update_id, .. }
            | RawEvent::ChallengeAnswer { update_id, .. }
            | RawEvent::ModerationCommand { update_id, .. } => *update_id,
        }
    }

    pub fn room_id(&self) -> RoomId {
        match self {
            RawEvent::JoinRequest { room_id, .. }
            | RawEvent::ChatMember { room_id, .. }
            | RawEvent::ReactionAdded { room_id, .. }
            | RawEvent::ChallengeAnswer { room_id, .. }
            | RawEvent::ModerationCommand { room_id, .. } => *room_id,
        }
    }

    /// 指标 / 日志标签
    pub fn kind(&self) -> &'static str {
        match self {
            RawEvent::JoinRequest { .. } => "join_request",
            RawEvent::ChatMember { .. } => "chat_member",
            RawEvent::ReactionAdded { .. } => "reaction_added",
            RawEvent::ChallengeAnswer { .. } => "challenge_answer",
            RawEvent::ModerationCommand { .. } => "moderation_command",
        }
    }
}

/// 手动处罚动作
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ManualAction {
    /// 禁言，`duration_secs` 为空表示无限期
    Mute {
        #[serde(default)]
        duration_secs: Option<u64>,
    },
    Unmute,
    Kick,
    /// 永久封禁；`global` 时登记并传播到其他群
    Ban {
        #[serde(default)]
        global: bool,
    },
    /// 撤销该用户所有生效的登记处罚
    Unban,
}

impl ManualAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManualAction::Mute { .. } => "mute",
            ManualAction::Unmute => "unmute",
            ManualAction::Kick => "kick",
            ManualAction::Ban { .. } => "ban",
            ManualAction::Unban => "unban",
        }
    }
}

/// 解码后的入站事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    JoinRequested {
        update_id: UpdateId,
        room_id: RoomId,
        profile: ProfileSignals,
    },
    Membership {
        event: MembershipEvent,
        profile: ProfileSignals,
    },
    ReactionAdded {
        update_id: UpdateId,
        room_id: RoomId,
        actor_id: UserId,
        message_id: MessageId,
    },
    ChallengeAnswer {
        update_id: UpdateId,
        room_id: RoomId,
        subject_id: UserId,
        submitter_id: UserId,
        answer: String,
    },
    Moderation {
        update_id: UpdateId,
        room_id: RoomId,
        issuer_id: UserId,
        target_id: UserId,
        action: ManualAction,
        reason: Option<String>,
    },
}

impl From<RawEvent> for InboundEvent {
    fn from(raw: RawEvent) -> Self {
        match raw {
            RawEvent::JoinRequest {
                update_id,
                room_id,
                subject,
            } => InboundEvent::JoinRequested {
                update_id,
                room_id,
                profile: subject,
            },
            RawEvent::ChatMember {
                update_id,
                room_id,
                subject,
                actor_id,
                old_status,
                new_status,
                channel,
            } => InboundEvent::Membership {
                event: MembershipEvent {
                    update_id,
                    room_id,
                    subject_id: subject.subject_id,
                    actor_id,
                    old_status,
                    new_status,
                    channel,
                },
                profile: subject,
            },
            RawEvent::ReactionAdded {
                update_id,
                room_id,
                actor_id,
                message_id,
            } => InboundEvent::ReactionAdded {
                update_id,
                room_id,
                actor_id,
                message_id,
            },
            RawEvent::ChallengeAnswer {
                update_id,
                room_id,
                subject_id,
                submitter_id,
                answer,
            } => InboundEvent::ChallengeAnswer {
                update_id,
                room_id,
                subject_id,
                submitter_id,
                answer,
            },
            RawEvent::ModerationCommand {
                update_id,
                room_id,
                issuer_id,
                target_id,
                action,
                reason,
            } => InboundEvent::Moderation {
                update_id,
                room_id,
                issuer_id,
                target_id,
                action,
                reason,
            },
        }
    }
}

impl InboundEvent {
    pub fn room_id(&self) -> RoomId {
        match self {
            InboundEvent::JoinRequested { room_id, .. }
            | InboundEvent::ReactionAdded { room_id, .. }
            | InboundEvent::ChallengeAnswer { room_id, .. }
            | InboundEvent::Moderation { room_id, .. } => *room_id,
            InboundEvent::Membership { event, .. } => event.room_id,
        }
    }

    /// 事件所涉及的主体
    pub fn subject_id(&self) -> UserId {
        match self {
            InboundEvent::JoinRequested { profile, .. } => profile.subject_id,
            InboundEvent::Membership { event, .. } => event.subject_id,
            InboundEvent::ReactionAdded { actor_id, .. } => *actor_id,
            InboundEvent::ChallengeAnswer { subject_id, .. } => *subject_id,
            InboundEvent::Moderation { target_id, .. } => *target_id,
        }
    }
}

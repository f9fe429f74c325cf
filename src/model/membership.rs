use serde::{Deserialize, Serialize};

// ============================================================================
// 类型别名
// ============================================================================

/// 群 ID（平台侧可能为负数）
pub type RoomId = i64;
/// 用户 ID
pub type UserId = i64;
/// 消息 ID
pub type MessageId = i64;
/// 平台更新 ID（用于去重）
pub type UpdateId = i64;

// ============================================================================
// 成员状态与到达方式
// ============================================================================

/// 群成员状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    /// 不在群内（未加入 / 已退出 / 被踢）
    #[default]
    Absent,
    /// 普通成员
    Member,
    /// 受限成员（仍在群内）
    Restricted,
    /// 管理员
    Administrator,
    /// 群主
    Owner,
    /// 已封禁
    Banned,
}

impl MemberStatus {
    /// 是否处于"在群内"状态
    pub fn is_present(self) -> bool {
        matches!(
            self,
            MemberStatus::Member
                | MemberStatus::Restricted
                | MemberStatus::Administrator
                | MemberStatus::Owner
        )
    }
}

/// 事件到达通道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalChannel {
    /// 专用的入群申请通道
    Request,
    /// 直接加入（链接、公开群）
    #[default]
    Direct,
    /// 被邀请
    Invite,
}

/// 一次成员状态变更（不落库）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipEvent {
    pub update_id: UpdateId,
    pub room_id: RoomId,
    pub subject_id: UserId,
    /// 触发者（邀请人、审批人），可能为空或等于 subject
    pub actor_id: Option<UserId>,
    pub old_status: MemberStatus,
    pub new_status: MemberStatus,
    pub channel: ArrivalChannel,
}

impl MembershipEvent {
    /// absent → present
    pub fn is_arrival(&self) -> bool {
        !self.old_status.is_present() && self.new_status.is_present()
    }

    /// present → absent
    pub fn is_departure(&self) -> bool {
        self.old_status.is_present() && !self.new_status.is_present()
    }

    /// 触发者存在且不是本人
    pub fn foreign_actor(&self) -> Option<UserId> {
        self.actor_id.filter(|actor| *actor != self.subject_id)
    }
}

/// 成员变更的成因分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    JoinRequest,
    Invite,
    SelfJoin,
    Other,
}

impl JoinKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JoinKind::JoinRequest => "join_request",
            JoinKind::Invite => "invite",
            JoinKind::SelfJoin => "self_join",
            JoinKind::Other => "other",
        }
    }
}

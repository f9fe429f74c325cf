use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::membership::{RoomId, UserId};

/// 处罚类型（数据库存 SMALLINT）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PunishmentKind {
    /// 限制发言
    TemporaryRestrict = 0,
    /// 移出群（可再次加入）
    Kick = 1,
    /// 永久封禁
    PermanentBan = 2,
}

impl PunishmentKind {
    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(PunishmentKind::TemporaryRestrict),
            1 => Some(PunishmentKind::Kick),
            2 => Some(PunishmentKind::PermanentBan),
            _ => None,
        }
    }

    pub fn to_i16(self) -> i16 {
        self as i16
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PunishmentKind::TemporaryRestrict => "temporary_restrict",
            PunishmentKind::Kick => "kick",
            PunishmentKind::PermanentBan => "permanent_ban",
        }
    }
}

/// 处罚原因标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestrictReason {
    /// 跨群处罚登记命中
    Registry,
    /// 风险评分命中
    RiskGate,
    /// 批量入群保护模式
    MassJoin,
    /// 频繁进出群
    JoinExitChurn,
    /// 批量邀请
    InviteFlood,
    /// 批量表情回应
    ReactionAbuse,
    /// 验证失败
    ChallengeFailed,
    /// 管理员手动处罚
    Manual,
}

impl RestrictReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RestrictReason::Registry => "registry",
            RestrictReason::RiskGate => "risk_gate",
            RestrictReason::MassJoin => "mass_join",
            RestrictReason::JoinExitChurn => "join_exit_churn",
            RestrictReason::InviteFlood => "invite_flood",
            RestrictReason::ReactionAbuse => "reaction_abuse",
            RestrictReason::ChallengeFailed => "challenge_failed",
            RestrictReason::Manual => "manual",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Some(match tag {
            "registry" => RestrictReason::Registry,
            "risk_gate" => RestrictReason::RiskGate,
            "mass_join" => RestrictReason::MassJoin,
            "join_exit_churn" => RestrictReason::JoinExitChurn,
            "invite_flood" => RestrictReason::InviteFlood,
            "reaction_abuse" => RestrictReason::ReactionAbuse,
            "challenge_failed" => RestrictReason::ChallengeFailed,
            "manual" => RestrictReason::Manual,
            _ => return None,
        })
    }
}

/// 待写入的处罚登记
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPunishment {
    pub subject_id: UserId,
    pub origin_room_id: RoomId,
    pub kind: PunishmentKind,
    pub issuer_id: UserId,
    pub reason: RestrictReason,
    pub expires_at: Option<DateTime<Utc>>,
}

/// 跨群处罚登记
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunishmentRecord {
    pub id: i64,
    pub subject_id: UserId,
    pub origin_room_id: RoomId,
    pub kind: PunishmentKind,
    pub issuer_id: UserId,
    pub reason: RestrictReason,
    /// 为空表示无限期
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
    /// 已成功传播到的群（包含来源群）
    pub propagated_rooms: BTreeSet<RoomId>,
    pub created_at: DateTime<Utc>,
}

impl PunishmentRecord {
    /// 生效且未过期
    pub fn is_in_force(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.map_or(true, |at| at > now)
    }
}

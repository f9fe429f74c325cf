use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{
    EntryPoint, ExhaustionPolicy, PunishmentKind, RestrictReason, RoomId, UserId,
};

/// 审计事件（写入 Audit Sink 的结构化记录）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// 已出题
    ChallengeIssued {
        room_id: RoomId,
        subject_id: UserId,
        challenge_id: Uuid,
        entry_point: EntryPoint,
        expires_at: DateTime<Utc>,
    },
    /// 答错后换题
    ChallengeReissued {
        room_id: RoomId,
        subject_id: UserId,
        challenge_id: Uuid,
        attempts: u32,
    },
    ChallengeSolved {
        room_id: RoomId,
        subject_id: UserId,
        attempts: u32,
    },
    /// 次数用完
    ChallengeFailed {
        room_id: RoomId,
        subject_id: UserId,
        attempts: u32,
        policy: ExhaustionPolicy,
    },
    ChallengeExpired {
        room_id: RoomId,
        subject_id: UserId,
        policy: ExhaustionPolicy,
    },

    /// 滥用计数器触发（同一窗口只记一次）
    AbuseTriggered {
        kind: String,
        room_id: RoomId,
        counting_subject: String,
        count: u64,
        threshold: u64,
    },
    /// 进入批量入群保护模式
    MassJoinProtection {
        room_id: RoomId,
        recent_joiners: usize,
        protection_secs: u64,
    },
    /// 群内警告
    FloodWarning {
        room_id: RoomId,
        actor_id: UserId,
        kind: String,
    },

    /// 已在某个群执行处罚
    SubjectRestricted {
        room_id: RoomId,
        subject_id: UserId,
        kind: PunishmentKind,
        reason: RestrictReason,
        issuer_id: UserId,
    },
    /// 跨群传播结束
    PropagationCompleted {
        punishment_id: i64,
        subject_id: UserId,
        succeeded: Vec<RoomId>,
        failed: Vec<RoomId>,
    },
    /// 登记处罚已撤销
    PunishmentReversed {
        punishment_id: i64,
        subject_id: UserId,
        rooms_attempted: usize,
        failed: Vec<RoomId>,
    },
    /// 管理员手动操作
    ManualAction {
        room_id: RoomId,
        issuer_id: UserId,
        target_id: UserId,
        action: String,
        reason: Option<String>,
    },
    /// 降级运行（缓存不可用、评分异常等）
    DegradedMode {
        component: String,
        room_id: RoomId,
        reason: String,
    },
}

impl AuditEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AuditEvent::ChallengeIssued { .. } => "challenge_issued",
            AuditEvent::ChallengeReissued { .. } => "challenge_reissued",
            AuditEvent::ChallengeSolved { .. } => "challenge_solved",
            AuditEvent::ChallengeFailed { .. } => "challenge_failed",
            AuditEvent::ChallengeExpired { .. } => "challenge_expired",
            AuditEvent::AbuseTriggered { .. } => "abuse_triggered",
            AuditEvent::MassJoinProtection { .. } => "mass_join_protection",
            AuditEvent::FloodWarning { .. } => "flood_warning",
            AuditEvent::SubjectRestricted { .. } => "subject_restricted",
            AuditEvent::PropagationCompleted { .. } => "propagation_completed",
            AuditEvent::PunishmentReversed { .. } => "punishment_reversed",
            AuditEvent::ManualAction { .. } => "manual_action",
            AuditEvent::DegradedMode { .. } => "degraded_mode",
        }
    }
}

/// 带时间戳的审计记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

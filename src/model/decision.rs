use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::membership::UserId;
use super::punishment::{PunishmentKind, RestrictReason};

/// 单个事件的最终裁决
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum AdmissionDecision {
    Allow,
    /// 已出题，等验证结果再决定
    Challenge,
    Restrict(RestrictReason),
}

impl AdmissionDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionDecision::Allow => "allow",
            AdmissionDecision::Challenge => "challenge",
            AdmissionDecision::Restrict(_) => "restrict",
        }
    }
}

/// 交给处罚执行器的具体处罚
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanction {
    pub kind: PunishmentKind,
    pub reason: RestrictReason,
    /// 处罚发起人（自动处罚为服务自身账号）
    pub issuer_id: UserId,
    /// 为空表示无限期
    pub duration: Option<Duration>,
    /// 写入跨群登记并传播
    pub escalate: bool,
}

impl Sanction {
    pub fn restrict(reason: RestrictReason, issuer_id: UserId, duration: Option<Duration>) -> Self {
        Self {
            kind: PunishmentKind::TemporaryRestrict,
            reason,
            issuer_id,
            duration,
            escalate: false,
        }
    }

    pub fn kick(reason: RestrictReason, issuer_id: UserId) -> Self {
        Self {
            kind: PunishmentKind::Kick,
            reason,
            issuer_id,
            duration: None,
            escalate: false,
        }
    }

    /// 永久封禁默认登记并传播
    pub fn ban(reason: RestrictReason, issuer_id: UserId) -> Self {
        Self {
            kind: PunishmentKind::PermanentBan,
            reason,
            issuer_id,
            duration: None,
            escalate: true,
        }
    }

    pub fn with_escalation(mut self, escalate: bool) -> Self {
        self.escalate = escalate;
        self
    }
}

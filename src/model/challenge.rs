use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::membership::{MessageId, RoomId, UserId};
use super::profile::ProfileSignals;
use super::room_config::{DeliverySurface, ExhaustionPolicy};

/// 触发验证的入口
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPoint {
    /// 入群申请（用户尚未进群）
    JoinRequest,
    /// 直接加入
    SelfJoin,
    /// 被邀请加入
    InvitedJoin,
    /// 管理员手动批准了申请
    ManualApproval,
    /// 风险分落在验证档位时的二次验证
    RiskSecondary,
}

impl EntryPoint {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryPoint::JoinRequest => "join_request",
            EntryPoint::SelfJoin => "self_join",
            EntryPoint::InvitedJoin => "invited_join",
            EntryPoint::ManualApproval => "manual_approval",
            EntryPoint::RiskSecondary => "risk_secondary",
        }
    }
}

/// 验证会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeState {
    Pending,
    Solved,
    Failed,
    Expired,
}

impl ChallengeState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ChallengeState::Pending)
    }
}

/// 生成的题目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengePayload {
    pub prompt: String,
    pub answer: String,
    /// 供按钮展示的候选答案（包含正确答案）
    pub options: Vec<String>,
}

/// 验证会话，(room_id, subject_id) 唯一，只存在于共享缓存
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeSession {
    /// 每次出题都会换新，定时任务用它判断自己是否过期
    pub challenge_id: Uuid,
    pub room_id: RoomId,
    pub subject_id: UserId,
    /// 唯一允许作答的人
    pub owner_id: UserId,
    pub entry_point: EntryPoint,
    /// 用户已在群内：出题时限制发言，通过后解除，失败踢出；
    /// 否则是待审批的申请：通过后批准，失败拒绝
    pub in_room: bool,
    pub payload: ChallengePayload,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub surface: DeliverySurface,
    pub on_exhaustion: ExhaustionPolicy,
    pub state: ChallengeState,
    /// 已发出的题目 / 提醒消息，结束时尽力删除
    #[serde(default)]
    pub message_ids: Vec<(i64, MessageId)>,
    /// 出题时的资料快照，答对后的终检使用
    #[serde(default)]
    pub profile: Option<ProfileSignals>,
}

impl ChallengeSession {
    pub fn is_pending(&self) -> bool {
        self.state == ChallengeState::Pending
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }

    /// 忽略首尾空白和大小写
    pub fn accepts(&self, answer: &str) -> bool {
        self.payload.answer.trim().eq_ignore_ascii_case(answer.trim())
    }

    /// 消息发往的会话：群内或与用户的私聊
    pub fn delivery_chat(&self) -> i64 {
        match self.surface {
            DeliverySurface::InRoom => self.room_id,
            DeliverySurface::Private => self.subject_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(surface: DeliverySurface) -> ChallengeSession {
        let now = Utc::now();
        ChallengeSession {
            challenge_id: Uuid::new_v4(),
            room_id: -100,
            subject_id: 5,
            owner_id: 5,
            entry_point: EntryPoint::SelfJoin,
            in_room: true,
            payload: ChallengePayload {
                prompt: "3 + 4 = ?".into(),
                answer: "7".into(),
                options: vec!["7".into(), "9".into()],
            },
            created_at: now,
            expires_at: now + Duration::seconds(60),
            attempts: 1,
            max_attempts: 3,
            surface,
            on_exhaustion: ExhaustionPolicy::Decline,
            state: ChallengeState::Pending,
            message_ids: Vec::new(),
            profile: None,
        }
    }

    #[test]
    fn test_answer_matching_and_attempts() {
        let s = session(DeliverySurface::InRoom);
        assert!(s.accepts(" 7 "));
        assert!(!s.accepts("8"));
        assert_eq!(s.remaining_attempts(), 2);
        assert_eq!(s.delivery_chat(), -100);
        assert_eq!(session(DeliverySurface::Private).delivery_chat(), 5);
    }

    #[test]
    fn test_terminal_states() {
        assert!(ChallengeState::Solved.is_terminal());
        assert!(ChallengeState::Expired.is_terminal());
        assert!(!ChallengeState::Pending.is_terminal());
    }
}

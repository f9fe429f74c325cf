//! 群配置
//!
//! 每个事件只解析一次 [`RoomConfig`]，之后沿调用链传递。
//! 缺省值的合并只发生在 [`RoomConfig::resolve`] 这一处：
//! - 群没有设置记录：所有功能关闭
//! - 有记录：记录里出现的字段覆盖服务级默认策略

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::membership::RoomId;
use crate::model::challenge::EntryPoint;

// ============================================================================
// 枚举
// ============================================================================

/// 题目投递位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliverySurface {
    #[default]
    InRoom,
    Private,
}

/// 答题次数用完 / 超时后的处理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// 保持原状（申请保持待审，群内用户保持受限）
    LeavePending,
    /// 拒绝申请 / 踢出群
    #[default]
    Decline,
}

/// 滥用触发后的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FloodAction {
    /// 群内警告
    #[default]
    Warn,
    TemporaryRestrict,
    Kick,
    /// 永久封禁并登记
    Ban,
}

impl FloodAction {
    pub fn as_str(self) -> &'static str {
        match self {
            FloodAction::Warn => "warn",
            FloodAction::TemporaryRestrict => "temporary_restrict",
            FloodAction::Kick => "kick",
            FloodAction::Ban => "ban",
        }
    }
}

// ============================================================================
// 生效策略
// ============================================================================

/// 单个验证入口的策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryPointPolicy {
    pub enabled: bool,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    /// 提醒间隔，0 表示不提醒
    pub reminder_interval_secs: u64,
    pub reminder_count: u32,
    pub surface: DeliverySurface,
    pub on_exhaustion: ExhaustionPolicy,
}

impl Default for EntryPointPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_secs: 300,
            max_attempts: 3,
            reminder_interval_secs: 60,
            reminder_count: 2,
            surface: DeliverySurface::InRoom,
            on_exhaustion: ExhaustionPolicy::Decline,
        }
    }
}

impl EntryPointPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// 各次提醒相对出题时刻的延迟（只保留超时之前的）
    pub fn reminder_offsets(&self) -> Vec<Duration> {
        if self.reminder_interval_secs == 0 {
            return Vec::new();
        }
        (1..=self.reminder_count as u64)
            .map(|n| n * self.reminder_interval_secs)
            .take_while(|secs| *secs < self.timeout_secs)
            .map(Duration::from_secs)
            .collect()
    }
}

/// 各验证入口
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengePolicies {
    pub join_request: EntryPointPolicy,
    pub self_join: EntryPointPolicy,
    pub invited_join: EntryPointPolicy,
    pub manual_approval: EntryPointPolicy,
}

impl Default for ChallengePolicies {
    fn default() -> Self {
        Self {
            // 申请者还不在群里，只能私聊出题
            join_request: EntryPointPolicy {
                surface: DeliverySurface::Private,
                ..Default::default()
            },
            self_join: EntryPointPolicy::default(),
            invited_join: EntryPointPolicy::default(),
            manual_approval: EntryPointPolicy::default(),
        }
    }
}

/// 计数型滥用规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbuseRule {
    pub enabled: bool,
    pub threshold: u64,
    pub window_secs: u64,
    pub action: FloodAction,
    /// 临时限制时长，0 表示无限期
    pub action_duration_secs: u64,
}

impl Default for AbuseRule {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 5,
            window_secs: 180,
            action: FloodAction::Warn,
            action_duration_secs: 3600,
        }
    }
}

impl AbuseRule {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn action_duration(&self) -> Option<Duration> {
        (self.action_duration_secs > 0).then(|| Duration::from_secs(self.action_duration_secs))
    }
}

/// 批量入群规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MassJoinRule {
    pub enabled: bool,
    /// 窗口内不同新成员数量
    pub threshold: u64,
    pub window_secs: u64,
    /// 保护模式持续时间，和检测窗口无关
    pub protection_secs: u64,
    pub action: FloodAction,
    /// 临时限制时长，0 表示无限期
    pub action_duration_secs: u64,
}

impl Default for MassJoinRule {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 10,
            window_secs: 60,
            protection_secs: 180,
            action: FloodAction::Ban,
            action_duration_secs: 3600,
        }
    }
}

impl MassJoinRule {
    pub fn action_duration(&self) -> Option<Duration> {
        (self.action_duration_secs > 0).then(|| Duration::from_secs(self.action_duration_secs))
    }
}

/// 风险评分门
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskGateRule {
    pub enabled: bool,
    /// 命中后的限制时长，0 表示无限期
    pub restrict_duration_secs: u64,
    /// 中间档位的二次验证
    pub secondary_challenge: EntryPointPolicy,
}

impl Default for RiskGateRule {
    fn default() -> Self {
        Self {
            enabled: false,
            restrict_duration_secs: 0,
            secondary_challenge: EntryPointPolicy {
                enabled: true,
                ..Default::default()
            },
        }
    }
}

/// 服务级默认策略，也是合并后的生效策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomPolicy {
    pub challenge: ChallengePolicies,
    pub invite_flood: AbuseRule,
    pub join_exit_churn: AbuseRule,
    pub mass_join: MassJoinRule,
    pub reaction_abuse: AbuseRule,
    pub risk_gate: RiskGateRule,
    /// 入群时检查跨群处罚登记
    pub registry_enforcement: bool,
}

impl Default for RoomPolicy {
    fn default() -> Self {
        Self {
            challenge: ChallengePolicies::default(),
            invite_flood: AbuseRule {
                enabled: true,
                ..Default::default()
            },
            join_exit_churn: AbuseRule {
                threshold: 5,
                window_secs: 300,
                action: FloodAction::TemporaryRestrict,
                ..Default::default()
            },
            mass_join: MassJoinRule::default(),
            reaction_abuse: AbuseRule {
                threshold: 10,
                window_secs: 60,
                action: FloodAction::TemporaryRestrict,
                ..Default::default()
            },
            risk_gate: RiskGateRule::default(),
            registry_enforcement: true,
        }
    }
}

impl RoomPolicy {
    /// 全部关闭（群未配置）
    pub fn disabled() -> Self {
        let mut policy = Self::default();
        policy.challenge.join_request.enabled = false;
        policy.challenge.self_join.enabled = false;
        policy.challenge.invited_join.enabled = false;
        policy.challenge.manual_approval.enabled = false;
        policy.invite_flood.enabled = false;
        policy.join_exit_churn.enabled = false;
        policy.mass_join.enabled = false;
        policy.reaction_abuse.enabled = false;
        policy.risk_gate.enabled = false;
        policy.registry_enforcement = false;
        policy
    }

    /// 校验数值范围
    pub fn validate(&self) -> Result<(), String> {
        let entry_points = [
            ("challenge.join_request", &self.challenge.join_request),
            ("challenge.self_join", &self.challenge.self_join),
            ("challenge.invited_join", &self.challenge.invited_join),
            ("challenge.manual_approval", &self.challenge.manual_approval),
            ("risk_gate.secondary_challenge", &self.risk_gate.secondary_challenge),
        ];
        for (name, policy) in entry_points {
            if policy.timeout_secs == 0 {
                return Err(format!("{}.timeout_secs 必须大于 0", name));
            }
            if policy.max_attempts == 0 {
                return Err(format!("{}.max_attempts 必须大于 0", name));
            }
        }
        let rules = [
            ("invite_flood", &self.invite_flood),
            ("join_exit_churn", &self.join_exit_churn),
            ("reaction_abuse", &self.reaction_abuse),
        ];
        for (name, rule) in rules {
            if rule.threshold == 0 || rule.window_secs == 0 {
                return Err(format!("{}.threshold 与 window_secs 必须大于 0", name));
            }
        }
        if self.mass_join.threshold == 0 || self.mass_join.window_secs == 0 {
            return Err("mass_join.threshold 与 window_secs 必须大于 0".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// 群设置覆盖项（Room Config Store 中的一行）
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryPointSettings {
    pub enabled: Option<bool>,
    pub timeout_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub reminder_interval_secs: Option<u64>,
    pub reminder_count: Option<u32>,
    pub surface: Option<DeliverySurface>,
    pub on_exhaustion: Option<ExhaustionPolicy>,
}

impl EntryPointSettings {
    fn apply(&self, base: EntryPointPolicy) -> EntryPointPolicy {
        EntryPointPolicy {
            enabled: self.enabled.unwrap_or(base.enabled),
            timeout_secs: self.timeout_secs.unwrap_or(base.timeout_secs),
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            reminder_interval_secs: self
                .reminder_interval_secs
                .unwrap_or(base.reminder_interval_secs),
            reminder_count: self.reminder_count.unwrap_or(base.reminder_count),
            surface: self.surface.unwrap_or(base.surface),
            on_exhaustion: self.on_exhaustion.unwrap_or(base.on_exhaustion),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeSettings {
    pub join_request: EntryPointSettings,
    pub self_join: EntryPointSettings,
    pub invited_join: EntryPointSettings,
    pub manual_approval: EntryPointSettings,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbuseRuleSettings {
    pub enabled: Option<bool>,
    pub threshold: Option<u64>,
    pub window_secs: Option<u64>,
    pub action: Option<FloodAction>,
    pub action_duration_secs: Option<u64>,
}

impl AbuseRuleSettings {
    fn apply(&self, base: AbuseRule) -> AbuseRule {
        AbuseRule {
            enabled: self.enabled.unwrap_or(base.enabled),
            threshold: self.threshold.unwrap_or(base.threshold),
            window_secs: self.window_secs.unwrap_or(base.window_secs),
            action: self.action.unwrap_or(base.action),
            action_duration_secs: self.action_duration_secs.unwrap_or(base.action_duration_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MassJoinSettings {
    pub enabled: Option<bool>,
    pub threshold: Option<u64>,
    pub window_secs: Option<u64>,
    pub protection_secs: Option<u64>,
    pub action: Option<FloodAction>,
    pub action_duration_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskGateSettings {
    pub enabled: Option<bool>,
    pub restrict_duration_secs: Option<u64>,
    pub secondary_challenge: EntryPointSettings,
}

/// 群设置覆盖项，缺省字段取服务级默认
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomSettings {
    pub challenge: ChallengeSettings,
    pub invite_flood: AbuseRuleSettings,
    pub join_exit_churn: AbuseRuleSettings,
    pub mass_join: MassJoinSettings,
    pub reaction_abuse: AbuseRuleSettings,
    pub risk_gate: RiskGateSettings,
    pub registry_enforcement: Option<bool>,
}

// ============================================================================
// 解析后的群配置
// ============================================================================

/// 一个事件使用的群配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    pub room_id: RoomId,
    /// 是否存在设置记录
    pub configured: bool,
    pub policy: RoomPolicy,
}

impl RoomConfig {
    /// 唯一的合并入口
    pub fn resolve(room_id: RoomId, defaults: &RoomPolicy, settings: Option<&RoomSettings>) -> Self {
        let Some(settings) = settings else {
            return Self::unconfigured(room_id);
        };

        let d = defaults;
        let policy = RoomPolicy {
            challenge: ChallengePolicies {
                join_request: settings.challenge.join_request.apply(d.challenge.join_request),
                self_join: settings.challenge.self_join.apply(d.challenge.self_join),
                invited_join: settings.challenge.invited_join.apply(d.challenge.invited_join),
                manual_approval: settings
                    .challenge
                    .manual_approval
                    .apply(d.challenge.manual_approval),
            },
            invite_flood: settings.invite_flood.apply(d.invite_flood),
            join_exit_churn: settings.join_exit_churn.apply(d.join_exit_churn),
            mass_join: MassJoinRule {
                enabled: settings.mass_join.enabled.unwrap_or(d.mass_join.enabled),
                threshold: settings.mass_join.threshold.unwrap_or(d.mass_join.threshold),
                window_secs: settings.mass_join.window_secs.unwrap_or(d.mass_join.window_secs),
                protection_secs: settings
                    .mass_join
                    .protection_secs
                    .unwrap_or(d.mass_join.protection_secs),
                action: settings.mass_join.action.unwrap_or(d.mass_join.action),
                action_duration_secs: settings
                    .mass_join
                    .action_duration_secs
                    .unwrap_or(d.mass_join.action_duration_secs),
            },
            reaction_abuse: settings.reaction_abuse.apply(d.reaction_abuse),
            risk_gate: RiskGateRule {
                enabled: settings.risk_gate.enabled.unwrap_or(d.risk_gate.enabled),
                restrict_duration_secs: settings
                    .risk_gate
                    .restrict_duration_secs
                    .unwrap_or(d.risk_gate.restrict_duration_secs),
                secondary_challenge: settings
                    .risk_gate
                    .secondary_challenge
                    .apply(d.risk_gate.secondary_challenge),
            },
            registry_enforcement: settings
                .registry_enforcement
                .unwrap_or(d.registry_enforcement),
        };

        Self {
            room_id,
            configured: true,
            policy,
        }
    }

    pub fn unconfigured(room_id: RoomId) -> Self {
        Self {
            room_id,
            configured: false,
            policy: RoomPolicy::disabled(),
        }
    }

    /// 某个入口的验证策略
    pub fn challenge_policy(&self, entry: EntryPoint) -> &EntryPointPolicy {
        match entry {
            EntryPoint::JoinRequest => &self.policy.challenge.join_request,
            EntryPoint::SelfJoin => &self.policy.challenge.self_join,
            EntryPoint::InvitedJoin => &self.policy.challenge.invited_join,
            EntryPoint::ManualApproval => &self.policy.challenge.manual_approval,
            EntryPoint::RiskSecondary => &self.policy.risk_gate.secondary_challenge,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_settings_disables_everything() {
        let cfg = RoomConfig::resolve(-1, &RoomPolicy::default(), None);
        assert!(!cfg.configured);
        assert!(!cfg.policy.invite_flood.enabled);
        assert!(!cfg.policy.registry_enforcement);
        assert!(!cfg.challenge_policy(EntryPoint::SelfJoin).enabled);
    }

    #[test]
    fn test_settings_override_defaults_field_by_field() {
        let settings: RoomSettings = serde_json::from_str(
            r#"{
                "challenge": {"self_join": {"enabled": true, "timeout_secs": 60}},
                "invite_flood": {"threshold": 3, "window_secs": 60},
                "mass_join": {"action": "temporary_restrict"}
            }"#,
        )
        .unwrap();
        let cfg = RoomConfig::resolve(-1, &RoomPolicy::default(), Some(&settings));

        let self_join = cfg.challenge_policy(EntryPoint::SelfJoin);
        assert!(self_join.enabled);
        assert_eq!(self_join.timeout_secs, 60);
        assert_eq!(self_join.max_attempts, 3);
        assert!(!cfg.challenge_policy(EntryPoint::InvitedJoin).enabled);

        assert!(cfg.policy.invite_flood.enabled);
        assert_eq!(cfg.policy.invite_flood.threshold, 3);
        assert_eq!(cfg.policy.mass_join.action_duration(), Some(Duration::from_secs(3600)));
        assert_eq!(cfg.policy.invite_flood.action, FloodAction::Warn);
        assert_eq!(
            cfg.challenge_policy(EntryPoint::JoinRequest).surface,
            DeliverySurface::Private
        );
    }

    #[test]
    fn test_reminder_offsets_stop_before_timeout() {
        let policy = EntryPointPolicy {
            timeout_secs: 150,
            reminder_interval_secs: 60,
            reminder_count: 5,
            ..Default::default()
        };
        assert_eq!(
            policy.reminder_offsets(),
            vec![Duration::from_secs(60), Duration::from_secs(120)]
        );

        let silent = EntryPointPolicy {
            reminder_interval_secs: 0,
            ..Default::default()
        };
        assert!(silent.reminder_offsets().is_empty());
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut policy = RoomPolicy::default();
        assert!(policy.validate().is_ok());
        policy.invite_flood.threshold = 0;
        assert!(policy.validate().is_err());
    }
}

//! 滥用窗口计数
//!
//! 通用的固定窗口计数器，键为 `{type}:{room}:{counting-subject}`：
//! - 首次自增时设置过期时间，窗口到期后自然消失，之后的自增从 1 开始
//! - 计数达到阈值即触发；触发时写一个 TTL = 窗口的抑制标记，同一窗口内只通知一次
//!
//! [`AbuseMonitor`] 为四种滥用各持有一个计数器实例。

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::infra::SharedCache;
use crate::model::{AbuseRule, MassJoinRule, MessageId, RoomId, UserId};

/// 滥用类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbuseKind {
    /// 按邀请人计数
    InviteFlood,
    /// 按进出群的用户计数
    JoinExitChurn,
    /// 按群统计不同的新成员
    MassJoin,
    /// 按用户统计被回应的不同消息
    ReactionAbuse,
}

impl AbuseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AbuseKind::InviteFlood => "invite_flood",
            AbuseKind::JoinExitChurn => "join_exit_churn",
            AbuseKind::MassJoin => "mass_join",
            AbuseKind::ReactionAbuse => "reaction_abuse",
        }
    }
}

/// 一次计数的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOutcome {
    pub count: u64,
    pub threshold: u64,
    /// count >= threshold
    pub triggered: bool,
    /// 本窗口内第一次触发（需要通知 / 处罚）
    pub first_trigger: bool,
}

/// 单一滥用类型的窗口计数器
#[derive(Clone)]
pub struct AbuseWindowTracker {
    cache: Arc<dyn SharedCache>,
    kind: AbuseKind,
}

impl AbuseWindowTracker {
    pub fn new(cache: Arc<dyn SharedCache>, kind: AbuseKind) -> Self {
        Self { cache, kind }
    }

    pub fn kind(&self) -> AbuseKind {
        self.kind
    }

    pub fn key(&self, room_id: RoomId, counting_subject: &str) -> String {
        format!("{}:{}:{}", self.kind.as_str(), room_id, counting_subject)
    }

    fn suppress_key(key: &str) -> String {
        format!("{}:suppressed", key)
    }

    /// 计数 +1
    pub async fn increment(
        &self,
        room_id: RoomId,
        counting_subject: &str,
        threshold: u64,
        window: Duration,
    ) -> Result<WindowOutcome> {
        let key = self.key(room_id, counting_subject);
        let count = self.cache.incr_window(&key, window).await?;
        self.evaluate(&key, count, threshold, window).await
    }

    /// 把 `member` 记入窗口集合，按不同成员数计数
    pub async fn record_distinct(
        &self,
        room_id: RoomId,
        counting_subject: &str,
        member: &str,
        threshold: u64,
        window: Duration,
    ) -> Result<WindowOutcome> {
        let key = self.key(room_id, counting_subject);
        let count = self.cache.add_to_window_set(&key, member, window).await?;
        self.evaluate(&key, count, threshold, window).await
    }

    /// 窗口集合当前成员
    pub async fn members(&self, room_id: RoomId, counting_subject: &str) -> Result<Vec<String>> {
        self.cache
            .set_members(&self.key(room_id, counting_subject))
            .await
    }

    async fn evaluate(
        &self,
        key: &str,
        count: u64,
        threshold: u64,
        window: Duration,
    ) -> Result<WindowOutcome> {
        let triggered = count >= threshold;
        let first_trigger = if triggered {
            self.cache
                .set_nx(&Self::suppress_key(key), "1", window)
                .await?
        } else {
            false
        };
        if first_trigger {
            tracing::info!(
                kind = self.kind.as_str(),
                key,
                count,
                threshold,
                "🚨 滥用阈值触发"
            );
        }
        Ok(WindowOutcome {
            count,
            threshold,
            triggered,
            first_trigger,
        })
    }
}

/// 批量入群检测结果
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MassJoinOutcome {
    /// 保护模式生效中（当前加入者应被处理）
    pub protection_active: bool,
    /// 保护模式由本次加入开启
    pub just_activated: bool,
    pub join_count: u64,
    /// 开启保护时窗口内记录到的加入者（含本次）
    pub recent_joiners: Vec<UserId>,
}

/// 四种滥用的计数器集合
pub struct AbuseMonitor {
    cache: Arc<dyn SharedCache>,
    invite_flood: AbuseWindowTracker,
    join_exit_churn: AbuseWindowTracker,
    mass_join: AbuseWindowTracker,
    reaction_abuse: AbuseWindowTracker,
}

impl AbuseMonitor {
    pub fn new(cache: Arc<dyn SharedCache>) -> Self {
        Self {
            invite_flood: AbuseWindowTracker::new(cache.clone(), AbuseKind::InviteFlood),
            join_exit_churn: AbuseWindowTracker::new(cache.clone(), AbuseKind::JoinExitChurn),
            mass_join: AbuseWindowTracker::new(cache.clone(), AbuseKind::MassJoin),
            reaction_abuse: AbuseWindowTracker::new(cache.clone(), AbuseKind::ReactionAbuse),
            cache,
        }
    }

    /// 邀请计数，按邀请人
    pub async fn record_invite(
        &self,
        room_id: RoomId,
        actor_id: UserId,
        rule: &AbuseRule,
    ) -> Result<Option<WindowOutcome>> {
        if !rule.enabled {
            return Ok(None);
        }
        self.invite_flood
            .increment(room_id, &actor_id.to_string(), rule.threshold, rule.window())
            .await
            .map(Some)
    }

    /// 进出群计数，按用户
    pub async fn record_membership_change(
        &self,
        room_id: RoomId,
        subject_id: UserId,
        rule: &AbuseRule,
    ) -> Result<Option<WindowOutcome>> {
        if !rule.enabled {
            return Ok(None);
        }
        self.join_exit_churn
            .increment(room_id, &subject_id.to_string(), rule.threshold, rule.window())
            .await
            .map(Some)
    }

    /// 表情回应计数，按用户统计不同消息数
    pub async fn record_reaction(
        &self,
        room_id: RoomId,
        actor_id: UserId,
        message_id: MessageId,
        rule: &AbuseRule,
    ) -> Result<Option<WindowOutcome>> {
        if !rule.enabled {
            return Ok(None);
        }
        self.reaction_abuse
            .record_distinct(
                room_id,
                &actor_id.to_string(),
                &message_id.to_string(),
                rule.threshold,
                rule.window(),
            )
            .await
            .map(Some)
    }

    fn protection_key(room_id: RoomId) -> String {
        format!("abuse:{}:protection:{}", AbuseKind::MassJoin.as_str(), room_id)
    }

    /// 保护模式是否生效
    pub async fn protection_active(&self, room_id: RoomId) -> Result<bool> {
        self.cache.exists(&Self::protection_key(room_id)).await
    }

    /// 记录一次加入并判断是否进入保护模式
    pub async fn record_join(
        &self,
        room_id: RoomId,
        joiner_id: UserId,
        rule: &MassJoinRule,
    ) -> Result<MassJoinOutcome> {
        if !rule.enabled {
            return Ok(MassJoinOutcome::default());
        }
        if self.protection_active(room_id).await? {
            return Ok(MassJoinOutcome {
                protection_active: true,
                ..Default::default()
            });
        }

        let window = Duration::from_secs(rule.window_secs);
        let outcome = self
            .mass_join
            .record_distinct(room_id, "joins", &joiner_id.to_string(), rule.threshold, window)
            .await?;
        if !outcome.triggered {
            return Ok(MassJoinOutcome {
                join_count: outcome.count,
                ..Default::default()
            });
        }

        // 保护时长独立于检测窗口
        let protection = Duration::from_secs(rule.protection_secs.max(1));
        let just_activated = self
            .cache
            .set_nx(&Self::protection_key(room_id), "1", protection)
            .await?;
        let recent_joiners = if just_activated {
            self.mass_join
                .members(room_id, "joins")
                .await?
                .iter()
                .filter_map(|m| m.parse::<UserId>().ok())
                .collect()
        } else {
            Vec::new()
        };

        Ok(MassJoinOutcome {
            protection_active: true,
            just_activated,
            join_count: outcome.count,
            recent_joiners,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::MemoryCache;
    use crate::model::FloodAction;

    fn tracker() -> AbuseWindowTracker {
        AbuseWindowTracker::new(Arc::new(MemoryCache::new()), AbuseKind::InviteFlood)
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_increment_triggers_and_expired_window_restarts() {
        let t = tracker();
        let window = Duration::from_secs(60);

        let first = t.increment(-1, "42", 3, window).await.unwrap();
        assert_eq!(first.count, 1);
        assert!(!first.triggered);
        t.increment(-1, "42", 3, window).await.unwrap();
        let third = t.increment(-1, "42", 3, window).await.unwrap();
        assert!(third.triggered);
        assert!(third.first_trigger);

        tokio::time::advance(Duration::from_secs(61)).await;
        let fourth = t.increment(-1, "42", 3, window).await.unwrap();
        assert_eq!(fourth.count, 1);
        assert!(!fourth.triggered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_triggers_in_window_are_suppressed() {
        let t = tracker();
        let window = Duration::from_secs(60);
        let mut first_triggers = 0;
        for _ in 0..6 {
            let outcome = t.increment(-1, "42", 3, window).await.unwrap();
            if outcome.first_trigger {
                first_triggers += 1;
            }
        }
        assert_eq!(first_triggers, 1);
        assert_eq!(t.key(-1, "42"), "invite_flood:-1:42");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reactions_count_distinct_messages() {
        let monitor = AbuseMonitor::new(Arc::new(MemoryCache::new()));
        let rule = AbuseRule {
            enabled: true,
            threshold: 3,
            window_secs: 60,
            action: FloodAction::TemporaryRestrict,
            action_duration_secs: 600,
        };
        for _ in 0..5 {
            let outcome = monitor.record_reaction(-1, 7, 100, &rule).await.unwrap().unwrap();
            assert_eq!(outcome.count, 1);
        }
        monitor.record_reaction(-1, 7, 101, &rule).await.unwrap();
        let third = monitor.record_reaction(-1, 7, 102, &rule).await.unwrap().unwrap();
        assert!(third.first_trigger);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mass_join_protection_outlives_detection_window() {
        let monitor = AbuseMonitor::new(Arc::new(MemoryCache::new()));
        let rule = MassJoinRule {
            enabled: true,
            threshold: 3,
            window_secs: 10,
            protection_secs: 120,
            action: FloodAction::Ban,
            action_duration_secs: 0,
        };

        assert!(!monitor.record_join(-1, 1, &rule).await.unwrap().protection_active);
        assert!(!monitor.record_join(-1, 2, &rule).await.unwrap().protection_active);
        let raid = monitor.record_join(-1, 3, &rule).await.unwrap();
        assert!(raid.just_activated);
        let mut joiners = raid.recent_joiners.clone();
        joiners.sort();
        assert_eq!(joiners, vec![1, 2, 3]);

        tokio::time::advance(Duration::from_secs(30)).await;
        let later = monitor.record_join(-1, 4, &rule).await.unwrap();
        assert!(later.protection_active);
        assert!(!later.just_activated);

        tokio::time::advance(Duration::from_secs(100)).await;
        assert!(!monitor.protection_active(-1).await.unwrap());
    }

    #[tokio::test]
    async fn test_disabled_rules_do_not_count() {
        let monitor = AbuseMonitor::new(Arc::new(MemoryCache::new()));
        let rule = AbuseRule::default();
        assert!(monitor.record_invite(-1, 7, &rule).await.unwrap().is_none());
    }
}

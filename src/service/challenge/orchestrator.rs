//! 验证状态机
//!
//! None → Pending → {Solved, Failed, Expired}
//!
//! 会话以 JSON 存在共享缓存 `challenge:{room}:{subject}`：
//! - 出题用 SET NX，同一 (room, subject) 并发入群只会有一个 Pending 会话
//! - 每次状态变更都是对整段 JSON 的 compare-and-swap，失败则重读重试
//! - 失败 / 超时后删除会话键；答对的会话留在同一个键上充当已验证标记，
//!   写入 Solved 的那次 CAS 同时把存活时间改成 `verified_ttl`，
//!   离群时一次原子 take 就能同时清掉进行中的会话和已验证标记
//!
//! 超时和提醒是可取消的延时任务，触发时携带 `challenge_id`，
//! 重新读到的会话不是同一个或已不是 Pending 就什么都不做。

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::events::AuditEvent;
use crate::error::{GuardError, Result};
use crate::infra::{metrics, AuditSink, SharedCache, TimerRegistry};
use crate::model::{
    ChallengeSession, ChallengeState, DeliverySurface, EntryPoint, EntryPointPolicy,
    ExhaustionPolicy, MessageId, ProfileSignals, RoomId, UserId,
};
use crate::platform::PlatformGateway;
use crate::service::challenge::generator::ChallengeGenerator;

const CAS_RETRIES: usize = 8;

/// 会话存活时间相关配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeTimings {
    /// 会话键在超时之后额外保留的时间，保证超时任务还能读到会话
    pub session_grace_secs: u64,
    /// 已验证标记的存活时间
    pub verified_ttl_secs: u64,
}

impl Default for ChallengeTimings {
    fn default() -> Self {
        Self {
            session_grace_secs: 30,
            verified_ttl_secs: 7 * 24 * 3600,
        }
    }
}

impl ChallengeTimings {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.session_grace_secs)
    }

    pub fn verified_ttl(&self) -> Duration {
        Duration::from_secs(self.verified_ttl_secs.max(1))
    }
}

/// 出题请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    pub room_id: RoomId,
    pub subject_id: UserId,
    /// 唯一允许作答的人
    pub owner_id: UserId,
    pub entry_point: EntryPoint,
    /// 用户是否已在群内；否则是待审批的申请，只能私聊出题
    pub in_room: bool,
    pub policy: EntryPointPolicy,
    pub profile: Option<ProfileSignals>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    Issued(ChallengeSession),
    /// 已有 Pending 会话，沿用
    AlreadyPending(ChallengeSession),
    /// 已验证过，不再出题
    AlreadyVerified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// 没有 Pending 会话
    NoSession,
    /// 作答人不是会话所有者
    NotOwner,
    Solved(ChallengeSession),
    /// 答错且还有机会，已换题
    Retry(ChallengeSession),
    /// 次数用完，已执行耗尽策略
    Failed(ChallengeSession),
}

/// 离群清理结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitOutcome {
    pub cleared_verified: bool,
    pub destroyed_pending: bool,
    pub cancelled_timers: usize,
}

/// 验证编排器
pub struct ChallengeOrchestrator {
    cache: Arc<dyn SharedCache>,
    platform: PlatformGateway,
    timers: TimerRegistry,
    generator: Arc<dyn ChallengeGenerator>,
    audit: Arc<dyn AuditSink>,
    timings: ChallengeTimings,
}

impl ChallengeOrchestrator {
    pub fn new(
        cache: Arc<dyn SharedCache>,
        platform: PlatformGateway,
        timers: TimerRegistry,
        generator: Arc<dyn ChallengeGenerator>,
        audit: Arc<dyn AuditSink>,
        timings: ChallengeTimings,
    ) -> Self {
        Self {
            cache,
            platform,
            timers,
            generator,
            audit,
            timings,
        }
    }

    pub fn session_key(room_id: RoomId, subject_id: UserId) -> String {
        format!("challenge:{}:{}", room_id, subject_id)
    }

    fn timer_group(room_id: RoomId, subject_id: UserId) -> String {
        format!("{}:{}", room_id, subject_id)
    }

    // ========================================================================
    // 查询
    // ========================================================================

    /// 当前 Pending 会话
    pub async fn pending(&self, room_id: RoomId, subject_id: UserId) -> Result<Option<ChallengeSession>> {
        let key = Self::session_key(room_id, subject_id);
        Ok(self
            .load(&key)
            .await?
            .map(|(_, session)| session)
            .filter(ChallengeSession::is_pending))
    }

    pub async fn is_verified(&self, room_id: RoomId, subject_id: UserId) -> Result<bool> {
        let key = Self::session_key(room_id, subject_id);
        Ok(self
            .load(&key)
            .await?
            .is_some_and(|(_, session)| session.state == ChallengeState::Solved))
    }

    /// 读出原始 JSON 和解析结果；内容损坏时删除该键
    async fn load(&self, key: &str) -> Result<Option<(String, ChallengeSession)>> {
        let Some(raw) = self.cache.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<ChallengeSession>(&raw) {
            Ok(session) => Ok(Some((raw, session))),
            Err(e) => {
                tracing::warn!(key, "⚠️ 验证会话无法解析，已丢弃: {}", e);
                self.cache.delete(key).await?;
                Ok(None)
            }
        }
    }

    /// CAS 状态变更；`step` 返回 None 表示不变更
    async fn transition<F>(
        &self,
        key: &str,
        mut step: F,
    ) -> Result<Option<ChallengeSession>>
    where
        F: FnMut(&ChallengeSession) -> Option<ChallengeSession> + Send,
    {
        for _ in 0..CAS_RETRIES {
            let Some((raw, current)) = self.load(key).await? else {
                return Ok(None);
            };
            let Some(next) = step(&current) else {
                return Ok(None);
            };
            let next_raw = serde_json::to_string(&next)?;
            let ttl = (next.state == ChallengeState::Solved).then(|| self.timings.verified_ttl());
            if self.cache.compare_and_swap(key, &raw, &next_raw, ttl).await? {
                return Ok(Some(next));
            }
            tracing::debug!(key, "验证会话并发修改，重试");
        }
        Err(GuardError::Internal(format!("验证会话 {} 并发修改过多", key)))
    }

    // ========================================================================
    // 出题
    // ========================================================================

    /// 出题；并发调用只有一个会真正出题
    pub async fn issue(self: &Arc<Self>, request: IssueRequest) -> Result<IssueOutcome> {
        let key = Self::session_key(request.room_id, request.subject_id);
        let ttl = request.policy.timeout() + self.timings.grace();

        for _ in 0..CAS_RETRIES {
            let session = self.new_session(&request);
            let raw = serde_json::to_string(&session)?;
            if self.cache.set_nx(&key, &raw, ttl).await? {
                return self.start(session, &request.policy).await.map(IssueOutcome::Issued);
            }

            match self.load(&key).await? {
                Some((_, existing)) if existing.is_pending() => {
                    tracing::debug!(
                        room_id = request.room_id,
                        subject_id = request.subject_id,
                        challenge_id = %existing.challenge_id,
                        "已有进行中的验证"
                    );
                    return Ok(IssueOutcome::AlreadyPending(existing));
                }
                Some((_, existing)) if existing.state == ChallengeState::Solved => {
                    tracing::debug!(
                        room_id = request.room_id,
                        subject_id = request.subject_id,
                        "已验证过，跳过出题"
                    );
                    return Ok(IssueOutcome::AlreadyVerified);
                }
                // 残留的失败 / 超时会话：原子替换并重置存活时间
                Some((old_raw, _)) => {
                    if self
                        .cache
                        .compare_and_swap(&key, &old_raw, &raw, Some(ttl))
                        .await?
                    {
                        return self.start(session, &request.policy).await.map(IssueOutcome::Issued);
                    }
                }
                None => {}
            }
        }
        Err(GuardError::Internal(format!("出题失败，会话 {} 反复变化", key)))
    }

    fn new_session(&self, request: &IssueRequest) -> ChallengeSession {
        let now = Utc::now();
        let timeout = chrono::Duration::seconds(request.policy.timeout_secs as i64);
        // 申请者看不到群消息
        let surface = if request.in_room {
            request.policy.surface
        } else {
            DeliverySurface::Private
        };
        ChallengeSession {
            challenge_id: Uuid::new_v4(),
            room_id: request.room_id,
            subject_id: request.subject_id,
            owner_id: request.owner_id,
            entry_point: request.entry_point,
            in_room: request.in_room,
            payload: self.generator.generate(),
            created_at: now,
            expires_at: now + timeout,
            attempts: 0,
            max_attempts: request.policy.max_attempts.max(1),
            surface,
            on_exhaustion: request.policy.on_exhaustion,
            state: ChallengeState::Pending,
            message_ids: Vec::new(),
            profile: request.profile.clone(),
        }
    }

    /// 会话写入后的副作用：限制、投递、定时任务、审计
    async fn start(
        self: &Arc<Self>,
        mut session: ChallengeSession,
        policy: &EntryPointPolicy,
    ) -> Result<ChallengeSession> {
        let (room_id, subject_id) = (session.room_id, session.subject_id);

        if session.in_room {
            if let Err(e) = self.platform.restrict(room_id, subject_id, None).await {
                tracing::warn!(room_id, subject_id, "⚠️ 出题时限制发言失败: {}", e);
            }
        }

        let text = format!(
            "🔐 入群验证\n{}\n请在 {} 秒内作答，共 {} 次机会",
            session.payload.prompt, policy.timeout_secs, session.max_attempts
        );
        if let Some(message_id) = self.deliver(&session, text).await {
            session.message_ids.push((session.delivery_chat(), message_id));
        }

        self.schedule_timers(&session, policy);

        tracing::info!(
            room_id,
            subject_id,
            entry_point = session.entry_point.as_str(),
            challenge_id = %session.challenge_id,
            "🔐 已出题"
        );
        metrics::record_challenge("issued");
        self.audit.record(AuditEvent::ChallengeIssued {
            room_id,
            subject_id,
            challenge_id: session.challenge_id,
            entry_point: session.entry_point,
            expires_at: session.expires_at,
        });
        Ok(session)
    }

    /// 发送消息并记入会话，失败只记日志
    async fn deliver(&self, session: &ChallengeSession, text: String) -> Option<MessageId> {
        let chat_id = session.delivery_chat();
        match self.platform.send_message(chat_id, text).await {
            Ok(Some(message_id)) => {
                self.track_message(session, chat_id, message_id).await;
                Some(message_id)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(
                    room_id = session.room_id,
                    subject_id = session.subject_id,
                    "⚠️ 投递验证消息失败: {}",
                    e
                );
                None
            }
        }
    }

    /// 把消息 ID 记到会话上；会话已结束则立即删除该消息
    async fn track_message(&self, session: &ChallengeSession, chat_id: i64, message_id: MessageId) {
        let key = Self::session_key(session.room_id, session.subject_id);
        let challenge_id = session.challenge_id;
        let tracked = self
            .transition(&key, |current| {
                if current.challenge_id != challenge_id || !current.is_pending() {
                    return None;
                }
                let mut next = current.clone();
                next.message_ids.push((chat_id, message_id));
                Some(next)
            })
            .await;
        if !matches!(tracked, Ok(Some(_))) {
            self.delete_messages(&[(chat_id, message_id)]).await;
        }
    }

    fn schedule_timers(self: &Arc<Self>, session: &ChallengeSession, policy: &EntryPointPolicy) {
        let group = Self::timer_group(session.room_id, session.subject_id);
        let (room_id, subject_id, challenge_id) =
            (session.room_id, session.subject_id, session.challenge_id);

        for (index, offset) in policy.reminder_offsets().into_iter().enumerate() {
            let this = Arc::clone(self);
            let remaining = policy.timeout().saturating_sub(offset);
            self.timers.schedule(group.clone(), offset, async move {
                if let Err(e) = this
                    .remind(room_id, subject_id, challenge_id, index as u32 + 1, remaining)
                    .await
                {
                    tracing::warn!(room_id, subject_id, "⚠️ 验证提醒失败: {}", e);
                }
            });
        }

        let this = Arc::clone(self);
        self.timers.schedule(group, policy.timeout(), async move {
            if let Err(e) = this.on_timeout(room_id, subject_id, challenge_id).await {
                tracing::warn!(room_id, subject_id, "⚠️ 验证超时处理失败: {}", e);
            }
        });
    }

    // ========================================================================
    // 延时任务回调
    // ========================================================================

    /// 第 `nth` 次提醒；会话已变化返回 false
    pub async fn remind(
        &self,
        room_id: RoomId,
        subject_id: UserId,
        challenge_id: Uuid,
        nth: u32,
        remaining: Duration,
    ) -> Result<bool> {
        let Some(session) = self.pending(room_id, subject_id).await? else {
            return Ok(false);
        };
        if session.challenge_id != challenge_id {
            return Ok(false);
        }
        let text = format!(
            "⏰ 请在 {} 秒内完成验证\n{}",
            remaining.as_secs(),
            session.payload.prompt
        );
        self.deliver(&session, text).await;
        tracing::debug!(room_id, subject_id, nth, "⏰ 已发送验证提醒");
        metrics::record_challenge("reminded");
        Ok(true)
    }

    /// 超时；会话已变化返回 false
    pub async fn on_timeout(
        &self,
        room_id: RoomId,
        subject_id: UserId,
        challenge_id: Uuid,
    ) -> Result<bool> {
        let key = Self::session_key(room_id, subject_id);
        let expired = self
            .transition(&key, |current| {
                if current.challenge_id != challenge_id || !current.is_pending() {
                    return None;
                }
                let mut next = current.clone();
                next.state = ChallengeState::Expired;
                Some(next)
            })
            .await?;
        let Some(session) = expired else {
            tracing::debug!(room_id, subject_id, "验证已结束，忽略超时");
            return Ok(false);
        };

        tracing::info!(
            room_id,
            subject_id,
            policy = ?session.on_exhaustion,
            "⌛ 验证超时"
        );
        self.close(&session).await?;
        self.apply_exhaustion(&session).await;
        metrics::record_challenge("expired");
        self.audit.record(AuditEvent::ChallengeExpired {
            room_id,
            subject_id,
            policy: session.on_exhaustion,
        });
        Ok(true)
    }

    // ========================================================================
    // 作答
    // ========================================================================

    /// 提交答案
    pub async fn submit_answer(
        &self,
        room_id: RoomId,
        subject_id: UserId,
        submitter_id: UserId,
        answer: &str,
    ) -> Result<AnswerOutcome> {
        let Some(current) = self.pending(room_id, subject_id).await? else {
            return Ok(AnswerOutcome::NoSession);
        };
        if submitter_id != current.owner_id {
            tracing::debug!(room_id, subject_id, submitter_id, "非本人作答，已拒绝");
            return Ok(AnswerOutcome::NotOwner);
        }

        let key = Self::session_key(room_id, subject_id);
        let generator = self.generator.clone();
        let mut retired_messages = Vec::new();
        let next = self
            .transition(&key, |session| {
                if !session.is_pending() || session.owner_id != submitter_id {
                    return None;
                }
                let mut next = session.clone();
                if session.accepts(answer) {
                    next.state = ChallengeState::Solved;
                    retired_messages = std::mem::take(&mut next.message_ids);
                } else {
                    next.attempts += 1;
                    if next.attempts >= next.max_attempts {
                        next.state = ChallengeState::Failed;
                    } else {
                        next.payload = generator.generate();
                    }
                }
                Some(next)
            })
            .await?;
        let Some(session) = next else {
            return Ok(AnswerOutcome::NoSession);
        };

        match session.state {
            ChallengeState::Solved => {
                // 会话键保留为已验证标记，这里只收尾定时任务和消息
                self.timers
                    .cancel_group(&Self::timer_group(room_id, subject_id));
                self.delete_messages(&retired_messages).await;
                tracing::info!(room_id, subject_id, attempts = session.attempts, "✅ 验证通过");
                metrics::record_challenge("solved");
                self.audit.record(AuditEvent::ChallengeSolved {
                    room_id,
                    subject_id,
                    attempts: session.attempts,
                });
                Ok(AnswerOutcome::Solved(session))
            }
            ChallengeState::Failed => {
                self.close(&session).await?;
                self.apply_exhaustion(&session).await;
                tracing::info!(room_id, subject_id, attempts = session.attempts, "❌ 验证失败");
                metrics::record_challenge("failed");
                self.audit.record(AuditEvent::ChallengeFailed {
                    room_id,
                    subject_id,
                    attempts: session.attempts,
                    policy: session.on_exhaustion,
                });
                Ok(AnswerOutcome::Failed(session))
            }
            _ => {
                let text = format!(
                    "❎ 回答错误，还剩 {} 次机会\n{}",
                    session.remaining_attempts(),
                    session.payload.prompt
                );
                self.deliver(&session, text).await;
                metrics::record_challenge("reissued");
                self.audit.record(AuditEvent::ChallengeReissued {
                    room_id,
                    subject_id,
                    challenge_id: session.challenge_id,
                    attempts: session.attempts,
                });
                Ok(AnswerOutcome::Retry(session))
            }
        }
    }

    /// 验证通过且终检无问题后放行：群内解除限制，申请则批准
    pub async fn release(&self, session: &ChallengeSession) -> Result<()> {
        if session.in_room {
            self.platform
                .lift_restriction(session.room_id, session.subject_id)
                .await
        } else {
            self.platform
                .approve_join_request(session.room_id, session.subject_id)
                .await
        }
    }

    // ========================================================================
    // 离群
    // ========================================================================

    /// 离群：一次 take 同时清除已验证标记和进行中的会话，再取消定时任务
    pub async fn on_exit(&self, room_id: RoomId, subject_id: UserId) -> Result<ExitOutcome> {
        let taken = self.cache.take(&Self::session_key(room_id, subject_id)).await?;
        let cancelled_timers = self.timers.cancel_group(&Self::timer_group(room_id, subject_id));

        let (mut cleared_verified, mut destroyed_pending) = (false, false);
        if let Some(raw) = taken {
            if let Ok(session) = serde_json::from_str::<ChallengeSession>(&raw) {
                cleared_verified = session.state == ChallengeState::Solved;
                destroyed_pending = session.is_pending();
                self.delete_messages(&session.message_ids).await;
            }
        }

        if cleared_verified || destroyed_pending {
            tracing::info!(
                room_id,
                subject_id,
                cleared_verified,
                destroyed_pending,
                "🚪 离群，已清除验证状态"
            );
        }
        Ok(ExitOutcome {
            cleared_verified,
            destroyed_pending,
            cancelled_timers,
        })
    }

    // ========================================================================
    // 收尾
    // ========================================================================

    /// 终态会话：删除会话键、取消定时任务、删除消息
    async fn close(&self, session: &ChallengeSession) -> Result<()> {
        self.cache
            .delete(&Self::session_key(session.room_id, session.subject_id))
            .await?;
        self.timers
            .cancel_group(&Self::timer_group(session.room_id, session.subject_id));
        self.delete_messages(&session.message_ids).await;
        Ok(())
    }

    async fn delete_messages(&self, messages: &[(i64, MessageId)]) {
        for (chat_id, message_id) in messages {
            if let Err(e) = self.platform.delete_message(*chat_id, *message_id).await {
                tracing::debug!(chat_id, message_id, "删除验证消息失败: {}", e);
            }
        }
    }

    /// 次数用完 / 超时后的处理
    async fn apply_exhaustion(&self, session: &ChallengeSession) {
        if session.on_exhaustion == ExhaustionPolicy::LeavePending {
            return;
        }
        let (room_id, subject_id) = (session.room_id, session.subject_id);
        let result = if session.in_room {
            self.platform.remove(room_id, subject_id).await
        } else {
            self.platform.decline_join_request(room_id, subject_id).await
        };
        if let Err(e) = result {
            tracing::warn!(room_id, subject_id, "⚠️ 执行验证失败策略出错: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{EventBus, MemoryCache, RetryPolicy};
    use crate::platform::DryRunPlatform;
    use crate::service::challenge::generator::FixedChallengeGenerator;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{OnceLock, Weak};

    const ROOM: RoomId = -100;
    const SUBJECT: UserId = 7;

    struct Fixture {
        orchestrator: Arc<ChallengeOrchestrator>,
        platform: Arc<DryRunPlatform>,
        cache: Arc<MemoryCache>,
        timers: TimerRegistry,
    }

    fn fixture() -> Fixture {
        let cache = Arc::new(MemoryCache::new());
        let platform = Arc::new(DryRunPlatform::new());
        let timers = TimerRegistry::new();
        let orchestrator = Arc::new(ChallengeOrchestrator::new(
            cache.clone(),
            PlatformGateway::new(platform.clone(), RetryPolicy::default()),
            timers.clone(),
            Arc::new(FixedChallengeGenerator::new("1 + 1 = ?", "2")),
            Arc::new(EventBus::default()),
            ChallengeTimings::default(),
        ));
        Fixture {
            orchestrator,
            platform,
            cache,
            timers,
        }
    }

    fn request(entry_point: EntryPoint) -> IssueRequest {
        IssueRequest {
            room_id: ROOM,
            subject_id: SUBJECT,
            owner_id: SUBJECT,
            entry_point,
            in_room: entry_point != EntryPoint::JoinRequest,
            policy: EntryPointPolicy {
                enabled: true,
                timeout_secs: 60,
                max_attempts: 3,
                reminder_interval_secs: 20,
                reminder_count: 1,
                surface: DeliverySurface::InRoom,
                on_exhaustion: ExhaustionPolicy::Decline,
            },
            profile: None,
        }
    }

    #[tokio::test]
    async fn test_issue_restricts_and_second_issue_reuses_session() {
        let f = fixture();
        let IssueOutcome::Issued(first) = f.orchestrator.issue(request(EntryPoint::SelfJoin)).await.unwrap() else {
            panic!("expected a new session");
        };
        assert_eq!(f.platform.commands_named("restrict_member").len(), 1);
        assert_eq!(first.message_ids.len(), 1);

        match f.orchestrator.issue(request(EntryPoint::SelfJoin)).await.unwrap() {
            IssueOutcome::AlreadyPending(existing) => {
                assert_eq!(existing.challenge_id, first.challenge_id)
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(f.platform.commands_named("restrict_member").len(), 1);
    }

    #[tokio::test]
    async fn test_correct_answer_solves_and_marks_verified() {
        let f = fixture();
        f.orchestrator.issue(request(EntryPoint::SelfJoin)).await.unwrap();

        let outcome = f.orchestrator.submit_answer(ROOM, SUBJECT, SUBJECT, " 2 ").await.unwrap();
        let AnswerOutcome::Solved(session) = outcome else {
            panic!("expected solved, got {:?}", outcome);
        };
        assert_eq!(session.state, ChallengeState::Solved);
        assert!(f.orchestrator.is_verified(ROOM, SUBJECT).await.unwrap());
        assert!(f.orchestrator.pending(ROOM, SUBJECT).await.unwrap().is_none());
        assert_eq!(f.timers.pending(&format!("{}:{}", ROOM, SUBJECT)), 0);
        assert_eq!(f.platform.commands_named("delete_message").len(), 1);

        f.orchestrator.release(&session).await.unwrap();
        assert_eq!(f.platform.commands_named("lift_restriction").len(), 1);

        assert_eq!(
            f.orchestrator.issue(request(EntryPoint::SelfJoin)).await.unwrap(),
            IssueOutcome::AlreadyVerified
        );
    }

    #[tokio::test]
    async fn test_wrong_answers_exhaust_and_kick() {
        let f = fixture();
        f.orchestrator.issue(request(EntryPoint::SelfJoin)).await.unwrap();

        for remaining in [2, 1] {
            match f.orchestrator.submit_answer(ROOM, SUBJECT, SUBJECT, "5").await.unwrap() {
                AnswerOutcome::Retry(s) => assert_eq!(s.remaining_attempts(), remaining),
                other => panic!("unexpected {:?}", other),
            }
        }
        match f.orchestrator.submit_answer(ROOM, SUBJECT, SUBJECT, "5").await.unwrap() {
            AnswerOutcome::Failed(s) => assert_eq!(s.attempts, 3),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(f.platform.commands_named("remove_member").len(), 1);
        assert_eq!(
            f.orchestrator.submit_answer(ROOM, SUBJECT, SUBJECT, "2").await.unwrap(),
            AnswerOutcome::NoSession
        );
        assert!(!f.orchestrator.is_verified(ROOM, SUBJECT).await.unwrap());
    }

    #[tokio::test]
    async fn test_only_owner_may_answer() {
        let f = fixture();
        f.orchestrator.issue(request(EntryPoint::SelfJoin)).await.unwrap();
        assert_eq!(
            f.orchestrator.submit_answer(ROOM, SUBJECT, 99, "2").await.unwrap(),
            AnswerOutcome::NotOwner
        );
        let session = f.orchestrator.pending(ROOM, SUBJECT).await.unwrap().unwrap();
        assert_eq!(session.attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reminder_then_timeout_declines_join_request() {
        let f = fixture();
        let mut req = request(EntryPoint::JoinRequest);
        req.policy.surface = DeliverySurface::Private;
        f.orchestrator.issue(req).await.unwrap();
        assert!(f.platform.commands_named("restrict_member").is_empty());

        tokio::time::sleep(Duration::from_secs(30)).await;
        // 出题消息 + 一次提醒，都发到私聊
        let sent = f.platform.commands_named("send_message");
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|c| c.chat_id() == SUBJECT));

        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(f.platform.commands_named("decline_join_request").len(), 1);
        assert_eq!(f.platform.commands_named("delete_message").len(), 2);
        assert!(f.orchestrator.pending(ROOM, SUBJECT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_timer_is_a_no_op() {
        let f = fixture();
        f.orchestrator.issue(request(EntryPoint::SelfJoin)).await.unwrap();
        assert!(!f.orchestrator.on_timeout(ROOM, SUBJECT, Uuid::new_v4()).await.unwrap());
        assert!(!f
            .orchestrator
            .remind(ROOM, SUBJECT, Uuid::new_v4(), 1, Duration::from_secs(5))
            .await
            .unwrap());
        assert!(f.orchestrator.pending(ROOM, SUBJECT).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_exit_clears_verified_marker_and_rejoin_gets_new_session() {
        let f = fixture();
        let IssueOutcome::Issued(first) = f.orchestrator.issue(request(EntryPoint::SelfJoin)).await.unwrap() else {
            panic!("expected a new session");
        };
        f.orchestrator.submit_answer(ROOM, SUBJECT, SUBJECT, "2").await.unwrap();

        let exit = f.orchestrator.on_exit(ROOM, SUBJECT).await.unwrap();
        assert!(exit.cleared_verified);
        assert!(!exit.destroyed_pending);

        let IssueOutcome::Issued(second) = f.orchestrator.issue(request(EntryPoint::SelfJoin)).await.unwrap() else {
            panic!("expected a new session after rejoin");
        };
        assert_ne!(first.challenge_id, second.challenge_id);
        assert_eq!(second.state, ChallengeState::Pending);

        let exit = f.orchestrator.on_exit(ROOM, SUBJECT).await.unwrap();
        assert!(exit.destroyed_pending);
        assert!(f.cache.is_empty());
    }

    /// 写入 Solved 之后、作答流程收尾之前插入一次离群
    struct ExitRightAfterSolve {
        inner: MemoryCache,
        orchestrator: OnceLock<Weak<ChallengeOrchestrator>>,
        armed: AtomicBool,
    }

    #[async_trait::async_trait]
    impl SharedCache for ExitRightAfterSolve {
        async fn incr_window(&self, key: &str, window: Duration) -> Result<u64> {
            self.inner.incr_window(key, window).await
        }
        async fn add_to_window_set(&self, key: &str, member: &str, window: Duration) -> Result<u64> {
            self.inner.add_to_window_set(key, member, window).await
        }
        async fn set_members(&self, key: &str) -> Result<Vec<String>> {
            self.inner.set_members(key).await
        }
        async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
            self.inner.set_nx(key, value, ttl).await
        }
        async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
            self.inner.set_ex(key, value, ttl).await
        }
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key).await
        }
        async fn take(&self, key: &str) -> Result<Option<String>> {
            self.inner.take(key).await
        }
        async fn delete(&self, key: &str) -> Result<bool> {
            self.inner.delete(key).await
        }
        async fn exists(&self, key: &str) -> Result<bool> {
            self.inner.exists(key).await
        }
        async fn compare_and_swap(
            &self,
            key: &str,
            expected: &str,
            new: &str,
            ttl: Option<Duration>,
        ) -> Result<bool> {
            let swapped = self.inner.compare_and_swap(key, expected, new, ttl).await?;
            if swapped && new.contains(r#""state":"solved""#) && self.armed.swap(false, Ordering::SeqCst) {
                if let Some(orchestrator) = self.orchestrator.get().and_then(Weak::upgrade) {
                    orchestrator.on_exit(ROOM, SUBJECT).await?;
                }
            }
            Ok(swapped)
        }
    }

    #[tokio::test]
    async fn test_exit_during_solve_leaves_no_verified_marker() {
        let cache = Arc::new(ExitRightAfterSolve {
            inner: MemoryCache::new(),
            orchestrator: OnceLock::new(),
            armed: AtomicBool::new(true),
        });
        let orchestrator = Arc::new(ChallengeOrchestrator::new(
            cache.clone(),
            PlatformGateway::new(Arc::new(DryRunPlatform::new()), RetryPolicy::default()),
            TimerRegistry::new(),
            Arc::new(FixedChallengeGenerator::new("1 + 1 = ?", "2")),
            Arc::new(EventBus::default()),
            ChallengeTimings::default(),
        ));
        let _ = cache.orchestrator.set(Arc::downgrade(&orchestrator));

        orchestrator.issue(request(EntryPoint::SelfJoin)).await.unwrap();
        let outcome = orchestrator.submit_answer(ROOM, SUBJECT, SUBJECT, "2").await.unwrap();
        assert!(matches!(outcome, AnswerOutcome::Solved(_)));
        assert!(!cache.armed.load(Ordering::SeqCst));

        // 离群已经把答对的会话一起带走，重新入群必须重新验证
        assert!(!orchestrator.is_verified(ROOM, SUBJECT).await.unwrap());
        match orchestrator.issue(request(EntryPoint::SelfJoin)).await.unwrap() {
            IssueOutcome::Issued(session) => assert!(session.is_pending()),
            other => panic!("rejoin skipped the challenge: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_join_request_session_stays_out_of_the_room() {
        let f = fixture();
        // 即使策略写的是群内投递，申请者也只能在私聊收到题目
        let mut req = request(EntryPoint::RiskSecondary);
        req.in_room = false;
        let IssueOutcome::Issued(session) = f.orchestrator.issue(req).await.unwrap() else {
            panic!("expected a new session");
        };
        assert_eq!(session.surface, DeliverySurface::Private);
        assert!(f.platform.commands_named("restrict_member").is_empty());
        assert!(f
            .platform
            .commands_named("send_message")
            .iter()
            .all(|c| c.chat_id() == SUBJECT));

        let AnswerOutcome::Solved(session) =
            f.orchestrator.submit_answer(ROOM, SUBJECT, SUBJECT, "2").await.unwrap()
        else {
            panic!("expected solved");
        };
        f.orchestrator.release(&session).await.unwrap();
        assert_eq!(f.platform.commands_named("approve_join_request").len(), 1);
        assert!(f.platform.commands_named("lift_restriction").is_empty());
    }
}

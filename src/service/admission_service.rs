//! 入群裁决引擎
//!
//! 每个事件独立处理，得出一个 [`AdmissionDecision`]：
//! 1. 解析一次群配置，沿调用链传递
//! 2. 分类；Other 直接放行
//! 3. 更新滥用计数（邀请按邀请人、进出按本人、批量入群按群）
//! 4. 该入口开启了验证就出题，结果等作答再定
//! 5. 否则查跨群处罚登记和风险分，命中则限制
//!
//! 计数器、验证、登记查询出错时降级放行，记录降级日志和审计事件。

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::events::AuditEvent;
use crate::error::{GuardError, Result};
use crate::infra::{metrics, AuditSink};
use crate::model::{
    AbuseRule, AdmissionDecision, ChallengeSession, EntryPoint, FloodAction, InboundEvent,
    JoinKind, ManualAction, MembershipEvent, MessageId, ProfileSignals, PunishmentKind,
    PunishmentRecord, RestrictReason, RiskAssessment, RiskTier, RoomConfig, RoomId, Sanction,
    UserId,
};
use crate::platform::PlatformGateway;
use crate::repository::{Directory, PunishmentRepository, RoomConfigResolver};
use crate::service::abuse_window::{AbuseKind, AbuseMonitor, WindowOutcome};
use crate::service::challenge::{AnswerOutcome, ChallengeOrchestrator, IssueOutcome, IssueRequest};
use crate::service::event_classifier;
use crate::service::join_request_tracker::JoinRequestTracker;
use crate::service::remediation_service::RemediationExecutor;
use crate::service::risk_gate::RiskGate;

/// 引擎依赖
pub struct AdmissionEngineParts {
    pub configs: Arc<RoomConfigResolver>,
    pub join_requests: JoinRequestTracker,
    pub abuse: AbuseMonitor,
    pub risk: Arc<RiskGate>,
    pub challenges: Arc<ChallengeOrchestrator>,
    pub remediation: Arc<RemediationExecutor>,
    pub punishments: Arc<dyn PunishmentRepository>,
    pub directory: Arc<dyn Directory>,
    pub platform: PlatformGateway,
    pub audit: Arc<dyn AuditSink>,
    /// 服务自身账号
    pub service_account: UserId,
}

/// 准入筛查结果
enum Screening {
    Clear,
    Registry(PunishmentRecord),
    Risk(RiskAssessment),
    /// 风险分落在验证档位
    Secondary,
}

/// 入群裁决引擎
pub struct AdmissionEngine {
    configs: Arc<RoomConfigResolver>,
    join_requests: JoinRequestTracker,
    abuse: AbuseMonitor,
    risk: Arc<RiskGate>,
    challenges: Arc<ChallengeOrchestrator>,
    remediation: Arc<RemediationExecutor>,
    punishments: Arc<dyn PunishmentRepository>,
    directory: Arc<dyn Directory>,
    platform: PlatformGateway,
    audit: Arc<dyn AuditSink>,
    service_account: UserId,
}

impl AdmissionEngine {
    pub fn new(parts: AdmissionEngineParts) -> Self {
        Self {
            configs: parts.configs,
            join_requests: parts.join_requests,
            abuse: parts.abuse,
            risk: parts.risk,
            challenges: parts.challenges,
            remediation: parts.remediation,
            punishments: parts.punishments,
            directory: parts.directory,
            platform: parts.platform,
            audit: parts.audit,
            service_account: parts.service_account,
        }
    }

    pub fn challenges(&self) -> &Arc<ChallengeOrchestrator> {
        &self.challenges
    }

    pub fn service_account(&self) -> UserId {
        self.service_account
    }

    /// 处理一个事件
    ///
    /// 可降级的错误在这里转成放行；持久化等错误返回给调用方，本次决策不执行。
    pub async fn handle(&self, event: InboundEvent) -> Result<AdmissionDecision> {
        let room_id = event.room_id();
        let result = match event {
            InboundEvent::JoinRequested { room_id, profile, .. } => {
                self.on_join_request(room_id, profile).await
            }
            InboundEvent::Membership { event, profile } => self.on_membership(event, profile).await,
            InboundEvent::ReactionAdded {
                room_id,
                actor_id,
                message_id,
                ..
            } => self.on_reaction(room_id, actor_id, message_id).await,
            InboundEvent::ChallengeAnswer {
                room_id,
                subject_id,
                submitter_id,
                answer,
                ..
            } => self.on_answer(room_id, subject_id, submitter_id, &answer).await,
            InboundEvent::Moderation {
                room_id,
                issuer_id,
                target_id,
                action,
                reason,
                ..
            } => self.on_moderation(room_id, issuer_id, target_id, action, reason).await,
        };

        let decision = match result {
            Ok(decision) => decision,
            Err(e) if e.is_degradable() => {
                self.degraded("engine", room_id, &e);
                AdmissionDecision::Allow
            }
            Err(e) => return Err(e),
        };
        metrics::record_decision(decision.as_str());
        Ok(decision)
    }

    // ========================================================================
    // 入群申请
    // ========================================================================

    async fn on_join_request(&self, room_id: RoomId, profile: ProfileSignals) -> Result<AdmissionDecision> {
        let subject_id = profile.subject_id;
        let config = self.configs.resolve(room_id).await;

        if let Err(e) = self.join_requests.record(room_id, subject_id).await {
            self.degraded("join_request_tracker", room_id, &e);
        }

        if let Some(decision) = self
            .try_challenge(&config, EntryPoint::JoinRequest, false, subject_id, &profile)
            .await
        {
            return Ok(decision);
        }

        match self.screen(&config, &profile, true).await {
            Screening::Clear => Ok(AdmissionDecision::Allow),
            // 申请者不在群内：私聊出题，通过后批准申请
            Screening::Secondary => {
                let decision = self
                    .try_challenge(&config, EntryPoint::RiskSecondary, false, subject_id, &profile)
                    .await;
                Ok(decision.unwrap_or(AdmissionDecision::Allow))
            }
            Screening::Registry(_) => {
                self.decline_request(room_id, subject_id).await;
                Ok(AdmissionDecision::Restrict(RestrictReason::Registry))
            }
            Screening::Risk(_) => {
                self.decline_request(room_id, subject_id).await;
                Ok(AdmissionDecision::Restrict(RestrictReason::RiskGate))
            }
        }
    }

    async fn decline_request(&self, room_id: RoomId, subject_id: UserId) {
        if let Err(e) = self.platform.decline_join_request(room_id, subject_id).await {
            tracing::warn!(room_id, subject_id, "⚠️ 拒绝入群申请失败: {}", e);
        }
    }

    // ========================================================================
    // 成员变更
    // ========================================================================

    async fn on_membership(&self, event: MembershipEvent, profile: ProfileSignals) -> Result<AdmissionDecision> {
        let room_id = event.room_id;
        let subject_id = event.subject_id;

        if event.is_departure() {
            let config = self.configs.resolve(room_id).await;
            self.on_departure(&config, &event).await;
            return Ok(AdmissionDecision::Allow);
        }
        if !event.is_arrival() {
            return Ok(AdmissionDecision::Allow);
        }

        let had_pending = match self.join_requests.consume(room_id, subject_id).await {
            Ok(had_pending) => had_pending,
            Err(e) => {
                self.degraded("join_request_tracker", room_id, &e);
                false
            }
        };

        let kind = event_classifier::classify(&event, had_pending);
        let Some(entry) =
            event_classifier::entry_point(kind, &event, had_pending, self.service_account)
        else {
            return Ok(AdmissionDecision::Allow);
        };
        tracing::debug!(
            room_id,
            subject_id,
            kind = kind.as_str(),
            entry_point = entry.as_str(),
            "成员加入"
        );

        let config = self.configs.resolve(room_id).await;

        // 邀请刷屏只处罚邀请人，不影响被邀请人
        if kind == JoinKind::Invite {
            if let Some(actor_id) = event.foreign_actor() {
                self.count_invite(&config, actor_id).await;
            }
        }

        if let Some(decision) = self.count_mass_join(&config, subject_id).await {
            return Ok(decision);
        }
        if let Some(decision) = self.count_churn(&config, subject_id).await {
            return Ok(decision);
        }

        if let Some(decision) = self.try_challenge(&config, entry, true, subject_id, &profile).await {
            return Ok(decision);
        }

        match self.screen(&config, &profile, true).await {
            Screening::Clear => Ok(AdmissionDecision::Allow),
            Screening::Secondary => {
                let decision = self
                    .try_challenge(&config, EntryPoint::RiskSecondary, true, subject_id, &profile)
                    .await;
                Ok(decision.unwrap_or(AdmissionDecision::Allow))
            }
            Screening::Registry(record) => {
                self.enforce_registry(room_id, subject_id, &record).await?;
                Ok(AdmissionDecision::Restrict(RestrictReason::Registry))
            }
            Screening::Risk(assessment) => {
                self.restrict_for_risk(&config, &assessment).await?;
                Ok(AdmissionDecision::Restrict(RestrictReason::RiskGate))
            }
        }
    }

    /// 离群：清理验证状态，计入进出次数
    async fn on_departure(&self, config: &RoomConfig, event: &MembershipEvent) {
        let (room_id, subject_id) = (event.room_id, event.subject_id);
        if let Err(e) = self.challenges.on_exit(room_id, subject_id).await {
            self.degraded("challenge", room_id, &e);
        }
        self.count_churn(config, subject_id).await;
    }

    // ========================================================================
    // 滥用计数
    // ========================================================================

    async fn count_invite(&self, config: &RoomConfig, actor_id: UserId) {
        let rule = config.policy.invite_flood;
        match self.abuse.record_invite(config.room_id, actor_id, &rule).await {
            Ok(Some(outcome)) => {
                self.on_abuse_trigger(AbuseKind::InviteFlood, config.room_id, actor_id, outcome, &rule)
                    .await;
            }
            Ok(None) => {}
            Err(e) => self.degraded("abuse", config.room_id, &e),
        }
    }

    /// 进出计数；触发且动作不是警告时返回限制
    async fn count_churn(&self, config: &RoomConfig, subject_id: UserId) -> Option<AdmissionDecision> {
        let rule = config.policy.join_exit_churn;
        match self
            .abuse
            .record_membership_change(config.room_id, subject_id, &rule)
            .await
        {
            Ok(Some(outcome)) => self
                .on_abuse_trigger(AbuseKind::JoinExitChurn, config.room_id, subject_id, outcome, &rule)
                .await
                .then_some(AdmissionDecision::Restrict(RestrictReason::JoinExitChurn)),
            Ok(None) => None,
            Err(e) => {
                self.degraded("abuse", config.room_id, &e);
                None
            }
        }
    }

    async fn count_mass_join(&self, config: &RoomConfig, subject_id: UserId) -> Option<AdmissionDecision> {
        let rule = config.policy.mass_join;
        let room_id = config.room_id;
        let outcome = match self.abuse.record_join(room_id, subject_id, &rule).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.degraded("abuse", room_id, &e);
                return None;
            }
        };
        if !outcome.protection_active {
            return None;
        }

        let targets = if outcome.just_activated {
            tracing::warn!(
                room_id,
                joins = outcome.join_count,
                protection_secs = rule.protection_secs,
                "🚨 批量入群，进入保护模式"
            );
            metrics::record_abuse_trigger(AbuseKind::MassJoin.as_str());
            self.audit.record(AuditEvent::MassJoinProtection {
                room_id,
                recent_joiners: outcome.recent_joiners.len(),
                protection_secs: rule.protection_secs,
            });
            let mut targets = outcome.recent_joiners;
            if !targets.contains(&subject_id) {
                targets.push(subject_id);
            }
            targets
        } else {
            vec![subject_id]
        };

        for target in targets {
            if let Err(e) = self
                .remediation
                .apply_flood_action(room_id, target, rule.action, rule.action_duration(), RestrictReason::MassJoin)
                .await
            {
                tracing::warn!(room_id, subject_id = target, "⚠️ 保护模式处罚失败: {}", e);
            }
        }
        (rule.action != FloodAction::Warn).then_some(AdmissionDecision::Restrict(RestrictReason::MassJoin))
    }

    /// 计数器首次触发时执行动作；返回动作是否限制了计数主体
    async fn on_abuse_trigger(
        &self,
        kind: AbuseKind,
        room_id: RoomId,
        counting_subject: UserId,
        outcome: WindowOutcome,
        rule: &AbuseRule,
    ) -> bool {
        if !outcome.first_trigger {
            return false;
        }
        metrics::record_abuse_trigger(kind.as_str());
        self.audit.record(AuditEvent::AbuseTriggered {
            kind: kind.as_str().to_string(),
            room_id,
            counting_subject: counting_subject.to_string(),
            count: outcome.count,
            threshold: outcome.threshold,
        });

        let reason = match kind {
            AbuseKind::InviteFlood => RestrictReason::InviteFlood,
            AbuseKind::JoinExitChurn => RestrictReason::JoinExitChurn,
            AbuseKind::ReactionAbuse => RestrictReason::ReactionAbuse,
            AbuseKind::MassJoin => RestrictReason::MassJoin,
        };
        if let Err(e) = self
            .remediation
            .apply_flood_action(room_id, counting_subject, rule.action, rule.action_duration(), reason)
            .await
        {
            tracing::warn!(room_id, counting_subject, kind = kind.as_str(), "⚠️ 滥用处罚失败: {}", e);
        }
        rule.action != FloodAction::Warn
    }

    // ========================================================================
    // 表情回应
    // ========================================================================

    async fn on_reaction(&self, room_id: RoomId, actor_id: UserId, message_id: MessageId) -> Result<AdmissionDecision> {
        let config = self.configs.resolve(room_id).await;
        let rule = config.policy.reaction_abuse;
        let outcome = match self.abuse.record_reaction(room_id, actor_id, message_id, &rule).await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => return Ok(AdmissionDecision::Allow),
            Err(e) => {
                self.degraded("abuse", room_id, &e);
                return Ok(AdmissionDecision::Allow);
            }
        };
        let restricted = self
            .on_abuse_trigger(AbuseKind::ReactionAbuse, room_id, actor_id, outcome, &rule)
            .await;
        Ok(if restricted {
            AdmissionDecision::Restrict(RestrictReason::ReactionAbuse)
        } else {
            AdmissionDecision::Allow
        })
    }

    // ========================================================================
    // 验证
    // ========================================================================

    /// 入口开启了验证就出题；已验证过或出题失败（降级）时返回 None
    async fn try_challenge(
        &self,
        config: &RoomConfig,
        entry: EntryPoint,
        in_room: bool,
        subject_id: UserId,
        profile: &ProfileSignals,
    ) -> Option<AdmissionDecision> {
        let policy = *config.challenge_policy(entry);
        if !policy.enabled {
            return None;
        }
        let request = IssueRequest {
            room_id: config.room_id,
            subject_id,
            owner_id: subject_id,
            entry_point: entry,
            in_room,
            policy,
            profile: Some(profile.clone()),
        };
        match self.challenges.issue(request).await {
            Ok(IssueOutcome::Issued(_)) | Ok(IssueOutcome::AlreadyPending(_)) => {
                Some(AdmissionDecision::Challenge)
            }
            Ok(IssueOutcome::AlreadyVerified) => None,
            Err(e) => {
                self.degraded("challenge", config.room_id, &e);
                None
            }
        }
    }

    async fn on_answer(
        &self,
        room_id: RoomId,
        subject_id: UserId,
        submitter_id: UserId,
        answer: &str,
    ) -> Result<AdmissionDecision> {
        match self
            .challenges
            .submit_answer(room_id, subject_id, submitter_id, answer)
            .await?
        {
            AnswerOutcome::Solved(session) => self.after_solved(&session).await,
            AnswerOutcome::Retry(_) => Ok(AdmissionDecision::Challenge),
            AnswerOutcome::Failed(_) => Ok(AdmissionDecision::Restrict(RestrictReason::ChallengeFailed)),
            AnswerOutcome::NoSession | AnswerOutcome::NotOwner => Ok(AdmissionDecision::Allow),
        }
    }

    /// 答对后的终检：登记与风险分无问题才放行
    async fn after_solved(&self, session: &ChallengeSession) -> Result<AdmissionDecision> {
        let (room_id, subject_id) = (session.room_id, session.subject_id);
        let config = self.configs.resolve(room_id).await;
        let profile = session
            .profile
            .clone()
            .unwrap_or_else(|| ProfileSignals::bare(subject_id));

        // 二次验证本身就是风险分的结果，不再要求一次
        let screening = self.screen(&config, &profile, false).await;
        let reason = match screening {
            Screening::Clear | Screening::Secondary => {
                self.challenges.release(session).await?;
                return Ok(AdmissionDecision::Allow);
            }
            Screening::Risk(_) if session.entry_point == EntryPoint::RiskSecondary => {
                self.challenges.release(session).await?;
                return Ok(AdmissionDecision::Allow);
            }
            Screening::Registry(record) => {
                if session.in_room {
                    self.enforce_registry(room_id, subject_id, &record).await?;
                }
                RestrictReason::Registry
            }
            Screening::Risk(assessment) => {
                if session.in_room {
                    self.restrict_for_risk(&config, &assessment).await?;
                }
                RestrictReason::RiskGate
            }
        };
        if !session.in_room {
            self.decline_request(room_id, subject_id).await;
        }
        Ok(AdmissionDecision::Restrict(reason))
    }

    // ========================================================================
    // 筛查
    // ========================================================================

    async fn screen(&self, config: &RoomConfig, profile: &ProfileSignals, allow_secondary: bool) -> Screening {
        let room_id = config.room_id;
        if config.policy.registry_enforcement {
            match self
                .punishments
                .find_active_by_subject(profile.subject_id, Utc::now())
                .await
            {
                Ok(records) => {
                    if let Some(record) = records.into_iter().find(|r| r.kind != PunishmentKind::Kick) {
                        tracing::info!(
                            room_id,
                            subject_id = profile.subject_id,
                            punishment_id = record.id,
                            "📒 命中跨群处罚登记"
                        );
                        return Screening::Registry(record);
                    }
                }
                Err(e) => self.degraded("registry", room_id, &e),
            }
        }

        if config.policy.risk_gate.enabled {
            let assessment = self.risk.assess(profile, Utc::now());
            tracing::debug!(
                room_id,
                subject_id = profile.subject_id,
                score = assessment.score,
                tier = assessment.tier.as_str(),
                factors = ?assessment.factor_tags(),
                "风险评分"
            );
            if assessment.tier.restricts() {
                return Screening::Risk(assessment);
            }
            if assessment.tier == RiskTier::Challenge
                && allow_secondary
                && config.policy.risk_gate.secondary_challenge.enabled
            {
                return Screening::Secondary;
            }
        }
        Screening::Clear
    }

    /// 登记命中：在本群执行同等处罚并记入传播集合
    async fn enforce_registry(&self, room_id: RoomId, subject_id: UserId, record: &PunishmentRecord) -> Result<()> {
        let sanction = match record.kind {
            PunishmentKind::PermanentBan => {
                Sanction::ban(RestrictReason::Registry, self.service_account).with_escalation(false)
            }
            _ => {
                let remaining = record
                    .expires_at
                    .and_then(|at| (at - Utc::now()).to_std().ok());
                Sanction::restrict(RestrictReason::Registry, self.service_account, remaining)
            }
        };
        let report = self.remediation.apply(room_id, subject_id, &sanction).await?;
        if report.applied_in_origin {
            if let Err(e) = self.punishments.add_rooms(record.id, &[room_id]).await {
                tracing::warn!(punishment_id = record.id, room_id, "⚠️ 记录传播群失败: {}", e);
            }
        }
        Ok(())
    }

    async fn restrict_for_risk(&self, config: &RoomConfig, assessment: &RiskAssessment) -> Result<()> {
        let secs = config.policy.risk_gate.restrict_duration_secs;
        let duration = (secs > 0).then(|| Duration::from_secs(secs));
        tracing::info!(
            room_id = config.room_id,
            subject_id = assessment.subject_id,
            score = assessment.score,
            "🛡️ 风险分过高，静默限制"
        );
        let sanction = Sanction::restrict(RestrictReason::RiskGate, self.service_account, duration);
        self.remediation
            .apply(config.room_id, assessment.subject_id, &sanction)
            .await
            .map(|_| ())
    }

    // ========================================================================
    // 管理员命令
    // ========================================================================

    async fn on_moderation(
        &self,
        room_id: RoomId,
        issuer_id: UserId,
        target_id: UserId,
        action: ManualAction,
        reason: Option<String>,
    ) -> Result<AdmissionDecision> {
        let is_admin = self.directory.is_admin(room_id, issuer_id).await?;
        if !is_admin {
            tracing::warn!(room_id, issuer_id, target_id, action = action.as_str(), "🚫 非管理员的处罚命令，已忽略");
            return Ok(AdmissionDecision::Allow);
        }

        self.remediation
            .execute_manual(room_id, issuer_id, target_id, &action, reason)
            .await?;
        Ok(match action {
            ManualAction::Unmute | ManualAction::Unban => AdmissionDecision::Allow,
            _ => AdmissionDecision::Restrict(RestrictReason::Manual),
        })
    }

    // ========================================================================
    // 降级
    // ========================================================================

    fn degraded(&self, component: &'static str, room_id: RoomId, err: &GuardError) {
        tracing::warn!(room_id, component, "⚠️ 降级运行: {}", err);
        metrics::record_degraded(component);
        self.audit.record(AuditEvent::DegradedMode {
            component: component.to_string(),
            room_id,
            reason: err.to_string(),
        });
    }
}

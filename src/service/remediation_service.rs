//! 处罚执行与跨群传播
//!
//! 升级处罚（永久封禁、管理员的全局封禁）先写处罚登记，写入失败整个动作中止；
//! 然后在来源群执行，再并发（有上限）传播到发起人有处罚权限的其他群。
//! 单个群失败只记录并跳过，不影响其他群；群已不存在的永久失败从登记里移除。

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::events::AuditEvent;
use crate::error::{GuardError, Result};
use crate::infra::{metrics, AuditSink};
use crate::model::{
    FloodAction, ManualAction, NewPunishment, PunishmentKind, PunishmentRecord, RestrictReason,
    RoomId, Sanction, UserId,
};
use crate::platform::PlatformGateway;
use crate::repository::{Directory, PunishmentRepository};

/// 一次处罚的执行结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemediationReport {
    /// 来源群是否执行成功
    pub applied_in_origin: bool,
    /// 写入的登记 ID（非升级处罚为空）
    pub punishment_id: Option<i64>,
    /// 传播成功的其他群
    pub propagated: Vec<RoomId>,
    /// 传播失败的其他群
    pub failed: Vec<RoomId>,
}

/// 一条登记的撤销结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReversalReport {
    pub punishment_id: i64,
    pub rooms_attempted: usize,
    pub failed: Vec<RoomId>,
    pub deactivated: bool,
}

/// 处罚执行器
pub struct RemediationExecutor {
    platform: PlatformGateway,
    punishments: Arc<dyn PunishmentRepository>,
    directory: Arc<dyn Directory>,
    audit: Arc<dyn AuditSink>,
    /// 自动处罚的发起人
    service_account: UserId,
    max_parallel: usize,
}

impl RemediationExecutor {
    pub fn new(
        platform: PlatformGateway,
        punishments: Arc<dyn PunishmentRepository>,
        directory: Arc<dyn Directory>,
        audit: Arc<dyn AuditSink>,
        service_account: UserId,
        max_parallel: usize,
    ) -> Self {
        Self {
            platform,
            punishments,
            directory,
            audit,
            service_account,
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn service_account(&self) -> UserId {
        self.service_account
    }

    /// 执行处罚
    pub async fn apply(
        &self,
        room_id: RoomId,
        subject_id: UserId,
        sanction: &Sanction,
    ) -> Result<RemediationReport> {
        // 登记先行：写不进去就不执行
        let record = if sanction.escalate {
            Some(self.record(room_id, subject_id, sanction).await?)
        } else {
            None
        };

        let mut report = RemediationReport {
            punishment_id: record.as_ref().map(|r| r.id),
            ..Default::default()
        };

        match self.apply_in_room(room_id, subject_id, sanction).await {
            Ok(()) => report.applied_in_origin = true,
            Err(e) => {
                tracing::warn!(room_id, subject_id, kind = sanction.kind.as_str(), "⚠️ 来源群处罚失败: {}", e)
            }
        }

        if let Some(record) = record {
            self.propagate(&record, sanction, &mut report).await;
        }
        Ok(report)
    }

    async fn record(
        &self,
        room_id: RoomId,
        subject_id: UserId,
        sanction: &Sanction,
    ) -> Result<PunishmentRecord> {
        let expires_at = sanction
            .duration
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d);
        let record = self
            .punishments
            .create(&NewPunishment {
                subject_id,
                origin_room_id: room_id,
                kind: sanction.kind,
                issuer_id: sanction.issuer_id,
                reason: sanction.reason,
                expires_at,
            })
            .await
            .map_err(|e| {
                tracing::error!(room_id, subject_id, "❌ 写入处罚登记失败，处罚中止: {}", e);
                e
            })?;
        tracing::info!(
            punishment_id = record.id,
            subject_id,
            kind = record.kind.as_str(),
            reason = record.reason.as_str(),
            "📒 已写入处罚登记"
        );
        Ok(record)
    }

    /// 在单个群执行
    async fn apply_in_room(&self, room_id: RoomId, subject_id: UserId, sanction: &Sanction) -> Result<()> {
        match sanction.kind {
            PunishmentKind::TemporaryRestrict => {
                self.platform.restrict(room_id, subject_id, sanction.duration).await?
            }
            PunishmentKind::Kick => self.platform.remove(room_id, subject_id).await?,
            PunishmentKind::PermanentBan => self.platform.ban(room_id, subject_id, None).await?,
        }
        tracing::info!(
            room_id,
            subject_id,
            kind = sanction.kind.as_str(),
            reason = sanction.reason.as_str(),
            "🚫 已执行处罚"
        );
        self.audit.record(AuditEvent::SubjectRestricted {
            room_id,
            subject_id,
            kind: sanction.kind,
            reason: sanction.reason,
            issuer_id: sanction.issuer_id,
        });
        Ok(())
    }

    /// 传播到发起人有权限的其他群
    async fn propagate(&self, record: &PunishmentRecord, sanction: &Sanction, report: &mut RemediationReport) {
        let rooms: Vec<RoomId> = match self.directory.privileged_rooms(sanction.issuer_id).await {
            Ok(rooms) => rooms
                .into_iter()
                .filter(|room| *room != record.origin_room_id)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            Err(e) => {
                tracing::warn!(issuer_id = sanction.issuer_id, "⚠️ 查询管理群列表失败，跳过传播: {}", e);
                Vec::new()
            }
        };

        let subject_id = record.subject_id;
        let results: Vec<(RoomId, Result<()>)> = stream::iter(rooms)
            .map(|room_id| async move { (room_id, self.apply_in_room(room_id, subject_id, sanction).await) })
            .buffer_unordered(self.max_parallel)
            .collect()
            .await;

        for (room_id, result) in results {
            match result {
                Ok(()) => report.propagated.push(room_id),
                Err(e) => {
                    tracing::warn!(room_id, subject_id, "⚠️ 传播处罚失败，跳过该群: {}", e);
                    report.failed.push(room_id);
                }
            }
        }
        report.propagated.sort_unstable();
        report.failed.sort_unstable();

        let mut applied = report.propagated.clone();
        if report.applied_in_origin {
            applied.push(record.origin_room_id);
        }
        if !applied.is_empty() {
            if let Err(e) = self.punishments.add_rooms(record.id, &applied).await {
                tracing::warn!(punishment_id = record.id, "⚠️ 记录传播群失败: {}", e);
            }
        }

        tracing::info!(
            punishment_id = record.id,
            subject_id,
            succeeded = report.propagated.len(),
            failed = report.failed.len(),
            "📡 处罚传播完成"
        );
        metrics::record_propagation(report.propagated.len(), report.failed.len());
        self.audit.record(AuditEvent::PropagationCompleted {
            punishment_id: record.id,
            subject_id,
            succeeded: report.propagated.clone(),
            failed: report.failed.clone(),
        });
    }

    /// 滥用触发后的动作，作用于计数主体
    pub async fn apply_flood_action(
        &self,
        room_id: RoomId,
        actor_id: UserId,
        action: FloodAction,
        duration: Option<Duration>,
        reason: RestrictReason,
    ) -> Result<RemediationReport> {
        let issuer = self.service_account;
        let sanction = match action {
            FloodAction::Warn => {
                let text = format!("⚠️ 用户 {} 的操作过于频繁，请停止", actor_id);
                if let Err(e) = self.platform.send_message(room_id, text).await {
                    tracing::warn!(room_id, actor_id, "⚠️ 发送警告失败: {}", e);
                }
                self.audit.record(AuditEvent::FloodWarning {
                    room_id,
                    actor_id,
                    kind: reason.as_str().to_string(),
                });
                return Ok(RemediationReport::default());
            }
            FloodAction::TemporaryRestrict => Sanction::restrict(reason, issuer, duration),
            FloodAction::Kick => Sanction::kick(reason, issuer),
            FloodAction::Ban => Sanction::ban(reason, issuer),
        };
        self.apply(room_id, actor_id, &sanction).await
    }

    /// 撤销某用户全部生效中的登记：逐群解除，全部尝试过之后才撤销登记
    pub async fn reverse(&self, subject_id: UserId) -> Result<Vec<ReversalReport>> {
        let records = self
            .punishments
            .find_active_by_subject(subject_id, Utc::now())
            .await?;

        let mut reports = Vec::with_capacity(records.len());
        for record in records {
            reports.push(self.reverse_record(&record).await?);
        }
        Ok(reports)
    }

    async fn reverse_record(&self, record: &PunishmentRecord) -> Result<ReversalReport> {
        let mut rooms = record.propagated_rooms.clone();
        rooms.insert(record.origin_room_id);
        let rooms_attempted = rooms.len();
        let subject_id = record.subject_id;
        let kind = record.kind;

        let results: Vec<(RoomId, Result<()>)> = stream::iter(rooms)
            .map(|room_id| async move { (room_id, self.lift_in_room(room_id, subject_id, kind).await) })
            .buffer_unordered(self.max_parallel)
            .collect()
            .await;

        let mut failed = Vec::new();
        for (room_id, result) in results {
            let Err(e) = result else { continue };
            tracing::warn!(room_id, subject_id, "⚠️ 解除处罚失败: {}", e);
            if e.is_permanent_platform() {
                if let Err(e) = self.punishments.remove_room(record.id, room_id).await {
                    tracing::warn!(punishment_id = record.id, room_id, "⚠️ 清理传播群失败: {}", e);
                }
            }
            failed.push(room_id);
        }
        failed.sort_unstable();

        let deactivated = self.punishments.deactivate(record.id).await?;
        tracing::info!(
            punishment_id = record.id,
            subject_id,
            rooms_attempted,
            failed = failed.len(),
            "♻️ 处罚登记已撤销"
        );
        self.audit.record(AuditEvent::PunishmentReversed {
            punishment_id: record.id,
            subject_id,
            rooms_attempted,
            failed: failed.clone(),
        });
        Ok(ReversalReport {
            punishment_id: record.id,
            rooms_attempted,
            failed,
            deactivated,
        })
    }

    async fn lift_in_room(&self, room_id: RoomId, subject_id: UserId, kind: PunishmentKind) -> Result<()> {
        match kind {
            PunishmentKind::TemporaryRestrict => self.platform.lift_restriction(room_id, subject_id).await,
            PunishmentKind::PermanentBan => self.platform.unban(room_id, subject_id).await,
            // 移出群没有持续状态
            PunishmentKind::Kick => Ok(()),
        }
    }

    /// 管理员手动处罚（调用方已确认管理员身份）
    pub async fn execute_manual(
        &self,
        room_id: RoomId,
        issuer_id: UserId,
        target_id: UserId,
        action: &ManualAction,
        reason: Option<String>,
    ) -> Result<()> {
        match action {
            ManualAction::Mute { duration_secs } => {
                let duration = duration_secs.filter(|s| *s > 0).map(Duration::from_secs);
                let sanction = Sanction::restrict(RestrictReason::Manual, issuer_id, duration);
                self.apply(room_id, target_id, &sanction).await?;
            }
            ManualAction::Unmute => {
                self.platform.lift_restriction(room_id, target_id).await?;
            }
            ManualAction::Kick => {
                let sanction = Sanction::kick(RestrictReason::Manual, issuer_id);
                self.apply(room_id, target_id, &sanction).await?;
            }
            ManualAction::Ban { global } => {
                let sanction = Sanction::ban(RestrictReason::Manual, issuer_id).with_escalation(*global);
                let report = self.apply(room_id, target_id, &sanction).await?;
                if !report.applied_in_origin {
                    return Err(GuardError::PlatformTransient {
                        op: "ban_member".to_string(),
                        reason: format!("群 {} 封禁未成功", room_id),
                    });
                }
            }
            ManualAction::Unban => {
                let reports = self.reverse(target_id).await?;
                let covered = reports.iter().any(|r| r.rooms_attempted > 0 && !r.failed.contains(&room_id));
                if !covered {
                    self.platform.unban(room_id, target_id).await?;
                }
            }
        }

        tracing::info!(room_id, issuer_id, target_id, action = action.as_str(), "👮 管理员操作已执行");
        self.audit.record(AuditEvent::ManualAction {
            room_id,
            issuer_id,
            target_id,
            action: action.as_str().to_string(),
            reason,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{EventBus, RetryPolicy};
    use crate::platform::{DryRunPlatform, PlatformError};
    use crate::repository::{InMemoryDirectory, InMemoryPunishmentRepository};

    const BOT: UserId = 1000;

    struct Fixture {
        executor: RemediationExecutor,
        platform: Arc<DryRunPlatform>,
        repo: Arc<InMemoryPunishmentRepository>,
        directory: Arc<InMemoryDirectory>,
    }

    fn fixture() -> Fixture {
        let platform = Arc::new(DryRunPlatform::new());
        let repo = Arc::new(InMemoryPunishmentRepository::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let retry = RetryPolicy {
            max_retries: 0,
            ..Default::default()
        };
        let executor = RemediationExecutor::new(
            PlatformGateway::new(platform.clone(), retry),
            repo.clone(),
            directory.clone(),
            Arc::new(EventBus::default()),
            BOT,
            2,
        );
        Fixture {
            executor,
            platform,
            repo,
            directory,
        }
    }

    #[tokio::test]
    async fn test_non_escalating_restrict_stays_local() {
        let f = fixture();
        f.directory.grant(-2, BOT);
        let sanction = Sanction::restrict(RestrictReason::RiskGate, BOT, None);
        let report = f.executor.apply(-1, 5, &sanction).await.unwrap();
        assert!(report.applied_in_origin);
        assert_eq!(report.punishment_id, None);
        assert_eq!(f.platform.commands().len(), 1);
        assert!(f.repo.all().is_empty());
    }

    #[tokio::test]
    async fn test_ban_propagates_and_skips_failed_rooms() {
        let f = fixture();
        for room in [-1, -2, -3, -4] {
            f.directory.grant(room, BOT);
        }
        f.platform.fail_chat(-3, PlatformError::permanent("chat not found"));

        let report = f
            .executor
            .apply(-1, 5, &Sanction::ban(RestrictReason::MassJoin, BOT))
            .await
            .unwrap();
        assert!(report.applied_in_origin);
        assert_eq!(report.propagated, vec![-4, -2]);
        assert_eq!(report.failed, vec![-3]);
        assert_eq!(f.platform.commands_named("ban_member").len(), 3);

        let records = f.repo.all();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].propagated_rooms.iter().copied().collect::<Vec<_>>(),
            vec![-4, -2, -1]
        );
    }

    #[tokio::test]
    async fn test_persistence_failure_aborts_before_platform_calls() {
        let f = fixture();
        f.repo.set_fail_writes(true);
        let err = f
            .executor
            .apply(-1, 5, &Sanction::ban(RestrictReason::Manual, 9))
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::Persistence(_)));
        assert!(f.platform.commands().is_empty());
    }

    #[tokio::test]
    async fn test_reverse_walks_all_rooms_then_deactivates() {
        let f = fixture();
        for room in [-1, -2, -3] {
            f.directory.grant(room, 9);
        }
        f.executor
            .apply(-1, 5, &Sanction::ban(RestrictReason::Manual, 9))
            .await
            .unwrap();

        f.platform.fail_chat(-2, PlatformError::transient("timeout"));
        let reports = f.executor.reverse(5).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].rooms_attempted, 3);
        assert_eq!(reports[0].failed, vec![-2]);
        assert!(reports[0].deactivated);
        assert_eq!(f.platform.commands_named("unban_member").len(), 2);
        assert!(f.executor.reverse(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_warn_flood_action_only_sends_message() {
        let f = fixture();
        let report = f
            .executor
            .apply_flood_action(-1, 42, FloodAction::Warn, None, RestrictReason::InviteFlood)
            .await
            .unwrap();
        assert_eq!(report, RemediationReport::default());
        assert_eq!(f.platform.commands_named("send_message").len(), 1);
        assert!(f.platform.commands_named("restrict_member").is_empty());
    }

    #[tokio::test]
    async fn test_manual_global_ban_and_unban() {
        let f = fixture();
        f.directory.grant(-1, 9);
        f.directory.grant(-2, 9);
        f.executor
            .execute_manual(-1, 9, 5, &ManualAction::Ban { global: true }, None)
            .await
            .unwrap();
        assert_eq!(f.platform.commands_named("ban_member").len(), 2);

        f.executor
            .execute_manual(-1, 9, 5, &ManualAction::Unban, Some("appeal".into()))
            .await
            .unwrap();
        assert_eq!(f.platform.commands_named("unban_member").len(), 2);
        assert!(f.repo.all().iter().all(|r| !r.active));
    }
}

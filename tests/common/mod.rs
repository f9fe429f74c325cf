//! 集成测试公共装配：内存缓存、空跑平台、内存仓库

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use privchat_gatekeeper::{
    assemble,
    config::GatekeeperConfig,
    domain::AuditEntry,
    infra::{EventBus, MemoryCache, SharedCache},
    model::{
        room_config::EntryPointSettings, ArrivalChannel, ManualAction, MemberStatus,
        ProfileSignals, RawEvent, RoomId, RoomSettings, UserId,
    },
    platform::{DryRunPlatform, PlatformCommand},
    repository::{InMemoryDirectory, InMemoryPunishmentRepository, InMemoryRoomConfigStore},
    service::{FixedChallengeGenerator, RiskGate},
    Backends, GuardError, ModerationDispatcher, Result,
};
use tokio::sync::broadcast;

pub const BOT: UserId = 999;
pub const ANSWER: &str = "42";

pub struct Harness {
    pub dispatcher: Arc<ModerationDispatcher>,
    pub platform: Arc<DryRunPlatform>,
    pub punishments: Arc<InMemoryPunishmentRepository>,
    pub rooms: Arc<InMemoryRoomConfigStore>,
    pub directory: Arc<InMemoryDirectory>,
    pub audit: broadcast::Receiver<AuditEntry>,
    next_update: AtomicI64,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_cache(Arc::new(MemoryCache::new()))
    }

    pub fn with_cache(cache: Arc<dyn SharedCache>) -> Self {
        let mut config = GatekeeperConfig::default();
        config.service.bot_user_id = BOT;
        config.platform.max_retries = 0;

        let platform = Arc::new(DryRunPlatform::new());
        let punishments = Arc::new(InMemoryPunishmentRepository::new());
        let rooms = Arc::new(InMemoryRoomConfigStore::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let bus = Arc::new(EventBus::new(1024));
        let audit = bus.subscribe();

        let dispatcher = assemble(
            &config,
            Arc::new(RiskGate::with_builtin_model().unwrap()),
            Arc::new(FixedChallengeGenerator::new("6 x 7 = ?", ANSWER)),
            Backends {
                cache,
                platform: platform.clone(),
                punishments: punishments.clone(),
                room_configs: rooms.clone(),
                directory: directory.clone(),
                audit: bus,
            },
        );

        Self {
            dispatcher,
            platform,
            punishments,
            rooms,
            directory,
            audit,
            next_update: AtomicI64::new(1),
        }
    }

    pub fn update_id(&self) -> i64 {
        self.next_update.fetch_add(1, Ordering::Relaxed)
    }

    pub fn ops(&self, op: &str) -> Vec<PlatformCommand> {
        self.platform.commands_named(op)
    }

    /// 到目前为止收到的审计事件名
    pub fn audit_names(&mut self) -> Vec<&'static str> {
        let mut names = Vec::new();
        while let Ok(entry) = self.audit.try_recv() {
            names.push(entry.event.name());
        }
        names
    }

    // ------------------------------------------------------------------
    // 事件构造
    // ------------------------------------------------------------------

    pub fn join(&self, room_id: RoomId, subject: ProfileSignals) -> RawEvent {
        self.arrival(room_id, subject, None, ArrivalChannel::Direct)
    }

    pub fn invite(&self, room_id: RoomId, actor_id: UserId, subject: ProfileSignals) -> RawEvent {
        self.arrival(room_id, subject, Some(actor_id), ArrivalChannel::Invite)
    }

    pub fn arrival(
        &self,
        room_id: RoomId,
        subject: ProfileSignals,
        actor_id: Option<UserId>,
        channel: ArrivalChannel,
    ) -> RawEvent {
        RawEvent::ChatMember {
            update_id: self.update_id(),
            room_id,
            subject,
            actor_id,
            old_status: MemberStatus::Absent,
            new_status: MemberStatus::Member,
            channel,
        }
    }

    pub fn leave(&self, room_id: RoomId, subject_id: UserId) -> RawEvent {
        RawEvent::ChatMember {
            update_id: self.update_id(),
            room_id,
            subject: ProfileSignals::bare(subject_id),
            actor_id: None,
            old_status: MemberStatus::Member,
            new_status: MemberStatus::Absent,
            channel: ArrivalChannel::Direct,
        }
    }

    pub fn join_request(&self, room_id: RoomId, subject: ProfileSignals) -> RawEvent {
        RawEvent::JoinRequest {
            update_id: self.update_id(),
            room_id,
            subject,
        }
    }

    pub fn answer(&self, room_id: RoomId, subject_id: UserId, answer: &str) -> RawEvent {
        self.answer_from(room_id, subject_id, subject_id, answer)
    }

    pub fn answer_from(
        &self,
        room_id: RoomId,
        subject_id: UserId,
        submitter_id: UserId,
        answer: &str,
    ) -> RawEvent {
        RawEvent::ChallengeAnswer {
            update_id: self.update_id(),
            room_id,
            subject_id,
            submitter_id,
            answer: answer.to_string(),
        }
    }

    pub fn moderation(
        &self,
        room_id: RoomId,
        issuer_id: UserId,
        target_id: UserId,
        action: ManualAction,
    ) -> RawEvent {
        RawEvent::ModerationCommand {
            update_id: self.update_id(),
            room_id,
            issuer_id,
            target_id,
            action,
            reason: None,
        }
    }
}

/// 资料完整的老账号，风险分为 0
pub fn regular(subject_id: UserId) -> ProfileSignals {
    ProfileSignals {
        subject_id,
        first_name: Some("Anna".to_string()),
        username: Some(format!("user{}", subject_id)),
        ..Default::default()
    }
}

/// 没有名字也没有用户名：风险分 35，落在二次验证档位
pub fn incomplete(subject_id: UserId) -> ProfileSignals {
    ProfileSignals::bare(subject_id)
}

pub fn automated(subject_id: UserId) -> ProfileSignals {
    ProfileSignals {
        is_bot: true,
        ..regular(subject_id)
    }
}

/// 只开启直接加入验证
pub fn self_join_challenge() -> RoomSettings {
    let mut settings = RoomSettings::default();
    settings.challenge.self_join = EntryPointSettings {
        enabled: Some(true),
        ..Default::default()
    };
    settings
}

/// 只开启申请验证
pub fn join_request_challenge() -> RoomSettings {
    let mut settings = RoomSettings::default();
    settings.challenge.join_request = EntryPointSettings {
        enabled: Some(true),
        ..Default::default()
    };
    settings
}

/// 每个操作都报缓存不可用
pub struct UnavailableCache;

impl UnavailableCache {
    fn down<T>() -> Result<T> {
        Err(GuardError::CacheUnavailable("connection refused".to_string()))
    }
}

#[async_trait]
impl SharedCache for UnavailableCache {
    async fn incr_window(&self, _key: &str, _window: Duration) -> Result<u64> {
        Self::down()
    }
    async fn add_to_window_set(&self, _key: &str, _member: &str, _window: Duration) -> Result<u64> {
        Self::down()
    }
    async fn set_members(&self, _key: &str) -> Result<Vec<String>> {
        Self::down()
    }
    async fn set_nx(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<bool> {
        Self::down()
    }
    async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
        Self::down()
    }
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Self::down()
    }
    async fn take(&self, _key: &str) -> Result<Option<String>> {
        Self::down()
    }
    async fn delete(&self, _key: &str) -> Result<bool> {
        Self::down()
    }
    async fn exists(&self, _key: &str) -> Result<bool> {
        Self::down()
    }
    async fn compare_and_swap(
        &self,
        _key: &str,
        _expected: &str,
        _new: &str,
        _ttl: Option<Duration>,
    ) -> Result<bool> {
        Self::down()
    }
}

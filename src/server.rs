//! 服务装配
//!
//! [`assemble`] 把各组件按依赖顺序接好，生产环境（Redis + PostgreSQL）、
//! 回放（内存存储 + 空跑平台）和集成测试共用同一套装配逻辑。

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::GatekeeperConfig;
use crate::dispatcher::ModerationDispatcher;
use crate::error::Result;
use crate::http::{HttpServerState, OpsHttpServer};
use crate::infra::{metrics, Database, EventBus, HandlerLimiter, RedisClient, SharedCache, TimerRegistry};
use crate::platform::{PlatformApi, PlatformGateway, RedisOutboxPlatform};
use crate::repository::{
    Directory, PgDirectory, PgPunishmentRepository, PgRoomConfigStore, PunishmentRepository,
    RoomConfigResolver, RoomConfigStore,
};
use crate::service::{
    AbuseMonitor, AdmissionEngine, AdmissionEngineParts, ChallengeGenerator, ChallengeOrchestrator,
    JoinRequestTracker, RemediationExecutor, RiskGate, TextChallengeGenerator, UpdateDedupService,
};

/// 外部依赖
pub struct Backends {
    pub cache: Arc<dyn SharedCache>,
    pub platform: Arc<dyn PlatformApi>,
    pub punishments: Arc<dyn PunishmentRepository>,
    pub room_configs: Arc<dyn RoomConfigStore>,
    pub directory: Arc<dyn Directory>,
    pub audit: Arc<EventBus>,
}

/// 按配置装配分发器
pub fn assemble(
    config: &GatekeeperConfig,
    risk: Arc<RiskGate>,
    generator: Arc<dyn ChallengeGenerator>,
    backends: Backends,
) -> Arc<ModerationDispatcher> {
    let service_account = config.service.bot_user_id;
    let platform = PlatformGateway::new(backends.platform, config.platform.clone());

    let configs = Arc::new(RoomConfigResolver::new(
        backends.room_configs,
        config.room_defaults,
        config.dispatcher.room_config_cache_ttl(),
    ));

    let challenges = Arc::new(ChallengeOrchestrator::new(
        backends.cache.clone(),
        platform.clone(),
        TimerRegistry::new(),
        generator,
        backends.audit.clone(),
        config.challenge,
    ));

    let remediation = Arc::new(RemediationExecutor::new(
        platform.clone(),
        backends.punishments.clone(),
        backends.directory.clone(),
        backends.audit.clone(),
        service_account,
        config.remediation.max_parallel,
    ));

    let engine = Arc::new(AdmissionEngine::new(AdmissionEngineParts {
        configs,
        join_requests: JoinRequestTracker::new(
            backends.cache.clone(),
            config.dispatcher.join_request_ttl(),
        ),
        abuse: AbuseMonitor::new(backends.cache.clone()),
        risk,
        challenges,
        remediation,
        punishments: backends.punishments,
        directory: backends.directory,
        platform,
        audit: backends.audit,
        service_account,
    }));

    let dedup = UpdateDedupService::new(backends.cache, config.dispatcher.dedup_ttl());
    let limiter = HandlerLimiter::new(config.dispatcher.max_inflight);
    Arc::new(ModerationDispatcher::new(engine, dedup, limiter))
}

/// 审计消费者：写 `audit` 日志目标，有 Redis 时同时发布到审计频道
pub fn spawn_audit_consumer(
    bus: &EventBus,
    redis: Option<Arc<RedisClient>>,
    channel: String,
) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            let entry = match rx.recv().await {
                Ok(entry) => entry,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "⚠️ 审计消费者落后，部分记录已丢弃");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let payload = match serde_json::to_string(&entry) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("⚠️ 审计记录序列化失败: {}", e);
                    continue;
                }
            };
            info!(target: "audit", event = entry.event.name(), "{}", payload);

            if let Some(redis) = &redis {
                if let Err(e) = redis.publish(&channel, &payload).await {
                    warn!(event = entry.event.name(), "⚠️ 审计记录发布失败: {}", e);
                }
            }
        }
    })
}

/// 生产服务：Redis 订阅入站事件，PostgreSQL 存储，Redis 频道投递平台指令
pub struct GatekeeperServer {
    config: GatekeeperConfig,
    dispatcher: Arc<ModerationDispatcher>,
    redis: Arc<RedisClient>,
    database: Database,
    audit: Arc<EventBus>,
}

impl GatekeeperServer {
    pub async fn new(config: GatekeeperConfig) -> Result<Self> {
        info!("🔧 初始化入群网关组件...");

        info!("🔌 初始化 Redis 连接...");
        let redis = Arc::new(RedisClient::new(&config.redis).await?);

        info!("🔌 初始化数据库连接...");
        let database = Database::connect(&config.database).await?;
        let pool = Arc::new(database.pool().clone());

        info!("🧮 加载风险模型...");
        let risk_path = config.risk.model_file.as_deref().map(std::path::Path::new);
        let risk = Arc::new(RiskGate::load(risk_path)?);

        let audit = Arc::new(EventBus::new(config.dispatcher.audit_bus_capacity));
        let backends = Backends {
            cache: redis.clone(),
            platform: Arc::new(RedisOutboxPlatform::new(
                redis.clone(),
                config.ingest.commands_channel.clone(),
            )),
            punishments: Arc::new(PgPunishmentRepository::new(pool.clone())),
            room_configs: Arc::new(PgRoomConfigStore::new(pool.clone())),
            directory: Arc::new(PgDirectory::new(pool)),
            audit: audit.clone(),
        };

        let generator = Arc::new(TextChallengeGenerator::new());
        let dispatcher = assemble(&config, risk, generator, backends);
        info!("✅ 组件初始化完成");

        Ok(Self {
            config,
            dispatcher,
            redis,
            database,
            audit,
        })
    }

    /// 运行直到事件流结束
    pub async fn run(self) -> Result<()> {
        let audit_task = spawn_audit_consumer(
            &self.audit,
            Some(self.redis.clone()),
            self.config.ingest.audit_channel.clone(),
        );

        if self.config.metrics.enabled {
            let state = HttpServerState {
                started_at: Instant::now(),
                mode: "run",
                limiter: self.dispatcher.limiter().clone(),
                redis: Some(self.redis.clone()),
                database: Some(self.database.clone()),
            };
            let http = OpsHttpServer::new(state, self.config.metrics.port);
            tokio::spawn(async move {
                if let Err(e) = http.start().await {
                    error!("❌ 运维 HTTP 服务退出: {}", e);
                }
            });
        }
        if !metrics::is_initialized() {
            info!("ℹ️ Prometheus 指标未启用");
        }

        let events = self
            .redis
            .subscribe(&self.config.ingest.events_channel)
            .await?;
        info!(
            events = %self.config.ingest.events_channel,
            commands = %self.config.ingest.commands_channel,
            bot_user_id = self.config.service.bot_user_id,
            "🚀 入群网关已启动"
        );

        tokio::select! {
            _ = Arc::clone(&self.dispatcher).run(events) => {
                warn!("⚠️ 事件订阅已断开");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 收到退出信号");
            }
        }

        audit_task.abort();
        Ok(())
    }
}

use anyhow::{Context, Result};
use privchat_gatekeeper::{
    cli::{Cli, Commands},
    config::{self, GatekeeperConfig},
    infra::{metrics, Database, EventBus, MemoryCache},
    logging,
    model::{ProfileSignals, RoomSettings},
    platform::DryRunPlatform,
    repository::{InMemoryDirectory, InMemoryPunishmentRepository, InMemoryRoomConfigStore},
    server::{assemble, spawn_audit_consumer, Backends},
    service::{RiskGate, TextChallengeGenerator},
    DispatchOutcome, GatekeeperServer, ModerationDispatcher,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载 .env 文件（如果存在）
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // 不需要完整日志的子命令
    match &cli.command {
        Some(Commands::GenerateConfig { path }) => return generate_config(path),
        Some(Commands::ValidateConfig { path }) => return validate_config(path),
        Some(Commands::ShowConfig) => return show_config(&cli),
        _ => {}
    }

    // 快速读取 config.toml 的 [logging] 段（不加载完整配置）
    let early_log = config::load_early_logging_config(cli.config_file.as_deref());

    // 合并日志配置（优先级：CLI > config.toml > 默认值）
    let log_level = cli
        .get_log_level()
        .or(early_log.level)
        .unwrap_or_else(|| "info".to_string());
    let log_format = cli.get_log_format().or(early_log.format);
    let log_file = cli.log_file.clone().or(early_log.file);

    let _log_guard = logging::init_logging(
        &log_level,
        log_format.as_deref(),
        log_file.as_deref(),
        cli.quiet,
    )?;

    let config = GatekeeperConfig::load(&cli).context("加载配置失败")?;

    match cli.command.clone() {
        Some(Commands::Migrate) => run_migrate(&config).await,
        Some(Commands::Score { path }) => score_profile(&config, &path),
        Some(Commands::Replay {
            path,
            admins,
            enable_defaults,
        }) => replay(&config, &path, &admins, enable_defaults).await,
        _ => run_server(config, log_format.as_deref(), log_file.as_deref()).await,
    }
}

async fn run_server(config: GatekeeperConfig, log_format: Option<&str>, log_file: Option<&str>) -> Result<()> {
    tracing::info!("🚀 PrivChat Gatekeeper starting...");

    if let Err(e) = config.validate() {
        tracing::error!("❌ 配置无效: {:#}", e);
        process::exit(1);
    }

    tracing::info!("📊 Gatekeeper Configuration:");
    tracing::info!("  - Bot User: {}", config.service.bot_user_id);
    tracing::info!("  - Redis Pool: {}", config.redis.pool_size);
    tracing::info!("  - Events Channel: {}", config.ingest.events_channel);
    tracing::info!("  - Commands Channel: {}", config.ingest.commands_channel);
    tracing::info!("  - Max Inflight: {}", config.dispatcher.max_inflight);
    tracing::info!("  - Max Parallel Propagation: {}", config.remediation.max_parallel);
    tracing::info!(
        "  - Risk Model: {}",
        config.risk.model_file.as_deref().unwrap_or("builtin")
    );
    tracing::info!("  - Log Level: {}", config.logging.level);
    tracing::info!("  - Log Format: {}", log_format.unwrap_or("compact"));
    if let Some(f) = log_file {
        tracing::info!("  - Log File: {}", f);
    }

    if config.metrics.enabled {
        if let Err(e) = metrics::init() {
            tracing::warn!("⚠️ Prometheus 指标初始化失败: {}", e);
        } else {
            tracing::info!("  - Metrics: :{}/metrics", config.metrics.port);
        }
    }

    let server = match GatekeeperServer::new(config).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("❌ 服务初始化失败: {}", e);
            tracing::error!("💡 请检查 Redis、数据库连接和风险模型文件后重试");
            process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        tracing::error!("❌ 服务运行失败: {}", e);
        process::exit(1);
    }
    Ok(())
}

/// 用内存存储和空跑平台回放录制的事件
async fn replay(
    config: &GatekeeperConfig,
    path: &str,
    admins: &[(i64, i64)],
    enable_defaults: bool,
) -> Result<()> {
    let content = fs::read_to_string(path).with_context(|| format!("无法读取事件文件: {}", path))?;
    let mut events = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let raw = ModerationDispatcher::decode(line)
            .with_context(|| format!("第 {} 行无法解析", line_no + 1))?;
        events.push(raw);
    }
    tracing::info!("▶ 回放 {} 个事件: {}", events.len(), path);

    let rooms = InMemoryRoomConfigStore::new();
    if enable_defaults {
        let room_ids: BTreeSet<i64> = events.iter().map(|e| e.room_id()).collect();
        for room_id in room_ids {
            rooms.put(room_id, RoomSettings::default());
        }
    }
    let directory = InMemoryDirectory::new();
    for (room_id, user_id) in admins {
        directory.grant(*room_id, *user_id);
    }

    let platform = Arc::new(DryRunPlatform::new());
    let audit = Arc::new(EventBus::new(config.dispatcher.audit_bus_capacity));
    let audit_task = spawn_audit_consumer(&audit, None, config.ingest.audit_channel.clone());

    let risk_path = config.risk.model_file.as_deref().map(Path::new);
    let risk = Arc::new(RiskGate::load(risk_path)?);
    let dispatcher = assemble(
        config,
        risk,
        Arc::new(TextChallengeGenerator::new()),
        Backends {
            cache: Arc::new(MemoryCache::new()),
            platform: platform.clone(),
            punishments: Arc::new(InMemoryPunishmentRepository::new()),
            room_configs: Arc::new(rooms),
            directory: Arc::new(directory),
            audit,
        },
    );

    let mut summary: BTreeMap<String, usize> = BTreeMap::new();
    for raw in events {
        let update_id = raw.update_id();
        let label = match dispatcher.dispatch(raw).await {
            Ok(DispatchOutcome::Decided(decision)) => format!("{:?}", decision),
            Ok(DispatchOutcome::Duplicate) => "duplicate".to_string(),
            Ok(DispatchOutcome::Skipped(reason)) => format!("skipped:{}", reason),
            Err(e) => {
                tracing::warn!(update_id, "⚠️ 事件处理失败: {}", e);
                format!("error:{}", e.kind())
            }
        };
        *summary.entry(label).or_default() += 1;
    }

    println!("📊 回放结果:");
    for (label, count) in &summary {
        println!("  - {}: {}", label, count);
    }
    println!("📤 平台指令 {} 条:", platform.commands().len());
    for command in platform.commands() {
        println!("  {}", serde_json::to_string(&command)?);
    }

    // 让审计消费者把剩余记录写完
    tokio::task::yield_now().await;
    audit_task.abort();
    Ok(())
}

/// 对一份资料评分
fn score_profile(config: &GatekeeperConfig, path: &str) -> Result<()> {
    let content = fs::read_to_string(path).with_context(|| format!("无法读取资料文件: {}", path))?;
    let profile: ProfileSignals = serde_json::from_str(&content).context("资料文件格式错误")?;

    let risk_path = config.risk.model_file.as_deref().map(Path::new);
    let gate = RiskGate::load(risk_path)?;
    let assessment = gate.assess(&profile, chrono::Utc::now());

    println!("{}", serde_json::to_string_pretty(&assessment)?);
    Ok(())
}

/// 执行数据库迁移
async fn run_migrate(config: &GatekeeperConfig) -> Result<()> {
    println!("🔌 连接数据库...");
    let database = Database::connect(&config.database)
        .await
        .context("数据库连接失败，请检查 database.url / DATABASE_URL")?;

    let applied = database.migrate().await.context("执行迁移失败")?;
    if applied == 0 {
        println!("✅ 数据库已是最新，无需迁移");
    } else {
        println!("✅ 成功执行 {} 个迁移", applied);
    }

    database.pool().close().await;
    Ok(())
}

/// 生成默认配置文件
fn generate_config(path: &str) -> Result<()> {
    let body = GatekeeperConfig::default().to_toml_string()?;
    let content = format!(
        "# PrivChat Gatekeeper 配置文件\n# 此文件由 privchat-gatekeeper generate-config 生成\n# 环境变量 GATEKEEPER_* 与命令行参数的优先级高于本文件\n\n{}",
        body
    );
    fs::write(path, content).with_context(|| format!("无法写入配置文件: {}", path))?;

    println!("✅ 配置文件已生成: {}", path);
    println!("💡 启动前请设置 service.bot_user_id");
    Ok(())
}

/// 验证配置文件
fn validate_config(path: &str) -> Result<()> {
    let config = GatekeeperConfig::from_toml_file(path)
        .with_context(|| format!("配置文件验证失败: {}", path))?;
    config
        .validate()
        .with_context(|| format!("配置文件验证失败: {}", path))?;

    println!("✅ 配置文件有效: {}", path);
    println!("📊 配置摘要:");
    println!("  - Bot User: {}", config.service.bot_user_id);
    println!("  - Redis: {}", config.redis.url);
    println!("  - Events Channel: {}", config.ingest.events_channel);
    println!("  - Max Inflight: {}", config.dispatcher.max_inflight);
    Ok(())
}

/// 显示最终配置（合并后的配置）
fn show_config(cli: &Cli) -> Result<()> {
    let _guard = logging::init_logging("info", None, None, false)?;

    let config = GatekeeperConfig::load(cli).context("加载配置失败")?;

    println!("📊 最终配置（合并后的配置）:");
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

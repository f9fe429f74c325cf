use clap::{Parser, Subcommand};

use crate::model::{RoomId, UserId};

impl Cli {
    /// 解析命令行参数
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

/// PrivChat Gatekeeper - 群组入群验证与反滥用服务
#[derive(Parser, Debug, Default)]
#[command(name = "privchat-gatekeeper")]
#[command(version)]
#[command(about = "群组入群验证、滥用检测与跨群处罚服务", long_about = None)]
pub struct Cli {
    /// 配置文件路径
    #[arg(long, value_name = "FILE", help = "指定配置文件路径")]
    pub config_file: Option<String>,

    /// 机器人用户 ID
    #[arg(long, value_name = "ID", help = "服务自身在平台上的用户 ID")]
    pub bot_user_id: Option<UserId>,

    /// 日志级别
    #[arg(
        long,
        value_name = "LEVEL",
        help = "日志级别: trace, debug, info, warn, error"
    )]
    pub log_level: Option<String>,

    /// 日志格式
    #[arg(long, value_name = "FORMAT", help = "日志格式: pretty, json, compact")]
    pub log_format: Option<String>,

    /// 日志文件路径
    #[arg(long, value_name = "PATH", help = "日志输出文件路径（按天滚动）")]
    pub log_file: Option<String>,

    /// 数据库连接 URL
    #[arg(long, value_name = "URL", help = "数据库连接字符串")]
    pub database_url: Option<String>,

    /// Redis 连接 URL
    #[arg(long, value_name = "URL", help = "Redis 连接字符串")]
    pub redis_url: Option<String>,

    /// 并发处理上限
    #[arg(long, value_name = "NUM", help = "同时处理的事件数上限")]
    pub max_inflight: Option<usize>,

    /// 风险模型文件
    #[arg(long, value_name = "FILE", help = "风险模型 JSON 文件")]
    pub risk_model: Option<String>,

    /// 启用监控指标
    #[arg(long, help = "启用 Prometheus 监控指标")]
    pub enable_metrics: bool,

    /// 监控端口
    #[arg(long, value_name = "PORT", help = "监控指标服务端口")]
    pub metrics_port: Option<u16>,

    /// 详细输出（可重复使用：-v, -vv, -vvv）
    #[arg(short, action = clap::ArgAction::Count, help = "详细输出级别")]
    pub verbose: u8,

    /// 静默模式
    #[arg(long, short = 'q', help = "静默模式（只输出错误）")]
    pub quiet: bool,

    /// 开发模式（等同于 --log-level debug --log-format pretty）
    #[arg(long, help = "启用开发模式")]
    pub dev: bool,

    /// 子命令
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// 订阅事件频道并处理（默认）
    Run,
    /// 用内存存储和空跑平台回放录制的事件（NDJSON，每行一个 RawEvent）
    Replay {
        /// 事件文件
        #[arg(value_name = "PATH")]
        path: String,
        /// 群管理员，格式 ROOM:USER，可重复
        #[arg(long = "admin", value_name = "ROOM:USER", value_parser = parse_admin, allow_hyphen_values = true)]
        admins: Vec<(RoomId, UserId)>,
        /// 对所有群启用服务级默认策略（否则没有设置记录的群功能全关）
        #[arg(long)]
        enable_defaults: bool,
    },
    /// 对一份用户资料评分并输出
    Score {
        /// 资料文件（ProfileSignals JSON）
        #[arg(value_name = "PATH")]
        path: String,
    },
    /// 执行数据库迁移
    Migrate,
    /// 生成默认配置文件
    GenerateConfig {
        /// 输出文件路径
        #[arg(value_name = "PATH", default_value = "config.toml")]
        path: String,
    },
    /// 验证配置文件
    ValidateConfig {
        /// 配置文件路径
        #[arg(value_name = "PATH", default_value = "config.toml")]
        path: String,
    },
    /// 显示最终配置（合并后的配置）
    ShowConfig,
}

fn parse_admin(raw: &str) -> Result<(RoomId, UserId), String> {
    let (room, user) = raw
        .split_once(':')
        .ok_or_else(|| format!("格式应为 ROOM:USER，收到 {}", raw))?;
    let room_id = room.trim().parse().map_err(|e| format!("群 ID 无效: {}", e))?;
    let user_id = user.trim().parse().map_err(|e| format!("用户 ID 无效: {}", e))?;
    Ok((room_id, user_id))
}

impl Cli {
    /// 获取日志级别（考虑 verbose 和 quiet）
    pub fn get_log_level(&self) -> Option<String> {
        if self.quiet {
            return Some("error".to_string());
        }

        if self.dev {
            return Some("debug".to_string());
        }

        if let Some(level) = &self.log_level {
            return Some(level.clone());
        }

        match self.verbose {
            0 => None,
            1 => Some("info".to_string()),
            2 => Some("debug".to_string()),
            _ => Some("trace".to_string()),
        }
    }

    /// 获取日志格式
    pub fn get_log_format(&self) -> Option<String> {
        if self.dev {
            return Some("pretty".to_string());
        }
        self.log_format.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_accepts_admin_pairs() {
        let cli = <Cli as Parser>::try_parse_from([
            "privchat-gatekeeper",
            "replay",
            "events.ndjson",
            "--admin",
            "-100:7",
            "--admin",
            "-200:8",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Replay { path, admins, enable_defaults }) => {
                assert_eq!(path, "events.ndjson");
                assert_eq!(admins, vec![(-100, 7), (-200, 8)]);
                assert!(!enable_defaults);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_log_level_precedence() {
        let cli = Cli {
            verbose: 2,
            ..Default::default()
        };
        assert_eq!(cli.get_log_level().as_deref(), Some("debug"));

        let cli = Cli {
            quiet: true,
            dev: true,
            ..Default::default()
        };
        assert_eq!(cli.get_log_level().as_deref(), Some("error"));
        assert_eq!(cli.get_log_format().as_deref(), Some("pretty"));
    }
}

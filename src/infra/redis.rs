// RedisClient - 共享缓存的 Redis 实现
// 基于 bb8-redis 连接池，复合操作用 Lua 脚本保证原子性

use async_trait::async_trait;
use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use futures::stream::BoxStream;
use futures::StreamExt;
use redis::{AsyncCommands, Script};
use std::sync::Arc;
use std::time::Duration;

use crate::config::RedisConfig;
use crate::error::{GuardError, Result};
use crate::infra::cache::{ttl_secs, SharedCache};

/// INCR；首次创建时设置过期
const INCR_WINDOW_LUA: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// SADD；集合没有过期时间（即刚创建）时设置过期，返回 SCARD
const ADD_WINDOW_SET_LUA: &str = r#"
redis.call('SADD', KEYS[1], ARGV[1])
if redis.call('TTL', KEYS[1]) < 0 then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return redis.call('SCARD', KEYS[1])
"#;

/// 值相等时替换；ARGV[3] 为 0 保留 TTL，否则按秒重置
const COMPARE_AND_SWAP_LUA: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    if tonumber(ARGV[3]) > 0 then
        redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
    else
        redis.call('SET', KEYS[1], ARGV[2], 'KEEPTTL')
    end
    return 1
end
return 0
"#;

/// Redis 客户端（基于连接池）
pub struct RedisClient {
    pool: Arc<Pool<RedisConnectionManager>>,
    /// 订阅需要独立连接，保留 URL
    url: String,
    /// 单条 Redis 命令的执行超时
    command_timeout: Duration,
    incr_window: Script,
    add_window_set: Script,
    compare_and_swap: Script,
}

impl RedisClient {
    /// 创建新的 Redis 客户端（从 RedisConfig 配置）
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let manager = RedisConnectionManager::new(config.url.clone()).map_err(|e| {
            GuardError::CacheUnavailable(format!("创建 Redis 连接管理器失败: {}", e))
        })?;

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .min_idle(Some(config.min_idle))
            .connection_timeout(config.connection_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .build(manager)
            .await
            .map_err(|e| GuardError::CacheUnavailable(format!("创建 Redis 连接池失败: {}", e)))?;

        // 测试连接
        {
            let mut conn = pool.get().await.map_err(|e| {
                GuardError::CacheUnavailable(format!("获取 Redis 连接失败: {}", e))
            })?;
            let _: String = conn.ping().await?;
        }

        tracing::info!(
            "✅ Redis 连接池已创建 (pool_size={}, min_idle={}, conn_timeout={}s, cmd_timeout={}ms, idle_timeout={}s)",
            config.pool_size,
            config.min_idle,
            config.connection_timeout_secs,
            config.command_timeout_ms,
            config.idle_timeout_secs,
        );

        Ok(Self {
            pool: Arc::new(pool),
            url: config.url.clone(),
            command_timeout: config.command_timeout(),
            incr_window: Script::new(INCR_WINDOW_LUA),
            add_window_set: Script::new(ADD_WINDOW_SET_LUA),
            compare_and_swap: Script::new(COMPARE_AND_SWAP_LUA),
        })
    }

    /// 获取连接池状态（活跃连接数、空闲连接数）
    pub fn pool_state(&self) -> bb8::State {
        self.pool.state()
    }

    /// 连接 URL（事件订阅使用）
    pub fn url(&self) -> &str {
        &self.url
    }

    /// 从连接池获取连接
    async fn get_conn(&self) -> Result<bb8::PooledConnection<'_, RedisConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| GuardError::CacheUnavailable(format!("获取 Redis 连接失败: {}", e)))
    }

    /// 执行带超时的 Redis 操作
    async fn with_timeout<F, T>(&self, op: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.command_timeout, op)
            .await
            .map_err(|_| {
                GuardError::CacheUnavailable(format!(
                    "Redis 命令超时 ({}ms)",
                    self.command_timeout.as_millis()
                ))
            })?
    }

    /// SUBSCRIBE channel，返回消息负载流
    ///
    /// 订阅占用独立连接，不走连接池；无法解码为字符串的消息直接丢弃。
    pub async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>> {
        let client = redis::Client::open(self.url.as_str())?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        tracing::info!(channel, "📡 已订阅 Redis 频道");

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        tracing::warn!("⚠️ 频道消息解码失败: {}", e);
                        None
                    }
                }
            })
            .boxed();
        Ok(stream)
    }

    /// PUBLISH channel message
    pub async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        self.with_timeout(async {
            let mut conn = self.get_conn().await?;
            conn.publish::<_, _, ()>(channel, message).await?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl SharedCache for RedisClient {
    async fn incr_window(&self, key: &str, window: Duration) -> Result<u64> {
        self.with_timeout(async {
            let mut conn = self.get_conn().await?;
            let count: u64 = self
                .incr_window
                .key(key)
                .arg(ttl_secs(window))
                .invoke_async(&mut *conn)
                .await?;
            Ok(count)
        })
        .await
    }

    async fn add_to_window_set(&self, key: &str, member: &str, window: Duration) -> Result<u64> {
        self.with_timeout(async {
            let mut conn = self.get_conn().await?;
            let size: u64 = self
                .add_window_set
                .key(key)
                .arg(member)
                .arg(ttl_secs(window))
                .invoke_async(&mut *conn)
                .await?;
            Ok(size)
        })
        .await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        self.with_timeout(async {
            let mut conn = self.get_conn().await?;
            let members: Vec<String> = conn.smembers(key).await?;
            Ok(members)
        })
        .await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.with_timeout(async {
            let mut conn = self.get_conn().await?;
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("EX")
                .arg(ttl_secs(ttl))
                .query_async(&mut *conn)
                .await?;
            Ok(reply.is_some())
        })
        .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.with_timeout(async {
            let mut conn = self.get_conn().await?;
            conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl)).await?;
            Ok(())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_timeout(async {
            let mut conn = self.get_conn().await?;
            let value: Option<String> = conn.get(key).await?;
            Ok(value)
        })
        .await
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        self.with_timeout(async {
            let mut conn = self.get_conn().await?;
            let value: Option<String> = redis::cmd("GETDEL").arg(key).query_async(&mut *conn).await?;
            Ok(value)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.with_timeout(async {
            let mut conn = self.get_conn().await?;
            let removed: u64 = conn.del(key).await?;
            Ok(removed > 0)
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.with_timeout(async {
            let mut conn = self.get_conn().await?;
            let exists: bool = conn.exists(key).await?;
            Ok(exists)
        })
        .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        self.with_timeout(async {
            let mut conn = self.get_conn().await?;
            let swapped: i64 = self
                .compare_and_swap
                .key(key)
                .arg(expected)
                .arg(new)
                .arg(ttl.map(ttl_secs).unwrap_or(0))
                .invoke_async(&mut *conn)
                .await?;
            Ok(swapped == 1)
        })
        .await
    }
}

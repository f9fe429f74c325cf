//! 共享 TTL 缓存抽象
//!
//! 验证会话、滥用计数器、去重标记都只存在这里，没有数据库影子。
//! 所有计数和存在性检查必须在缓存层原子完成，同一群的并发事件才不会丢更新。
//!
//! 实现：
//! - [`RedisClient`](crate::infra::redis::RedisClient)：生产环境，Lua 脚本保证原子性
//! - [`MemoryCache`](crate::infra::memory_cache::MemoryCache)：单进程（回放、测试）

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// 共享 TTL 缓存
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// 原子自增；键是本次新建的则设置过期时间为 `window`，返回自增后的值
    async fn incr_window(&self, key: &str, window: Duration) -> Result<u64>;

    /// 把 `member` 加入集合；集合是新建的则设置过期时间，返回集合基数
    async fn add_to_window_set(&self, key: &str, member: &str, window: Duration) -> Result<u64>;

    /// 集合全部成员
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    /// SET NX EX，写入成功返回 true
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// SET EX（覆盖）
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// 原子读取并删除
    async fn take(&self, key: &str) -> Result<Option<String>>;

    /// 删除，键存在返回 true
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// 当前值等于 `expected` 时替换为 `new`，成功返回 true
    ///
    /// `ttl` 为 None 时保留原 TTL，否则在同一原子操作里重置过期时间。
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl: Option<Duration>,
    ) -> Result<bool>;
}

/// 秒级 TTL，至少 1 秒
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

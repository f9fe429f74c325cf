//! 进程内共享缓存
//!
//! 语义与 Redis 实现一致（过期、NX、原子自增），用于回放模式和测试。
//! 过期判断使用 `tokio::time::Instant`，测试中可以用暂停时钟推进窗口。

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{GuardError, Result};
use crate::infra::cache::{ttl_secs, SharedCache};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// 内存版共享缓存
#[derive(Default)]
pub struct MemoryCache {
    slots: DashMap<String, Slot>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前未过期的键数量
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots.iter().filter(|s| !s.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_expired(&self, key: &str, now: Instant) {
        self.slots.remove_if(key, |_, slot| slot.is_expired(now));
    }

    fn deadline(now: Instant, ttl: Duration) -> Option<Instant> {
        Some(now + Duration::from_secs(ttl_secs(ttl)))
    }

    fn wrong_type(key: &str) -> GuardError {
        GuardError::Internal(format!("键 {} 的类型不匹配", key))
    }
}

#[async_trait]
impl SharedCache for MemoryCache {
    async fn incr_window(&self, key: &str, window: Duration) -> Result<u64> {
        let now = Instant::now();
        self.purge_expired(key, now);
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                let Value::Text(text) = &mut slot.value else {
                    return Err(Self::wrong_type(key));
                };
                let count = text.parse::<u64>().map_err(|_| Self::wrong_type(key))? + 1;
                *text = count.to_string();
                Ok(count)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    value: Value::Text("1".to_string()),
                    expires_at: Self::deadline(now, window),
                });
                Ok(1)
            }
        }
    }

    async fn add_to_window_set(&self, key: &str, member: &str, window: Duration) -> Result<u64> {
        let now = Instant::now();
        self.purge_expired(key, now);
        let mut slot = self.slots.entry(key.to_string()).or_insert_with(|| Slot {
            value: Value::Set(HashSet::new()),
            expires_at: Self::deadline(now, window),
        });
        let Value::Set(members) = &mut slot.value else {
            return Err(Self::wrong_type(key));
        };
        members.insert(member.to_string());
        Ok(members.len() as u64)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        self.purge_expired(key, Instant::now());
        match self.slots.get(key) {
            Some(slot) => match &slot.value {
                Value::Set(members) => Ok(members.iter().cloned().collect()),
                Value::Text(_) => Err(Self::wrong_type(key)),
            },
            None => Ok(Vec::new()),
        }
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        self.purge_expired(key, now);
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    value: Value::Text(value.to_string()),
                    expires_at: Self::deadline(now, ttl),
                });
                Ok(true)
            }
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        self.slots.insert(
            key.to_string(),
            Slot {
                value: Value::Text(value.to_string()),
                expires_at: Self::deadline(now, ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.purge_expired(key, Instant::now());
        match self.slots.get(key) {
            Some(slot) => match &slot.value {
                Value::Text(text) => Ok(Some(text.clone())),
                Value::Set(_) => Err(Self::wrong_type(key)),
            },
            None => Ok(None),
        }
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        self.purge_expired(key, Instant::now());
        match self.slots.remove(key) {
            Some((_, slot)) => match slot.value {
                Value::Text(text) => Ok(Some(text)),
                Value::Set(_) => Err(Self::wrong_type(key)),
            },
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .slots
            .remove(key)
            .is_some_and(|(_, slot)| !slot.is_expired(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.purge_expired(key, Instant::now());
        Ok(self.slots.contains_key(key))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let now = Instant::now();
        self.purge_expired(key, now);
        let Some(mut slot) = self.slots.get_mut(key) else {
            return Ok(false);
        };
        let slot = &mut *slot;
        match &mut slot.value {
            Value::Text(current) if current.as_str() == expected => {
                *current = new.to_string();
                if let Some(ttl) = ttl {
                    slot.expires_at = Self::deadline(now, ttl);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

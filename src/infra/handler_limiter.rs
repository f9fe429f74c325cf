//! 事件处理并发限流器
//!
//! 每个入站事件是一个独立任务，这里限制同时运行的任务数。
//! 订阅循环先 `try_acquire`，满了记一次拒绝再用 `acquire` 等待，形成背压。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// 事件处理并发限流器
#[derive(Clone)]
pub struct HandlerLimiter {
    sem: Arc<Semaphore>,
    max_inflight: usize,
    /// try_acquire 失败计数
    rejected_count: Arc<AtomicU64>,
}

impl HandlerLimiter {
    pub fn new(max_inflight: usize) -> Self {
        let max_inflight = max_inflight.max(1);
        Self {
            sem: Arc::new(Semaphore::new(max_inflight)),
            max_inflight,
            rejected_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 等待直到拿到 permit
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.sem.clone().acquire_owned().await.ok()
    }

    /// 非阻塞获取；失败时自增 rejected 计数
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        match self.sem.clone().try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                self.rejected_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// 当前正在执行的任务数
    pub fn inflight(&self) -> usize {
        self.max_inflight - self.sem.available_permits()
    }

    /// 累计被拒绝的次数
    pub fn rejected_total(&self) -> u64 {
        self.rejected_count.load(Ordering::Relaxed)
    }

    pub fn max_inflight(&self) -> usize {
        self.max_inflight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_try_acquire_rejects_when_full() {
        let limiter = HandlerLimiter::new(1);
        let permit = limiter.try_acquire();
        assert!(permit.is_some());
        assert_eq!(limiter.inflight(), 1);
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.rejected_total(), 1);

        drop(permit);
        assert_eq!(limiter.inflight(), 0);
        assert!(limiter.acquire().await.is_some());
    }
}

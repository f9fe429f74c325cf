//! 可取消的延时任务
//!
//! 验证超时、提醒、延迟删除消息都通过这里调度。每个任务归属一个分组
//! （通常是 `{room}:{subject}`），可以单独取消，也可以整组取消。
//!
//! 任务到点后先把自己从注册表摘除再执行回调，回调执行期间不会被整组取消打断。
//! 回调本身必须重新读取当前状态再决定是否动作。

use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;

#[derive(Default)]
struct Inner {
    groups: DashMap<String, HashMap<u64, AbortHandle>>,
    next_id: AtomicU64,
}

impl Inner {
    /// 摘除一个任务，返回它是否仍在注册表中
    fn deregister(&self, group: &str, id: u64) -> Option<AbortHandle> {
        let handle = self
            .groups
            .get_mut(group)
            .and_then(|mut timers| timers.remove(&id));
        self.groups.remove_if(group, |_, timers| timers.is_empty());
        handle
    }
}

/// 延时任务注册表
#[derive(Clone, Default)]
pub struct TimerRegistry {
    inner: Arc<Inner>,
}

/// 单个延时任务的句柄
#[derive(Clone)]
pub struct TimerHandle {
    group: String,
    id: u64,
    inner: Arc<Inner>,
}

impl TimerHandle {
    /// 取消尚未触发的任务；已触发或已取消返回 false
    pub fn cancel(&self) -> bool {
        match self.inner.deregister(&self.group, self.id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在 `delay` 之后执行 `task`
    pub fn schedule<F>(&self, group: impl Into<String>, delay: Duration, task: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let group = group.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        // 持有分组条目期间 spawn，保证注册先于摘除
        let mut timers = self.inner.groups.entry(group.clone()).or_default();
        let inner = self.inner.clone();
        let task_group = group.clone();
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if inner.deregister(&task_group, id).is_none() {
                return;
            }
            task.await;
        });
        timers.insert(id, join.abort_handle());
        drop(timers);

        TimerHandle {
            group,
            id,
            inner: self.inner.clone(),
        }
    }

    /// 取消分组内所有未触发的任务，返回取消数量
    pub fn cancel_group(&self, group: &str) -> usize {
        match self.inner.groups.remove(group) {
            Some((_, timers)) => {
                let count = timers.len();
                for handle in timers.into_values() {
                    handle.abort();
                }
                if count > 0 {
                    tracing::debug!(group, count, "⏹️ 已取消延时任务");
                }
                count
            }
            None => 0,
        }
    }

    /// 分组内尚未触发的任务数
    pub fn pending(&self, group: &str) -> usize {
        self.inner.groups.get(group).map_or(0, |timers| timers.len())
    }
}

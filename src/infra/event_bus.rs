use chrono::Utc;
use tokio::sync::broadcast;

use crate::domain::events::{AuditEntry, AuditEvent};

/// Audit Sink：核心组件只往这里写结构化事件，格式化和投递由订阅方负责
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// In-process Event Bus（进程内事件总线）
///
/// 基于 tokio::sync::broadcast；没有订阅者时事件直接丢弃，不影响业务路径
pub struct EventBus {
    sender: broadcast::Sender<AuditEntry>,
}

impl EventBus {
    /// 创建新的事件总线
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 发布事件，返回收到的订阅者数量
    pub fn publish(&self, event: AuditEvent) -> usize {
        let entry = AuditEntry {
            at: Utc::now(),
            event,
        };
        self.sender.send(entry).unwrap_or(0)
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEntry> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl AuditSink for EventBus {
    fn record(&self, event: AuditEvent) {
        tracing::debug!(event = event.name(), "📝 审计事件");
        self.publish(event);
    }
}

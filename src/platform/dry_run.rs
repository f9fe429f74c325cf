use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::info;

use crate::model::MessageId;
use crate::platform::api::{PlatformApi, PlatformCommand, PlatformError, PlatformResult};

/// Dry-run 平台（回放与测试）
///
/// 不调用真实平台，只打印日志并记录收到的指令。
/// 可以为指定群预设错误，用于模拟部分失败。
#[derive(Default)]
pub struct DryRunPlatform {
    journal: Mutex<Vec<PlatformCommand>>,
    failures: DashMap<i64, PlatformError>,
    next_message_id: AtomicI64,
}

impl DryRunPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后发往 `chat_id` 的指令都返回 `error`
    pub fn fail_chat(&self, chat_id: i64, error: PlatformError) {
        self.failures.insert(chat_id, error);
    }

    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    /// 已执行成功的指令
    pub fn commands(&self) -> Vec<PlatformCommand> {
        self.journal.lock().clone()
    }

    /// 按操作名过滤
    pub fn commands_named(&self, op: &str) -> Vec<PlatformCommand> {
        self.journal
            .lock()
            .iter()
            .filter(|c| c.op_name() == op)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.journal.lock().clear();
    }
}

#[async_trait]
impl PlatformApi for DryRunPlatform {
    async fn execute(&self, command: &PlatformCommand) -> PlatformResult<Option<MessageId>> {
        if let Some(err) = self.failures.get(&command.chat_id()) {
            return Err(err.value().clone());
        }

        info!(
            "[DRY RUN] {} -> {}",
            command.op_name(),
            serde_json::to_string(command).unwrap_or_default()
        );
        self.journal.lock().push(command.clone());

        match command {
            PlatformCommand::SendMessage { .. } => {
                Ok(Some(self.next_message_id.fetch_add(1, Ordering::Relaxed) + 1))
            }
            _ => Ok(None),
        }
    }
}

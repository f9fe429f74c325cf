//! 事件分发器
//!
//! 原始 JSON → [`RawEvent`] → [`InboundEvent`]，依次经过守卫、去重，
//! 交给 [`AdmissionEngine`]。每个事件一个独立任务，并发数由 [`HandlerLimiter`] 限制。

pub mod guards;

use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{GuardError, Result};
use crate::infra::{metrics, HandlerLimiter};
use crate::model::{AdmissionDecision, InboundEvent, RawEvent, UpdateId};
use crate::service::{AdmissionEngine, Claim, UpdateDedupService};

pub use guards::{default_guards, EventGuard, Verdict};

/// 单个事件的分发结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Decided(AdmissionDecision),
    /// 同一 update_id 已处理过
    Duplicate,
    Skipped(&'static str),
}

/// 事件分发器
pub struct ModerationDispatcher {
    engine: Arc<AdmissionEngine>,
    dedup: UpdateDedupService,
    guards: Vec<Box<dyn EventGuard>>,
    limiter: HandlerLimiter,
}

impl ModerationDispatcher {
    pub fn new(engine: Arc<AdmissionEngine>, dedup: UpdateDedupService, limiter: HandlerLimiter) -> Self {
        let guards = default_guards(engine.service_account());
        Self {
            engine,
            dedup,
            guards,
            limiter,
        }
    }

    /// 替换守卫链
    pub fn with_guards(mut self, guards: Vec<Box<dyn EventGuard>>) -> Self {
        self.guards = guards;
        self
    }

    pub fn engine(&self) -> &Arc<AdmissionEngine> {
        &self.engine
    }

    pub fn limiter(&self) -> &HandlerLimiter {
        &self.limiter
    }

    /// 解码平台适配器投递的 JSON
    pub fn decode(payload: &str) -> Result<RawEvent> {
        serde_json::from_str(payload).map_err(|e| GuardError::Validation(format!("无法解析事件: {}", e)))
    }

    /// 处理一条 JSON 事件
    pub async fn dispatch_json(&self, payload: &str) -> Result<DispatchOutcome> {
        let raw = Self::decode(payload)?;
        self.dispatch(raw).await
    }

    /// 处理一个事件（在当前任务内完成）
    pub async fn dispatch(&self, raw: RawEvent) -> Result<DispatchOutcome> {
        let started = Instant::now();
        let kind = raw.kind();
        let update_id = raw.update_id();
        let room_id = raw.room_id();
        let event = InboundEvent::from(raw);

        let outcome = self.dispatch_inner(update_id, event).await;
        metrics::record_event(kind, started.elapsed().as_secs_f64());

        match &outcome {
            Ok(DispatchOutcome::Decided(decision)) => {
                debug!(update_id, room_id, kind, decision = decision.as_str(), "✅ 事件处理完成");
            }
            Ok(_) => {}
            Err(e) => {
                error!(update_id, room_id, kind, error_kind = e.kind(), "❌ 事件处理失败: {}", e);
            }
        }
        outcome
    }

    async fn dispatch_inner(&self, update_id: UpdateId, event: InboundEvent) -> Result<DispatchOutcome> {
        if let Verdict::Skip(reason) = guards::evaluate(&self.guards, &event) {
            return Ok(DispatchOutcome::Skipped(reason));
        }

        let claim = self.dedup.claim(update_id).await;
        if claim == Claim::Duplicate {
            return Ok(DispatchOutcome::Duplicate);
        }

        match self.engine.handle(event).await {
            Ok(decision) => Ok(DispatchOutcome::Decided(decision)),
            Err(e) => {
                // 释放占位，平台重投时可以再处理
                if claim == Claim::Fresh {
                    self.dedup.release(update_id).await;
                }
                Err(e)
            }
        }
    }

    /// 订阅循环：每条消息一个任务，permit 用完时在这里等待形成背压
    pub async fn run(self: Arc<Self>, mut payloads: BoxStream<'static, String>) {
        info!(max_inflight = self.limiter.max_inflight(), "📥 事件分发器已启动");
        while let Some(payload) = payloads.next().await {
            let raw = match Self::decode(&payload) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("⚠️ 丢弃无法解析的事件: {}", e);
                    continue;
                }
            };

            let permit = match self.limiter.try_acquire() {
                Some(permit) => permit,
                None => {
                    metrics::record_handler_rejected(self.limiter.rejected_total());
                    debug!(inflight = self.limiter.inflight(), "处理任务已满，等待空位");
                    let Some(permit) = self.limiter.acquire().await else {
                        warn!("⚠️ 限流器已关闭，停止分发");
                        break;
                    };
                    permit
                }
            };
            metrics::record_handler_inflight(self.limiter.inflight());

            let dispatcher = Arc::clone(&self);
            tokio::spawn(async move {
                // 错误已在 dispatch 内记录
                let _ = dispatcher.dispatch(raw).await;
                drop(permit);
                metrics::record_handler_inflight(dispatcher.limiter.inflight());
            });
        }
        info!("📭 事件流结束，分发器退出");
    }
}

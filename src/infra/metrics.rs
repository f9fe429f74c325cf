//! Prometheus 指标：事件量、裁决、验证结果、滥用触发、降级与平台调用
//!
//! 通过 `init()` 安装全局 Recorder，通过 HTTP GET `/metrics` 暴露抓取端点。
//! 未初始化时所有 `record_*` 调用都是空操作。

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::OnceLock;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// 指标名称
const COUNTER_EVENTS_TOTAL: &str = "gatekeeper_events_total";
const COUNTER_DUPLICATE_EVENTS: &str = "gatekeeper_duplicate_events_total";
const HISTOGRAM_EVENT_DURATION: &str = "gatekeeper_event_duration_seconds";
const COUNTER_DECISIONS_TOTAL: &str = "gatekeeper_decisions_total";
const COUNTER_CHALLENGES_TOTAL: &str = "gatekeeper_challenges_total";
const COUNTER_ABUSE_TRIGGERS: &str = "gatekeeper_abuse_triggers_total";
const COUNTER_DEGRADED_TOTAL: &str = "gatekeeper_degraded_total";
const COUNTER_PLATFORM_CALLS: &str = "gatekeeper_platform_calls_total";
const COUNTER_PROPAGATION_ROOMS: &str = "gatekeeper_propagation_rooms_total";
const GAUGE_HANDLER_INFLIGHT: &str = "gatekeeper_handler_inflight";
const COUNTER_HANDLER_REJECTED: &str = "gatekeeper_handler_rejected_total";
const GAUGE_REDIS_POOL_ACTIVE: &str = "gatekeeper_redis_pool_active";
const GAUGE_REDIS_POOL_IDLE: &str = "gatekeeper_redis_pool_idle";
const GAUGE_DB_POOL_ACTIVE: &str = "gatekeeper_db_pool_active";
const GAUGE_DB_POOL_IDLE: &str = "gatekeeper_db_pool_idle";

/// 初始化 Prometheus 指标（安装全局 Recorder）。
/// 仅需在进程内调用一次；重复调用会返回 Err。
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
    HANDLE
        .set(handle)
        .map_err(|_| "metrics already initialized")?;
    Ok(())
}

/// 是否已初始化
pub fn is_initialized() -> bool {
    HANDLE.get().is_some()
}

/// 渲染当前指标为 Prometheus 文本格式，供 GET /metrics 使用。
pub fn render_metrics() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

/// 收到一个入站事件
pub fn record_event(kind: &'static str, duration_secs: f64) {
    metrics::counter!(COUNTER_EVENTS_TOTAL, "kind" => kind).increment(1);
    metrics::histogram!(HISTOGRAM_EVENT_DURATION, "kind" => kind).record(duration_secs);
}

/// 重复投递的事件被丢弃
pub fn record_duplicate_event() {
    metrics::counter!(COUNTER_DUPLICATE_EVENTS).increment(1);
}

/// 裁决结果
pub fn record_decision(decision: &'static str) {
    metrics::counter!(COUNTER_DECISIONS_TOTAL, "decision" => decision).increment(1);
}

/// 验证会话结果（issued / solved / reissued / failed / expired）
pub fn record_challenge(outcome: &'static str) {
    metrics::counter!(COUNTER_CHALLENGES_TOTAL, "outcome" => outcome).increment(1);
}

/// 滥用计数器首次触发
pub fn record_abuse_trigger(kind: &'static str) {
    metrics::counter!(COUNTER_ABUSE_TRIGGERS, "kind" => kind).increment(1);
}

/// 降级运行
pub fn record_degraded(component: &'static str) {
    metrics::counter!(COUNTER_DEGRADED_TOTAL, "component" => component).increment(1);
}

/// 平台调用结果（ok / transient / permanent）
pub fn record_platform_call(op: &'static str, outcome: &'static str) {
    metrics::counter!(COUNTER_PLATFORM_CALLS, "op" => op, "outcome" => outcome).increment(1);
}

/// 跨群传播结果
pub fn record_propagation(succeeded: usize, failed: usize) {
    metrics::counter!(COUNTER_PROPAGATION_ROOMS, "outcome" => "ok").increment(succeeded as u64);
    metrics::counter!(COUNTER_PROPAGATION_ROOMS, "outcome" => "failed").increment(failed as u64);
}

/// 更新当前 handler 并发数（Gauge）。
pub fn record_handler_inflight(count: usize) {
    metrics::gauge!(GAUGE_HANDLER_INFLIGHT).set(count as f64);
}

/// 记录 handler 被限流拒绝次数（Counter）。
pub fn record_handler_rejected(count: u64) {
    metrics::counter!(COUNTER_HANDLER_REJECTED).absolute(count);
}

/// 更新 Redis 连接池状态（Gauge）。
pub fn record_redis_pool(active: u32, idle: u32) {
    metrics::gauge!(GAUGE_REDIS_POOL_ACTIVE).set(active as f64);
    metrics::gauge!(GAUGE_REDIS_POOL_IDLE).set(idle as f64);
}

/// 更新数据库连接池状态（Gauge）。
pub fn record_db_pool(active: u32, idle: u32) {
    metrics::gauge!(GAUGE_DB_POOL_ACTIVE).set(active as f64);
    metrics::gauge!(GAUGE_DB_POOL_IDLE).set(idle as f64);
}

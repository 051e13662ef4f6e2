//! 追踪初始化、运行 ID 与监控计数指标。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 基础指标快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub failed_ticks: u64,
    pub reads_ok: u64,
    pub reads_failed: u64,
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub callback_failures: u64,
    pub fail_stops: u64,
}

/// 监控计数指标。
pub struct TelemetryMetrics {
    ticks: AtomicU64,
    failed_ticks: AtomicU64,
    reads_ok: AtomicU64,
    reads_failed: AtomicU64,
    connect_attempts: AtomicU64,
    connect_failures: AtomicU64,
    callback_failures: AtomicU64,
    fail_stops: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            failed_ticks: AtomicU64::new(0),
            reads_ok: AtomicU64::new(0),
            reads_failed: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            callback_failures: AtomicU64::new(0),
            fail_stops: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            failed_ticks: self.failed_ticks.load(Ordering::Relaxed),
            reads_ok: self.reads_ok.load(Ordering::Relaxed),
            reads_failed: self.reads_failed.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
            fail_stops: self.fail_stops.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的监控运行 ID。
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 记录监控 tick 次数。
pub fn record_tick() {
    metrics().ticks.fetch_add(1, Ordering::Relaxed);
}

/// 记录无进展 tick 次数（连接失败或整批读取失败）。
pub fn record_failed_tick() {
    metrics().failed_ticks.fetch_add(1, Ordering::Relaxed);
}

/// 记录单次读取成功。
pub fn record_read_success() {
    metrics().reads_ok.fetch_add(1, Ordering::Relaxed);
}

/// 记录单次读取失败。
pub fn record_read_failure() {
    metrics().reads_failed.fetch_add(1, Ordering::Relaxed);
}

/// 记录连接尝试次数。
pub fn record_connect_attempt() {
    metrics().connect_attempts.fetch_add(1, Ordering::Relaxed);
}

/// 记录连接失败次数。
pub fn record_connect_failure() {
    metrics().connect_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录消费者回调失败次数。
pub fn record_callback_failure() {
    metrics().callback_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录失败停止次数。
pub fn record_fail_stop() {
    metrics().fail_stops.fetch_add(1, Ordering::Relaxed);
}

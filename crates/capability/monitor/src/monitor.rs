//! 连续监控循环
//!
//! 状态机：`Stopped → Running → Stopping → Stopped`。
//!
//! 每个 tick：等待下一个周期边界（可被停止信号打断）→ 确保连接 → 并发批量读取
//! → 更新连续错误计数 → 达到阈值则失败停止 → 交给消费者。
//!
//! 周期按 tick 起点计算（固定速率）；某个 tick 超时运行时，下一个 tick 在其结束后
//! 立即开始，之后重新按周期计时，不会补发错过的 tick，也不会重叠。

use crate::consumer::ReadingConsumer;
use crate::error::MonitorError;
use domain::{Reading, RegisterDescriptor, RegisterKind, RegisterSet};
use ems_protocol::{BatchReader, ConnectionConfig, ConnectionManager, RegisterTransport};
use ems_telemetry::{
    new_run_id, record_callback_failure, record_fail_stop, record_failed_tick, record_tick,
};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, error, info, info_span, warn};

/// 连续失败 tick 的默认阈值。
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 5;

const STOPPED: u8 = 0;
const RUNNING: u8 = 1;
const STOPPING: u8 = 2;

/// 监控运行状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    Stopping,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            RUNNING => Self::Running,
            STOPPING => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// 只读状态快照。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorStatus {
    pub state: RunState,
    pub consecutive_errors: u32,
    /// 本次（或最近一次）运行已执行的 tick 数
    pub ticks: u64,
}

/// 正常停止时的运行摘要。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSummary {
    pub ticks: u64,
}

enum TickOutcome {
    Continue,
    FailStop(u32),
}

/// 退出时强制回到 Stopped（包括 panic 展开）。
struct RunGuard<'a> {
    state: &'a AtomicU8,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.state.store(STOPPED, Ordering::SeqCst);
    }
}

/// 连续监控循环
pub struct MonitorLoop {
    manager: Mutex<ConnectionManager>,
    registers: RwLock<RegisterSet>,
    reader: BatchReader,
    device: String,
    poll_interval: Duration,
    max_consecutive_errors: u32,
    run_state: AtomicU8,
    consecutive_errors: AtomicU32,
    ticks: AtomicU64,
    stop_tx: watch::Sender<bool>,
}

impl MonitorLoop {
    pub fn new(config: ConnectionConfig, transport: Arc<dyn RegisterTransport>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            reader: BatchReader::new(config.timeout()),
            device: format!("{}:{}", config.host, config.port),
            poll_interval: config.poll_interval(),
            manager: Mutex::new(ConnectionManager::new(config, transport)),
            registers: RwLock::new(RegisterSet::new()),
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            run_state: AtomicU8::new(STOPPED),
            consecutive_errors: AtomicU32::new(0),
            ticks: AtomicU64::new(0),
            stop_tx,
        }
    }

    /// 设置失败停止阈值（至少 1）。
    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max.max(1);
        self
    }

    /// 以已有集合初始化监控寄存器。
    pub fn with_registers(mut self, registers: RegisterSet) -> Self {
        self.registers = RwLock::new(registers);
        self
    }

    /// 追加监控寄存器；运行中追加在下一个 tick 生效。
    pub async fn add_register(
        &self,
        address: u16,
        count: u16,
        kind: RegisterKind,
        name: Option<String>,
    ) -> Result<(), MonitorError> {
        self.registers
            .write()
            .await
            .add_register(address, count, kind, name)?;
        Ok(())
    }

    /// 当前寄存器集合快照。
    pub async fn registers(&self) -> RegisterSet {
        self.registers.read().await.clone()
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            state: RunState::from_u8(self.run_state.load(Ordering::SeqCst)),
            consecutive_errors: self.consecutive_errors.load(Ordering::SeqCst),
            ticks: self.ticks.load(Ordering::SeqCst),
        }
    }

    /// 单次连接尝试（用于监控前的直接读取）。
    pub async fn connect(&self) -> Result<(), MonitorError> {
        self.manager.lock().await.connect().await?;
        Ok(())
    }

    /// 关闭连接；幂等。
    pub async fn disconnect(&self) {
        self.manager.lock().await.disconnect().await;
    }

    /// 单次直接读取，失败直接返回。需先建立连接。
    pub async fn read_register(
        &self,
        descriptor: &RegisterDescriptor,
    ) -> Result<Reading, MonitorError> {
        let manager = self.manager.lock().await;
        let session = manager.session()?;
        Ok(self.reader.read(descriptor, session).await?)
    }

    /// 请求停止；在下一个等待点生效，不打断进行中的读取。
    pub fn stop(&self) {
        if self
            .run_state
            .compare_exchange(RUNNING, STOPPING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!(device = %self.device, "stopping monitor");
        }
        self.stop_tx.send_replace(true);
    }

    /// 在当前任务中运行监控，直到停止请求或失败停止。
    pub async fn run(
        &self,
        consumer: Option<Arc<dyn ReadingConsumer>>,
    ) -> Result<MonitorSummary, MonitorError> {
        self.begin()?;
        self.drive(consumer).await
    }

    /// 在 tokio 运行时上启动监控任务。
    pub fn start(
        self: &Arc<Self>,
        consumer: Option<Arc<dyn ReadingConsumer>>,
    ) -> Result<JoinHandle<Result<MonitorSummary, MonitorError>>, MonitorError> {
        self.begin()?;
        let monitor = Arc::clone(self);
        Ok(tokio::spawn(async move { monitor.drive(consumer).await }))
    }

    /// Stopped → Running，并重置本次运行的计数与停止信号。
    fn begin(&self) -> Result<(), MonitorError> {
        self.run_state
            .compare_exchange(STOPPED, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| MonitorError::AlreadyRunning)?;
        self.consecutive_errors.store(0, Ordering::SeqCst);
        self.ticks.store(0, Ordering::SeqCst);
        self.stop_tx.send_replace(false);
        Ok(())
    }

    async fn drive(
        &self,
        consumer: Option<Arc<dyn ReadingConsumer>>,
    ) -> Result<MonitorSummary, MonitorError> {
        let span = info_span!("monitor", run_id = %new_run_id(), device = %self.device);
        self.drive_loop(consumer.as_deref()).instrument(span).await
    }

    async fn drive_loop(
        &self,
        consumer: Option<&dyn ReadingConsumer>,
    ) -> Result<MonitorSummary, MonitorError> {
        let _guard = RunGuard {
            state: &self.run_state,
        };
        info!(
            interval_ms = self.poll_interval.as_millis() as u64,
            "starting continuous monitoring"
        );

        // interval 不接受零周期
        let mut ticker = tokio::time::interval(self.poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stop_rx = self.stop_tx.subscribe();

        let result = loop {
            tokio::select! {
                biased;
                _ = async {
                    let _ = stop_rx.wait_for(|stop| *stop).await;
                } => {
                    info!("monitor stop requested");
                    break Ok(MonitorSummary {
                        ticks: self.ticks.load(Ordering::SeqCst),
                    });
                }
                _ = ticker.tick() => {}
            }

            let outcome = AssertUnwindSafe(self.tick(consumer)).catch_unwind().await;
            match outcome {
                Ok(TickOutcome::Continue) => {}
                Ok(TickOutcome::FailStop(consecutive_errors)) => {
                    break Err(MonitorError::FailStop { consecutive_errors });
                }
                Err(panic) => {
                    error!(
                        error = %panic_message(panic.as_ref()),
                        "unexpected error in monitor loop"
                    );
                    // 重置会话，避免沿用中断时的状态
                    self.manager.lock().await.disconnect().await;
                    let consecutive_errors = self.record_failure();
                    if consecutive_errors >= self.max_consecutive_errors {
                        error!(consecutive_errors, "max consecutive errors reached, stopping monitor");
                        record_fail_stop();
                        break Err(MonitorError::FailStop { consecutive_errors });
                    }
                }
            }
        };

        self.manager.lock().await.disconnect().await;
        info!(ticks = self.ticks.load(Ordering::SeqCst), "monitor stopped");
        result
    }

    async fn tick(&self, consumer: Option<&dyn ReadingConsumer>) -> TickOutcome {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        record_tick();

        let batch = {
            let mut manager = self.manager.lock().await;
            match manager.ensure_connected().await {
                Ok(()) => {
                    let registers = self.registers.read().await.clone();
                    match manager.session() {
                        Ok(session) => Some(self.reader.read_all(&registers, session).await),
                        Err(e) => {
                            warn!(error = %e, "session unavailable after reconnect, skipping tick");
                            None
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "modbus device unreachable, skipping read");
                    None
                }
            }
        };

        let progressed = batch
            .as_ref()
            .is_some_and(|readings| readings.iter().any(Reading::is_ok));
        if progressed {
            self.consecutive_errors.store(0, Ordering::SeqCst);
        } else {
            let consecutive_errors = self.record_failure();
            if batch.is_some() {
                warn!(consecutive_errors, "no data received");
            }
            if consecutive_errors >= self.max_consecutive_errors {
                error!(consecutive_errors, "max consecutive errors reached, stopping monitor");
                record_fail_stop();
                return TickOutcome::FailStop(consecutive_errors);
            }
        }

        if let (Some(batch), Some(consumer)) = (batch, consumer) {
            self.deliver(consumer, &batch).await;
        }
        TickOutcome::Continue
    }

    fn record_failure(&self) -> u32 {
        record_failed_tick();
        self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// 调用消费者；错误与 panic 均在此吸收，不影响轮询。
    async fn deliver(&self, consumer: &dyn ReadingConsumer, batch: &[Reading]) {
        let fault = match AssertUnwindSafe(consumer.consume(batch)).catch_unwind().await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(panic) => MonitorError::Callback(panic_message(panic.as_ref())),
        };
        record_callback_failure();
        warn!(error = %fault, readings = batch.len(), "reading consumer failed");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

//! # 连续监控能力模块
//!
//! 周期性批量读取寄存器集合，把每批读数交给消费者，并在设备持续不可达时停止：
//!
//! ```text
//! MonitorLoop ──tick──► ConnectionManager::ensure_connected
//!      │                       │
//!      │                       ▼
//!      │               BatchReader::read_all → Vec<Reading>
//!      │                       │
//!      └── consecutive_errors ◄┘──► ReadingConsumer::consume
//! ```
//!
//! 连续 5 个 tick（可配置）没有任何成功读数或无法连接时，监控失败停止，
//! 需要调用方显式重新启动。

mod consumer;
mod error;
mod monitor;

pub use consumer::{ChannelConsumer, FnConsumer, LogConsumer, LogFormat, ReadingConsumer};
pub use error::MonitorError;
pub use monitor::{
    DEFAULT_MAX_CONSECUTIVE_ERRORS, MonitorLoop, MonitorStatus, MonitorSummary, RunState,
};

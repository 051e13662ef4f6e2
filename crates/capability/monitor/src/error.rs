//! 监控错误类型定义

use domain::DomainError;
use ems_protocol::ProtocolError;

/// 监控错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MonitorError {
    /// 读数消费者返回错误或 panic
    #[error("consumer callback failed: {0}")]
    Callback(String),

    /// 连续失败达到阈值，监控已停止
    #[error("monitor stopped after {consecutive_errors} consecutive failed ticks")]
    FailStop { consecutive_errors: u32 },

    /// 监控已在运行
    #[error("monitor is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("invalid register: {0}")]
    InvalidRegister(#[from] DomainError),
}

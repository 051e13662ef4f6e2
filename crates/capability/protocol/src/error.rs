//! 协议错误类型定义

use domain::ReadFailure;

/// 协议通信错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// 连接错误（连接被拒绝、握手失败、重连耗尽）
    #[error("connection error: {0}")]
    Connection(String),

    /// 读取超时
    #[error("timeout: {0}")]
    Timeout(String),

    /// 设备返回的 Modbus 异常（如非法地址）
    #[error("modbus exception: {0}")]
    Exception(String),

    /// 交互过程中的链路错误，会话已失效
    #[error("transport error: {0}")]
    Transport(String),

    /// 未建立会话
    #[error("not connected")]
    NotConnected,

    /// 配置解析错误
    #[error("config parse error: {0}")]
    ConfigParse(String),
}

impl ProtocolError {
    /// 转换为读数上的失败标记。
    pub fn to_read_failure(&self) -> ReadFailure {
        match self {
            Self::Timeout(_) => ReadFailure::Timeout,
            Self::Exception(message) => ReadFailure::Exception(message.clone()),
            other => ReadFailure::Transport(other.to_string()),
        }
    }
}

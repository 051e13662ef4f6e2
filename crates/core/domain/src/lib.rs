pub mod data;
pub mod register;

pub use data::{ReadFailure, Reading, RegisterValues};
pub use register::{RegisterDescriptor, RegisterKind, RegisterSet};

/// 领域模型校验错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("register count must be positive (address {address})")]
    InvalidCount { address: u16 },
    #[error("unknown register kind: {0}")]
    UnknownKind(String),
}

/// 获取当前时间戳（毫秒）。
pub fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

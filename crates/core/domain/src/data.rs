use crate::register::{RegisterDescriptor, RegisterKind};
use serde::Serialize;
use std::fmt;

/// 寄存器原始值：字寄存器为 u16，位寄存器为 bool。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RegisterValues {
    Words(Vec<u16>),
    Bits(Vec<bool>),
}

impl RegisterValues {
    /// 与寄存器类型匹配的空值。
    pub fn empty_for(kind: RegisterKind) -> Self {
        if kind.is_bit() {
            Self::Bits(Vec::new())
        } else {
            Self::Words(Vec::new())
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Words(words) => words.len(),
            Self::Bits(bits) => bits.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 截断到 `count` 个值（线圈按字节返回，可能多出填充位）。
    pub fn truncate(&mut self, count: usize) {
        match self {
            Self::Words(words) => words.truncate(count),
            Self::Bits(bits) => bits.truncate(count),
        }
    }

    pub fn as_words(&self) -> Option<&[u16]> {
        match self {
            Self::Words(words) => Some(words),
            Self::Bits(_) => None,
        }
    }

    pub fn as_bits(&self) -> Option<&[bool]> {
        match self {
            Self::Bits(bits) => Some(bits),
            Self::Words(_) => None,
        }
    }
}

impl fmt::Display for RegisterValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        match self {
            Self::Words(words) => {
                for (i, word) in words.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", word)?;
                }
            }
            Self::Bits(bits) => {
                for (i, bit) in bits.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", bit)?;
                }
            }
        }
        f.write_str("]")
    }
}

/// 单个寄存器组读取失败的标记。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ReadFailure {
    /// 读取超时
    Timeout,
    /// 设备返回协议异常（如非法地址）
    Exception(String),
    /// 链路或会话错误
    Transport(String),
}

impl fmt::Display for ReadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::Exception(message) => write!(f, "exception: {}", message),
            Self::Transport(message) => write!(f, "transport: {}", message),
        }
    }
}

/// 一次读取结果；每个 tick 每个描述产生一个。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reading {
    pub name: String,
    pub address: u16,
    pub kind: RegisterKind,
    pub values: RegisterValues,
    /// 采集时间戳（毫秒）
    pub timestamp_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ReadFailure>,
}

impl Reading {
    /// 成功读数。
    pub fn success(
        descriptor: &RegisterDescriptor,
        mut values: RegisterValues,
        timestamp_ms: i64,
    ) -> Self {
        values.truncate(descriptor.count() as usize);
        Self {
            name: descriptor.name().to_string(),
            address: descriptor.address(),
            kind: descriptor.kind(),
            values,
            timestamp_ms,
            failure: None,
        }
    }

    /// 带失败标记、无值的读数。
    pub fn failed(descriptor: &RegisterDescriptor, failure: ReadFailure, timestamp_ms: i64) -> Self {
        Self {
            name: descriptor.name().to_string(),
            address: descriptor.address(),
            kind: descriptor.kind(),
            values: RegisterValues::empty_for(descriptor.kind()),
            timestamp_ms,
            failure: Some(failure),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.failure.is_none()
    }
}

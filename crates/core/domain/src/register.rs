//! 寄存器描述：读什么、从哪里读。

use crate::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Modbus 寄存器类型（封闭枚举，按功能码分派）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    /// 保持寄存器 (0x03)
    #[serde(alias = "holding_registers")]
    Holding,
    /// 输入寄存器 (0x04)
    #[serde(alias = "input_registers")]
    Input,
    /// 线圈 (0x01)
    #[serde(alias = "coils")]
    Coil,
    /// 离散输入 (0x02)
    #[serde(alias = "discrete_inputs")]
    DiscreteInput,
}

impl RegisterKind {
    /// 对应的 Modbus 读功能码。
    pub fn function_code(self) -> u8 {
        match self {
            Self::Coil => 1,
            Self::DiscreteInput => 2,
            Self::Holding => 3,
            Self::Input => 4,
        }
    }

    /// 位类型（线圈/离散输入）返回 true。
    pub fn is_bit(self) -> bool {
        matches!(self, Self::Coil | Self::DiscreteInput)
    }

    /// 用于日志与默认名称的标签。
    pub fn label(self) -> &'static str {
        match self {
            Self::Holding => "holding",
            Self::Input => "input",
            Self::Coil => "coils",
            Self::DiscreteInput => "discrete_inputs",
        }
    }
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RegisterKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "holding" | "holding_registers" => Ok(Self::Holding),
            "input" | "input_registers" => Ok(Self::Input),
            "coil" | "coils" => Ok(Self::Coil),
            "discrete_input" | "discrete_inputs" => Ok(Self::DiscreteInput),
            other => Err(DomainError::UnknownKind(other.to_string())),
        }
    }
}

/// 单个寄存器组描述（不可变值对象）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterDescriptor {
    address: u16,
    count: u16,
    kind: RegisterKind,
    name: String,
}

impl RegisterDescriptor {
    /// 构造描述；`name` 缺省时生成 `{kind}_{address}`。
    pub fn new(
        address: u16,
        count: u16,
        kind: RegisterKind,
        name: Option<String>,
    ) -> Result<Self, DomainError> {
        if count == 0 {
            return Err(DomainError::InvalidCount { address });
        }
        let name = match name {
            Some(name) if !name.trim().is_empty() => name,
            _ => format!("{}_{}", kind.label(), address),
        };
        Ok(Self {
            address,
            count,
            kind,
            name,
        })
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn count(&self) -> u16 {
        self.count
    }

    pub fn kind(&self) -> RegisterKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// 配置文件中的寄存器条目。
#[derive(Deserialize)]
struct RawDescriptor {
    address: u16,
    #[serde(default = "default_register_count")]
    count: u16,
    #[serde(default = "default_register_kind", alias = "register_type")]
    kind: RegisterKind,
    #[serde(default)]
    name: Option<String>,
}

fn default_register_count() -> u16 {
    1
}

fn default_register_kind() -> RegisterKind {
    RegisterKind::Holding
}

impl<'de> Deserialize<'de> for RegisterDescriptor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawDescriptor::deserialize(deserializer)?;
        RegisterDescriptor::new(raw.address, raw.count, raw.kind, raw.name)
            .map_err(serde::de::Error::custom)
    }
}

/// 有序寄存器集合；插入顺序即读取与结果顺序。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegisterSet {
    descriptors: Vec<RegisterDescriptor>,
}

impl RegisterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加寄存器组；只校验结构约束（count > 0）。
    pub fn add_register(
        &mut self,
        address: u16,
        count: u16,
        kind: RegisterKind,
        name: Option<String>,
    ) -> Result<&RegisterDescriptor, DomainError> {
        let descriptor = RegisterDescriptor::new(address, count, kind, name)?;
        self.descriptors.push(descriptor);
        Ok(&self.descriptors[self.descriptors.len() - 1])
    }

    /// 追加已构造的描述。
    pub fn push(&mut self, descriptor: RegisterDescriptor) {
        self.descriptors.push(descriptor);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RegisterDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl<'a> IntoIterator for &'a RegisterSet {
    type Item = &'a RegisterDescriptor;
    type IntoIter = std::slice::Iter<'a, RegisterDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.descriptors.iter()
    }
}

impl FromIterator<RegisterDescriptor> for RegisterSet {
    fn from_iter<T: IntoIterator<Item = RegisterDescriptor>>(iter: T) -> Self {
        Self {
            descriptors: iter.into_iter().collect(),
        }
    }
}

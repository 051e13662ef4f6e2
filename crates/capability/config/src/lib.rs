//! 应用运行配置加载。

use domain::{RegisterDescriptor, RegisterKind, RegisterSet};
use std::env;
use std::str::FromStr;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 读数输出格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "log" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(other.to_string()),
        }
    }
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub modbus_host: String,
    pub modbus_port: u16,
    pub modbus_device_id: u8,
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
    pub connect_retries: u32,
    pub max_consecutive_errors: u32,
    pub registers: RegisterSet,
    pub direct_reads: u32,
    pub output: OutputFormat,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let modbus_host = env::var("EMS_MODBUS_HOST")
            .map_err(|_| ConfigError::Missing("EMS_MODBUS_HOST".to_string()))?;
        if modbus_host.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "EMS_MODBUS_HOST".to_string(),
                modbus_host,
            ));
        }
        let modbus_port = read_u16_with_default("EMS_MODBUS_PORT", 502)?;
        let modbus_device_id = read_u8_with_default("EMS_MODBUS_DEVICE_ID", 1)?;
        let poll_interval_ms = read_u64_with_default("EMS_MODBUS_POLL_INTERVAL_MS", 1000)?;
        let timeout_ms = read_u64_with_default("EMS_MODBUS_TIMEOUT_MS", 3000)?;
        let connect_retries = read_u32_with_default("EMS_MODBUS_CONNECT_RETRIES", 3)?;
        let max_consecutive_errors =
            read_u32_with_default("EMS_MODBUS_MAX_CONSECUTIVE_ERRORS", 5)?;
        if max_consecutive_errors == 0 {
            return Err(ConfigError::Invalid(
                "EMS_MODBUS_MAX_CONSECUTIVE_ERRORS".to_string(),
                "0".to_string(),
            ));
        }
        let registers = read_registers("EMS_MODBUS_REGISTERS")?;
        let direct_reads = read_u32_with_default("EMS_MODBUS_DIRECT_READS", 3)?;
        let output = match read_optional("EMS_MODBUS_OUTPUT") {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid("EMS_MODBUS_OUTPUT".to_string(), value))?,
            None => OutputFormat::default(),
        };

        Ok(Self {
            modbus_host,
            modbus_port,
            modbus_device_id,
            poll_interval_ms,
            timeout_ms,
            connect_retries,
            max_consecutive_errors,
            registers,
            direct_reads,
            output,
        })
    }
}

/// 未配置寄存器时的默认监控集合：保持寄存器 0-9 与 10-14。
pub fn default_registers() -> RegisterSet {
    [(0, 10, "Holding_0-9"), (10, 5, "Holding_10-14")]
        .into_iter()
        .filter_map(|(address, count, name)| {
            RegisterDescriptor::new(address, count, RegisterKind::Holding, Some(name.to_string()))
                .ok()
        })
        .collect()
}

/// 解析 JSON 数组形式的寄存器列表。
fn read_registers(key: &str) -> Result<RegisterSet, ConfigError> {
    let value = match read_optional(key) {
        Some(value) => value,
        None => return Ok(default_registers()),
    };
    let registers: RegisterSet = serde_json::from_str(&value)
        .map_err(|e| ConfigError::Invalid(key.to_string(), e.to_string()))?;
    if registers.is_empty() {
        return Err(ConfigError::Invalid(key.to_string(), value));
    }
    Ok(registers)
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u8_with_default(key: &str, default: u8) -> Result<u8, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u8>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u32_with_default(key: &str, default: u32) -> Result<u32, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u32>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

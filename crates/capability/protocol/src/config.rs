//! 连接配置

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Modbus 设备连接配置
///
/// ```json
/// { "host": "192.168.1.100", "port": 502, "device_id": 1, "poll_interval_ms": 1000 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// 设备主机地址
    pub host: String,
    /// 设备端口（默认 502）
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    /// 从站 ID（默认 1）
    #[serde(default = "default_device_id", alias = "slave_id")]
    pub device_id: u8,
    /// 轮询间隔（毫秒）
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// 连接与读取超时（毫秒）
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    /// 单次重连的最大尝试次数
    #[serde(default = "default_max_connect_retries", alias = "retries")]
    pub max_connect_retries: u32,
}

fn default_modbus_port() -> u16 {
    502
}

fn default_device_id() -> u8 {
    1
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_timeout() -> u64 {
    3000
}

fn default_max_connect_retries() -> u32 {
    3
}

impl ConnectionConfig {
    /// 使用默认参数创建配置
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_modbus_port(),
            device_id: default_device_id(),
            poll_interval_ms: default_poll_interval(),
            timeout_ms: default_timeout(),
            max_connect_retries: default_max_connect_retries(),
        }
    }

    /// 从 JSON 配置字符串解析
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(|e| ProtocolError::ConfigParse(e.to_string()))
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_device_id(mut self, device_id: u8) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_connect_retries(mut self, retries: u32) -> Self {
        self.max_connect_retries = retries;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// 传输层连接目标
    pub fn target(&self) -> ConnectTarget {
        ConnectTarget {
            host: self.host.clone(),
            port: self.port,
            device_id: self.device_id,
        }
    }
}

/// 传输层建立会话所需的目标信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub device_id: u8,
}

impl std::fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} (unit {})", self.host, self.port, self.device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_defaults() {
        let config = ConnectionConfig::from_json(r#"{"host": "10.0.0.5"}"#).unwrap();
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 502);
        assert_eq!(config.device_id, 1);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.timeout(), Duration::from_secs(3));
        assert_eq!(config.max_connect_retries, 3);
        assert_eq!(config, ConnectionConfig::new("10.0.0.5"));
    }

    #[test]
    fn test_parse_config_aliases() {
        let json = r#"{"host": "plc", "port": 1502, "slave_id": 7, "retries": 5, "timeout_ms": 500}"#;
        let config = ConnectionConfig::from_json(json).unwrap();
        assert_eq!(config.port, 1502);
        assert_eq!(config.device_id, 7);
        assert_eq!(config.max_connect_retries, 5);
        assert_eq!(config.timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_parse_config_missing_host() {
        let err = ConnectionConfig::from_json(r#"{"port": 502}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::ConfigParse(_)));
    }
}

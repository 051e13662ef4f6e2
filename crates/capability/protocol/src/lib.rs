//! # 协议通信能力模块
//!
//! 为连续监控提供寄存器读取能力：
//! - **RegisterTransport**：会话建立/关闭与单次类型化读取（帧编解码由实现方负责）
//! - **ConnectionManager**：连接生命周期、有界重连
//! - **BatchReader**：同一会话上的并发批量读取，单点失败隔离
//!
//! ## 架构设计
//!
//! ```text
//! ConnectionConfig
//!       │
//!       ▼
//! ConnectionManager ──owns──► RegisterTransport
//!       │                        ├── ModbusTcpTransport (tokio-modbus)
//!       │ session()              └── SimulatedTransport (内存模拟)
//!       ▼
//! BatchReader::read_all(RegisterSet) → Vec<Reading>
//! ```
//!
//! ## 配置格式
//!
//! ```json
//! { "host": "192.168.1.100", "port": 502, "device_id": 1,
//!   "poll_interval_ms": 1000, "timeout_ms": 3000, "max_connect_retries": 3 }
//! ```

mod batch;
mod config;
mod connection;
mod error;
mod modbus_tcp;
mod simulated;
mod transport;

pub use batch::BatchReader;
pub use config::{ConnectTarget, ConnectionConfig};
pub use connection::ConnectionManager;
pub use error::ProtocolError;
pub use modbus_tcp::ModbusTcpTransport;
pub use simulated::SimulatedTransport;
pub use transport::{ConnectionState, RegisterTransport, read_values};

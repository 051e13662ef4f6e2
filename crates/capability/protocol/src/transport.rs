//! 寄存器传输抽象
//!
//! 负责与设备的会话建立/关闭以及单次类型化读取，帧编解码由实现方处理。
//! 读取方法取 `&self`，同一会话上的多个读取可以并发发起。

use crate::config::ConnectTarget;
use crate::error::ProtocolError;
use async_trait::async_trait;
use domain::{RegisterDescriptor, RegisterKind, RegisterValues};
use std::fmt;
use std::time::Duration;

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// 寄存器传输
#[async_trait]
pub trait RegisterTransport: Send + Sync {
    /// 建立会话；超时由实现方保证。
    async fn connect(&self, target: &ConnectTarget, timeout: Duration) -> Result<(), ProtocolError>;

    /// 关闭会话；幂等，不返回错误。
    async fn disconnect(&self);

    /// 会话是否仍然可用。链路错误后实现方应返回 false。
    fn is_connected(&self) -> bool;

    /// 读保持寄存器 (0x03)
    async fn read_holding_registers(
        &self,
        address: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<Vec<u16>, ProtocolError>;

    /// 读输入寄存器 (0x04)
    async fn read_input_registers(
        &self,
        address: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<Vec<u16>, ProtocolError>;

    /// 读线圈 (0x01)
    async fn read_coils(
        &self,
        address: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<Vec<bool>, ProtocolError>;

    /// 读离散输入 (0x02)
    async fn read_discrete_inputs(
        &self,
        address: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<Vec<bool>, ProtocolError>;
}

/// 按寄存器类型分派到对应的读功能。
pub async fn read_values(
    transport: &dyn RegisterTransport,
    descriptor: &RegisterDescriptor,
    timeout: Duration,
) -> Result<RegisterValues, ProtocolError> {
    let (address, count) = (descriptor.address(), descriptor.count());
    let values = match descriptor.kind() {
        RegisterKind::Holding => RegisterValues::Words(
            transport
                .read_holding_registers(address, count, timeout)
                .await?,
        ),
        RegisterKind::Input => RegisterValues::Words(
            transport.read_input_registers(address, count, timeout).await?,
        ),
        RegisterKind::Coil => {
            RegisterValues::Bits(transport.read_coils(address, count, timeout).await?)
        }
        RegisterKind::DiscreteInput => RegisterValues::Bits(
            transport.read_discrete_inputs(address, count, timeout).await?,
        ),
    };
    Ok(values)
}

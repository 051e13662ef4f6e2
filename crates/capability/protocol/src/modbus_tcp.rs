//! Modbus TCP 传输实现
//!
//! 基于 tokio-modbus 的单会话客户端。同一会话同时只有一个未完成的事务，
//! 请求按获得会话锁的顺序串行发送，批量读取的耗时为各读取耗时之和。
//!
//! 交互超时或链路错误后，流上可能残留迟到的响应，会话不再可信，直接丢弃。
//! 传输保留最近一次成功连接的目标，后续读取在会话缺失时按需重新建立会话，
//! 同批次中排队的其他读取因此不受影响。`disconnect` 清除目标，之后不再重连。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! let transport = Arc::new(ModbusTcpTransport::new());
//! let mut manager = ConnectionManager::new(ConnectionConfig::new("192.168.1.100"), transport);
//! manager.connect().await?;
//! ```

use crate::config::ConnectTarget;
use crate::error::ProtocolError;
use crate::transport::RegisterTransport;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::error::Elapsed;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::{debug, warn};

/// 会话与重连目标
#[derive(Default)]
struct Session {
    ctx: Option<Context>,
    target: Option<ConnectTarget>,
}

/// Modbus TCP 寄存器传输
#[derive(Default)]
pub struct ModbusTcpTransport {
    session: Mutex<Session>,
    connected: AtomicBool,
}

impl ModbusTcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取得可用会话；会话已被丢弃但目标仍在时重新建立。
    async fn context<'a>(
        &self,
        session: &'a mut Session,
        timeout: Duration,
    ) -> Result<&'a mut Context, ProtocolError> {
        if session.ctx.is_none() {
            let target = session.target.clone().ok_or(ProtocolError::NotConnected)?;
            debug!(%target, "reopening modbus tcp session");
            session.ctx = Some(open(&target, timeout).await?);
            self.connected.store(true, Ordering::SeqCst);
        }
        session.ctx.as_mut().ok_or(ProtocolError::NotConnected)
    }

    /// 统一处理一次交互的结果；超时或链路错误时丢弃会话。
    fn settle<T>(
        &self,
        session: &mut Session,
        outcome: Result<Result<Result<T, tokio_modbus::ExceptionCode>, tokio_modbus::Error>, Elapsed>,
        function: &str,
        address: u16,
        timeout: Duration,
    ) -> Result<T, ProtocolError> {
        match outcome {
            Ok(Ok(Ok(values))) => Ok(values),
            Ok(Ok(Err(exception))) => Err(ProtocolError::Exception(format!("{:?}", exception))),
            Ok(Err(e)) => {
                warn!(function, address, error = %e, "modbus session failed, dropping it");
                self.drop_session(session);
                Err(ProtocolError::Transport(e.to_string()))
            }
            Err(_) => {
                // 迟到的响应会错配到下一个事务
                warn!(function, address, "modbus request timed out, dropping session");
                self.drop_session(session);
                Err(ProtocolError::Timeout(format!(
                    "{} read at {} exceeded {}ms",
                    function,
                    address,
                    timeout.as_millis()
                )))
            }
        }
    }

    fn drop_session(&self, session: &mut Session) {
        session.ctx = None;
        self.connected.store(false, Ordering::SeqCst);
    }
}

async fn resolve(target: &ConnectTarget) -> Result<SocketAddr, ProtocolError> {
    tokio::net::lookup_host((target.host.as_str(), target.port))
        .await
        .map_err(|e| ProtocolError::Connection(format!("resolve {}: {}", target.host, e)))?
        .next()
        .ok_or_else(|| ProtocolError::Connection(format!("no address for {}", target.host)))
}

/// 在超时内建立一个新会话。
async fn open(target: &ConnectTarget, timeout: Duration) -> Result<Context, ProtocolError> {
    let connecting = async {
        let addr = resolve(target).await?;
        debug!(%addr, slave = target.device_id, "opening modbus tcp session");
        tcp::connect_slave(addr, Slave(target.device_id))
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))
    };

    match tokio::time::timeout(timeout, connecting).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Connection(format!(
            "connect to {} timed out after {}ms",
            target,
            timeout.as_millis()
        ))),
    }
}

#[async_trait]
impl RegisterTransport for ModbusTcpTransport {
    async fn connect(&self, target: &ConnectTarget, timeout: Duration) -> Result<(), ProtocolError> {
        let mut session = self.session.lock().await;
        if let Some(mut stale) = session.ctx.take() {
            if let Err(e) = stale.disconnect().await {
                debug!(error = %e, "failed to close stale modbus session");
            }
        }
        session.target = None;
        self.connected.store(false, Ordering::SeqCst);

        let ctx = open(target, timeout).await?;
        session.ctx = Some(ctx);
        session.target = Some(target.clone());
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        self.connected.store(false, Ordering::SeqCst);
        session.target = None;
        if let Some(mut ctx) = session.ctx.take() {
            if let Err(e) = ctx.disconnect().await {
                debug!(error = %e, "error while closing modbus session");
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn read_holding_registers(
        &self,
        address: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<Vec<u16>, ProtocolError> {
        let mut session = self.session.lock().await;
        let ctx = self.context(&mut session, timeout).await?;
        let outcome = tokio::time::timeout(timeout, ctx.read_holding_registers(address, count)).await;
        self.settle(&mut session, outcome, "holding", address, timeout)
    }

    async fn read_input_registers(
        &self,
        address: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<Vec<u16>, ProtocolError> {
        let mut session = self.session.lock().await;
        let ctx = self.context(&mut session, timeout).await?;
        let outcome = tokio::time::timeout(timeout, ctx.read_input_registers(address, count)).await;
        self.settle(&mut session, outcome, "input", address, timeout)
    }

    async fn read_coils(
        &self,
        address: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<Vec<bool>, ProtocolError> {
        let mut session = self.session.lock().await;
        let ctx = self.context(&mut session, timeout).await?;
        let outcome = tokio::time::timeout(timeout, ctx.read_coils(address, count)).await;
        self.settle(&mut session, outcome, "coils", address, timeout)
    }

    async fn read_discrete_inputs(
        &self,
        address: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<Vec<bool>, ProtocolError> {
        let mut session = self.session.lock().await;
        let ctx = self.context(&mut session, timeout).await?;
        let outcome = tokio::time::timeout(timeout, ctx.read_discrete_inputs(address, count)).await;
        self.settle(&mut session, outcome, "discrete_inputs", address, timeout)
    }
}

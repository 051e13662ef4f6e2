//! 内存模拟设备（用于接线、演示与测试）
//!
//! 提供四类寄存器存储区，以及按地址的读取延迟、连接拒绝、读取故障注入与计数。
//! 未写入的地址读取时返回非法地址异常，与真实设备一致。

use crate::config::ConnectTarget;
use crate::error::ProtocolError;
use crate::transport::RegisterTransport;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct SimState {
    holding: BTreeMap<u16, u16>,
    input: BTreeMap<u16, u16>,
    coils: BTreeMap<u16, bool>,
    discrete_inputs: BTreeMap<u16, bool>,
    connected: bool,
    refuse_all: bool,
    refuse_next: u32,
    connect_delay: Duration,
    read_failure: Option<ProtocolError>,
    address_failures: HashMap<u16, ProtocolError>,
    read_delays: HashMap<u16, Duration>,
}

/// 模拟寄存器传输
#[derive(Default)]
pub struct SimulatedTransport {
    state: Mutex<SimState>,
    connect_attempts: AtomicUsize,
    read_attempts: AtomicUsize,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 从 `address` 起写入保持寄存器
    pub fn set_holding(&self, address: u16, values: &[u16]) {
        store(&mut self.lock().holding, address, values);
    }

    /// 从 `address` 起写入输入寄存器
    pub fn set_input(&self, address: u16, values: &[u16]) {
        store(&mut self.lock().input, address, values);
    }

    /// 从 `address` 起写入线圈
    pub fn set_coils(&self, address: u16, values: &[bool]) {
        store(&mut self.lock().coils, address, values);
    }

    /// 从 `address` 起写入离散输入
    pub fn set_discrete_inputs(&self, address: u16, values: &[bool]) {
        store(&mut self.lock().discrete_inputs, address, values);
    }

    /// 拒绝（或恢复）全部连接请求
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_all = refuse;
    }

    /// 拒绝接下来的 `count` 次连接请求
    pub fn refuse_next_connections(&self, count: u32) {
        self.lock().refuse_next = count;
    }

    /// 连接建立耗时（不受连接超时约束，用于验证调用方超时）
    pub fn set_connect_delay(&self, delay: Duration) {
        self.lock().connect_delay = delay;
    }

    /// 全部读取返回指定错误；`None` 恢复正常
    pub fn set_read_failure(&self, failure: Option<ProtocolError>) {
        self.lock().read_failure = failure;
    }

    /// 起始地址为 `address` 的读取返回指定错误
    pub fn fail_address(&self, address: u16, failure: ProtocolError) {
        self.lock().address_failures.insert(address, failure);
    }

    /// 起始地址为 `address` 的读取耗时；不短于超时则按超时失败
    pub fn set_read_delay(&self, address: u16, delay: Duration) {
        self.lock().read_delays.insert(address, delay);
    }

    /// 模拟链路中断
    pub fn drop_link(&self) {
        self.lock().connected = false;
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn read_attempts(&self) -> usize {
        self.read_attempts.load(Ordering::SeqCst)
    }

    /// 读取前置：会话检查与延迟模拟。
    async fn begin_read(&self, address: u16, timeout: Duration) -> Result<(), ProtocolError> {
        self.read_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = {
            let state = self.lock();
            if !state.connected {
                return Err(ProtocolError::NotConnected);
            }
            state.read_delays.get(&address).copied()
        };

        if let Some(delay) = delay {
            if delay >= timeout {
                tokio::time::sleep(timeout).await;
                return Err(ProtocolError::Timeout(format!(
                    "no response for address {} within {}ms",
                    address,
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(delay).await;
        }

        let state = self.lock();
        if !state.connected {
            return Err(ProtocolError::Transport("link dropped".to_string()));
        }
        if let Some(failure) = state.read_failure.clone() {
            return Err(failure);
        }
        if let Some(failure) = state.address_failures.get(&address) {
            return Err(failure.clone());
        }
        Ok(())
    }
}

fn store<T: Copy>(bank: &mut BTreeMap<u16, T>, address: u16, values: &[T]) {
    for (offset, value) in values.iter().enumerate() {
        if let Some(slot) = address.checked_add(offset as u16) {
            bank.insert(slot, *value);
        }
    }
}

fn lookup<T: Copy>(bank: &BTreeMap<u16, T>, address: u16, count: u16) -> Result<Vec<T>, ProtocolError> {
    let illegal = || ProtocolError::Exception(format!("IllegalDataAddress ({}+{})", address, count));
    (0..count)
        .map(|offset| {
            address
                .checked_add(offset)
                .and_then(|slot| bank.get(&slot).copied())
                .ok_or_else(illegal)
        })
        .collect()
}

#[async_trait]
impl RegisterTransport for SimulatedTransport {
    async fn connect(&self, _target: &ConnectTarget, _timeout: Duration) -> Result<(), ProtocolError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = self.lock().connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if state.refuse_all {
            return Err(ProtocolError::Connection("connection refused".to_string()));
        }
        if state.refuse_next > 0 {
            state.refuse_next -= 1;
            return Err(ProtocolError::Connection("connection refused".to_string()));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) {
        self.lock().connected = false;
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn read_holding_registers(
        &self,
        address: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<Vec<u16>, ProtocolError> {
        self.begin_read(address, timeout).await?;
        lookup(&self.lock().holding, address, count)
    }

    async fn read_input_registers(
        &self,
        address: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<Vec<u16>, ProtocolError> {
        self.begin_read(address, timeout).await?;
        lookup(&self.lock().input, address, count)
    }

    async fn read_coils(
        &self,
        address: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<Vec<bool>, ProtocolError> {
        self.begin_read(address, timeout).await?;
        lookup(&self.lock().coils, address, count)
    }

    async fn read_discrete_inputs(
        &self,
        address: u16,
        count: u16,
        timeout: Duration,
    ) -> Result<Vec<bool>, ProtocolError> {
        self.begin_read(address, timeout).await?;
        lookup(&self.lock().discrete_inputs, address, count)
    }
}

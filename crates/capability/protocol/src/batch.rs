//! 批量读取
//!
//! 同一会话上并发发起全部寄存器组读取（扇出），全部完成后返回（汇合）。
//! 单个读取失败转换为带失败标记的 `Reading`，不影响同批其他读取。
//! 传输若串行处理请求（如 Modbus TCP），批次耗时为各读取耗时之和。

use crate::error::ProtocolError;
use crate::transport::{RegisterTransport, read_values};
use domain::{Reading, RegisterDescriptor, RegisterSet, now_epoch_ms};
use ems_telemetry::{record_read_failure, record_read_success};
use futures::future::join_all;
use std::time::Duration;
use tracing::{debug, warn};

/// 批量读取器
#[derive(Debug, Clone, Copy)]
pub struct BatchReader {
    timeout: Duration,
}

impl BatchReader {
    /// `timeout` 约束每一次单独读取。
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 读取集合内全部寄存器组，结果顺序与集合顺序一致。
    pub async fn read_all(
        &self,
        registers: &RegisterSet,
        session: &dyn RegisterTransport,
    ) -> Vec<Reading> {
        let reads = registers
            .iter()
            .map(|descriptor| self.read_marked(descriptor, session));
        // join_all 按输入顺序返回，与完成顺序无关
        join_all(reads).await
    }

    /// 单次读取，失败直接返回给调用方。
    pub async fn read(
        &self,
        descriptor: &RegisterDescriptor,
        session: &dyn RegisterTransport,
    ) -> Result<Reading, ProtocolError> {
        let values = match read_values(session, descriptor, self.timeout).await {
            Ok(values) => values,
            Err(e) => {
                record_read_failure();
                return Err(e);
            }
        };
        record_read_success();

        debug!(
            name = %descriptor.name(),
            kind = %descriptor.kind(),
            address = descriptor.address(),
            count = descriptor.count(),
            values = %values,
            "read modbus registers"
        );
        Ok(Reading::success(descriptor, values, now_epoch_ms()))
    }

    async fn read_marked(
        &self,
        descriptor: &RegisterDescriptor,
        session: &dyn RegisterTransport,
    ) -> Reading {
        match self.read(descriptor, session).await {
            Ok(reading) => reading,
            Err(e) => {
                warn!(
                    name = %descriptor.name(),
                    address = descriptor.address(),
                    error = %e,
                    "failed to read modbus registers"
                );
                Reading::failed(descriptor, e.to_read_failure(), now_epoch_ms())
            }
        }
    }
}

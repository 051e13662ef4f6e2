//! 读数消费者
//!
//! 每个完成读取的 tick 调用一次，传入按寄存器集合顺序排列的整批读数。

use crate::error::MonitorError;
use async_trait::async_trait;
use domain::Reading;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// 读数批次处理器。
#[async_trait]
pub trait ReadingConsumer: Send + Sync {
    async fn consume(&self, batch: &[Reading]) -> Result<(), MonitorError>;
}

/// 日志输出格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// 每个读数一行结构化日志
    #[default]
    Text,
    /// 整批序列化为一行 JSON
    Json,
}

/// 将读数写入日志（默认消费者）。
#[derive(Debug, Default)]
pub struct LogConsumer {
    format: LogFormat,
}

impl LogConsumer {
    pub fn new(format: LogFormat) -> Self {
        Self { format }
    }
}

#[async_trait]
impl ReadingConsumer for LogConsumer {
    async fn consume(&self, batch: &[Reading]) -> Result<(), MonitorError> {
        match self.format {
            LogFormat::Text => {
                info!(readings = batch.len(), "modbus data");
                for reading in batch {
                    match &reading.failure {
                        None => info!(
                            name = %reading.name,
                            address = reading.address,
                            kind = %reading.kind,
                            values = %reading.values,
                            "register values"
                        ),
                        Some(failure) => warn!(
                            name = %reading.name,
                            address = reading.address,
                            kind = %reading.kind,
                            failure = %failure,
                            "register read failed"
                        ),
                    }
                }
            }
            LogFormat::Json => {
                let line = serde_json::to_string(batch)
                    .map_err(|e| MonitorError::Callback(e.to_string()))?;
                info!(target: "ems.readings", "{}", line);
            }
        }
        Ok(())
    }
}

/// 转发到有界通道，供调用方以拉取方式消费。
///
/// 通道满或接收端关闭时本批次丢弃并返回错误，不会阻塞轮询。
#[derive(Debug, Clone)]
pub struct ChannelConsumer {
    tx: mpsc::Sender<Vec<Reading>>,
}

impl ChannelConsumer {
    /// 创建消费者及其接收端。
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Vec<Reading>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ReadingConsumer for ChannelConsumer {
    async fn consume(&self, batch: &[Reading]) -> Result<(), MonitorError> {
        self.tx.try_send(batch.to_vec()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                MonitorError::Callback("reading channel full, batch dropped".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                MonitorError::Callback("reading channel closed".to_string())
            }
        })
    }
}

/// 闭包消费者。
pub struct FnConsumer<F> {
    handler: F,
}

impl<F> FnConsumer<F>
where
    F: Fn(&[Reading]) -> Result<(), String> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F> ReadingConsumer for FnConsumer<F>
where
    F: Fn(&[Reading]) -> Result<(), String> + Send + Sync,
{
    async fn consume(&self, batch: &[Reading]) -> Result<(), MonitorError> {
        (self.handler)(batch).map_err(MonitorError::Callback)
    }
}

//! Modbus 寄存器监控：先执行若干次直接读取，再连续轮询直到 Ctrl+C 或失败停止。

use domain::RegisterDescriptor;
use ems_config::{AppConfig, OutputFormat};
use ems_monitor::{LogConsumer, LogFormat, MonitorLoop};
use ems_protocol::{ConnectionConfig, ModbusTcpTransport};
use ems_telemetry::{init_tracing, metrics};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    let connection = ConnectionConfig::new(config.modbus_host.clone())
        .with_port(config.modbus_port)
        .with_device_id(config.modbus_device_id)
        .with_poll_interval(Duration::from_millis(config.poll_interval_ms))
        .with_timeout(Duration::from_millis(config.timeout_ms))
        .with_max_connect_retries(config.connect_retries);
    info!(
        device = %connection.target(),
        poll_interval_ms = config.poll_interval_ms,
        registers = config.registers.len(),
        "starting modbus monitor"
    );

    let transport = Arc::new(ModbusTcpTransport::new());
    let monitor = Arc::new(
        MonitorLoop::new(connection, transport)
            .with_registers(config.registers.clone())
            .with_max_consecutive_errors(config.max_consecutive_errors),
    );

    if config.direct_reads > 0 {
        if let Some(descriptor) = config.registers.iter().next() {
            direct_reads(&monitor, descriptor, config.direct_reads).await?;
        }
    }

    let format = match config.output {
        OutputFormat::Text => LogFormat::Text,
        OutputFormat::Json => LogFormat::Json,
    };
    let mut handle = monitor.start(Some(Arc::new(LogConsumer::new(format))))?;
    info!("continuous monitoring started, press Ctrl+C to stop");

    let finished = tokio::select! {
        joined = &mut handle => Some(joined),
        _ = tokio::signal::ctrl_c() => None,
    };
    let joined = match finished {
        Some(joined) => joined,
        None => {
            info!("ctrl+c received, stopping monitor");
            monitor.stop();
            handle.await
        }
    };

    let snapshot = metrics().snapshot();
    match joined? {
        Ok(summary) => {
            info!(ticks = summary.ticks, ?snapshot, "modbus monitor stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, ?snapshot, "modbus monitor aborted");
            Err(e.into())
        }
    }
}

/// 连接设备并对首个寄存器组执行 `rounds` 次直接读取，每次间隔 1 秒。
async fn direct_reads(
    monitor: &MonitorLoop,
    descriptor: &RegisterDescriptor,
    rounds: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    monitor.connect().await?;
    info!(name = descriptor.name(), "connected, running direct reads");

    for round in 1..=rounds {
        match monitor.read_register(descriptor).await {
            Ok(reading) => info!(
                round,
                name = %reading.name,
                address = reading.address,
                kind = %reading.kind,
                values = %reading.values,
                timestamp_ms = reading.timestamp_ms,
                "direct reading"
            ),
            Err(e) => warn!(round, error = %e, "direct read failed"),
        }
        if round < rounds {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
    Ok(())
}

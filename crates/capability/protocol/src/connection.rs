//! 连接生命周期管理
//!
//! `ConnectionManager` 独占传输会话：连接、断开以及有界重连。
//! 所有传输层连接故障统一转换为 [`ProtocolError::Connection`]。

use crate::config::ConnectionConfig;
use crate::error::ProtocolError;
use crate::transport::{ConnectionState, RegisterTransport};
use ems_telemetry::{record_connect_attempt, record_connect_failure};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 连接管理器
pub struct ConnectionManager {
    config: ConnectionConfig,
    transport: Arc<dyn RegisterTransport>,
    state: ConnectionState,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, transport: Arc<dyn RegisterTransport>) -> Self {
        Self {
            config,
            transport,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// 状态为 Connected 且传输层会话仍然存活。
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.transport.is_connected()
    }

    /// 已建立的会话句柄；未连接时返回 `NotConnected`。
    pub fn session(&self) -> Result<&dyn RegisterTransport, ProtocolError> {
        if self.is_connected() {
            Ok(self.transport.as_ref())
        } else {
            Err(ProtocolError::NotConnected)
        }
    }

    /// 单次连接尝试，失败不重试。
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        if self.is_connected() {
            debug!(target = %self.config.target(), "already connected");
            return Ok(());
        }
        match self.attempt().await {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                info!(
                    "connected to modbus device at {}:{}",
                    self.config.host, self.config.port
                );
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                warn!(error = %e, "failed to connect to modbus device");
                Err(e)
            }
        }
    }

    /// 关闭会话；幂等。
    pub async fn disconnect(&mut self) {
        let was_connected = self.state == ConnectionState::Connected;
        self.transport.disconnect().await;
        self.state = ConnectionState::Disconnected;
        if was_connected {
            info!("disconnected from modbus device");
        }
    }

    /// 已连接时立即返回，否则最多尝试 `max_connect_retries` 次重连。
    pub async fn ensure_connected(&mut self) -> Result<(), ProtocolError> {
        if self.is_connected() {
            return Ok(());
        }
        if self.state == ConnectionState::Connected {
            warn!("connection lost, attempting to reconnect...");
        }

        self.state = ConnectionState::Reconnecting;
        // 丢弃失效会话，避免与新会话并存
        self.transport.disconnect().await;

        let attempts = self.config.max_connect_retries.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.attempt().await {
                Ok(()) => {
                    self.state = ConnectionState::Connected;
                    info!(
                        attempt,
                        "reconnected to modbus device at {}:{}", self.config.host, self.config.port
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "reconnect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        self.state = ConnectionState::Disconnected;
        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt made".to_string());
        Err(ProtocolError::Connection(format!(
            "gave up after {} attempts: {}",
            attempts, reason
        )))
    }

    /// 一次受超时约束的连接尝试，不修改状态。
    async fn attempt(&self) -> Result<(), ProtocolError> {
        let target = self.config.target();
        let timeout = self.config.timeout();
        record_connect_attempt();

        let result = match tokio::time::timeout(timeout, self.transport.connect(&target, timeout))
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(ProtocolError::Connection(message))) => Err(ProtocolError::Connection(message)),
            Ok(Err(other)) => Err(ProtocolError::Connection(other.to_string())),
            Err(_) => Err(ProtocolError::Connection(format!(
                "connect to {} timed out after {}ms",
                target, self.config.timeout_ms
            ))),
        };

        if result.is_err() {
            record_connect_failure();
            self.transport.disconnect().await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedTransport;
    use std::time::Duration;

    fn manager(transport: &Arc<SimulatedTransport>) -> ConnectionManager {
        let config = ConnectionConfig::new("10.0.0.5").with_timeout(Duration::from_millis(200));
        ConnectionManager::new(config, transport.clone())
    }

    #[tokio::test]
    async fn test_connect_sets_connected() {
        let transport = Arc::new(SimulatedTransport::new());
        let mut manager = manager(&transport);

        manager.connect().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(manager.session().is_ok());
        assert_eq!(transport.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_is_not_retried() {
        let transport = Arc::new(SimulatedTransport::new());
        transport.refuse_connections(true);
        let mut manager = manager(&transport);

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, ProtocolError::Connection(_)));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.connect_attempts(), 1);
        assert_eq!(manager.session().err(), Some(ProtocolError::NotConnected));
    }

    #[tokio::test]
    async fn test_disconnect_twice_is_noop() {
        let transport = Arc::new(SimulatedTransport::new());
        let mut manager = manager(&transport);
        manager.connect().await.unwrap();

        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_ensure_connected_returns_immediately_when_connected() {
        let transport = Arc::new(SimulatedTransport::new());
        let mut manager = manager(&transport);
        manager.connect().await.unwrap();

        manager.ensure_connected().await.unwrap();
        assert_eq!(transport.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_ensure_connected_exhausts_retries() {
        let transport = Arc::new(SimulatedTransport::new());
        transport.refuse_connections(true);
        let mut manager = manager(&transport);

        let err = manager.ensure_connected().await.unwrap_err();
        assert!(matches!(err, ProtocolError::Connection(_)));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_ensure_connected_recovers_on_later_attempt() {
        let transport = Arc::new(SimulatedTransport::new());
        transport.refuse_next_connections(2);
        let mut manager = manager(&transport);

        manager.ensure_connected().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(transport.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_ensure_connected_detects_dropped_link() {
        let transport = Arc::new(SimulatedTransport::new());
        let mut manager = manager(&transport);
        manager.connect().await.unwrap();

        transport.drop_link();
        assert!(!manager.is_connected());
        manager.ensure_connected().await.unwrap();
        assert!(manager.is_connected());
        assert_eq!(transport.connect_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_connect_is_bounded_by_timeout() {
        let transport = Arc::new(SimulatedTransport::new());
        transport.set_connect_delay(Duration::from_secs(60));
        let mut manager = manager(&transport);

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, ProtocolError::Connection(_)));
        assert!(!transport.is_connected());
    }
}

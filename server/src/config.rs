//! Server tunables shared by both channels.

use shared::protocol::{DEFAULT_TCP_PORT, DEFAULT_UDP_PORT, PROTOCOL_VERSION};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// Port of the reliable (TCP) handshake channel.
    pub tcp_port: u16,
    /// Port of the fast-path (UDP) gameplay channel.
    pub udp_port: u16,
    /// Pending plus bound sessions allowed at once.
    pub max_clients: usize,
    pub protocol_version: u16,
    pub tick_duration: Duration,
    /// Expected client ping cadence; the session timeout is derived from it.
    pub ping_interval: Duration,
    /// Silence after which a session is evicted.
    pub session_timeout: Duration,
    /// How often the timeout sweeper runs, independent of packet arrival.
    pub sweep_interval: Duration,
}

impl ServerConfig {
    pub fn tcp_addr(&self) -> String {
        format!("{}:{}", self.host, self.tcp_port)
    }

    pub fn udp_addr(&self) -> String {
        format!("{}:{}", self.host, self.udp_port)
    }

    pub fn session_timeout_ms(&self) -> u32 {
        self.session_timeout.as_millis().min(u32::MAX as u128) as u32
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let ping_interval = Duration::from_secs(1);
        Self {
            host: "127.0.0.1".to_string(),
            tcp_port: DEFAULT_TCP_PORT,
            udp_port: DEFAULT_UDP_PORT,
            max_clients: 4,
            protocol_version: PROTOCOL_VERSION,
            tick_duration: Duration::from_millis(16),
            ping_interval,
            session_timeout: ping_interval * 3,
            sweep_interval: Duration::from_millis(250),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeout_is_three_pings() {
        let config = ServerConfig::default();
        assert_eq!(config.session_timeout, config.ping_interval * 3);
        assert_eq!(config.session_timeout_ms(), 3000);
    }

    #[test]
    fn test_addresses() {
        let config = ServerConfig {
            host: "0.0.0.0".to_string(),
            tcp_port: 1,
            udp_port: 2,
            ..ServerConfig::default()
        };
        assert_eq!(config.tcp_addr(), "0.0.0.0:1");
        assert_eq!(config.udp_addr(), "0.0.0.0:2");
    }
}

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use time::OffsetDateTime;

/// Addresses and tuning for one controller session.
///
/// Port `0` asks the OS for an ephemeral port; the bound ports are reported by
/// [`CommunicationController::local_addrs`](crate::CommunicationController::local_addrs).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommConfig {
    pub local_ip: IpAddr,
    pub send_port: u16,
    pub receive_port: u16,
    pub target_ip: IpAddr,
    pub target_port: u16,
    /// Upper bound on how long the receive thread takes to notice a stop.
    pub receive_timeout_ms: u64,
    /// Datagrams buffered for the consumer before new ones are dropped.
    pub queue_capacity: usize,
    pub max_datagram: usize,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            local_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            send_port: 49152,
            receive_port: 49153,
            target_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            target_port: 49153,
            receive_timeout_ms: 100,
            queue_capacity: 1024,
            max_datagram: 2048,
        }
    }
}

impl CommConfig {
    pub fn send_addr(&self) -> SocketAddr {
        SocketAddr::new(self.local_ip, self.send_port)
    }

    pub fn receive_addr(&self) -> SocketAddr {
        SocketAddr::new(self.local_ip, self.receive_port)
    }

    pub fn target_addr(&self) -> SocketAddr {
        SocketAddr::new(self.target_ip, self.target_port)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms.max(1))
    }
}

/// One inbound datagram as queued by the receive thread.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Datagram {
    pub data: Vec<u8>,
    pub from: SocketAddr,
    pub received_at: OffsetDateTime,
}

/// `Idle --setup--> Ready --start_receive_loop--> Running --stop--> Idle`
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Ready,
    Running,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct LocalAddrs {
    pub send: SocketAddr,
    pub receive: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let cfg: CommConfig =
            serde_json::from_str(r#"{"target_ip":"10.0.0.5","target_port":5000}"#).unwrap();
        assert_eq!(cfg.target_addr(), "10.0.0.5:5000".parse().unwrap());
        assert_eq!(cfg.receive_port, 49153);
        assert_eq!(cfg.receive_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_zero_timeout_is_raised() {
        let cfg = CommConfig {
            receive_timeout_ms: 0,
            ..CommConfig::default()
        };
        assert_eq!(cfg.receive_timeout(), Duration::from_millis(1));
    }
}

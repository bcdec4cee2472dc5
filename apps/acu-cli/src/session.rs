use acu_control::DeviceIdentity;
use acu_protocol::CodecKind;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use udp_transport::CommConfig;

/// Settings for `acu run`, usually read from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Local socket settings. The send target comes from `device`.
    pub transport: CommConfig,
    /// The device this simulator sends frames to, at `ip:send_port`.
    pub device: DeviceIdentity,
    /// Devices whose receive ports map inbound traffic; empty means the standard table.
    pub devices: Vec<DeviceIdentity>,
    pub codec: CodecKind,
    /// Template file; the embedded template is used when absent.
    pub template: Option<PathBuf>,
    pub period_ms: u64,
    pub cycles: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transport: CommConfig::default(),
            device: DeviceIdentity {
                name: "INV1".to_string(),
                ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                send_port: 49153,
                receive_port: 49153,
                category: "INV".to_string(),
            },
            devices: Vec::new(),
            codec: CodecKind::Template,
            template: None,
            period_ms: 100,
            cycles: 10,
        }
    }
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading session file {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing session file {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(text)?;
        if let Some(transport) = value.get("transport") {
            for key in ["target_ip", "target_port"] {
                if transport.get(key).is_some() {
                    bail!(
                        "transport.{key} is not allowed; the target is device.ip and device.send_port"
                    );
                }
            }
        }
        Ok(serde_yaml::from_value(value)?)
    }

    /// Transport settings addressed at the session's device.
    pub fn comm_config(&self) -> CommConfig {
        CommConfig {
            target_ip: self.device.ip,
            target_port: self.device.send_port,
            ..self.transport.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_session_parses() {
        let cfg = SessionConfig::from_yaml(include_str!("../../../configs/session.yaml")).unwrap();
        assert_eq!(cfg.device.name, "INV1");
        assert_eq!(cfg.device.category, "INV");
        assert_eq!(cfg.codec, CodecKind::Template);
        assert_eq!(cfg.transport.receive_timeout_ms, 100);
        assert_eq!(cfg.devices.len(), 2);
        assert_eq!(
            cfg.comm_config().target_addr(),
            "127.0.0.1:49153".parse().unwrap()
        );
    }

    #[test]
    fn test_target_follows_device() {
        let cfg = SessionConfig::from_yaml(
            "device: {name: BCC2, ip: 10.0.0.7, send_port: 49160, receive_port: 49160, category: BCC}",
        )
        .unwrap();
        let comm = cfg.comm_config();
        assert_eq!(comm.target_addr(), "10.0.0.7:49160".parse().unwrap());
        assert_eq!(comm.send_port, CommConfig::default().send_port);
    }

    #[test]
    fn test_transport_target_is_rejected() {
        let err = SessionConfig::from_yaml("transport: {target_port: 5000}").unwrap_err();
        assert!(err.to_string().contains("transport.target_port"));
    }

    #[test]
    fn test_empty_session_uses_defaults() {
        let cfg = SessionConfig::from_yaml("{}").unwrap();
        assert_eq!(cfg.period_ms, 100);
        assert_eq!(cfg.transport, CommConfig::default());
        assert!(cfg.template.is_none());
    }

    #[test]
    fn test_unknown_codec_is_rejected() {
        assert!(SessionConfig::from_yaml("codec: magic").is_err());
    }
}

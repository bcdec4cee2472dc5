//! Routing of inbound datagrams to the codec of the device that sent them.

use crate::device::DeviceIdentity;
use crate::metrics::MetricsHub;
use acu_protocol::{DecodeIssue, FrameProtocol, ParseOutcome, Result, TemplateLoader};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Sentinel for unmapped ports and unrecognized device ids.
pub const UNKNOWN: &str = "UNKNOWN";

/// Category prefixes recognized in device ids, e.g. `INV3` belongs to `INV`.
pub const CATEGORY_PREFIXES: [&str; 5] = ["INV", "CHU", "BCC", "ACU", "DUMMY"];

/// Source port to device id table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMap {
    ports: BTreeMap<u16, String>,
}

impl Default for PortMap {
    fn default() -> Self {
        let mut map = Self::empty();
        for (i, port) in (49153..=49156).enumerate() {
            map.insert(port, format!("INV{}", i + 1));
        }
        for (i, port) in (49157..=49158).enumerate() {
            map.insert(port, format!("CHU{}", i + 1));
        }
        for (i, port) in (49159..=49160).enumerate() {
            map.insert(port, format!("BCC{}", i + 1));
        }
        map.insert(49161, "DUMMY1");
        map
    }
}

impl PortMap {
    pub fn empty() -> Self {
        Self {
            ports: BTreeMap::new(),
        }
    }

    /// Map each device's receive port to its name.
    pub fn from_devices<'a>(devices: impl IntoIterator<Item = &'a DeviceIdentity>) -> Self {
        let mut map = Self::empty();
        for dev in devices {
            map.insert(dev.receive_port, dev.name.clone());
        }
        map
    }

    pub fn insert(&mut self, port: u16, device: impl Into<String>) {
        self.ports.insert(port, device.into());
    }

    pub fn device(&self, port: u16) -> Option<&str> {
        self.ports.get(&port).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

/// Category for a device id by prefix, or [`UNKNOWN`].
pub fn category_from_device(device: &str) -> &'static str {
    CATEGORY_PREFIXES
        .iter()
        .find(|prefix| device.starts_with(*prefix))
        .copied()
        .unwrap_or(UNKNOWN)
}

/// Result of routing one datagram.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatagramReport {
    pub port: u16,
    pub device: String,
    pub category: String,
    pub outcome: ParseOutcome,
}

pub struct ParseController {
    ports: PortMap,
    protocols: HashMap<String, Arc<dyn FrameProtocol>>,
    metrics: Option<MetricsHub>,
}

impl Default for ParseController {
    fn default() -> Self {
        Self::new(PortMap::default())
    }
}

impl ParseController {
    pub fn new(ports: PortMap) -> Self {
        Self {
            ports,
            protocols: HashMap::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, hub: MetricsHub) -> Self {
        hub.frames
            .protocols_registered
            .set(self.protocols.len() as i64);
        self.metrics = Some(hub);
        self
    }

    pub fn ports(&self) -> &PortMap {
        &self.ports
    }

    /// Register a codec under its own category, replacing any previous one.
    pub fn register(&mut self, protocol: Arc<dyn FrameProtocol>) {
        let category = protocol.category().to_string();
        debug!(%category, "protocol registered");
        self.protocols.insert(category, protocol);
        if let Some(hub) = &self.metrics {
            hub.frames
                .protocols_registered
                .set(self.protocols.len() as i64);
        }
    }

    /// Register the loader's codec for every category in its template.
    pub fn register_template_categories(&mut self, loader: &TemplateLoader) -> Result<usize> {
        let categories = loader.categories()?;
        for category in &categories {
            self.register(loader.protocol(category)?);
        }
        info!(count = categories.len(), "template categories registered");
        Ok(categories.len())
    }

    pub fn is_registered(&self, category: &str) -> bool {
        self.protocols.contains_key(category)
    }

    pub fn device_type_from_port(&self, port: u16) -> String {
        self.ports.device(port).unwrap_or(UNKNOWN).to_string()
    }

    /// Decode `data` received from `port`.
    ///
    /// Unmapped ports and unregistered categories produce an
    /// [`UnknownDeviceType`](DecodeIssue::UnknownDeviceType) outcome. Codec errors
    /// propagate unchanged.
    pub fn parse(&self, data: &[u8], port: u16) -> Result<DatagramReport> {
        let device = self.device_type_from_port(port);
        let category = category_from_device(&device);
        let outcome = match self.protocols.get(category) {
            Some(protocol) => protocol.parse_receive_frame(data)?,
            None => ParseOutcome::issue(DecodeIssue::UnknownDeviceType {
                device: device.clone(),
            }),
        };
        self.record(&outcome);
        debug!(port, %device, category, len = data.len(), "datagram parsed");
        Ok(DatagramReport {
            port,
            device,
            category: category.to_string(),
            outcome,
        })
    }

    fn record(&self, outcome: &ParseOutcome) {
        let Some(hub) = &self.metrics else {
            return;
        };
        match outcome.decode_issue() {
            None => hub.frames.frames_parsed.inc(),
            Some(DecodeIssue::InsufficientLength { .. }) => hub.frames.decode_errors.inc(),
            Some(DecodeIssue::UnknownDeviceType { .. }) => hub.frames.unknown_devices.inc(),
        }
    }
}

//! acu-control: command state, send-cycle frame building and inbound datagram routing

mod state;
pub use state::ControlState;

mod device;
pub use device::{Device, DeviceIdentity};

mod builder;
pub use builder::{FrameBuilder, TIMESTAMP_LEN, TIMESTAMP_OFFSET};

pub mod parse;
pub use parse::{category_from_device, DatagramReport, ParseController, PortMap, UNKNOWN};

mod metrics;
pub use metrics::{FrameMetrics, MetricsHub};

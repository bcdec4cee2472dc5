use crate::device::Device;
use crate::metrics::MetricsHub;
use crate::state::ControlState;
use acu_protocol::{FrameProtocol, Result};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, trace};

/// First byte of the `year%100, month, day, hour, minute, second` stamp.
pub const TIMESTAMP_OFFSET: usize = 2;
pub const TIMESTAMP_LEN: usize = 6;

/// Runs one send cycle for a device: snapshot, life signal, encode, timestamp.
pub struct FrameBuilder {
    state: Arc<ControlState>,
    device: Arc<Device>,
    protocol: Arc<dyn FrameProtocol>,
    metrics: Option<MetricsHub>,
}

impl FrameBuilder {
    pub fn new(
        state: Arc<ControlState>,
        device: Arc<Device>,
        protocol: Arc<dyn FrameProtocol>,
    ) -> Self {
        Self {
            state,
            device,
            protocol,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, hub: MetricsHub) -> Self {
        self.metrics = Some(hub);
        self
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn protocol(&self) -> &dyn FrameProtocol {
        self.protocol.as_ref()
    }

    /// Build the next frame stamped with the current wall-clock time.
    pub fn build(&self) -> Result<Vec<u8>> {
        self.build_at(wall_clock())
    }

    pub fn build_at(&self, now: OffsetDateTime) -> Result<Vec<u8>> {
        let snapshot = self.state.snapshot();
        let life = self.device.update_life();
        let mut frame = self
            .protocol
            .build_send_frame(&snapshot, i64::from(life))?;
        stamp_time(&mut frame, now);
        if let Some(hub) = &self.metrics {
            hub.frames.frames_built.inc();
        }
        debug!(
            device = self.device.name(),
            life,
            len = frame.len(),
            "send frame built"
        );
        Ok(frame)
    }
}

fn wall_clock() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn stamp_time(frame: &mut [u8], now: OffsetDateTime) {
    let Some(slot) = frame.get_mut(TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + TIMESTAMP_LEN) else {
        trace!(len = frame.len(), "frame too short for timestamp, skipped");
        return;
    };
    slot.copy_from_slice(&[
        now.year().rem_euclid(100) as u8,
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
    ]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceIdentity;
    use acu_protocol::{fixed, ProtocolError, TemplateLoader};
    use std::net::{IpAddr, Ipv4Addr};
    use time::{Date, Month};

    fn device(life: u16) -> Arc<Device> {
        Arc::new(Device::resume(
            DeviceIdentity {
                name: "INV1".into(),
                ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                send_port: 49153,
                receive_port: 49153,
                category: "INV".into(),
            },
            life,
        ))
    }

    fn at() -> OffsetDateTime {
        Date::from_calendar_date(2024, Month::March, 5)
            .unwrap()
            .with_hms(10, 20, 30)
            .unwrap()
            .assume_utc()
    }

    #[test]
    fn test_build_stamps_after_encoding() {
        let loader = TemplateLoader::embedded();
        let state = Arc::new(ControlState::new());
        state.set_command_bit(10, 3, true);
        state.set_frequency(32, 50.5);
        state.set_battery_temperature(42.0);
        let builder = FrameBuilder::new(state, device(2467), loader.protocol("INV").unwrap());

        let frame = builder.build_at(at()).unwrap();
        assert_eq!(frame.len(), 320);
        assert_eq!(&frame[0..2], &2468u16.to_be_bytes());
        assert_eq!(&frame[2..8], &[24, 3, 5, 10, 20, 30]);
        assert_eq!(frame[10], 0b1000);
        assert_eq!(&frame[32..34], &505u16.to_be_bytes());
        assert_eq!(&frame[128..130], &420u16.to_be_bytes());
    }

    #[test]
    fn test_life_signal_wraps_across_builds() {
        let state = Arc::new(ControlState::new());
        let builder = FrameBuilder::new(state, device(65534), Arc::new(fixed::InvProtocol));
        let first = builder.build_at(at()).unwrap();
        let second = builder.build_at(at()).unwrap();
        assert_eq!(&first[0..2], &[0xFF, 0xFF]);
        assert_eq!(&second[0..2], &[0, 0]);
    }

    #[test]
    fn test_each_build_returns_a_fresh_buffer() {
        let state = Arc::new(ControlState::new());
        state.set_command_bit(20, 0, true);
        let builder = FrameBuilder::new(Arc::clone(&state), device(0), Arc::new(fixed::BccProtocol));
        let first = builder.build_at(at()).unwrap();
        state.set_command_bit(20, 0, false);
        let second = builder.build_at(at()).unwrap();
        assert_eq!(first[20], 1);
        assert_eq!(second[20], 0);
    }

    #[test]
    fn test_encode_failure_propagates_and_counts_nothing() {
        let hub = MetricsHub::new().unwrap();
        let state = Arc::new(ControlState::new());
        state.set_frequency(32, 7000.0);
        let builder = FrameBuilder::new(Arc::clone(&state), device(0), Arc::new(fixed::InvProtocol))
            .with_metrics(hub.clone());
        assert!(matches!(
            builder.build(),
            Err(ProtocolError::EncodeRange { .. })
        ));
        assert_eq!(hub.frames.frames_built.get(), 0);

        state.set_frequency(32, 50.0);
        builder.build().unwrap();
        assert_eq!(hub.frames.frames_built.get(), 1);
    }

    #[test]
    fn test_short_frames_skip_the_stamp() {
        let mut frame = [0u8; 4];
        stamp_time(&mut frame, at());
        assert_eq!(frame, [0; 4]);
    }
}

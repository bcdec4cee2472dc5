use crate::codec::FrameProtocol;
use crate::decode::{bit_set, read_scaled, FaultReport, ParseOutcome, ReceiveFrame, StatusFlag};
use crate::encode::{clamp_life_signal, or_bits, put_scaled_scalar, put_u16};
use crate::snapshot::ControlSnapshot;
use crate::types::ValueType;
use crate::Result;

pub const DUMMY_SEND_LEN: usize = 32;
pub const DUMMY_RECEIVE_LEN: usize = 16;

/// Minimal bench-test codec: life signal, command bits and battery temperature
/// out; device info, two status bits and one fault byte back.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyProtocol;

impl FrameProtocol for DummyProtocol {
    fn category(&self) -> &str {
        "DUMMY"
    }

    fn frame_length_send(&self) -> usize {
        DUMMY_SEND_LEN
    }

    fn frame_length_receive(&self) -> usize {
        DUMMY_RECEIVE_LEN
    }

    fn build_send_frame(&self, snapshot: &ControlSnapshot, life_signal: i64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; DUMMY_SEND_LEN];
        put_u16(&mut buf, 0, clamp_life_signal(life_signal));
        or_bits(&mut buf, &snapshot.command_bits);
        put_scaled_scalar(
            &mut buf,
            "battery_temperature",
            8,
            snapshot.battery_temperature,
            10.0,
        )?;
        Ok(buf)
    }

    fn parse_receive_frame(&self, data: &[u8]) -> Result<ParseOutcome> {
        if data.len() < DUMMY_RECEIVE_LEN {
            return Ok(ParseOutcome::insufficient(DUMMY_RECEIVE_LEN, data.len()));
        }
        let fault_byte = data[10];
        let mut labels = Vec::new();
        if fault_byte & 0b01 != 0 {
            labels.push("Dummy fault A".to_string());
        }
        if fault_byte & 0b10 != 0 {
            labels.push("Dummy fault B".to_string());
        }
        Ok(ParseOutcome::Frame(ReceiveFrame {
            category: "DUMMY".to_string(),
            device_info: vec![
                read_scaled(data, "Life signal", 0, ValueType::U16, 1.0)?,
                read_scaled(data, "Software code", 2, ValueType::U16, 1.0)?,
                read_scaled(data, "Software version", 4, ValueType::U16, 1.0)?,
            ],
            run_parameters: vec![read_scaled(data, "Test value", 6, ValueType::U16, 0.1)?],
            status_flags: vec![
                StatusFlag {
                    label: "Running".to_string(),
                    active: bit_set(data, 8, 0),
                },
                StatusFlag {
                    label: "Fault".to_string(),
                    active: bit_set(data, 8, 1),
                },
            ],
            faults: FaultReport::from_labels(labels, fault_byte != 0),
        }))
    }
}

use crate::codec::FrameProtocol;
use crate::decode::{
    bit_set, read_scaled, FaultReport, FieldValue, ParseOutcome, ReceiveFrame, StatusFlag,
};
use crate::encode::{
    clamp_life_signal, or_bits, pack_flags, put_scaled_map, put_scaled_scalar, put_u16,
};
use crate::snapshot::ControlSnapshot;
use crate::types::{CategorySpec, SendOperation, TemplateSpec, ValueFieldSpec};
use crate::Result;
use std::sync::Arc;

/// Codec that executes a [`TemplateSpec`] for one category.
#[derive(Debug, Clone)]
pub struct TemplateProtocol {
    spec: Arc<TemplateSpec>,
    category: CategorySpec,
    receive_length: usize,
}

impl TemplateProtocol {
    pub fn new(spec: Arc<TemplateSpec>, category: &str) -> Result<Self> {
        let category = spec.category(category)?.clone();
        let receive_length = spec.receive_length(&category);
        Ok(Self {
            spec,
            category,
            receive_length,
        })
    }

    pub fn spec(&self) -> &TemplateSpec {
        &self.spec
    }

    pub fn category_spec(&self) -> &CategorySpec {
        &self.category
    }

    fn apply(
        &self,
        op: &SendOperation,
        buf: &mut [u8],
        snap: &ControlSnapshot,
        life: u16,
    ) -> Result<()> {
        match *op {
            SendOperation::LifeSignalU16 { offset } => {
                put_u16(buf, offset, life);
            }
            SendOperation::DictBitset { source } => or_bits(buf, snap.bits(source)),
            SendOperation::DictU16Scaled { source, factor } => {
                put_scaled_map(buf, source.key(), snap.analog(source), factor)?
            }
            SendOperation::DictPackedByte { source, offset } => {
                pack_flags(buf, offset, snap.flags(source))
            }
            SendOperation::ScalarU16Scaled {
                source,
                offset,
                factor,
            } => put_scaled_scalar(buf, source.key(), offset, snap.scalar(source), factor)?,
        }
        Ok(())
    }
}

fn read_fields(data: &[u8], specs: &[ValueFieldSpec]) -> Result<Vec<FieldValue>> {
    specs
        .iter()
        .map(|f| read_scaled(data, &f.label, f.offset, f.value_type, f.scale))
        .collect()
}

impl FrameProtocol for TemplateProtocol {
    fn category(&self) -> &str {
        &self.category.id
    }

    fn frame_length_send(&self) -> usize {
        self.spec.frame_length_send
    }

    fn frame_length_receive(&self) -> usize {
        self.receive_length
    }

    fn build_send_frame(&self, snapshot: &ControlSnapshot, life_signal: i64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.spec.frame_length_send];
        let life = clamp_life_signal(life_signal);
        for op in &self.spec.send_operations {
            self.apply(op, &mut buf, snapshot, life)?;
        }
        Ok(buf)
    }

    fn parse_receive_frame(&self, data: &[u8]) -> Result<ParseOutcome> {
        if data.len() < self.receive_length {
            return Ok(ParseOutcome::insufficient(self.receive_length, data.len()));
        }
        let cat = &self.category;

        let status_flags = cat
            .status_flags
            .iter()
            .map(|s| StatusFlag {
                label: s.label.clone(),
                active: bit_set(data, s.byte, s.bit),
            })
            .collect();

        let mut labels = Vec::new();
        let mut any_set = false;
        for fault in &cat.faults {
            let value = data.get(fault.byte).copied().unwrap_or(0);
            if value == 0 {
                continue;
            }
            any_set = true;
            labels.extend(
                fault
                    .bits
                    .iter()
                    .filter(|(bit, _)| value & (1 << **bit) != 0)
                    .map(|(_, label)| label.clone()),
            );
        }

        Ok(ParseOutcome::Frame(ReceiveFrame {
            category: cat.id.clone(),
            device_info: read_fields(data, &self.spec.device_info)?,
            run_parameters: read_fields(data, &cat.run_parameters)?,
            status_flags,
            faults: FaultReport::from_labels(labels, any_set),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse_str, DecodeIssue, ProtocolError, DEFAULT_TEMPLATE};

    fn protocol(category: &str) -> TemplateProtocol {
        let spec = Arc::new(parse_str(DEFAULT_TEMPLATE).unwrap());
        TemplateProtocol::new(spec, category).unwrap()
    }

    #[test]
    fn test_send_scenario() {
        let inv = protocol("INV");
        let mut snap = ControlSnapshot::default();
        snap.command_bits.insert((10, 3), true);
        snap.frequency.insert(32, 50.5);
        snap.battery_temperature = 42.0;

        let frame = inv.build_send_frame(&snap, 2468).unwrap();
        assert_eq!(frame.len(), 320);
        assert_eq!(&frame[0..2], &2468u16.to_be_bytes());
        assert_eq!(frame[10], 0b0000_1000);
        assert_eq!(&frame[32..34], &505u16.to_be_bytes());
        assert_eq!(&frame[128..130], &420u16.to_be_bytes());
        // timestamp bytes stay zero until the frame builder stamps them
        assert!(frame[2..8].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_every_operation_kind() {
        let chu = protocol("CHU");
        let mut snap = ControlSnapshot::default();
        snap.start_time.insert(64, 30.0);
        snap.voltage.insert(96, 600.0);
        snap.voltage.insert(400, 1.0);
        snap.isolation.insert(1, true);
        snap.start.insert(0, true);
        snap.chu.insert(7, true);
        snap.redundant.insert(3, true);
        snap.redundant.insert(4, false);

        let frame = chu.build_send_frame(&snap, 70_000).unwrap();
        assert_eq!(&frame[0..2], &[0xFF, 0xFF]);
        assert_eq!(&frame[64..66], &30u16.to_be_bytes());
        assert_eq!(&frame[96..98], &2400u16.to_be_bytes());
        assert_eq!(frame[16], 0b0000_0010);
        assert_eq!(frame[17], 0b0000_0001);
        assert_eq!(frame[18], 0b1000_0000);
        assert_eq!(frame[19], 0b0000_1000);
    }

    #[test]
    fn test_encode_range_fails_the_build() {
        let inv = protocol("INV");
        let mut snap = ControlSnapshot::default();
        snap.frequency.insert(32, 7000.0);
        let err = inv.build_send_frame(&snap, 1).unwrap_err();
        assert!(matches!(err, ProtocolError::EncodeRange { ref field, raw, .. } if field == "frequency[32]" && raw == 70000.0));

        snap.frequency.insert(32, -5.0);
        assert!(inv.build_send_frame(&snap, 1).is_err());

        let mut snap = ControlSnapshot::default();
        snap.battery_temperature = -1.0;
        assert!(matches!(
            inv.build_send_frame(&snap, 1),
            Err(ProtocolError::EncodeRange { .. })
        ));
    }

    #[test]
    fn test_parse_short_buffer_is_a_structured_issue() {
        let inv = protocol("INV");
        let outcome = inv.parse_receive_frame(&[0u8; 10]).unwrap();
        assert_eq!(
            outcome.decode_issue(),
            Some(&DecodeIssue::InsufficientLength {
                expected: 64,
                actual: 10
            })
        );
        assert!(outcome.frame().is_none());

        // later well-formed frames still decode
        let outcome = inv.parse_receive_frame(&[0u8; 64]).unwrap();
        assert!(outcome.frame().is_some());
    }

    #[test]
    fn test_parse_inv_frame() {
        let inv = protocol("INV");
        let mut data = [0u8; 64];
        data[0..2].copy_from_slice(&7u16.to_be_bytes());
        data[4..6].copy_from_slice(&0x0102u16.to_be_bytes());
        data[12..14].copy_from_slice(&500u16.to_be_bytes());
        data[16..18].copy_from_slice(&(-125i16).to_be_bytes());
        data[48] = 0b0000_0101;
        data[52] = 0b0011_0011;
        data[53] = 0b1000_0101;

        let outcome = inv.parse_receive_frame(&data).unwrap();
        let frame = outcome.frame().unwrap();
        assert_eq!(frame.category, "INV");
        assert_eq!(frame.value("Life signal"), Some(7.0));
        assert_eq!(frame.value("Software version"), Some(258.0));
        assert!((frame.value("Output frequency (Hz)").unwrap() - 50.0).abs() < 1e-9);
        assert!((frame.value("Heatsink temperature (°C)").unwrap() + 12.5).abs() < 1e-9);
        assert_eq!(frame.flag("Running"), Some(true));
        assert_eq!(frame.flag("Ready"), Some(false));
        assert_eq!(frame.flag("Fault"), Some(true));

        assert_eq!(
            frame.faults.labels,
            vec![
                "Input overvoltage",
                "Input undervoltage",
                "Heatsink overtemperature",
                "IGBT fault",
                "Phase loss",
                "Fan failure",
                "Internal fault",
            ]
        );
        assert_eq!(frame.faults.count, 7);
    }

    #[test]
    fn test_all_zero_faults_report_normal() {
        let bcc = protocol("BCC");
        let outcome = bcc.parse_receive_frame(&[0u8; 70]).unwrap();
        let faults = &outcome.frame().unwrap().faults;
        assert_eq!(faults.labels, vec!["normal"]);
        assert_eq!(faults.count, 0);
    }

    #[test]
    fn test_bcc_fault_bits_differ_from_inv() {
        let mut data = [0u8; 64];
        data[52] = 0b0000_0100;
        let inv = protocol("INV").parse_receive_frame(&data).unwrap();
        let bcc = protocol("BCC").parse_receive_frame(&data).unwrap();
        assert_eq!(inv.frame().unwrap().faults.labels, vec!["Output overcurrent"]);
        assert_eq!(bcc.frame().unwrap().faults.labels, vec!["Charge overcurrent"]);
    }

    #[test]
    fn test_receive_length_override() {
        let text = DEFAULT_TEMPLATE.replace("    name: Battery converter\n", "    name: Battery converter\n    receive_length: 56\n");
        let spec = Arc::new(parse_str(&text).unwrap());
        let bcc = TemplateProtocol::new(spec, "BCC").unwrap();
        assert_eq!(bcc.frame_length_receive(), 56);
        assert!(bcc.parse_receive_frame(&[0u8; 56]).unwrap().frame().is_some());
    }
}

//! Hand-written codecs for the converter categories.
//!
//! These mirror the embedded default template byte for byte and serve as the
//! reference the template engine is checked against. INV and CHU share fault
//! meanings; BCC reuses the same fault bytes for battery-side faults.

use crate::codec::FrameProtocol;
use crate::decode::{
    bit_set, read_scaled, FaultReport, FieldValue, ParseOutcome, ReceiveFrame, StatusFlag,
};
use crate::dummy::DummyProtocol;
use crate::encode::{
    clamp_life_signal, or_bits, pack_flags, put_scaled_map, put_scaled_scalar, put_u16,
};
use crate::snapshot::ControlSnapshot;
use crate::types::ValueType;
use crate::Result;
use std::sync::Arc;

pub const SEND_FRAME_LEN: usize = 320;
pub const RECEIVE_FRAME_LEN: usize = 64;

pub const LIFE_SIGNAL_OFFSET: usize = 0;
pub const ISOLATION_OFFSET: usize = 16;
pub const START_OFFSET: usize = 17;
pub const CHU_OFFSET: usize = 18;
pub const REDUNDANT_OFFSET: usize = 19;
pub const BATTERY_TEMPERATURE_OFFSET: usize = 128;

pub const FREQUENCY_FACTOR: f64 = 10.0;
pub const START_TIME_FACTOR: f64 = 1.0;
pub const VOLTAGE_FACTOR: f64 = 4.0;
pub const TEMPERATURE_FACTOR: f64 = 10.0;

pub const STATUS_BYTE: usize = 48;
pub const FAULT_BYTE_1: usize = 52;
pub const FAULT_BYTE_2: usize = 53;

const CONVERTER_FAULTS_1: [&str; 8] = [
    "Input overvoltage",
    "Input undervoltage",
    "Output overcurrent",
    "Output short circuit",
    "Heatsink overtemperature",
    "IGBT fault",
    "DC link overvoltage",
    "DC link undervoltage",
];

const CONVERTER_FAULTS_2: [&str; 8] = [
    "Phase loss",
    "Ground fault",
    "Fan failure",
    "Contactor failure",
    "Precharge failure",
    "Communication timeout",
    "Sensor fault",
    "Internal fault",
];

const BATTERY_FAULTS_1: [&str; 8] = [
    "Battery overvoltage",
    "Battery undervoltage",
    "Charge overcurrent",
    "Discharge overcurrent",
    "Battery overtemperature",
    "Battery undertemperature",
    "Cell imbalance",
    "BMS communication loss",
];

const BATTERY_FAULTS_2: [&str; 8] = [
    "Insulation fault",
    "Precharge failure",
    "Contactor welded",
    "Fuse blown",
    "Fan failure",
    "Converter overtemperature",
    "Sensor fault",
    "Internal fault",
];

const CONVERTER_STATUS: [&str; 5] = ["Running", "Ready", "Fault", "Warning", "Contactor closed"];
const BATTERY_STATUS: [&str; 6] = ["Running", "Ready", "Fault", "Warning", "Charging", "Discharging"];

/// Hand-written codec for the auxiliary inverter.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvProtocol;

/// Hand-written codec for the battery charger.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChuProtocol;

/// Hand-written codec for the battery converter.
#[derive(Debug, Clone, Copy, Default)]
pub struct BccProtocol;

/// Hand-written codec for a category, if one exists.
pub fn protocol_for(category: &str) -> Option<Arc<dyn FrameProtocol>> {
    match category {
        "INV" => Some(Arc::new(InvProtocol)),
        "CHU" => Some(Arc::new(ChuProtocol)),
        "BCC" => Some(Arc::new(BccProtocol)),
        "DUMMY" => Some(Arc::new(DummyProtocol)),
        _ => None,
    }
}

/// Send layout shared by all converter categories.
fn build_converter_frame(snap: &ControlSnapshot, life_signal: i64) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; SEND_FRAME_LEN];
    put_u16(&mut buf, LIFE_SIGNAL_OFFSET, clamp_life_signal(life_signal));
    or_bits(&mut buf, &snap.command_bits);
    put_scaled_map(&mut buf, "frequency", &snap.frequency, FREQUENCY_FACTOR)?;
    put_scaled_map(&mut buf, "start_time", &snap.start_time, START_TIME_FACTOR)?;
    put_scaled_map(&mut buf, "voltage", &snap.voltage, VOLTAGE_FACTOR)?;
    pack_flags(&mut buf, ISOLATION_OFFSET, &snap.isolation);
    pack_flags(&mut buf, START_OFFSET, &snap.start);
    pack_flags(&mut buf, CHU_OFFSET, &snap.chu);
    pack_flags(&mut buf, REDUNDANT_OFFSET, &snap.redundant);
    put_scaled_scalar(
        &mut buf,
        "battery_temperature",
        BATTERY_TEMPERATURE_OFFSET,
        snap.battery_temperature,
        TEMPERATURE_FACTOR,
    )?;
    Ok(buf)
}

fn device_info(data: &[u8]) -> Result<Vec<FieldValue>> {
    Ok(vec![
        read_scaled(data, "Life signal", 0, ValueType::U16, 1.0)?,
        read_scaled(data, "Software code", 2, ValueType::U16, 1.0)?,
        read_scaled(data, "Software version", 4, ValueType::U16, 1.0)?,
    ])
}

fn status(data: &[u8], labels: &[&str]) -> Vec<StatusFlag> {
    labels
        .iter()
        .enumerate()
        .map(|(bit, label)| StatusFlag {
            label: (*label).to_string(),
            active: bit_set(data, STATUS_BYTE, bit as u8),
        })
        .collect()
}

fn faults(data: &[u8], first: &[&str; 8], second: &[&str; 8]) -> FaultReport {
    let mut labels = Vec::new();
    let mut any_set = false;
    for (byte, names) in [(FAULT_BYTE_1, first), (FAULT_BYTE_2, second)] {
        let value = data.get(byte).copied().unwrap_or(0);
        if value == 0 {
            continue;
        }
        any_set = true;
        for (bit, name) in names.iter().enumerate() {
            if value & (1 << bit) != 0 {
                labels.push((*name).to_string());
            }
        }
    }
    FaultReport::from_labels(labels, any_set)
}

fn frame(
    category: &str,
    data: &[u8],
    run_parameters: Vec<FieldValue>,
    status_labels: &[&str],
    fault_labels: (&[&str; 8], &[&str; 8]),
) -> Result<ParseOutcome> {
    Ok(ParseOutcome::Frame(ReceiveFrame {
        category: category.to_string(),
        device_info: device_info(data)?,
        run_parameters,
        status_flags: status(data, status_labels),
        faults: faults(data, fault_labels.0, fault_labels.1),
    }))
}

impl FrameProtocol for InvProtocol {
    fn category(&self) -> &str {
        "INV"
    }

    fn frame_length_send(&self) -> usize {
        SEND_FRAME_LEN
    }

    fn frame_length_receive(&self) -> usize {
        RECEIVE_FRAME_LEN
    }

    fn build_send_frame(&self, snapshot: &ControlSnapshot, life_signal: i64) -> Result<Vec<u8>> {
        build_converter_frame(snapshot, life_signal)
    }

    fn parse_receive_frame(&self, data: &[u8]) -> Result<ParseOutcome> {
        if data.len() < RECEIVE_FRAME_LEN {
            return Ok(ParseOutcome::insufficient(RECEIVE_FRAME_LEN, data.len()));
        }
        let run = vec![
            read_scaled(data, "Output voltage (V)", 8, ValueType::U16, 0.1)?,
            read_scaled(data, "Output current (A)", 10, ValueType::U16, 0.1)?,
            read_scaled(data, "Output frequency (Hz)", 12, ValueType::U16, 0.1)?,
            read_scaled(data, "DC link voltage (V)", 14, ValueType::U16, 1.0)?,
            read_scaled(data, "Heatsink temperature (°C)", 16, ValueType::I16, 0.1)?,
            read_scaled(data, "Output power (kW)", 18, ValueType::U16, 0.1)?,
        ];
        frame(
            "INV",
            data,
            run,
            &CONVERTER_STATUS,
            (&CONVERTER_FAULTS_1, &CONVERTER_FAULTS_2),
        )
    }
}

impl FrameProtocol for ChuProtocol {
    fn category(&self) -> &str {
        "CHU"
    }

    fn frame_length_send(&self) -> usize {
        SEND_FRAME_LEN
    }

    fn frame_length_receive(&self) -> usize {
        RECEIVE_FRAME_LEN
    }

    fn build_send_frame(&self, snapshot: &ControlSnapshot, life_signal: i64) -> Result<Vec<u8>> {
        build_converter_frame(snapshot, life_signal)
    }

    fn parse_receive_frame(&self, data: &[u8]) -> Result<ParseOutcome> {
        if data.len() < RECEIVE_FRAME_LEN {
            return Ok(ParseOutcome::insufficient(RECEIVE_FRAME_LEN, data.len()));
        }
        // No output frequency; battery temperature sits at 20.
        let run = vec![
            read_scaled(data, "Charging voltage (V)", 8, ValueType::U16, 0.1)?,
            read_scaled(data, "Charging current (A)", 10, ValueType::U16, 0.1)?,
            read_scaled(data, "Input voltage (V)", 14, ValueType::U16, 1.0)?,
            read_scaled(data, "Heatsink temperature (°C)", 16, ValueType::I16, 0.1)?,
            read_scaled(data, "Battery temperature (°C)", 20, ValueType::I16, 0.1)?,
        ];
        frame(
            "CHU",
            data,
            run,
            &CONVERTER_STATUS,
            (&CONVERTER_FAULTS_1, &CONVERTER_FAULTS_2),
        )
    }
}

impl FrameProtocol for BccProtocol {
    fn category(&self) -> &str {
        "BCC"
    }

    fn frame_length_send(&self) -> usize {
        SEND_FRAME_LEN
    }

    fn frame_length_receive(&self) -> usize {
        RECEIVE_FRAME_LEN
    }

    fn build_send_frame(&self, snapshot: &ControlSnapshot, life_signal: i64) -> Result<Vec<u8>> {
        build_converter_frame(snapshot, life_signal)
    }

    fn parse_receive_frame(&self, data: &[u8]) -> Result<ParseOutcome> {
        if data.len() < RECEIVE_FRAME_LEN {
            return Ok(ParseOutcome::insufficient(RECEIVE_FRAME_LEN, data.len()));
        }
        let run = vec![
            read_scaled(data, "Battery voltage (V)", 8, ValueType::U16, 0.1)?,
            read_scaled(data, "Battery current (A)", 10, ValueType::I16, 0.1)?,
            read_scaled(data, "State of charge (%)", 12, ValueType::U8, 1.0)?,
            read_scaled(data, "DC bus voltage (V)", 14, ValueType::U16, 1.0)?,
            read_scaled(data, "Battery temperature (°C)", 16, ValueType::I16, 0.1)?,
        ];
        frame(
            "BCC",
            data,
            run,
            &BATTERY_STATUS,
            (&BATTERY_FAULTS_1, &BATTERY_FAULTS_2),
        )
    }
}

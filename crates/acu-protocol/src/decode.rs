use crate::types::ValueType;
use crate::{ProtocolError, Result};
use serde::Serialize;
use thiserror::Error;

/// Label reported when no fault byte has any bit set.
pub const NORMAL_FAULT_LABEL: &str = "normal";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldValue {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusFlag {
    pub label: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaultReport {
    pub labels: Vec<String>,
    pub count: usize,
}

impl FaultReport {
    pub fn normal() -> Self {
        Self {
            labels: vec![NORMAL_FAULT_LABEL.to_string()],
            count: 0,
        }
    }

    /// Build the report from collected labels; `any_set` tells whether any
    /// configured fault byte was nonzero.
    pub fn from_labels(labels: Vec<String>, any_set: bool) -> Self {
        if !any_set {
            return Self::normal();
        }
        let count = labels.len();
        Self { labels, count }
    }

    pub fn is_normal(&self) -> bool {
        self.count == 0 && self.labels.len() == 1 && self.labels[0] == NORMAL_FAULT_LABEL
    }
}

/// Fully decoded receive frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiveFrame {
    pub category: String,
    pub device_info: Vec<FieldValue>,
    pub run_parameters: Vec<FieldValue>,
    pub status_flags: Vec<StatusFlag>,
    pub faults: FaultReport,
}

impl ReceiveFrame {
    pub fn value(&self, label: &str) -> Option<f64> {
        self.device_info
            .iter()
            .chain(&self.run_parameters)
            .find(|f| f.label == label)
            .map(|f| f.value)
    }

    pub fn flag(&self, label: &str) -> Option<bool> {
        self.status_flags
            .iter()
            .find(|f| f.label == label)
            .map(|f| f.active)
    }
}

/// Expected, recoverable reasons a datagram produced no frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecodeIssue {
    #[error("insufficient length: expected at least {expected} bytes, got {actual}")]
    InsufficientLength { expected: usize, actual: usize },
    #[error("unknown device type: {device}")]
    UnknownDeviceType { device: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ParseOutcome {
    Frame(ReceiveFrame),
    Error { issue: DecodeIssue, message: String },
}

impl ParseOutcome {
    pub fn issue(issue: DecodeIssue) -> Self {
        let message = issue.to_string();
        ParseOutcome::Error { issue, message }
    }

    pub fn insufficient(expected: usize, actual: usize) -> Self {
        Self::issue(DecodeIssue::InsufficientLength { expected, actual })
    }

    pub fn frame(&self) -> Option<&ReceiveFrame> {
        match self {
            ParseOutcome::Frame(frame) => Some(frame),
            ParseOutcome::Error { .. } => None,
        }
    }

    pub fn decode_issue(&self) -> Option<&DecodeIssue> {
        match self {
            ParseOutcome::Frame(_) => None,
            ParseOutcome::Error { issue, .. } => Some(issue),
        }
    }
}

/// Read a big-endian value of the given type, unscaled.
pub(crate) fn read_raw(data: &[u8], offset: usize, ty: ValueType) -> Option<f64> {
    let end = offset.checked_add(ty.width())?;
    let b = data.get(offset..end)?;
    let v = match ty {
        ValueType::U8 => f64::from(b[0]),
        ValueType::I8 => f64::from(i8::from_be_bytes([b[0]])),
        ValueType::U16 => f64::from(u16::from_be_bytes([b[0], b[1]])),
        ValueType::I16 => f64::from(i16::from_be_bytes([b[0], b[1]])),
        ValueType::U32 => f64::from(u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
        ValueType::I32 => f64::from(i32::from_be_bytes([b[0], b[1], b[2], b[3]])),
    };
    Some(v)
}

pub(crate) fn read_scaled(
    data: &[u8],
    label: &str,
    offset: usize,
    ty: ValueType,
    scale: f64,
) -> Result<FieldValue> {
    let raw = read_raw(data, offset, ty).ok_or_else(|| ProtocolError::FieldOutOfBounds {
        label: label.to_string(),
        offset,
        width: ty.width(),
        len: data.len(),
    })?;
    Ok(FieldValue {
        label: label.to_string(),
        value: raw * scale,
    })
}

pub(crate) fn bit_set(data: &[u8], byte: usize, bit: u8) -> bool {
    data.get(byte).is_some_and(|b| bit < 8 && b & (1 << bit) != 0)
}

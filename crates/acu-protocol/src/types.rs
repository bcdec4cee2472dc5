use crate::snapshot::{AnalogChannel, BitField, FlagGroup, ScalarField};
use crate::{ProtocolError, Result};
use serde::Serialize;
use std::collections::BTreeMap;

/// A validated frame template: send encoding plus per-category receive layouts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateSpec {
    pub name: String,
    pub version: String,
    pub frame_length_send: usize,
    pub frame_length_receive: usize,
    pub send_operations: Vec<SendOperation>,
    pub device_info: Vec<ValueFieldSpec>,
    pub categories: BTreeMap<String, CategorySpec>,
}

impl TemplateSpec {
    pub fn category(&self, id: &str) -> Result<&CategorySpec> {
        self.categories
            .get(id)
            .ok_or_else(|| ProtocolError::UnknownCategory {
                category: id.to_string(),
                template: self.name.clone(),
            })
    }

    /// Receive length for a category, honoring its override.
    pub fn receive_length(&self, category: &CategorySpec) -> usize {
        category.receive_length.unwrap_or(self.frame_length_receive)
    }
}

/// One declarative step of send-frame encoding, applied in document order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SendOperation {
    /// Clamped big-endian u16 heartbeat.
    LifeSignalU16 { offset: usize },
    /// OR every true `(byte, bit)` entry into the frame.
    DictBitset { source: BitField },
    /// Each `offset -> value` entry as `round(value * factor)` big-endian u16.
    DictU16Scaled { source: AnalogChannel, factor: f64 },
    /// A bit-index map packed into the byte at `offset`.
    DictPackedByte { source: FlagGroup, offset: usize },
    ScalarU16Scaled {
        source: ScalarField,
        offset: usize,
        factor: f64,
    },
}

impl SendOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            SendOperation::LifeSignalU16 { .. } => "life_signal_u16",
            SendOperation::DictBitset { .. } => "dict_bitset",
            SendOperation::DictU16Scaled { .. } => "dict_u16_scaled",
            SendOperation::DictPackedByte { .. } => "dict_packed_byte",
            SendOperation::ScalarU16Scaled { .. } => "scalar_u16_scaled",
        }
    }
}

/// Big-endian binary types a value field may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
}

impl ValueType {
    pub fn width(self) -> usize {
        match self {
            ValueType::U8 | ValueType::I8 => 1,
            ValueType::U16 | ValueType::I16 => 2,
            ValueType::U32 | ValueType::I32 => 4,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "u8" => Some(ValueType::U8),
            "i8" => Some(ValueType::I8),
            "u16" => Some(ValueType::U16),
            "i16" => Some(ValueType::I16),
            "u32" => Some(ValueType::U32),
            "i32" => Some(ValueType::I32),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueFieldSpec {
    pub label: String,
    pub offset: usize,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub scale: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusFlagSpec {
    pub byte: usize,
    pub bit: u8,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaultMapSpec {
    pub byte: usize,
    pub bits: BTreeMap<u8, String>,
}

/// Receive-frame layout of one device category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySpec {
    pub id: String,
    pub name: String,
    pub run_parameters: Vec<ValueFieldSpec>,
    pub status_flags: Vec<StatusFlagSpec>,
    pub faults: Vec<FaultMapSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receive_length: Option<usize>,
}

//! Template document validation.
//!
//! Documents are walked as a raw `serde_yaml::Value` tree rather than deserialized
//! directly, so every rejection can name the exact path that caused it, e.g.
//! `send_operations[3].offset must be an integer`. Nothing is returned unless the
//! whole document validates.

use crate::snapshot::{AnalogChannel, BitField, FlagGroup, ScalarField};
use crate::types::{
    CategorySpec, FaultMapSpec, SendOperation, StatusFlagSpec, TemplateSpec, ValueFieldSpec,
    ValueType,
};
use crate::{ProtocolError, Result};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

/// Parse YAML (or JSON) text into a validated template.
pub fn parse_str(text: &str) -> Result<TemplateSpec> {
    let raw: Value = serde_yaml::from_str(text)
        .map_err(|e| ProtocolError::Config(format!("template is not valid YAML: {e}")))?;
    parse(&raw)
}

/// Validate an already-parsed document tree.
pub fn parse(raw: &Value) -> Result<TemplateSpec> {
    let root = Node::root(raw);
    root.mapping()?;

    let metadata = root.required("metadata")?;
    let name = metadata.required("name")?.text()?;
    let version = metadata.required("version")?.version()?;

    let lengths = root.required("frame_lengths")?;
    let frame_length_send = lengths.required("send")?.positive()?;
    let frame_length_receive = lengths.required("receive")?.positive()?;

    let send_operations = root
        .required("send_operations")?
        .items()?
        .iter()
        .map(send_operation)
        .collect::<Result<Vec<_>>>()?;

    let categories_node = root.required("categories")?;
    let entries = categories_node.mapping()?;
    if entries.is_empty() {
        return Err(invalid(
            categories_node.label(),
            "must define at least one category",
        ));
    }
    let mut categories = BTreeMap::new();
    for (key, value) in entries {
        let id = key
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| invalid(categories_node.label(), "keys must be category names"))?;
        let node = categories_node.child(id, value);
        categories.insert(id.to_string(), category(id, &node, frame_length_receive)?);
    }

    // Device-info fields are shared, so they must fit the shortest receive frame.
    let shortest = categories
        .values()
        .map(|c| c.receive_length.unwrap_or(frame_length_receive))
        .min()
        .unwrap_or(frame_length_receive);
    let device_info = root
        .list("device_info")?
        .iter()
        .map(|n| value_field(n, shortest))
        .collect::<Result<Vec<_>>>()?;

    Ok(TemplateSpec {
        name,
        version,
        frame_length_send,
        frame_length_receive,
        send_operations,
        device_info,
        categories,
    })
}

fn send_operation(node: &Node<'_>) -> Result<SendOperation> {
    node.mapping()?;
    let kind = node.required("kind")?.text()?;
    if let Some(offset) = node.field("offset")? {
        offset.integer()?;
    }
    if let Some(factor) = node.field("factor")? {
        factor.number()?;
    }

    let op = match kind.as_str() {
        "life_signal_u16" => SendOperation::LifeSignalU16 {
            offset: node.required("offset")?.integer()?,
        },
        "dict_bitset" => SendOperation::DictBitset {
            source: source(node, BitField::from_key, BitField::expected_keys)?,
        },
        "dict_u16_scaled" => SendOperation::DictU16Scaled {
            source: source(node, AnalogChannel::from_key, AnalogChannel::expected_keys)?,
            factor: explicit_factor(node)?,
        },
        "dict_packed_byte" => SendOperation::DictPackedByte {
            source: source(node, FlagGroup::from_key, FlagGroup::expected_keys)?,
            offset: node.required("offset")?.integer()?,
        },
        "scalar_u16_scaled" => SendOperation::ScalarU16Scaled {
            source: source(node, ScalarField::from_key, ScalarField::expected_keys)?,
            offset: node.required("offset")?.integer()?,
            factor: explicit_factor(node)?,
        },
        other => {
            return Err(invalid(
                &node.child_path("kind"),
                &format!("'{other}' is not a supported operation"),
            ))
        }
    };
    Ok(op)
}

fn source<T>(
    node: &Node<'_>,
    from_key: fn(&str) -> Option<T>,
    expected: fn() -> String,
) -> Result<T> {
    let src = node.required("source")?;
    let key = src.text()?;
    from_key(&key).ok_or_else(|| {
        invalid(
            src.label(),
            &format!(
                "'{key}' is not a valid source for this operation (expected one of: {})",
                expected()
            ),
        )
    })
}

fn explicit_factor(node: &Node<'_>) -> Result<f64> {
    match node.field("factor")? {
        Some(f) => f.number(),
        None => Err(invalid(
            &node.child_path("factor"),
            "is required for scaled operations",
        )),
    }
}

fn category(id: &str, node: &Node<'_>, default_len: usize) -> Result<CategorySpec> {
    node.mapping()?;
    let name = match node.field("name")? {
        Some(n) => n.text()?,
        None => id.to_string(),
    };
    let receive_length = node
        .field("receive_length")?
        .map(|n| n.positive())
        .transpose()?;
    let len = receive_length.unwrap_or(default_len);

    let run_parameters = node
        .list("run_parameters")?
        .iter()
        .map(|n| value_field(n, len))
        .collect::<Result<Vec<_>>>()?;
    let status_flags = node
        .list("status_flags")?
        .iter()
        .map(|n| status_flag(n, len))
        .collect::<Result<Vec<_>>>()?;
    let faults = node
        .list("faults")?
        .iter()
        .map(|n| fault_map(n, len))
        .collect::<Result<Vec<_>>>()?;

    Ok(CategorySpec {
        id: id.to_string(),
        name,
        run_parameters,
        status_flags,
        faults,
        receive_length,
    })
}

fn value_field(node: &Node<'_>, frame_len: usize) -> Result<ValueFieldSpec> {
    node.mapping()?;
    let label = node.required("label")?.text()?;
    let offset_node = node.required("offset")?;
    let offset = offset_node.integer()?;
    let value_type = match node.field("type")? {
        Some(t) => {
            let name = t.text()?;
            ValueType::from_name(&name).ok_or_else(|| {
                invalid(
                    t.label(),
                    &format!("'{name}' is not a supported type (expected u8, i8, u16, i16, u32 or i32)"),
                )
            })?
        }
        None => ValueType::U16,
    };
    let scale = match node.field("scale")? {
        Some(s) => s.number()?,
        None => 1.0,
    };
    fits(&offset_node, offset, value_type.width(), frame_len)?;
    Ok(ValueFieldSpec {
        label,
        offset,
        value_type,
        scale,
    })
}

fn status_flag(node: &Node<'_>, frame_len: usize) -> Result<StatusFlagSpec> {
    node.mapping()?;
    let byte_node = node.required("byte")?;
    let byte = byte_node.integer()?;
    fits(&byte_node, byte, 1, frame_len)?;
    Ok(StatusFlagSpec {
        byte,
        bit: node.required("bit")?.bit()?,
        label: node.required("label")?.text()?,
    })
}

fn fault_map(node: &Node<'_>, frame_len: usize) -> Result<FaultMapSpec> {
    node.mapping()?;
    let byte_node = node.required("byte")?;
    let byte = byte_node.integer()?;
    fits(&byte_node, byte, 1, frame_len)?;

    let bits_node = node.required("bits")?;
    let entries = bits_node.mapping()?;
    if entries.is_empty() {
        return Err(invalid(
            bits_node.label(),
            "must map at least one bit to a label",
        ));
    }
    let mut bits = BTreeMap::new();
    for (key, value) in entries {
        let bit = bit_key(key).ok_or_else(|| {
            invalid(
                bits_node.label(),
                &format!(
                    "key {} must be an integer bit index between 0 and 7",
                    describe_key(key)
                ),
            )
        })?;
        let label = bits_node.child(&bit.to_string(), value).text()?;
        bits.insert(bit, label);
    }
    Ok(FaultMapSpec { byte, bits })
}

fn fits(node: &Node<'_>, offset: usize, width: usize, len: usize) -> Result<()> {
    match offset.checked_add(width) {
        Some(end) if end <= len => Ok(()),
        _ => Err(invalid(
            node.label(),
            &format!("{offset} (width {width}) lies outside the {len}-byte receive frame"),
        )),
    }
}

fn bit_key(key: &Value) -> Option<u8> {
    let raw = match key {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    u8::try_from(raw).ok().filter(|b| *b < 8)
}

fn describe_key(key: &Value) -> String {
    match key {
        Value::String(s) => format!("'{s}'"),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        _ => "of this shape".to_string(),
    }
}

fn invalid(path: &str, message: &str) -> ProtocolError {
    ProtocolError::Config(format!("{path} {message}"))
}

/// A value inside the document together with the path that reached it.
struct Node<'a> {
    value: &'a Value,
    path: String,
}

impl<'a> Node<'a> {
    fn root(value: &'a Value) -> Self {
        Node {
            value,
            path: String::new(),
        }
    }

    fn label(&self) -> &str {
        if self.path.is_empty() {
            "template root"
        } else {
            &self.path
        }
    }

    fn child_path(&self, key: &str) -> String {
        if self.path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{key}", self.path)
        }
    }

    fn child(&self, key: &str, value: &'a Value) -> Node<'a> {
        Node {
            value,
            path: self.child_path(key),
        }
    }

    fn mapping(&self) -> Result<&'a Mapping> {
        self.value
            .as_mapping()
            .ok_or_else(|| invalid(self.label(), "must be a mapping"))
    }

    fn field(&self, key: &str) -> Result<Option<Node<'a>>> {
        Ok(self
            .mapping()?
            .get(key)
            .filter(|v| !v.is_null())
            .map(|v| self.child(key, v)))
    }

    fn required(&self, key: &str) -> Result<Node<'a>> {
        self.field(key)?
            .ok_or_else(|| invalid(&self.child_path(key), "is required"))
    }

    fn items(&self) -> Result<Vec<Node<'a>>> {
        let seq = self
            .value
            .as_sequence()
            .ok_or_else(|| invalid(self.label(), "must be a list"))?;
        Ok(seq
            .iter()
            .enumerate()
            .map(|(i, value)| Node {
                value,
                path: format!("{}[{i}]", self.path),
            })
            .collect())
    }

    /// Optional list; absent means empty.
    fn list(&self, key: &str) -> Result<Vec<Node<'a>>> {
        match self.field(key)? {
            Some(n) => n.items(),
            None => Ok(Vec::new()),
        }
    }

    fn text(&self) -> Result<String> {
        self.value
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| invalid(self.label(), "must be a non-empty string"))
    }

    fn version(&self) -> Result<String> {
        match self.value {
            Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            _ => Err(invalid(self.label(), "must be a string or number")),
        }
    }

    fn integer(&self) -> Result<usize> {
        match self.value.as_u64() {
            Some(v) => usize::try_from(v).map_err(|_| invalid(self.label(), "is too large")),
            None if self.value.as_i64().is_some() => {
                Err(invalid(self.label(), "must be a non-negative integer"))
            }
            None => Err(invalid(self.label(), "must be an integer")),
        }
    }

    fn positive(&self) -> Result<usize> {
        match self.integer()? {
            0 => Err(invalid(self.label(), "must be greater than zero")),
            v => Ok(v),
        }
    }

    fn bit(&self) -> Result<u8> {
        let v = self.integer()?;
        u8::try_from(v)
            .ok()
            .filter(|b| *b < 8)
            .ok_or_else(|| invalid(self.label(), "must be a bit index between 0 and 7"))
    }

    fn number(&self) -> Result<f64> {
        self.value
            .as_f64()
            .filter(|v| v.is_finite())
            .ok_or_else(|| invalid(self.label(), "must be a finite number"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_TEMPLATE;

    fn doc(send_ops: &str, categories: &str) -> String {
        format!(
            "metadata:\n  name: unit\n  version: 2\nframe_lengths:\n  send: 64\n  receive: 16\n\
             send_operations:\n{send_ops}\ncategories:\n{categories}\n"
        )
    }

    const ONE_CATEGORY: &str = "  INV:\n    name: Inverter\n    run_parameters:\n      - { label: Output voltage, offset: 8, scale: 0.1 }\n";

    fn config_message(err: ProtocolError) -> String {
        match err {
            ProtocolError::Config(msg) => msg,
            other => panic!("expected a configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_default_template_validates() {
        let spec = parse_str(DEFAULT_TEMPLATE).unwrap();
        assert_eq!(spec.frame_length_send, 320);
        assert_eq!(spec.frame_length_receive, 64);
        assert_eq!(
            spec.categories.keys().cloned().collect::<Vec<_>>(),
            vec!["BCC", "CHU", "INV"]
        );
        assert_eq!(spec.device_info.len(), 3);
        assert!(matches!(
            spec.send_operations[0],
            SendOperation::LifeSignalU16 { offset: 0 }
        ));
    }

    #[test]
    fn test_minimal_document() {
        let text = doc("  - { kind: life_signal_u16, offset: 0 }", ONE_CATEGORY);
        let spec = parse_str(&text).unwrap();
        assert_eq!(spec.version, "2");
        let inv = spec.category("INV").unwrap();
        assert_eq!(inv.run_parameters[0].value_type, ValueType::U16);
        assert_eq!(inv.run_parameters[0].scale, 0.1);
        assert!(spec.device_info.is_empty());
    }

    #[test]
    fn test_non_integer_offset_names_its_path() {
        let ops = "  - { kind: life_signal_u16, offset: 0 }\n\
                   \x20 - { kind: dict_bitset, source: command_bits }\n\
                   \x20 - { kind: dict_u16_scaled, source: frequency, factor: 10 }\n\
                   \x20 - { kind: dict_packed_byte, source: start, offset: 1.5 }";
        let err = parse_str(&doc(ops, ONE_CATEGORY)).unwrap_err();
        assert_eq!(
            config_message(err),
            "send_operations[3].offset must be an integer"
        );
    }

    #[test]
    fn test_operation_invariants() {
        let cases = [
            (
                "  - { kind: life_signal_u16 }",
                "send_operations[0].offset is required",
            ),
            (
                "  - { kind: dict_bitset, offset: 4 }",
                "send_operations[0].source is required",
            ),
            (
                "  - { kind: dict_packed_byte, source: isolation }",
                "send_operations[0].offset is required",
            ),
            (
                "  - { kind: scalar_u16_scaled, source: battery_temperature, offset: 4 }",
                "send_operations[0].factor is required for scaled operations",
            ),
            (
                "  - { kind: dict_u16_scaled, source: voltage }",
                "send_operations[0].factor is required for scaled operations",
            ),
            (
                "  - { kind: crc16, offset: 4 }",
                "send_operations[0].kind 'crc16' is not a supported operation",
            ),
        ];
        for (ops, expected) in cases {
            let err = parse_str(&doc(ops, ONE_CATEGORY)).unwrap_err();
            assert_eq!(config_message(err), expected, "ops: {ops}");
        }
    }

    #[test]
    fn test_source_must_match_operation_shape() {
        let ops = "  - { kind: dict_packed_byte, source: frequency, offset: 3 }";
        let msg = config_message(parse_str(&doc(ops, ONE_CATEGORY)).unwrap_err());
        assert!(msg.starts_with("send_operations[0].source 'frequency' is not a valid source"));
        assert!(msg.contains("isolation, start, chu, redundant"));
    }

    #[test]
    fn test_root_and_metadata_errors() {
        let msg = config_message(parse_str("- just\n- a list\n").unwrap_err());
        assert_eq!(msg, "template root must be a mapping");

        let text = doc("  []", ONE_CATEGORY).replace("  version: 2\n", "");
        let msg = config_message(parse_str(&text).unwrap_err());
        assert_eq!(msg, "metadata.version is required");

        let text = doc("  []", ONE_CATEGORY).replace("receive: 16", "receive: 0");
        let msg = config_message(parse_str(&text).unwrap_err());
        assert_eq!(msg, "frame_lengths.receive must be greater than zero");
    }

    #[test]
    fn test_empty_categories_rejected() {
        let text = doc("  []", "  {}");
        let msg = config_message(parse_str(&text).unwrap_err());
        assert_eq!(msg, "categories must define at least one category");
    }

    #[test]
    fn test_fault_bit_keys_must_be_integers() {
        let cats = "  BCC:\n    faults:\n      - byte: 12\n        bits: { 0: Overvoltage, high: Overtemperature }\n";
        let msg = config_message(parse_str(&doc("  []", cats)).unwrap_err());
        assert_eq!(
            msg,
            "categories.BCC.faults[0].bits key 'high' must be an integer bit index between 0 and 7"
        );

        let cats = "  BCC:\n    faults:\n      - byte: 12\n        bits: {}\n";
        let msg = config_message(parse_str(&doc("  []", cats)).unwrap_err());
        assert_eq!(
            msg,
            "categories.BCC.faults[0].bits must map at least one bit to a label"
        );
    }

    #[test]
    fn test_string_bit_keys_accepted_for_json_documents() {
        let text = r#"{
            "metadata": {"name": "json", "version": "1.0"},
            "frame_lengths": {"send": 16, "receive": 8},
            "send_operations": [{"kind": "life_signal_u16", "offset": 0}],
            "categories": {"CHU": {"faults": [{"byte": 6, "bits": {"2": "Fan failure"}}]}}
        }"#;
        let spec = parse_str(text).unwrap();
        let chu = spec.category("CHU").unwrap();
        assert_eq!(chu.name, "CHU");
        assert_eq!(chu.faults[0].bits.get(&2).map(String::as_str), Some("Fan failure"));
    }

    #[test]
    fn test_receive_fields_must_fit_the_frame() {
        let cats = "  INV:\n    receive_length: 12\n    run_parameters:\n      - { label: Power, offset: 10, type: u32 }\n";
        let msg = config_message(parse_str(&doc("  []", cats)).unwrap_err());
        assert_eq!(
            msg,
            "categories.INV.run_parameters[0].offset 10 (width 4) lies outside the 12-byte receive frame"
        );

        let cats = "  INV:\n    status_flags:\n      - { byte: 3, bit: 8, label: Running }\n";
        let msg = config_message(parse_str(&doc("  []", cats)).unwrap_err());
        assert_eq!(
            msg,
            "categories.INV.status_flags[0].bit must be a bit index between 0 and 7"
        );
    }

    #[test]
    fn test_unknown_category_lookup() {
        let spec = parse_str(&doc("  []", ONE_CATEGORY)).unwrap();
        let err = spec.category("XYZ").unwrap_err();
        assert_eq!(
            err,
            ProtocolError::UnknownCategory {
                category: "XYZ".into(),
                template: "unit".into()
            }
        );
    }
}

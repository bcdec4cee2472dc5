use thiserror::Error;

pub type Result<T, E = ProtocolError> = core::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    /// Malformed schema; the message starts with the offending path.
    #[error("invalid template: {0}")]
    Config(String),
    #[error("category '{category}' is not defined in template '{template}'")]
    UnknownCategory { category: String, template: String },
    #[error("reading template source: {0}")]
    Source(String),
    #[error("{field}: scaled value {raw} (from {value}) does not fit in an unsigned 16-bit field")]
    EncodeRange { field: String, value: f64, raw: f64 },
    #[error("field '{label}' at offset {offset} (width {width}) lies outside a {len}-byte frame")]
    FieldOutOfBounds {
        label: String,
        offset: usize,
        width: usize,
        len: usize,
    },
}

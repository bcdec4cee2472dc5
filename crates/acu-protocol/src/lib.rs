//! acu-protocol: declarative binary frame codec for auxiliary-converter control units

mod error;
pub use error::{ProtocolError, Result};

mod snapshot;
pub use snapshot::{AnalogChannel, BitField, ControlSnapshot, FlagGroup, ScalarField};

mod types;
pub use types::*;

mod validate;
pub use validate::{parse, parse_str};

mod encode;

mod decode;
pub use decode::{
    DecodeIssue, FaultReport, FieldValue, ParseOutcome, ReceiveFrame, StatusFlag,
    NORMAL_FAULT_LABEL,
};

mod codec;
pub use codec::{CodecKind, FrameProtocol};

mod engine;
pub use engine::TemplateProtocol;

mod loader;
pub use loader::{TemplateLoader, TemplateSource};

mod dummy;
pub use dummy::{DummyProtocol, DUMMY_RECEIVE_LEN, DUMMY_SEND_LEN};

pub mod fixed;

/// Template compiled into the crate; used by [`TemplateSource::Embedded`].
pub const DEFAULT_TEMPLATE: &str = include_str!("../templates/acu_default.yaml");

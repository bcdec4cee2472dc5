use crate::decode::ParseOutcome;
use crate::snapshot::ControlSnapshot;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Stateless frame codec bound to one device category.
///
/// Implementations never keep state between calls; one instance may be shared
/// by every device of its category across threads.
pub trait FrameProtocol: Send + Sync {
    fn category(&self) -> &str;

    fn frame_length_send(&self) -> usize;

    fn frame_length_receive(&self) -> usize;

    /// Encode a fresh, zero-initialized send frame from `snapshot`.
    ///
    /// `life_signal` is clamped to `0..=65535`. Scaled values that do not fit an
    /// unsigned 16-bit field fail the whole build.
    fn build_send_frame(&self, snapshot: &ControlSnapshot, life_signal: i64) -> Result<Vec<u8>>;

    /// Decode an inbound frame. A short buffer yields
    /// [`DecodeIssue::InsufficientLength`](crate::DecodeIssue) instead of partial fields.
    fn parse_receive_frame(&self, data: &[u8]) -> Result<ParseOutcome>;
}

/// Which codec family a session uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    /// Driven by the loaded frame template.
    #[default]
    Template,
    /// Hand-written INV/CHU/BCC/DUMMY codecs.
    Fixed,
}

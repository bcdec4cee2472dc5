use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct FrameMetrics {
    pub frames_built: IntCounter,
    pub frames_parsed: IntCounter,
    pub decode_errors: IntCounter,
    pub unknown_devices: IntCounter,
    pub protocols_registered: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub frames: FrameMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let frames = FrameMetrics {
            frames_built: IntCounter::new("acu_frames_built", "Send frames built")?,
            frames_parsed: IntCounter::new("acu_frames_parsed", "Receive frames decoded")?,
            decode_errors: IntCounter::new(
                "acu_decode_errors",
                "Receive frames rejected as too short",
            )?,
            unknown_devices: IntCounter::new(
                "acu_unknown_devices",
                "Datagrams from ports or categories with no registered codec",
            )?,
            protocols_registered: IntGauge::new(
                "acu_protocols_registered",
                "Codecs registered with the parse controller",
            )?,
        };
        registry.register(Box::new(frames.frames_built.clone()))?;
        registry.register(Box::new(frames.frames_parsed.clone()))?;
        registry.register(Box::new(frames.decode_errors.clone()))?;
        registry.register(Box::new(frames.unknown_devices.clone()))?;
        registry.register(Box::new(frames.protocols_registered.clone()))?;
        Ok(Self { registry, frames })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exposition_lists_every_series() {
        let hub = MetricsHub::new().unwrap();
        hub.frames.frames_built.inc();
        hub.frames.protocols_registered.set(3);
        let text = hub.encode_text();
        assert!(text.contains("acu_frames_built 1"));
        assert!(text.contains("acu_frames_parsed 0"));
        assert!(text.contains("acu_decode_errors 0"));
        assert!(text.contains("acu_unknown_devices 0"));
        assert!(text.contains("acu_protocols_registered 3"));
    }
}

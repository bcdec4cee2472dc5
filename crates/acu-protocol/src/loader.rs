use crate::engine::TemplateProtocol;
use crate::types::TemplateSpec;
use crate::validate::parse_str;
use crate::{ProtocolError, Result, DEFAULT_TEMPLATE};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::info;

/// Where a [`TemplateLoader`] reads its document from.
#[derive(Debug, Clone, Default)]
pub enum TemplateSource {
    /// The template compiled into this crate.
    #[default]
    Embedded,
    File(PathBuf),
    Inline(String),
}

/// Loads a template once and hands out one cached codec per category.
///
/// Owned by the application's composition root; there is no process-wide
/// default instance.
#[derive(Debug, Default)]
pub struct TemplateLoader {
    source: TemplateSource,
    spec: OnceLock<Result<Arc<TemplateSpec>>>,
    protocols: Mutex<HashMap<String, Arc<TemplateProtocol>>>,
}

impl TemplateLoader {
    pub fn new(source: TemplateSource) -> Self {
        Self {
            source,
            spec: OnceLock::new(),
            protocols: Mutex::new(HashMap::new()),
        }
    }

    pub fn embedded() -> Self {
        Self::new(TemplateSource::Embedded)
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::new(TemplateSource::File(path.into()))
    }

    pub fn source(&self) -> &TemplateSource {
        &self.source
    }

    /// The validated template. The source is read and validated on first call
    /// only; later calls (including after a failure) return the memoized result.
    pub fn spec(&self) -> Result<Arc<TemplateSpec>> {
        self.spec
            .get_or_init(|| {
                let spec = read_source(&self.source).and_then(|text| parse_str(&text))?;
                info!(
                    template = %spec.name,
                    version = %spec.version,
                    categories = spec.categories.len(),
                    "frame template loaded"
                );
                Ok(Arc::new(spec))
            })
            .clone()
    }

    /// Codec for `category`, created on first request and cached afterwards.
    pub fn protocol(&self, category: &str) -> Result<Arc<TemplateProtocol>> {
        let spec = self.spec()?;
        let mut cache = self
            .protocols
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = cache.get(category) {
            return Ok(Arc::clone(existing));
        }
        let protocol = Arc::new(TemplateProtocol::new(spec, category)?);
        info!(category, "template protocol instantiated");
        cache.insert(category.to_string(), Arc::clone(&protocol));
        Ok(protocol)
    }

    pub fn categories(&self) -> Result<Vec<String>> {
        Ok(self.spec()?.categories.keys().cloned().collect())
    }
}

fn read_source(source: &TemplateSource) -> Result<String> {
    match source {
        TemplateSource::Embedded => Ok(DEFAULT_TEMPLATE.to_string()),
        TemplateSource::Inline(text) => Ok(text.clone()),
        TemplateSource::File(path) => fs::read_to_string(path)
            .map_err(|e| ProtocolError::Source(format!("{}: {e}", path.display()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FrameProtocol;

    #[test]
    fn test_spec_is_memoized() {
        let loader = TemplateLoader::embedded();
        let a = loader.spec().unwrap();
        let b = loader.spec().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_protocols_are_cached_per_category() {
        let loader = TemplateLoader::default();
        let inv1 = loader.protocol("INV").unwrap();
        let inv2 = loader.protocol("INV").unwrap();
        let bcc = loader.protocol("BCC").unwrap();
        assert!(Arc::ptr_eq(&inv1, &inv2));
        assert!(!Arc::ptr_eq(&inv1, &bcc));
        assert_eq!(bcc.category(), "BCC");
    }

    #[test]
    fn test_unregistered_category_is_a_configuration_error() {
        let loader = TemplateLoader::embedded();
        let err = loader.protocol("XYZ").unwrap_err();
        assert_eq!(
            err,
            ProtocolError::UnknownCategory {
                category: "XYZ".into(),
                template: "acu-default".into()
            }
        );
        assert_eq!(err.to_string(), "category 'XYZ' is not defined in template 'acu-default'");
    }

    #[test]
    fn test_failed_load_is_memoized_too() {
        let loader = TemplateLoader::new(TemplateSource::Inline("metadata: 3".into()));
        let first = loader.spec().unwrap_err();
        assert_eq!(first, loader.spec().unwrap_err());
        assert!(matches!(first, ProtocolError::Config(ref m) if m == "metadata must be a mapping"));
        assert!(loader.protocol("INV").is_err());
    }

    #[test]
    fn test_missing_file_reports_source_error() {
        let loader = TemplateLoader::from_file("/nonexistent/acu-template.yaml");
        assert!(matches!(loader.spec(), Err(ProtocolError::Source(_))));
        assert!(loader.categories().is_err());
    }
}

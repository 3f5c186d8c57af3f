//! Engine catalog: read-only descriptors of the generation engines.
//!
//! Engines are plain data. Selection happens in [`crate::selector`];
//! nothing here carries behavior beyond lookup and validation.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::EngineId;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Price tier of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineTier {
    Free,
    Low,
    Medium,
    Premium,
}

impl EngineTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::Premium => "premium",
        }
    }
}

/// Feature flags advertised by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    TextToVideo,
    ImageToVideo,
    Audio,
    Upscale,
    /// Runs without external services; used as the escalation fallback.
    MinimalDependency,
}

// ---------------------------------------------------------------------------
// EngineDescriptor
// ---------------------------------------------------------------------------

/// A single catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineDescriptor {
    pub id: EngineId,
    pub name: String,
    pub tier: EngineTier,
    pub cost_per_second: f64,
    /// Quality on a 0-10 scale.
    pub quality_rating: f64,
    pub max_duration_seconds: f64,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Typical time to produce one clip, when known.
    #[serde(default)]
    pub typical_latency_seconds: Option<f64>,
}

impl EngineDescriptor {
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn supports_all(&self, required: &[Capability]) -> bool {
        required.iter().all(|c| self.has_capability(*c))
    }

    /// Cost of producing `duration_seconds` of output.
    pub fn cost_for(&self, duration_seconds: f64) -> f64 {
        self.cost_per_second * duration_seconds
    }
}

// ---------------------------------------------------------------------------
// EngineCatalog
// ---------------------------------------------------------------------------

/// Maximum quality rating accepted in a catalog.
pub const MAX_QUALITY_RATING: f64 = 10.0;

/// An immutable snapshot of the available engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineCatalog {
    engines: Vec<EngineDescriptor>,
}

impl EngineCatalog {
    /// Build a catalog, rejecting duplicate ids and nonsensical numbers.
    pub fn new(engines: Vec<EngineDescriptor>) -> Result<Self, CoreError> {
        let mut seen = HashSet::new();
        for engine in &engines {
            if !seen.insert(engine.id.as_str()) {
                return Err(CoreError::Validation(format!(
                    "Duplicate engine id '{}' in catalog",
                    engine.id
                )));
            }
            if engine.cost_per_second < 0.0 {
                return Err(CoreError::Validation(format!(
                    "Engine '{}' has a negative cost_per_second",
                    engine.id
                )));
            }
            if engine.max_duration_seconds <= 0.0 {
                return Err(CoreError::Validation(format!(
                    "Engine '{}' must allow a positive max_duration_seconds",
                    engine.id
                )));
            }
            if !(0.0..=MAX_QUALITY_RATING).contains(&engine.quality_rating) {
                return Err(CoreError::Validation(format!(
                    "Engine '{}' quality_rating must be within 0-{MAX_QUALITY_RATING}",
                    engine.id
                )));
            }
        }
        Ok(Self { engines })
    }

    /// Parse a catalog from a JSON array of descriptors.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let engines: Vec<EngineDescriptor> = serde_json::from_str(json)
            .map_err(|e| CoreError::Validation(format!("Invalid engine catalog JSON: {e}")))?;
        Self::new(engines)
    }

    /// Small default catalog used when no catalog file is configured.
    pub fn builtin() -> Self {
        use Capability::*;
        let engine = |id: &str,
                      name: &str,
                      tier,
                      cost,
                      quality,
                      max_duration,
                      capabilities: &[Capability],
                      latency| EngineDescriptor {
            id: id.to_string(),
            name: name.to_string(),
            tier,
            cost_per_second: cost,
            quality_rating: quality,
            max_duration_seconds: max_duration,
            capabilities: capabilities.to_vec(),
            typical_latency_seconds: Some(latency),
        };
        Self {
            engines: vec![
                engine(
                    "local-slideshow",
                    "Local Slideshow",
                    EngineTier::Free,
                    0.0,
                    3.0,
                    60.0,
                    &[ImageToVideo, MinimalDependency],
                    5.0,
                ),
                engine(
                    "open-motion",
                    "Open Motion",
                    EngineTier::Free,
                    0.0,
                    5.0,
                    10.0,
                    &[TextToVideo, ImageToVideo],
                    90.0,
                ),
                engine(
                    "swift-clip",
                    "Swift Clip",
                    EngineTier::Low,
                    0.02,
                    6.0,
                    10.0,
                    &[TextToVideo, ImageToVideo],
                    40.0,
                ),
                engine(
                    "studio-motion",
                    "Studio Motion",
                    EngineTier::Medium,
                    0.08,
                    7.5,
                    10.0,
                    &[TextToVideo, ImageToVideo, Audio],
                    120.0,
                ),
                engine(
                    "cinema-pro",
                    "Cinema Pro",
                    EngineTier::Premium,
                    0.35,
                    9.5,
                    20.0,
                    &[TextToVideo, ImageToVideo, Audio, Upscale],
                    300.0,
                ),
            ],
        }
    }

    pub fn engines(&self) -> &[EngineDescriptor] {
        &self.engines
    }

    pub fn get(&self, id: &str) -> Option<&EngineDescriptor> {
        self.engines.iter().find(|e| e.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str) -> EngineDescriptor {
        EngineDescriptor {
            id: id.to_string(),
            name: id.to_uppercase(),
            tier: EngineTier::Low,
            cost_per_second: 0.05,
            quality_rating: 6.0,
            max_duration_seconds: 10.0,
            capabilities: vec![Capability::TextToVideo],
            typical_latency_seconds: None,
        }
    }

    #[test]
    fn builtin_catalog_is_valid() {
        let builtin = EngineCatalog::builtin();
        assert!(EngineCatalog::new(builtin.engines().to_vec()).is_ok());
        assert!(builtin
            .engines()
            .iter()
            .any(|e| e.has_capability(Capability::MinimalDependency)));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let result = EngineCatalog::new(vec![descriptor("a"), descriptor("a")]);
        assert!(matches!(result, Err(CoreError::Validation(msg)) if msg.contains("Duplicate")));
    }

    #[test]
    fn zero_max_duration_is_rejected() {
        let mut bad = descriptor("a");
        bad.max_duration_seconds = 0.0;
        assert!(EngineCatalog::new(vec![bad]).is_err());
    }

    #[test]
    fn out_of_range_quality_is_rejected() {
        let mut bad = descriptor("a");
        bad.quality_rating = 11.0;
        assert!(EngineCatalog::new(vec![bad]).is_err());
    }

    #[test]
    fn from_json_parses_descriptor_list() {
        let json = r#"[{"id":"x","name":"X","tier":"premium","cost_per_second":0.5,
            "quality_rating":9,"max_duration_seconds":20,"capabilities":["audio"]}]"#;
        let catalog = EngineCatalog::from_json(json).unwrap();
        let x = catalog.get("x").unwrap();
        assert_eq!(x.tier, EngineTier::Premium);
        assert!(x.has_capability(Capability::Audio));
        assert!(x.typical_latency_seconds.is_none());
    }

    #[test]
    fn cost_scales_with_duration() {
        assert!((descriptor("a").cost_for(8.0) - 0.4).abs() < f64::EPSILON);
    }
}

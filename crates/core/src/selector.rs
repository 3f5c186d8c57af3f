//! Engine selection: a pure function from preferences and content shape
//! to a ranked engine choice with a cost estimate.
//!
//! Deterministic for a given catalog snapshot and inputs. Ties are
//! broken by engine id so repeated calls always agree.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::catalog::{Capability, EngineCatalog, EngineDescriptor, EngineTier};
use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Number of runner-up engines returned alongside the choice.
pub const MAX_ALTERNATIVES: usize = 3;

/// Weight of quality in the balanced score.
pub const BALANCED_WEIGHT_QUALITY: f64 = 0.6;

/// Weight of affordability in the balanced score.
pub const BALANCED_WEIGHT_COST: f64 = 0.4;

/// Seconds of latency assumed per quality point when an engine does not
/// publish a typical latency.
pub const LATENCY_SECS_PER_QUALITY_POINT: f64 = 30.0;

// ---------------------------------------------------------------------------
// Preferences
// ---------------------------------------------------------------------------

/// Which price tiers the caller is willing to pay for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostMode {
    Free,
    Budget,
    Premium,
    /// Let the selector choose across every tier.
    #[default]
    Auto,
}

impl CostMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Budget => "budget",
            Self::Premium => "premium",
            Self::Auto => "auto",
        }
    }

    /// Whether an engine of `tier` is eligible under this mode.
    pub fn allows(&self, tier: EngineTier) -> bool {
        match self {
            Self::Free => tier == EngineTier::Free,
            Self::Budget => matches!(tier, EngineTier::Low | EngineTier::Medium),
            Self::Premium => tier == EngineTier::Premium,
            Self::Auto => true,
        }
    }
}

/// How eligible engines are ranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityPreference {
    Fast,
    #[default]
    Balanced,
    Cinematic,
}

/// Caller preferences for engine selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SelectionPreferences {
    #[serde(default)]
    pub cost_mode: CostMode,
    #[serde(default)]
    pub quality: QualityPreference,
}

impl SelectionPreferences {
    pub fn new(cost_mode: CostMode, quality: QualityPreference) -> Self {
        Self { cost_mode, quality }
    }
}

/// What is being generated, as far as engine eligibility is concerned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentShape {
    pub duration_seconds: f64,
    #[serde(default)]
    pub required_capabilities: Vec<Capability>,
}

impl ContentShape {
    pub fn new(duration_seconds: f64) -> Self {
        Self {
            duration_seconds,
            required_capabilities: Vec::new(),
        }
    }

    pub fn requiring(mut self, capability: Capability) -> Self {
        if !self.required_capabilities.contains(&capability) {
            self.required_capabilities.push(capability);
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Estimated spend for the chosen engine plus the range across all
/// eligible engines.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostEstimate {
    pub estimated: f64,
    pub min: f64,
    pub max: f64,
}

/// Outcome of a successful selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSelection {
    pub engine: EngineDescriptor,
    pub alternatives: Vec<EngineDescriptor>,
    pub cost_estimate: CostEstimate,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Latency proxy used for the `fast` preference (lower is faster).
pub fn latency_proxy(engine: &EngineDescriptor) -> f64 {
    engine
        .typical_latency_seconds
        .unwrap_or(engine.quality_rating * LATENCY_SECS_PER_QUALITY_POINT)
}

/// Blended quality/affordability score in `0.0..=1.0` (higher is better).
///
/// `max_cost` is the highest per-second cost among the eligible engines.
pub fn balanced_score(engine: &EngineDescriptor, max_cost: f64) -> f64 {
    let quality = (engine.quality_rating / crate::catalog::MAX_QUALITY_RATING).clamp(0.0, 1.0);
    let affordability = if max_cost > 0.0 {
        (1.0 - engine.cost_per_second / max_cost).clamp(0.0, 1.0)
    } else {
        1.0
    };
    BALANCED_WEIGHT_QUALITY * quality + BALANCED_WEIGHT_COST * affordability
}

fn rank(eligible: &mut [&EngineDescriptor], quality: QualityPreference) {
    let max_cost = eligible
        .iter()
        .map(|e| e.cost_per_second)
        .fold(0.0_f64, f64::max);

    eligible.sort_by(|a, b| {
        let primary = match quality {
            QualityPreference::Fast => latency_proxy(a).total_cmp(&latency_proxy(b)),
            QualityPreference::Cinematic => b.quality_rating.total_cmp(&a.quality_rating),
            QualityPreference::Balanced => {
                balanced_score(b, max_cost).total_cmp(&balanced_score(a, max_cost))
            }
        };
        match primary {
            Ordering::Equal => a.id.cmp(&b.id),
            other => other,
        }
    });
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Choose an engine for `shape` under `preferences`.
///
/// Fails with [`CoreError::NoEligibleEngine`] when no engine in the
/// permitted tiers can produce the requested duration with the required
/// capabilities.
pub fn select(
    catalog: &EngineCatalog,
    preferences: &SelectionPreferences,
    shape: &ContentShape,
) -> Result<EngineSelection, CoreError> {
    let mut eligible: Vec<&EngineDescriptor> = catalog
        .engines()
        .iter()
        .filter(|e| preferences.cost_mode.allows(e.tier))
        .filter(|e| e.max_duration_seconds >= shape.duration_seconds)
        .filter(|e| e.supports_all(&shape.required_capabilities))
        .collect();

    if eligible.is_empty() {
        return Err(CoreError::NoEligibleEngine {
            cost_mode: preferences.cost_mode.as_str(),
            duration_seconds: shape.duration_seconds,
        });
    }

    rank(&mut eligible, preferences.quality);

    let costs: Vec<f64> = eligible
        .iter()
        .map(|e| e.cost_for(shape.duration_seconds))
        .collect();
    let min = costs.iter().copied().fold(f64::INFINITY, f64::min);
    let max = costs.iter().copied().fold(0.0_f64, f64::max);

    let chosen = eligible[0];
    let reason = format!(
        "{} ranked first of {} eligible engine(s) for cost mode '{}' and {:?} preference",
        chosen.name,
        eligible.len(),
        preferences.cost_mode.as_str(),
        preferences.quality,
    );

    Ok(EngineSelection {
        engine: chosen.clone(),
        alternatives: eligible
            .iter()
            .skip(1)
            .take(MAX_ALTERNATIVES)
            .map(|e| (*e).clone())
            .collect(),
        cost_estimate: CostEstimate {
            estimated: costs[0],
            min,
            max,
        },
        reason,
    })
}

/// Like [`select`], but widens to [`CostMode::Auto`] when the requested
/// tier has no eligible engine.
pub fn select_or_widen(
    catalog: &EngineCatalog,
    preferences: &SelectionPreferences,
    shape: &ContentShape,
) -> Result<EngineSelection, CoreError> {
    match select(catalog, preferences, shape) {
        Err(CoreError::NoEligibleEngine { .. }) if preferences.cost_mode != CostMode::Auto => {
            tracing::debug!(
                cost_mode = preferences.cost_mode.as_str(),
                duration_seconds = shape.duration_seconds,
                "No engine in requested tier, widening to all tiers",
            );
            let widened = SelectionPreferences {
                cost_mode: CostMode::Auto,
                ..*preferences
            };
            select(catalog, &widened, shape)
        }
        other => other,
    }
}

/// Pick the minimal-dependency engine used by the escalation fallback.
///
/// Tier restrictions are ignored; the fastest capable engine wins.
pub fn select_fallback(
    catalog: &EngineCatalog,
    shape: &ContentShape,
) -> Result<EngineSelection, CoreError> {
    let fallback_shape = shape.clone().requiring(Capability::MinimalDependency);
    select(
        catalog,
        &SelectionPreferences::new(CostMode::Auto, QualityPreference::Fast),
        &fallback_shape,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn engine(id: &str, tier: EngineTier, cost: f64, quality: f64, max: f64) -> EngineDescriptor {
        EngineDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            tier,
            cost_per_second: cost,
            quality_rating: quality,
            max_duration_seconds: max,
            capabilities: vec![Capability::TextToVideo],
            typical_latency_seconds: None,
        }
    }

    fn catalog() -> EngineCatalog {
        EngineCatalog::new(vec![
            engine("free-a", EngineTier::Free, 0.0, 4.0, 10.0),
            engine("free-b", EngineTier::Free, 0.0, 5.0, 10.0),
            engine("low-a", EngineTier::Low, 0.02, 6.0, 15.0),
            engine("mid-a", EngineTier::Medium, 0.1, 7.5, 20.0),
            engine("prem-a", EngineTier::Premium, 0.4, 9.5, 30.0),
            engine("prem-b", EngineTier::Premium, 0.3, 8.5, 30.0),
        ])
        .unwrap()
    }

    // -- Filtering --

    #[test]
    fn free_mode_over_free_tier_cap_has_no_eligible_engine() {
        let prefs = SelectionPreferences::new(CostMode::Free, QualityPreference::Balanced);
        let result = select(&catalog(), &prefs, &ContentShape::new(20.0));
        assert_matches!(
            result,
            Err(CoreError::NoEligibleEngine { cost_mode: "free", duration_seconds }) if duration_seconds == 20.0
        );
    }

    #[test]
    fn premium_mode_only_considers_premium_tier() {
        let prefs = SelectionPreferences::new(CostMode::Premium, QualityPreference::Balanced);
        let selection = select(&catalog(), &prefs, &ContentShape::new(5.0)).unwrap();
        assert_eq!(selection.engine.tier, EngineTier::Premium);
        assert!(selection
            .alternatives
            .iter()
            .all(|e| e.tier == EngineTier::Premium));
    }

    #[test]
    fn required_capability_filters_engines() {
        let prefs = SelectionPreferences::default();
        let shape = ContentShape::new(5.0).requiring(Capability::Audio);
        assert_matches!(
            select(&catalog(), &prefs, &shape),
            Err(CoreError::NoEligibleEngine { .. })
        );
    }

    // -- Ranking --

    #[test]
    fn cinematic_prefers_highest_quality() {
        let prefs = SelectionPreferences::new(CostMode::Auto, QualityPreference::Cinematic);
        let selection = select(&catalog(), &prefs, &ContentShape::new(5.0)).unwrap();
        assert_eq!(selection.engine.id, "prem-a");
        assert_eq!(selection.alternatives[0].id, "prem-b");
        assert_eq!(selection.alternatives.len(), MAX_ALTERNATIVES);
    }

    #[test]
    fn fast_prefers_lowest_latency_proxy() {
        let prefs = SelectionPreferences::new(CostMode::Auto, QualityPreference::Fast);
        let selection = select(&catalog(), &prefs, &ContentShape::new(5.0)).unwrap();
        assert_eq!(selection.engine.id, "free-a");
    }

    #[test]
    fn fast_uses_published_latency_when_present() {
        let mut quick = engine("quick", EngineTier::Premium, 0.5, 9.0, 10.0);
        quick.typical_latency_seconds = Some(1.0);
        let catalog =
            EngineCatalog::new(vec![engine("slowish", EngineTier::Free, 0.0, 2.0, 10.0), quick])
                .unwrap();
        let prefs = SelectionPreferences::new(CostMode::Auto, QualityPreference::Fast);
        let selection = select(&catalog, &prefs, &ContentShape::new(5.0)).unwrap();
        assert_eq!(selection.engine.id, "quick");
    }

    #[test]
    fn balanced_score_rewards_quality_and_low_cost() {
        let cheap_good = engine("a", EngineTier::Low, 0.0, 8.0, 10.0);
        let pricey_good = engine("b", EngineTier::Premium, 1.0, 8.0, 10.0);
        assert!(balanced_score(&cheap_good, 1.0) > balanced_score(&pricey_good, 1.0));
    }

    #[test]
    fn selection_is_deterministic() {
        let prefs = SelectionPreferences::default();
        let shape = ContentShape::new(8.0);
        let first = select(&catalog(), &prefs, &shape).unwrap();
        let second = select(&catalog(), &prefs, &shape).unwrap();
        assert_eq!(first, second);
    }

    // -- Cost estimate --

    #[test]
    fn cost_estimate_covers_eligible_range() {
        let prefs = SelectionPreferences::new(CostMode::Premium, QualityPreference::Cinematic);
        let selection = select(&catalog(), &prefs, &ContentShape::new(10.0)).unwrap();
        assert!((selection.cost_estimate.estimated - 4.0).abs() < 1e-9);
        assert!((selection.cost_estimate.min - 3.0).abs() < 1e-9);
        assert!((selection.cost_estimate.max - 4.0).abs() < 1e-9);
    }

    // -- Widening and fallback --

    #[test]
    fn select_or_widen_falls_back_to_all_tiers() {
        let prefs = SelectionPreferences::new(CostMode::Free, QualityPreference::Balanced);
        let selection = select_or_widen(&catalog(), &prefs, &ContentShape::new(20.0)).unwrap();
        assert!(selection.engine.max_duration_seconds >= 20.0);
    }

    #[test]
    fn select_fallback_requires_minimal_dependency() {
        assert_matches!(
            select_fallback(&catalog(), &ContentShape::new(5.0)),
            Err(CoreError::NoEligibleEngine { .. })
        );
        let selection = select_fallback(&EngineCatalog::builtin(), &ContentShape::new(5.0)).unwrap();
        assert!(selection
            .engine
            .has_capability(Capability::MinimalDependency));
    }
}

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::RiskError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AssetId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SiteId(pub u32);

/// Position of a taxonomy in the exposure's taxonomy list; indexes the
/// taxonomy-to-risk-model weighting map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TaxonomyIndex(pub usize);

/// Identifier of one named risk model (usually a taxonomy string such as
/// "RC/LFM/HBET:8-20"). Several risk ids can back a single exposure taxonomy
/// through the weighting map.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RiskId(pub String);

impl RiskId {
    pub fn new(id: impl Into<String>) -> Self {
        RiskId(id.into())
    }
}

impl fmt::Display for RiskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The asset-value category at risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum LossType {
    Structural,
    Nonstructural,
    Contents,
    Occupants,
}

impl LossType {
    pub const ALL: [LossType; 4] = [
        LossType::Structural,
        LossType::Nonstructural,
        LossType::Contents,
        LossType::Occupants,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LossType::Structural => "structural",
            LossType::Nonstructural => "nonstructural",
            LossType::Contents => "contents",
            LossType::Occupants => "occupants",
        }
    }
}

impl fmt::Display for LossType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of risk function stored under a catalog key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum FunctionKind {
    Vulnerability,
    VulnerabilityRetrofitted,
    Fragility,
    Consequence,
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FunctionKind::Vulnerability => "vulnerability",
            FunctionKind::VulnerabilityRetrofitted => "vulnerability_retrofitted",
            FunctionKind::Fragility => "fragility",
            FunctionKind::Consequence => "consequence",
        };
        f.write_str(s)
    }
}

/// Calculation mode. An exhaustive enum instead of a mode string: an illegal
/// mode is a parse error, not an evaluation-time failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CalcMode {
    /// Hazard-curve convolution producing loss-exceedance curves.
    ClassicalRisk,
    /// Original vs retrofitted expected annual loss, benefit-cost ratio.
    ClassicalBcr,
    /// Hazard-curve convolution with fragility, producing damage counts.
    ClassicalDamage,
    /// Per-event sampled losses from ground-motion fields. Also covers the
    /// scenario and ebrisk entry points, which share the same evaluation.
    EventBasedRisk,
    /// Per-event damage-state fractions from ground-motion fields. Also the
    /// event_based_damage entry point.
    ScenarioDamage,
}

impl CalcMode {
    /// True for the modes consuming hazard curves rather than per-event GMVs.
    pub fn is_curve_based(self) -> bool {
        matches!(
            self,
            CalcMode::ClassicalRisk | CalcMode::ClassicalBcr | CalcMode::ClassicalDamage
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CalcMode::ClassicalRisk => "classical_risk",
            CalcMode::ClassicalBcr => "classical_bcr",
            CalcMode::ClassicalDamage => "classical_damage",
            CalcMode::EventBasedRisk => "event_based_risk",
            CalcMode::ScenarioDamage => "scenario_damage",
        }
    }
}

impl fmt::Display for CalcMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalcMode {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self, RiskError> {
        match s {
            "classical" | "classical_risk" => Ok(CalcMode::ClassicalRisk),
            "classical_bcr" => Ok(CalcMode::ClassicalBcr),
            "classical_damage" => Ok(CalcMode::ClassicalDamage),
            "event_based_risk" | "ebrisk" | "scenario" | "scenario_risk" => {
                Ok(CalcMode::EventBasedRisk)
            }
            "scenario_damage" | "event_based_damage" => Ok(CalcMode::ScenarioDamage),
            other => Err(RiskError::UnknownCalcMode(other.to_string())),
        }
    }
}

/// Time-of-day label selecting which occupant count is at risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TimeEvent {
    Day,
    Night,
    Transit,
}

impl TimeEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeEvent::Day => "day",
            TimeEvent::Night => "night",
            TimeEvent::Transit => "transit",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calcmode_aliases_parse_to_shared_modes() {
        for alias in ["event_based_risk", "ebrisk", "scenario", "scenario_risk"] {
            assert_eq!(alias.parse::<CalcMode>().unwrap(), CalcMode::EventBasedRisk);
        }
        for alias in ["scenario_damage", "event_based_damage"] {
            assert_eq!(alias.parse::<CalcMode>().unwrap(), CalcMode::ScenarioDamage);
        }
        assert_eq!("classical".parse::<CalcMode>().unwrap(), CalcMode::ClassicalRisk);
    }

    #[test]
    fn calcmode_rejects_unknown_string() {
        let err = "clasical".parse::<CalcMode>().unwrap_err();
        assert!(err.to_string().contains("clasical"), "error must name the bad mode");
    }

    #[test]
    fn curve_based_split_matches_hazard_input() {
        assert!(CalcMode::ClassicalRisk.is_curve_based());
        assert!(CalcMode::ClassicalBcr.is_curve_based());
        assert!(CalcMode::ClassicalDamage.is_curve_based());
        assert!(!CalcMode::EventBasedRisk.is_curve_based());
        assert!(!CalcMode::ScenarioDamage.is_curve_based());
    }

    #[test]
    fn ids_serialize_as_plain_values() {
        let json = serde_json::to_string(&EventId(7)).unwrap();
        assert_eq!(json, "7");
        let json = serde_json::to_string(&RiskId::new("RC1")).unwrap();
        assert_eq!(json, "\"RC1\"");
    }
}

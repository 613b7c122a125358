use std::collections::HashMap;

use crate::error::{Result, RiskError};
use crate::types::{CalcMode, LossType, TimeEvent};

/// Every scalar parameter recognized by the risk models, with defaults,
/// validated once at construction. Risk models copy what they need from here;
/// nothing is attached to a model after it is built.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub calculation_mode: CalcMode,
    /// Hazard investigation time in years.
    pub investigation_time: f64,
    /// Risk investigation time in years; falls back to `investigation_time`.
    pub risk_investigation_time: Option<f64>,
    /// Subdivisions per loss-ratio interval for the classical convolution.
    pub lrem_steps_per_interval: usize,
    /// Subdivisions per intensity interval for classical_damage.
    pub steps_per_interval: usize,
    /// Which occupant count is at risk for the occupants loss type.
    pub time_event: Option<TimeEvent>,
    /// Sampled losses below this threshold are reported as zero.
    pub minimum_asset_loss: HashMap<LossType, f64>,
    /// Annual discount rate for classical_bcr.
    pub interest_rate: f64,
    /// Remaining life of the retrofit investment in years, for classical_bcr.
    pub asset_life_expectancy: f64,
    /// Master seed for all per-event random draws.
    pub master_seed: u64,
    /// Cap on any single damage-output allocation.
    pub max_output_bytes: u64,
}

impl RiskConfig {
    pub fn new(calculation_mode: CalcMode) -> Self {
        RiskConfig {
            calculation_mode,
            investigation_time: 50.0,
            risk_investigation_time: None,
            lrem_steps_per_interval: 5,
            steps_per_interval: 1,
            time_event: None,
            minimum_asset_loss: HashMap::new(),
            interest_rate: 0.0,
            asset_life_expectancy: 0.0,
            master_seed: 42,
            max_output_bytes: 2 << 30,
        }
    }

    pub fn risk_investigation_time(&self) -> f64 {
        self.risk_investigation_time.unwrap_or(self.investigation_time)
    }

    pub fn minimum_asset_loss(&self, loss_type: LossType) -> f64 {
        self.minimum_asset_loss.get(&loss_type).copied().unwrap_or(0.0)
    }

    /// Reject inconsistent parameter combinations before any model is built.
    pub fn validate(&self) -> Result<()> {
        if self.investigation_time <= 0.0 {
            return Err(RiskError::Config(format!(
                "investigation_time must be positive, got {}",
                self.investigation_time
            )));
        }
        if let Some(rt) = self.risk_investigation_time
            && rt <= 0.0
        {
            return Err(RiskError::Config(format!(
                "risk_investigation_time must be positive, got {rt}"
            )));
        }
        if self.lrem_steps_per_interval == 0 {
            return Err(RiskError::Config(
                "lrem_steps_per_interval must be at least 1".to_string(),
            ));
        }
        if self.steps_per_interval == 0 {
            return Err(RiskError::Config(
                "steps_per_interval must be at least 1".to_string(),
            ));
        }
        if let Some((lt, ml)) =
            self.minimum_asset_loss.iter().find(|(_, ml)| !ml.is_finite() || **ml < 0.0)
        {
            return Err(RiskError::Config(format!(
                "minimum_asset_loss[{lt}] must be a non-negative number, got {ml}"
            )));
        }
        if self.calculation_mode == CalcMode::ClassicalBcr {
            // A zero-rate or zero-life retrofit has an undefined discounted
            // cost difference; that is a user configuration error.
            if self.interest_rate <= 0.0 {
                return Err(RiskError::Config(format!(
                    "classical_bcr needs a positive interest_rate, got {}",
                    self.interest_rate
                )));
            }
            if self.asset_life_expectancy <= 0.0 {
                return Err(RiskError::Config(format!(
                    "classical_bcr needs a positive asset_life_expectancy, got {}",
                    self.asset_life_expectancy
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_for_plain_modes() {
        for mode in [
            CalcMode::ClassicalRisk,
            CalcMode::ClassicalDamage,
            CalcMode::EventBasedRisk,
            CalcMode::ScenarioDamage,
        ] {
            RiskConfig::new(mode).validate().unwrap();
        }
    }

    #[test]
    fn bcr_without_interest_rate_is_a_config_error() {
        let cfg = RiskConfig::new(CalcMode::ClassicalBcr);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("interest_rate"), "got: {err}");
    }

    #[test]
    fn bcr_without_life_expectancy_is_a_config_error() {
        let mut cfg = RiskConfig::new(CalcMode::ClassicalBcr);
        cfg.interest_rate = 0.05;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("asset_life_expectancy"), "got: {err}");
    }

    #[test]
    fn negative_minimum_asset_loss_rejected() {
        let mut cfg = RiskConfig::new(CalcMode::EventBasedRisk);
        cfg.minimum_asset_loss.insert(LossType::Contents, -1.0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_steps_rejected() {
        let mut cfg = RiskConfig::new(CalcMode::ClassicalRisk);
        cfg.lrem_steps_per_interval = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn risk_investigation_time_falls_back() {
        let mut cfg = RiskConfig::new(CalcMode::ClassicalDamage);
        cfg.investigation_time = 50.0;
        assert_eq!(cfg.risk_investigation_time(), 50.0);
        cfg.risk_investigation_time = Some(1.0);
        assert_eq!(cfg.risk_investigation_time(), 1.0);
    }
}

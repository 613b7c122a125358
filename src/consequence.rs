use std::collections::BTreeMap;

use crate::assets::Asset;
use crate::config::RiskConfig;
use crate::types::LossType;

/// Consequence coefficients grouped by consequence name, then by asset tag,
/// then by loss type. The coefficient vector has one entry per damage state
/// beyond no-damage.
#[derive(Debug, Clone, Default)]
pub struct ConsequenceModel {
    by_name: BTreeMap<String, BTreeMap<String, BTreeMap<LossType, Vec<f64>>>>,
}

impl ConsequenceModel {
    pub fn insert(
        &mut self,
        consequence: impl Into<String>,
        tag: impl Into<String>,
        loss_type: LossType,
        coefficients: Vec<f64>,
    ) {
        self.by_name
            .entry(consequence.into())
            .or_default()
            .entry(tag.into())
            .or_default()
            .insert(loss_type, coefficients);
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    /// Scalar consequence value for one asset given its damage-state
    /// fractions (`fractions[0]` is no-damage and carries no consequence):
    /// the dot product of the damaged-state fractions with the asset tag's
    /// coefficients, scaled by the asset value. An asset whose tag has no
    /// row in the table contributes zero.
    pub fn losses(
        &self,
        consequence: &str,
        asset: &Asset,
        loss_type: LossType,
        fractions: &[f64],
        cfg: &RiskConfig,
    ) -> f64 {
        let Some(coeffs) = self
            .by_name
            .get(consequence)
            .and_then(|by_tag| by_tag.get(&asset.tag))
            .and_then(|by_lt| by_lt.get(&loss_type))
        else {
            return 0.0;
        };
        let dot: f64 = fractions
            .iter()
            .skip(1)
            .zip(coeffs)
            .map(|(f, c)| f * c)
            .sum();
        dot * asset.value(loss_type, cfg.time_event)
    }
}

use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::{AssetId, LossType, SiteId, TimeEvent};

/// One exposure row. Assets are grouped by taxonomy before evaluation; the
/// group shares a site and therefore a hazard sample.
#[derive(Debug, Clone, Serialize)]
pub struct Asset {
    pub ordinal: AssetId,
    pub site: SiteId,
    /// Number of physical units represented by this row (used to turn damage
    /// probabilities into damage counts).
    pub number: f64,
    /// Replacement value per loss type.
    pub values: BTreeMap<LossType, f64>,
    /// Occupant counts per time-of-day label.
    pub occupants: BTreeMap<TimeEvent, f64>,
    /// Retrofit cost, required by classical_bcr only.
    pub retrofit_cost: Option<f64>,
    /// Tag value used to select consequence coefficient rows (usually the
    /// taxonomy string).
    pub tag: String,
}

impl Asset {
    pub fn new(ordinal: AssetId, site: SiteId, tag: impl Into<String>) -> Self {
        Asset {
            ordinal,
            site,
            number: 1.0,
            values: BTreeMap::new(),
            occupants: BTreeMap::new(),
            retrofit_cost: None,
            tag: tag.into(),
        }
    }

    pub fn with_value(mut self, loss_type: LossType, value: f64) -> Self {
        self.values.insert(loss_type, value);
        self
    }

    pub fn with_occupants(mut self, label: TimeEvent, count: f64) -> Self {
        self.occupants.insert(label, count);
        self
    }

    pub fn with_number(mut self, number: f64) -> Self {
        self.number = number;
        self
    }

    pub fn with_retrofit_cost(mut self, cost: f64) -> Self {
        self.retrofit_cost = Some(cost);
        self
    }

    /// The exposed value for a loss type. Occupants are valued by the
    /// configured time-of-day count when one is set; an asset with no value
    /// recorded for a loss type is exposed for zero.
    pub fn value(&self, loss_type: LossType, time_event: Option<TimeEvent>) -> f64 {
        if loss_type == LossType::Occupants
            && let Some(label) = time_event
        {
            return self.occupants.get(&label).copied().unwrap_or(0.0);
        }
        self.values.get(&loss_type).copied().unwrap_or(0.0)
    }
}

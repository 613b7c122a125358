use std::collections::BTreeMap;

use crate::error::{Result, RiskError};
use crate::types::{CalcMode, EventId};

/// A hazard curve: exceedance probability per intensity level for one
/// intensity measure type. Supplied by the hazard-retrieval layer; this crate
/// never computes hazard.
#[derive(Debug, Clone)]
pub struct HazardCurve {
    pub imt: String,
    pub imls: Vec<f64>,
    pub poes: Vec<f64>,
}

impl HazardCurve {
    pub fn new(imt: impl Into<String>, imls: Vec<f64>, poes: Vec<f64>) -> Result<Self> {
        let imt = imt.into();
        if imls.len() != poes.len() || imls.len() < 2 {
            return Err(RiskError::Config(format!(
                "hazard curve for {imt}: need matching imls/poes of length >= 2, \
                 got {} and {}",
                imls.len(),
                poes.len()
            )));
        }
        if imls.windows(2).any(|w| w[1] <= w[0]) {
            return Err(RiskError::Config(format!(
                "hazard curve for {imt}: intensity levels must be strictly increasing"
            )));
        }
        Ok(HazardCurve { imt, imls, poes })
    }
}

/// Per-event ground-motion values on one site, one column per intensity
/// measure type. All columns share the event-id axis.
#[derive(Debug, Clone)]
pub struct GmfTable {
    pub eids: Vec<EventId>,
    columns: BTreeMap<String, Vec<f64>>,
}

impl GmfTable {
    pub fn new(eids: Vec<EventId>) -> Self {
        GmfTable { eids, columns: BTreeMap::new() }
    }

    pub fn with_column(mut self, imt: impl Into<String>, gmvs: Vec<f64>) -> Result<Self> {
        let imt = imt.into();
        if gmvs.len() != self.eids.len() {
            return Err(RiskError::Config(format!(
                "GMF column {imt} has {} values for {} events",
                gmvs.len(),
                self.eids.len()
            )));
        }
        self.columns.insert(imt, gmvs);
        Ok(self)
    }

    pub fn column(&self, imt: &str) -> Result<&[f64]> {
        self.columns
            .get(imt)
            .map(Vec::as_slice)
            .ok_or_else(|| RiskError::MissingIntensityMeasure { imt: imt.to_string() })
    }

    pub fn num_events(&self) -> usize {
        self.eids.len()
    }
}

/// The hazard input for one (site, taxonomy) group: either curves (classical
/// modes) or a table of per-event GMVs (event-based and scenario modes).
#[derive(Debug, Clone)]
pub enum HazardSample {
    Curves(Vec<HazardCurve>),
    Gmfs(GmfTable),
}

impl HazardSample {
    pub fn curve_for(&self, mode: CalcMode, imt: &str) -> Result<&HazardCurve> {
        match self {
            HazardSample::Curves(curves) => curves
                .iter()
                .find(|c| c.imt == imt)
                .ok_or_else(|| RiskError::MissingIntensityMeasure { imt: imt.to_string() }),
            HazardSample::Gmfs(_) => {
                Err(RiskError::HazardMismatch { mode, expected: "hazard curves" })
            }
        }
    }

    pub fn gmfs(&self, mode: CalcMode) -> Result<&GmfTable> {
        match self {
            HazardSample::Gmfs(table) => Ok(table),
            HazardSample::Curves(_) => Err(RiskError::HazardMismatch {
                mode,
                expected: "per-event ground-motion values",
            }),
        }
    }

}

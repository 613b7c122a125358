use rand::Rng;
use rand_distr::{Beta, Distribution, LogNormal};

use crate::error::{Result, RiskError};
use crate::scientific;
use crate::types::{FunctionKind, LossType, RiskId};

/// Nudge applied to tie loss ratios apart; see
/// [`VulnerabilityFunction::strictly_increasing`].
pub const RATIO_EPS: f64 = 1e-9;

/// Damage fractions below this are treated as exactly zero.
pub const DAMAGE_FLOOR: f64 = 1e-7;

/// How a loss ratio is drawn around its interpolated mean.
#[derive(Debug, Clone, PartialEq)]
pub enum LossDistribution {
    /// Log-normal with the interpolated mean and coefficient of variation.
    Ln,
    /// Beta on [0, 1] with the interpolated mean and coefficient of variation.
    Bt,
    /// Probability mass over a discrete loss-ratio support, one probability
    /// column per intensity level. `probabilities[r][i]` is the probability of
    /// `loss_ratios[r]` at level `i`; columns sum to 1.
    Pm { loss_ratios: Vec<f64>, probabilities: Vec<Vec<f64>> },
    /// No spread: the mean loss ratio is the loss ratio.
    Degenerate,
}

impl LossDistribution {
    pub fn name(&self) -> &'static str {
        match self {
            LossDistribution::Ln => "LN",
            LossDistribution::Bt => "BT",
            LossDistribution::Pm { .. } => "PM",
            LossDistribution::Degenerate => "degenerate",
        }
    }
}

/// Intensity → loss-ratio distribution mapping.
///
/// Interpolation policy: means and coefficients of variation are **linearly**
/// interpolated between bracketing intensity levels. Below the lowest level
/// the loss ratio is zero; above the highest level the highest level's values
/// apply (no extrapolation). The PM distribution is the one exception: it is
/// defined per discrete level, so the **nearest** level's column is used.
#[derive(Debug, Clone)]
pub struct VulnerabilityFunction {
    pub id: RiskId,
    pub imt: String,
    pub imls: Vec<f64>,
    pub mean_loss_ratios: Vec<f64>,
    pub covs: Vec<f64>,
    pub distribution: LossDistribution,
}

impl VulnerabilityFunction {
    pub fn new(
        id: RiskId,
        imt: impl Into<String>,
        imls: Vec<f64>,
        mean_loss_ratios: Vec<f64>,
        covs: Vec<f64>,
        distribution: LossDistribution,
    ) -> Result<Self> {
        let invalid = |reason: String| RiskError::InvalidFunction { id: id.clone(), reason };
        if imls.len() < 2 {
            return Err(invalid(format!("need at least 2 intensity levels, got {}", imls.len())));
        }
        if imls.windows(2).any(|w| w[1] <= w[0]) {
            return Err(invalid("intensity levels must be strictly increasing".into()));
        }
        if mean_loss_ratios.len() != imls.len() {
            return Err(invalid(format!(
                "{} mean loss ratios for {} intensity levels",
                mean_loss_ratios.len(),
                imls.len()
            )));
        }
        if mean_loss_ratios.iter().any(|&r| !(0.0..=1.0).contains(&r)) {
            return Err(invalid("loss ratios must lie in [0, 1]".into()));
        }
        match &distribution {
            LossDistribution::Pm { loss_ratios, probabilities } => {
                if probabilities.len() != loss_ratios.len() {
                    return Err(invalid(format!(
                        "PM has {} probability rows for {} loss ratios",
                        probabilities.len(),
                        loss_ratios.len()
                    )));
                }
                if probabilities.iter().any(|row| row.len() != imls.len()) {
                    return Err(invalid(
                        "PM probability rows must have one column per intensity level".into(),
                    ));
                }
                for i in 0..imls.len() {
                    let col: f64 = probabilities.iter().map(|row| row[i]).sum();
                    if (col - 1.0).abs() > 1e-6 {
                        return Err(invalid(format!(
                            "PM probabilities at level {} sum to {col}, expected 1",
                            imls[i]
                        )));
                    }
                }
            }
            _ => {
                if covs.len() != imls.len() {
                    return Err(invalid(format!(
                        "{} coefficients of variation for {} intensity levels",
                        covs.len(),
                        imls.len()
                    )));
                }
                if covs.iter().any(|&c| c < 0.0) {
                    return Err(invalid("coefficients of variation must be >= 0".into()));
                }
            }
        }
        Ok(VulnerabilityFunction { id, imt: imt.into(), imls, mean_loss_ratios, covs, distribution })
    }

    /// Interpolated (mean loss ratio, cov) at a ground-motion value, or `None`
    /// below the lowest defined level.
    pub fn interpolate(&self, gmv: f64) -> Option<(f64, f64)> {
        if gmv < self.imls[0] {
            return None;
        }
        let mean = scientific::interp_clamped(&self.imls, &self.mean_loss_ratios, gmv);
        let cov = if self.covs.is_empty() {
            0.0
        } else {
            scientific::interp_clamped(&self.imls, &self.covs, gmv)
        };
        Some((mean, cov))
    }

    /// Draw one loss ratio at a ground-motion value, or zero below the lowest
    /// defined level.
    pub fn sample(&self, gmv: f64, rng: &mut impl Rng) -> f64 {
        match &self.distribution {
            LossDistribution::Pm { loss_ratios, probabilities } => {
                if gmv < self.imls[0] {
                    return 0.0;
                }
                let col = nearest_level(&self.imls, gmv);
                let u: f64 = rng.random();
                let mut acc = 0.0;
                for (ratio, row) in loss_ratios.iter().zip(probabilities) {
                    acc += row[col];
                    if u < acc {
                        return *ratio;
                    }
                }
                *loss_ratios.last().unwrap_or(&0.0)
            }
            dist => {
                let Some((mean, cov)) = self.interpolate(gmv) else {
                    return 0.0;
                };
                if mean == 0.0 || cov == 0.0 {
                    return mean;
                }
                match dist {
                    LossDistribution::Ln => {
                        let sigma2 = (1.0 + cov * cov).ln();
                        let mu = mean.ln() - sigma2 / 2.0;
                        // Parameters are finite by construction (mean > 0, cov > 0).
                        let dist = LogNormal::new(mu, sigma2.sqrt())
                            .expect("lognormal parameters validated at build");
                        dist.sample(rng)
                    }
                    LossDistribution::Bt => {
                        let var = (cov * mean).powi(2);
                        let max_var = mean * (1.0 - mean);
                        if var >= max_var || max_var == 0.0 {
                            // The (mean, cov) pair is outside the beta family;
                            // fall back to the mean rather than erroring per event.
                            return mean;
                        }
                        let nu = max_var / var - 1.0;
                        let dist = Beta::new(mean * nu, (1.0 - mean) * nu)
                            .expect("beta parameters validated above");
                        dist.sample(rng)
                    }
                    LossDistribution::Degenerate => mean,
                    LossDistribution::Pm { .. } => unreachable!("handled above"),
                }
            }
        }
    }

    /// Copy with mean loss ratios coerced to a strictly increasing sequence.
    /// Ties are nudged upward by [`RATIO_EPS`]; relative order is preserved
    /// and no value moves by more than a few epsilons. Required because the
    /// classical convolution assumes monotonic ratios.
    pub fn strictly_increasing(&self) -> Self {
        let mut out = self.clone();
        for i in 1..out.mean_loss_ratios.len() {
            if out.mean_loss_ratios[i] <= out.mean_loss_ratios[i - 1] {
                out.mean_loss_ratios[i] = out.mean_loss_ratios[i - 1] + RATIO_EPS;
            }
        }
        out
    }

    /// The canonical loss-ratio array for curve building: the mean ratios,
    /// prefixed with 0 when they start above it, subdivided `steps` times per
    /// interval.
    pub fn mean_loss_ratios_with_steps(&self, steps: usize) -> Vec<f64> {
        let mut ratios = self.mean_loss_ratios.clone();
        if ratios.first().copied().unwrap_or(0.0) > 0.0 {
            ratios.insert(0, 0.0);
        }
        scientific::fine_graining(&ratios, steps)
    }

    /// Midpoints of the intensity levels, extended half an interval past each
    /// end; the occurrence-probability grid for the classical convolution.
    pub fn mean_imls(&self) -> Vec<f64> {
        let n = self.imls.len();
        let mut out = Vec::with_capacity(n + 1);
        out.push((self.imls[0] - (self.imls[1] - self.imls[0]) / 2.0).max(0.0));
        for w in self.imls.windows(2) {
            out.push((w[0] + w[1]) / 2.0);
        }
        out.push(self.imls[n - 1] + (self.imls[n - 1] - self.imls[n - 2]) / 2.0);
        out
    }
}

fn nearest_level(imls: &[f64], gmv: f64) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, iml) in imls.iter().enumerate() {
        let d = (gmv - iml).abs();
        if d < best_dist {
            best = i;
            best_dist = d;
        }
    }
    best
}

/// One fragility function: probability of reaching or exceeding a single
/// damage-state threshold per intensity level.
#[derive(Debug, Clone)]
pub struct FragilityFunction {
    pub limit_state: String,
    pub poes: Vec<f64>,
}

/// The fragility functions of one risk model for one loss type, sharing an
/// intensity-level axis and an ordered limit-state list.
///
/// Interpolation policy: exceedance probabilities are **linearly**
/// interpolated between bracketing levels; below the lowest level the
/// exceedance probability is zero, above the highest it saturates at the
/// highest level's value.
#[derive(Debug, Clone)]
pub struct FragilityFunctionList {
    pub id: RiskId,
    pub imt: String,
    pub imls: Vec<f64>,
    pub functions: Vec<FragilityFunction>,
}

impl FragilityFunctionList {
    pub fn new(
        id: RiskId,
        imt: impl Into<String>,
        imls: Vec<f64>,
        functions: Vec<FragilityFunction>,
    ) -> Result<Self> {
        let invalid = |reason: String| RiskError::InvalidFunction { id: id.clone(), reason };
        if imls.len() < 2 {
            return Err(invalid(format!("need at least 2 intensity levels, got {}", imls.len())));
        }
        if imls.windows(2).any(|w| w[1] <= w[0]) {
            return Err(invalid("intensity levels must be strictly increasing".into()));
        }
        if functions.is_empty() {
            return Err(invalid("need at least one limit state".into()));
        }
        for ff in &functions {
            if ff.poes.len() != imls.len() {
                return Err(invalid(format!(
                    "limit state '{}' has {} poes for {} intensity levels",
                    ff.limit_state,
                    ff.poes.len(),
                    imls.len()
                )));
            }
            if ff.poes.iter().any(|&p| !(0.0..=1.0).contains(&p)) {
                return Err(invalid(format!(
                    "limit state '{}' has exceedance probabilities outside [0, 1]",
                    ff.limit_state
                )));
            }
        }
        Ok(FragilityFunctionList { id, imt: imt.into(), imls, functions })
    }

    pub fn limit_states(&self) -> Vec<String> {
        self.functions.iter().map(|f| f.limit_state.clone()).collect()
    }

    /// Exceedance probability of one limit state at a ground-motion value.
    pub fn exceedance(&self, state: usize, gmv: f64) -> f64 {
        if gmv < self.imls[0] {
            return 0.0;
        }
        scientific::interp_clamped(&self.imls, &self.functions[state].poes, gmv)
    }
}

/// Per-damage-state consequence coefficients for one risk id and loss type.
/// The leading "no damage" state carries no consequence and has no column.
#[derive(Debug, Clone)]
pub struct ConsequenceTable {
    pub id: RiskId,
    pub consequence: String,
    pub loss_type: LossType,
    pub coefficients: Vec<f64>,
}

/// A risk function variant as stored in the catalog.
#[derive(Debug, Clone)]
pub enum RiskFunction {
    Vulnerability(VulnerabilityFunction),
    Fragility(FragilityFunctionList),
    Consequence(ConsequenceTable),
}

impl RiskFunction {
    pub fn imt(&self) -> Option<&str> {
        match self {
            RiskFunction::Vulnerability(vf) => Some(&vf.imt),
            RiskFunction::Fragility(ffl) => Some(&ffl.imt),
            RiskFunction::Consequence(_) => None,
        }
    }
}

/// Uniquely identifies one risk function within the registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RiskFunctionKey {
    pub risk_id: RiskId,
    pub loss_type: LossType,
    pub kind: FunctionKind,
}

impl RiskFunctionKey {
    pub fn new(risk_id: RiskId, loss_type: LossType, kind: FunctionKind) -> Self {
        RiskFunctionKey { risk_id, loss_type, kind }
    }
}

/// The parsed risk-function catalog handed to
/// [`CompositeRiskModel::build`](crate::composite::CompositeRiskModel::build).
/// Parsing file formats is not this crate's concern.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub entries: Vec<(RiskFunctionKey, RiskFunction)>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog::default()
    }

    pub fn push(&mut self, key: RiskFunctionKey, function: RiskFunction) {
        self.entries.push((key, function));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}


#[cfg(test)]
mod monotonicity_props {
    use proptest::prelude::*;

    use super::*;
    use crate::types::RiskId;

    fn ratio_vecs() -> impl Strategy<Value = Vec<f64>> {
        proptest::collection::vec(0.0f64..=1.0, 2..8)
    }

    proptest! {
        #[test]
        fn coercion_yields_strictly_increasing_ratios(mut ratios in ratio_vecs()) {
            // the near-monotonic case the coercion exists for; a genuine
            // inversion is allowed to move values arbitrarily
            ratios.sort_by(f64::total_cmp);
            let n = ratios.len();
            let vf = VulnerabilityFunction::new(
                RiskId::new("P"),
                "PGA",
                (1..=n).map(|i| i as f64 * 0.1).collect(),
                ratios.clone(),
                vec![0.0; n],
                LossDistribution::Ln,
            )
            .unwrap();
            let out = vf.strictly_increasing().mean_loss_ratios;
            for w in out.windows(2) {
                prop_assert!(w[1] > w[0], "not strictly increasing: {out:?}");
            }
            for (a, b) in ratios.iter().zip(&out) {
                prop_assert!(*b >= *a);
                prop_assert!((b - a).abs() <= n as f64 * RATIO_EPS, "moved too far: {a} -> {b}");
            }
        }

        #[test]
        fn interpolation_stays_within_the_ratio_range(
            ratios in ratio_vecs(),
            gmv in 0.0f64..2.0,
        ) {
            let n = ratios.len();
            let vf = VulnerabilityFunction::new(
                RiskId::new("P"),
                "PGA",
                (1..=n).map(|i| i as f64 * 0.1).collect(),
                ratios.clone(),
                vec![0.0; n],
                LossDistribution::Ln,
            )
            .unwrap();
            if let Some((mean, _)) = vf.interpolate(gmv) {
                let lo = ratios.iter().cloned().fold(f64::INFINITY, f64::min);
                let hi = ratios.iter().cloned().fold(0.0f64, f64::max);
                prop_assert!(mean >= lo - 1e-12 && mean <= hi + 1e-12, "{mean} outside [{lo}, {hi}]");
            }
        }
    }
}

//! Numeric kernels shared by the per-taxonomy evaluation methods: hazard
//! interpolation, the classical loss-curve convolution, damage-state
//! probability conversion and the benefit-cost ratio.

use serde::Serialize;

use crate::error::{Result, RiskError};
use crate::functions::{DAMAGE_FLOOR, FragilityFunctionList, LossDistribution,
                       VulnerabilityFunction};

/// Linear interpolation of `ys` over `xs` at `x`, clamped to the end values
/// outside the range. `xs` must be strictly increasing (validated upstream).
pub fn interp_clamped(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[xs.len() - 1] {
        return ys[ys.len() - 1];
    }
    let hi = xs.partition_point(|&v| v < x).max(1);
    let lo = hi - 1;
    let frac = (x - xs[lo]) / (xs[hi] - xs[lo]);
    ys[lo] * (1.0 - frac) + ys[hi] * frac
}

/// `v[i] - v[i+1]` for consecutive pairs; positive for a decreasing hazard
/// curve, where it yields occurrence probabilities.
pub fn pairwise_diff(v: &[f64]) -> Vec<f64> {
    v.windows(2).map(|w| w[0] - w[1]).collect()
}

pub fn pairwise_mean(v: &[f64]) -> Vec<f64> {
    v.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect()
}

/// Subdivide each interval of `points` into `steps` equal parts.
/// `steps == 1` returns the points unchanged.
pub fn fine_graining(points: &[f64], steps: usize) -> Vec<f64> {
    if steps < 2 || points.len() < 2 {
        return points.to_vec();
    }
    let mut out = Vec::with_capacity((points.len() - 1) * steps + 1);
    for w in points.windows(2) {
        for k in 0..steps {
            out.push(w[0] + (w[1] - w[0]) * k as f64 / steps as f64);
        }
    }
    out.push(points[points.len() - 1]);
    out
}

/// Abramowitz & Stegun 7.1.26, |error| < 1.5e-7. Enough for exceedance
/// probabilities, which carry far more model than numeric uncertainty.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let poly = t
        * (0.254829592
            + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    sign * (1.0 - poly * (-x * x).exp())
}

/// P(loss ratio > `ratio`) for a log-normal loss ratio with the given mean
/// and coefficient of variation. A zero cov degenerates to a step function.
pub fn lognormal_survival(ratio: f64, mean: f64, cov: f64) -> f64 {
    if mean == 0.0 {
        return 0.0;
    }
    if ratio <= 0.0 {
        return 1.0;
    }
    if cov == 0.0 {
        return if ratio < mean { 1.0 } else { 0.0 };
    }
    let sigma2 = (1.0 + cov * cov).ln();
    let mu = mean.ln() - sigma2 / 2.0;
    let z = (ratio.ln() - mu) / (sigma2.sqrt() * std::f64::consts::SQRT_2);
    0.5 * (1.0 - erf(z))
}

/// A loss-(exceedance-)probability curve of fixed resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LossCurve {
    pub losses: Vec<f64>,
    pub poes: Vec<f64>,
}

impl LossCurve {
    /// Multiply the loss axis by an asset value, turning ratios into losses.
    pub fn rescaled(&self, value: f64) -> LossCurve {
        LossCurve {
            losses: self.losses.iter().map(|l| l * value).collect(),
            poes: self.poes.clone(),
        }
    }
}

/// P(loss ratio > r | intensity level i) for every canonical ratio and every
/// level of the vulnerability function. Only the Ln and Degenerate
/// distributions have the closed-form survival this needs.
pub fn loss_ratio_exceedance_matrix(
    vf: &VulnerabilityFunction,
    loss_ratios: &[f64],
) -> Result<Vec<Vec<f64>>> {
    match vf.distribution {
        LossDistribution::Ln | LossDistribution::Degenerate => {}
        ref other => {
            return Err(RiskError::UnsupportedDistribution { dist: other.name() });
        }
    }
    let matrix = loss_ratios
        .iter()
        .map(|&r| {
            vf.mean_loss_ratios
                .iter()
                .zip(&vf.covs)
                .map(|(&mean, &cov)| lognormal_survival(r, mean, cov))
                .collect()
        })
        .collect();
    Ok(matrix)
}

/// Convolve a vulnerability function with a hazard curve into a loss-ratio
/// exceedance curve over the canonical `loss_ratios`.
///
/// The hazard curve is interpolated at the function's mid-level grid
/// (saturated to the hazard range), differenced into occurrence
/// probabilities, and folded through the loss-ratio exceedance matrix.
pub fn classical(
    vf: &VulnerabilityFunction,
    hazard_imls: &[f64],
    hazard_poes: &[f64],
    loss_ratios: &[f64],
) -> Result<LossCurve> {
    let lrem = loss_ratio_exceedance_matrix(vf, loss_ratios)?;
    let lo = hazard_imls[0];
    let hi = hazard_imls[hazard_imls.len() - 1];
    let grid: Vec<f64> = vf.mean_imls().iter().map(|&x| x.clamp(lo, hi)).collect();
    let poes: Vec<f64> =
        grid.iter().map(|&x| interp_clamped(hazard_imls, hazard_poes, x)).collect();
    let occurrence = pairwise_diff(&poes);
    let curve_poes = lrem
        .iter()
        .map(|row| row.iter().zip(&occurrence).map(|(s, o)| s * o).sum())
        .collect();
    Ok(LossCurve { losses: loss_ratios.to_vec(), poes: curve_poes })
}

/// Area under a loss-exceedance curve; the expected (annual) loss.
pub fn average_loss(curve: &LossCurve) -> f64 {
    pairwise_diff(&curve.losses)
        .iter()
        .zip(pairwise_mean(&curve.poes))
        .map(|(dl, pm)| -dl * pm)
        .sum()
}

/// Benefit-cost ratio of a retrofit: avoided discounted expected loss over
/// retrofit cost. Zero avoided loss gives 0, never a division error; the
/// denominator terms are validated positive at configuration time.
pub fn bcr(
    eal_original: f64,
    eal_retrofitted: f64,
    interest_rate: f64,
    asset_life_expectancy: f64,
    asset_value: f64,
    retrofit_cost: f64,
) -> f64 {
    (eal_original - eal_retrofitted) * asset_value
        * (1.0 - (-interest_rate * asset_life_expectancy).exp())
        / (interest_rate * retrofit_cost)
}

/// `-ln(1 - poe) / time` per level; exceedance probability 1 is clamped just
/// below to keep the frequency finite.
pub fn annual_frequency_of_exceedence(poes: &[f64], time: f64) -> Vec<f64> {
    poes.iter().map(|&p| -(1.0 - p.min(1.0 - 1e-12)).ln() / time).collect()
}

/// Damage-state probabilities (including "no damage") from a hazard curve:
/// exceedance probabilities become annual frequencies over the hazard
/// investigation time, occurrence frequencies are folded through each
/// fragility function, and the per-state exceedance over the risk
/// investigation time is differenced into a distribution.
pub fn classical_damage(
    ffl: &FragilityFunctionList,
    hazard_imls: &[f64],
    hazard_poes: &[f64],
    investigation_time: f64,
    risk_investigation_time: f64,
    steps_per_interval: usize,
) -> Vec<f64> {
    let (imls, poes): (Vec<f64>, Vec<f64>) = if steps_per_interval > 1 {
        let imls = fine_graining(&ffl.imls, steps_per_interval);
        let poes =
            imls.iter().map(|&x| interp_clamped(hazard_imls, hazard_poes, x)).collect();
        (imls, poes)
    } else {
        (hazard_imls.to_vec(), hazard_poes.to_vec())
    };

    let afe = annual_frequency_of_exceedence(&poes, investigation_time);
    let mut padded = Vec::with_capacity(afe.len() + 2);
    padded.push(afe[0]);
    padded.extend_from_slice(&afe);
    padded.push(afe[afe.len() - 1]);
    let occurrence = pairwise_diff(&pairwise_mean(&padded));

    let mut exceedance = Vec::with_capacity(ffl.functions.len() + 2);
    exceedance.push(1.0);
    for state in 0..ffl.functions.len() {
        let freq: f64 = occurrence
            .iter()
            .zip(&imls)
            .map(|(o, &iml)| o * ffl.exceedance(state, iml))
            .sum();
        exceedance.push(1.0 - (-freq * risk_investigation_time).exp());
    }
    exceedance.push(0.0);
    pairwise_diff(&exceedance).iter().map(|p| p.max(0.0)).collect()
}

/// Damage-state probabilities per event from ground-motion values: exceedance
/// per state, differenced cumulative-to-discrete, clipped non-negative with
/// tiny fractions floored to zero. Rows sum to 1 per event.
pub fn scenario_damage(ffl: &FragilityFunctionList, gmvs: &[f64]) -> Vec<Vec<f64>> {
    let d = ffl.functions.len();
    gmvs.iter()
        .map(|&gmv| {
            let mut exceedance = Vec::with_capacity(d + 2);
            exceedance.push(1.0);
            for state in 0..d {
                exceedance.push(ffl.exceedance(state, gmv));
            }
            exceedance.push(0.0);
            let mut probs: Vec<f64> = pairwise_diff(&exceedance)
                .iter()
                .map(|&p| if p < DAMAGE_FLOOR { 0.0 } else { p })
                .collect();
            // Floored mass goes back to "no damage" so the row stays a
            // distribution.
            let total: f64 = probs.iter().sum();
            probs[0] += 1.0 - total;
            probs
        })
        .collect()
}


#[cfg(test)]
mod conservation_props {
    use proptest::prelude::*;

    use super::*;
    use crate::functions::{FragilityFunction, FragilityFunctionList};
    use crate::types::RiskId;

    /// Ordered limit states: the severe poes are the slight poes scaled
    /// down, so severe never exceeds slight at any level.
    fn fragility_list(slight: Vec<f64>, damp: Vec<f64>) -> FragilityFunctionList {
        let severe = slight.iter().zip(&damp).map(|(p, d)| p * d).collect();
        FragilityFunctionList::new(
            RiskId::new("P"),
            "PGA",
            vec![0.1, 0.2, 0.3],
            vec![
                FragilityFunction { limit_state: "slight".into(), poes: slight },
                FragilityFunction { limit_state: "severe".into(), poes: severe },
            ],
        )
        .unwrap()
    }

    proptest! {
        #[test]
        fn scenario_damage_rows_always_sum_to_one(
            slight in proptest::collection::vec(0.0f64..=1.0, 3),
            damp in proptest::collection::vec(0.0f64..=1.0, 3),
            gmvs in proptest::collection::vec(0.0f64..0.5, 1..16),
        ) {
            let ffl = fragility_list(slight, damp);
            for row in scenario_damage(&ffl, &gmvs) {
                let total: f64 = row.iter().sum();
                prop_assert!((total - 1.0).abs() < 1e-9, "row {row:?} sums to {total}");
                prop_assert!(row.iter().all(|&p| p >= 0.0), "negative probability in {row:?}");
            }
        }
    }
}

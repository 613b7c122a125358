use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::info;

use crate::assets::Asset;
use crate::composite::{CompositeRiskModel, SecondaryLoss, TaxonomyOutput};
use crate::error::Result;
use crate::hazard::HazardSample;
use crate::riskmodel::{BcrResult, RiskOutput};
use crate::rng::MultiEventRng;
use crate::scientific::LossCurve;
use crate::types::{AssetId, EventId, LossType, TaxonomyIndex};

/// One independent unit of work: the assets of one taxonomy at one site
/// group, with the hazard sample they share.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub taxonomy: TaxonomyIndex,
    pub assets: Vec<Asset>,
    pub hazard: HazardSample,
    /// Hazard realization this unit was sampled from, if the caller tracks
    /// one. Stamped onto the output unchanged.
    pub realization: Option<usize>,
}

/// Portfolio-level totals keyed by stable identifiers. Keying by asset and
/// event id makes the merge insensitive to how work was split into units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortfolioResult {
    pub event_losses: BTreeMap<LossType, BTreeMap<(AssetId, EventId), f64>>,
    pub curves: BTreeMap<LossType, BTreeMap<AssetId, LossCurve>>,
    pub bcr: BTreeMap<LossType, BTreeMap<AssetId, BcrResult>>,
    /// Damage-state counts (classical) or fractions summed over events
    /// (scenario), per asset.
    pub damage: BTreeMap<LossType, BTreeMap<AssetId, Vec<f64>>>,
    /// Named consequence totals per asset, summed over events.
    pub consequences: BTreeMap<String, BTreeMap<AssetId, f64>>,
}

impl PortfolioResult {
    /// Loss per asset summed over events, the input to average-loss
    /// statistics downstream.
    pub fn asset_totals(&self, loss_type: LossType) -> BTreeMap<AssetId, f64> {
        let mut out = BTreeMap::new();
        if let Some(by_key) = self.event_losses.get(&loss_type) {
            for (&(asset, _), &loss) in by_key {
                *out.entry(asset).or_insert(0.0) += loss;
            }
        }
        out
    }

    fn absorb(&mut self, assets: &[Asset], output: TaxonomyOutput) {
        for (loss_type, out) in output.by_loss_type {
            match out {
                RiskOutput::EventLosses(rows) => {
                    let slot = self.event_losses.entry(loss_type).or_default();
                    for r in rows {
                        *slot.entry((r.asset, r.event)).or_insert(0.0) += r.loss;
                    }
                }
                RiskOutput::LossCurves(rows) => {
                    let slot = self.curves.entry(loss_type).or_default();
                    for r in rows {
                        slot.insert(r.asset, r.curve);
                    }
                }
                RiskOutput::Bcr(rows) => {
                    let slot = self.bcr.entry(loss_type).or_default();
                    for r in rows {
                        slot.insert(r.asset, r);
                    }
                }
                RiskOutput::DamageCounts(counts) => {
                    let slot = self.damage.entry(loss_type).or_default();
                    for (asset, row) in assets.iter().zip(counts) {
                        slot.insert(asset.ordinal, row);
                    }
                }
                RiskOutput::DamageFractions(fractions) => {
                    let slot = self.damage.entry(loss_type).or_default();
                    for (asset, rows) in assets.iter().zip(fractions) {
                        let states = rows.first().map_or(0, Vec::len);
                        let total = rows.iter().fold(vec![0.0; states], |mut acc, row| {
                            for (a, v) in acc.iter_mut().zip(row) {
                                *a += v;
                            }
                            acc
                        });
                        slot.insert(asset.ordinal, total);
                    }
                }
            }
        }
        for (name, rows) in output.consequences {
            let slot = self.consequences.entry(name).or_default();
            for (asset, per_event) in assets.iter().zip(rows) {
                *slot.entry(asset.ordinal).or_insert(0.0) += per_event.iter().sum::<f64>();
            }
        }
    }
}

/// Evaluate a portfolio across all work units in parallel and merge the
/// outputs into one result. Units are evaluated with rayon; the merge runs
/// sequentially in unit order, so repeated runs over the same units are
/// bit-identical regardless of thread scheduling, and every (asset, event)
/// cell lives in exactly one unit, so totals do not depend on how assets
/// were grouped.
pub fn evaluate_portfolio(
    crm: &CompositeRiskModel,
    units: &[WorkUnit],
    secondary: &[&dyn SecondaryLoss],
    rng: &MultiEventRng,
) -> Result<PortfolioResult> {
    info!(units = units.len(), mode = %crm.config().calculation_mode, "evaluating portfolio");
    let outputs: Vec<TaxonomyOutput> = units
        .par_iter()
        .map(|unit| {
            crm.get_output(
                unit.taxonomy,
                &unit.assets,
                &unit.hazard,
                secondary,
                rng,
                unit.realization,
            )
        })
        .collect::<Result<_>>()?;

    let mut result = PortfolioResult::default();
    for (unit, output) in units.iter().zip(outputs) {
        result.absorb(&unit.assets, output);
    }
    Ok(result)
}

use std::collections::BTreeMap;

use serde::Serialize;

use crate::assets::Asset;
use crate::config::RiskConfig;
use crate::error::{Result, RiskError};
use crate::functions::{FragilityFunctionList, RiskFunction, VulnerabilityFunction};
use crate::hazard::HazardSample;
use crate::rng::MultiEventRng;
use crate::scientific::{self, LossCurve};
use crate::types::{AssetId, CalcMode, EventId, FunctionKind, LossType, RiskId};

/// One sampled loss for one (asset, event) pair. Sub-threshold and zero
/// losses produce no record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EventLoss {
    pub asset: AssetId,
    pub event: EventId,
    pub loss: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetLossCurve {
    pub asset: AssetId,
    pub curve: LossCurve,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BcrResult {
    pub asset: AssetId,
    pub eal_original: f64,
    pub eal_retrofitted: f64,
    pub bcr: f64,
}

/// What one risk model produces for one loss type, by calculation mode.
#[derive(Debug, Clone)]
pub enum RiskOutput {
    /// classical_risk: one loss-exceedance curve per asset, loss axis
    /// rescaled by the asset value.
    LossCurves(Vec<AssetLossCurve>),
    /// classical_bcr: per-asset (EAL original, EAL retrofitted, BCR).
    Bcr(Vec<BcrResult>),
    /// classical_damage: per-asset damage-state counts
    /// (probability x number of units), `[asset][state]`.
    DamageCounts(Vec<Vec<f64>>),
    /// event_based_risk and aliases: sparse per-(asset, event) loss records.
    EventLosses(Vec<EventLoss>),
    /// scenario_damage and aliases: `[asset][event][state]` fractions.
    DamageFractions(Vec<Vec<Vec<f64>>>),
}

/// The risk model of a single taxonomy: one risk function per
/// (loss type, kind), a calculation mode, and the scalar parameters copied
/// from the validated configuration. Built once, immutable during evaluation.
#[derive(Debug, Clone)]
pub struct RiskModel {
    pub risk_id: RiskId,
    pub calcmode: CalcMode,
    functions: BTreeMap<(LossType, FunctionKind), RiskFunction>,
    /// Canonical loss-ratio arrays for curve building, per loss type.
    loss_ratios: BTreeMap<LossType, Vec<f64>>,
    loss_ratios_retro: BTreeMap<LossType, Vec<f64>>,
    cfg: RiskConfig,
}

impl RiskModel {
    pub fn new(
        risk_id: RiskId,
        mut functions: BTreeMap<(LossType, FunctionKind), RiskFunction>,
        cfg: &RiskConfig,
    ) -> Result<Self> {
        let mode = cfg.calculation_mode;
        let missing = |loss_type, kind| RiskError::MissingRiskFunction {
            risk_id: risk_id.clone(),
            loss_type,
            kind,
        };

        let loss_types: Vec<LossType> = functions
            .keys()
            .filter(|(_, kind)| {
                matches!(kind, FunctionKind::Vulnerability | FunctionKind::Fragility)
            })
            .map(|(lt, _)| *lt)
            .collect();

        // A loss type with no function usable by the active mode is a
        // build-time error, never an evaluation-time surprise.
        match mode {
            CalcMode::ClassicalRisk | CalcMode::EventBasedRisk => {
                for &lt in &loss_types {
                    match functions.get(&(lt, FunctionKind::Vulnerability)) {
                        Some(RiskFunction::Vulnerability(_)) => {}
                        _ => return Err(missing(lt, FunctionKind::Vulnerability)),
                    }
                }
            }
            CalcMode::ClassicalDamage | CalcMode::ScenarioDamage => {
                for &lt in &loss_types {
                    match functions.get(&(lt, FunctionKind::Fragility)) {
                        Some(RiskFunction::Fragility(_)) => {}
                        _ => return Err(missing(lt, FunctionKind::Fragility)),
                    }
                }
            }
            CalcMode::ClassicalBcr => {
                for kind in [FunctionKind::Vulnerability, FunctionKind::VulnerabilityRetrofitted] {
                    match functions.get(&(LossType::Structural, kind)) {
                        Some(RiskFunction::Vulnerability(_)) => {}
                        _ => return Err(missing(LossType::Structural, kind)),
                    }
                }
            }
        }

        // For curve-building modes, coerce the vulnerability ratios to be
        // strictly increasing (the convolution assumes monotonicity) and
        // precompute the stepped loss-ratio arrays.
        let mut loss_ratios = BTreeMap::new();
        let mut loss_ratios_retro = BTreeMap::new();
        if matches!(mode, CalcMode::ClassicalRisk | CalcMode::ClassicalBcr) {
            let steps = cfg.lrem_steps_per_interval;
            for ((lt, kind), rf) in functions.iter_mut() {
                if let RiskFunction::Vulnerability(vf) = rf {
                    match vf.distribution {
                        crate::functions::LossDistribution::Ln
                        | crate::functions::LossDistribution::Degenerate => {}
                        ref other => {
                            return Err(RiskError::UnsupportedDistribution {
                                dist: other.name(),
                            });
                        }
                    }
                    *vf = vf.strictly_increasing();
                    let ratios = vf.mean_loss_ratios_with_steps(steps);
                    match kind {
                        FunctionKind::Vulnerability => {
                            loss_ratios.insert(*lt, ratios);
                        }
                        FunctionKind::VulnerabilityRetrofitted => {
                            loss_ratios_retro.insert(*lt, ratios);
                        }
                        _ => {}
                    }
                }
            }
        }

        Ok(RiskModel {
            risk_id,
            calcmode: mode,
            functions,
            loss_ratios,
            loss_ratios_retro,
            cfg: cfg.clone(),
        })
    }

    /// Loss types covered by this model's vulnerability/fragility functions,
    /// in sorted order.
    pub fn loss_types(&self) -> Vec<LossType> {
        let mut out: Vec<LossType> = self
            .functions
            .keys()
            .filter(|(_, kind)| {
                matches!(kind, FunctionKind::Vulnerability | FunctionKind::Fragility)
            })
            .map(|(lt, _)| *lt)
            .collect();
        out.dedup();
        out
    }

    /// The intensity measure type this model reads for a loss type.
    pub fn imt(&self, loss_type: LossType) -> Option<&str> {
        [FunctionKind::Vulnerability, FunctionKind::Fragility]
            .iter()
            .find_map(|&kind| self.functions.get(&(loss_type, kind)))
            .and_then(RiskFunction::imt)
    }

    pub fn functions(&self) -> impl Iterator<Item = (&(LossType, FunctionKind), &RiskFunction)> {
        self.functions.iter()
    }

    pub fn loss_ratios(&self, loss_type: LossType) -> Option<&[f64]> {
        self.loss_ratios.get(&loss_type).map(Vec::as_slice)
    }

    /// Overwrite the canonical ratio array; used by the registry when
    /// reconciling curve resolutions across taxonomies.
    pub(crate) fn set_loss_ratios(&mut self, loss_type: LossType, ratios: Vec<f64>) {
        self.loss_ratios.insert(loss_type, ratios);
    }

    fn vulnerability(
        &self,
        loss_type: LossType,
        kind: FunctionKind,
    ) -> Result<&VulnerabilityFunction> {
        match self.functions.get(&(loss_type, kind)) {
            Some(RiskFunction::Vulnerability(vf)) => Ok(vf),
            _ => Err(RiskError::MissingRiskFunction {
                risk_id: self.risk_id.clone(),
                loss_type,
                kind,
            }),
        }
    }

    fn fragility(&self, loss_type: LossType) -> Result<&FragilityFunctionList> {
        match self.functions.get(&(loss_type, FunctionKind::Fragility)) {
            Some(RiskFunction::Fragility(ffl)) => Ok(ffl),
            _ => Err(RiskError::MissingRiskFunction {
                risk_id: self.risk_id.clone(),
                loss_type,
                kind: FunctionKind::Fragility,
            }),
        }
    }

    /// Evaluate one loss type for a group of assets of this taxonomy against
    /// one hazard sample. Dispatches on the calculation mode.
    pub fn evaluate(
        &self,
        loss_type: LossType,
        assets: &[Asset],
        hazard: &HazardSample,
        rng: &MultiEventRng,
    ) -> Result<RiskOutput> {
        match self.calcmode {
            CalcMode::ClassicalRisk => self.classical_risk(loss_type, assets, hazard),
            CalcMode::ClassicalBcr => self.classical_bcr(loss_type, assets, hazard),
            CalcMode::ClassicalDamage => self.classical_damage(loss_type, assets, hazard),
            CalcMode::EventBasedRisk => self.event_based_risk(loss_type, assets, hazard, rng),
            CalcMode::ScenarioDamage => self.scenario_damage(loss_type, assets, hazard),
        }
    }

    fn classical_risk(
        &self,
        loss_type: LossType,
        assets: &[Asset],
        hazard: &HazardSample,
    ) -> Result<RiskOutput> {
        let vf = self.vulnerability(loss_type, FunctionKind::Vulnerability)?;
        let hc = hazard.curve_for(self.calcmode, &vf.imt)?;
        let ratios = self.loss_ratios(loss_type).ok_or_else(|| {
            RiskError::MissingRiskFunction {
                risk_id: self.risk_id.clone(),
                loss_type,
                kind: FunctionKind::Vulnerability,
            }
        })?;
        let curve = scientific::classical(vf, &hc.imls, &hc.poes, ratios)?;
        let curves = assets
            .iter()
            .map(|a| AssetLossCurve {
                asset: a.ordinal,
                curve: curve.rescaled(a.value(loss_type, self.cfg.time_event)),
            })
            .collect();
        Ok(RiskOutput::LossCurves(curves))
    }

    fn classical_bcr(
        &self,
        loss_type: LossType,
        assets: &[Asset],
        hazard: &HazardSample,
    ) -> Result<RiskOutput> {
        if loss_type != LossType::Structural {
            return Err(RiskError::BcrUnsupportedLossType(loss_type));
        }
        let vf = self.vulnerability(loss_type, FunctionKind::Vulnerability)?;
        let vf_retro =
            self.vulnerability(loss_type, FunctionKind::VulnerabilityRetrofitted)?;
        let hc = hazard.curve_for(self.calcmode, &vf.imt)?;
        let ratios = &self.loss_ratios[&loss_type];
        let ratios_retro = &self.loss_ratios_retro[&loss_type];
        let curve = scientific::classical(vf, &hc.imls, &hc.poes, ratios)?;
        let curve_retro =
            scientific::classical(vf_retro, &hc.imls, &hc.poes, ratios_retro)?;
        let eal_original = scientific::average_loss(&curve);
        let eal_retrofitted = scientific::average_loss(&curve_retro);

        let mut out = Vec::with_capacity(assets.len());
        for a in assets {
            let cost = match a.retrofit_cost {
                Some(c) if c > 0.0 => c,
                _ => return Err(RiskError::MissingRetrofitCost { asset: a.ordinal }),
            };
            let value = a.value(loss_type, self.cfg.time_event);
            out.push(BcrResult {
                asset: a.ordinal,
                eal_original,
                eal_retrofitted,
                bcr: scientific::bcr(
                    eal_original,
                    eal_retrofitted,
                    self.cfg.interest_rate,
                    self.cfg.asset_life_expectancy,
                    value,
                    cost,
                ),
            });
        }
        Ok(RiskOutput::Bcr(out))
    }

    fn classical_damage(
        &self,
        loss_type: LossType,
        assets: &[Asset],
        hazard: &HazardSample,
    ) -> Result<RiskOutput> {
        let ffl = self.fragility(loss_type)?;
        let hc = hazard.curve_for(self.calcmode, &ffl.imt)?;
        let damage = scientific::classical_damage(
            ffl,
            &hc.imls,
            &hc.poes,
            self.cfg.investigation_time,
            self.cfg.risk_investigation_time(),
            self.cfg.steps_per_interval,
        );
        let counts = assets
            .iter()
            .map(|a| damage.iter().map(|p| p * a.number).collect())
            .collect();
        Ok(RiskOutput::DamageCounts(counts))
    }

    fn event_based_risk(
        &self,
        loss_type: LossType,
        assets: &[Asset],
        hazard: &HazardSample,
        rng: &MultiEventRng,
    ) -> Result<RiskOutput> {
        let vf = self.vulnerability(loss_type, FunctionKind::Vulnerability)?;
        let table = hazard.gmfs(self.calcmode)?;
        let gmvs = table.column(&vf.imt)?;
        let min_loss = self.cfg.minimum_asset_loss(loss_type);

        let mut records = Vec::new();
        for asset in assets {
            let value = asset.value(loss_type, self.cfg.time_event);
            if value == 0.0 {
                continue;
            }
            for (eid, &gmv) in table.eids.iter().zip(gmvs) {
                let mut event_rng = rng.for_event_asset(*eid, asset.ordinal);
                let loss = vf.sample(gmv, &mut event_rng) * value;
                // Sub-threshold losses are reported as zero, i.e. no record.
                if loss > 0.0 && loss >= min_loss {
                    records.push(EventLoss { asset: asset.ordinal, event: *eid, loss });
                }
            }
        }
        Ok(RiskOutput::EventLosses(records))
    }

    fn scenario_damage(
        &self,
        loss_type: LossType,
        assets: &[Asset],
        hazard: &HazardSample,
    ) -> Result<RiskOutput> {
        let ffl = self.fragility(loss_type)?;
        let table = hazard.gmfs(self.calcmode)?;
        let gmvs = table.column(&ffl.imt)?;

        let states = ffl.functions.len() + 1;
        let bytes = (assets.len() * table.num_events() * states * size_of::<f64>()) as u64;
        if bytes > self.cfg.max_output_bytes {
            return Err(RiskError::Allocation {
                assets: assets.len(),
                events: table.num_events(),
                states,
                bytes,
                limit: self.cfg.max_output_bytes,
            });
        }

        let per_event = scientific::scenario_damage(ffl, gmvs);
        // The fractions depend on the GMVs only; every asset in the group
        // sees the same per-event distribution.
        Ok(RiskOutput::DamageFractions(vec![per_event; assets.len()]))
    }
}

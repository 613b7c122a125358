use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::assets::Asset;
use crate::config::RiskConfig;
use crate::consequence::ConsequenceModel;
use crate::error::{Result, RiskError};
use crate::functions::{Catalog, RiskFunction};
use crate::hazard::HazardSample;
use crate::riskmodel::{RiskModel, RiskOutput};
use crate::rng::MultiEventRng;
use crate::types::{AssetId, CalcMode, EventId, FunctionKind, LossType, RiskId, TaxonomyIndex};

const WEIGHT_TOL: f64 = 1e-6;

/// Taxonomy-to-risk-model weighting map: one exposure taxonomy can draw its
/// losses as a weighted blend of several named risk models, per loss type.
#[derive(Debug, Clone, Default)]
pub struct TaxonomyMapping {
    entries: BTreeMap<TaxonomyIndex, BTreeMap<LossType, Vec<(RiskId, f64)>>>,
}

impl TaxonomyMapping {
    pub fn new() -> Self {
        TaxonomyMapping::default()
    }

    pub fn insert(
        &mut self,
        taxonomy: TaxonomyIndex,
        loss_type: LossType,
        pairs: Vec<(RiskId, f64)>,
    ) {
        self.entries.entry(taxonomy).or_default().insert(loss_type, pairs);
    }

    /// The common case: one taxonomy reads one risk model with weight 1
    /// for every given loss type.
    pub fn single(&mut self, taxonomy: TaxonomyIndex, risk_id: &RiskId, loss_types: &[LossType]) {
        for &lt in loss_types {
            self.insert(taxonomy, lt, vec![(risk_id.clone(), 1.0)]);
        }
    }

    pub fn taxonomies(&self) -> impl Iterator<Item = TaxonomyIndex> + '_ {
        self.entries.keys().copied()
    }

    fn resolve(&self, taxonomy: TaxonomyIndex, loss_type: LossType) -> Result<&[(RiskId, f64)]> {
        self.entries
            .get(&taxonomy)
            .and_then(|by_lt| by_lt.get(&loss_type))
            .map(Vec::as_slice)
            .ok_or(RiskError::UnmappedTaxonomy { taxonomy, loss_type })
    }

    fn iter(
        &self,
    ) -> impl Iterator<Item = (TaxonomyIndex, LossType, &[(RiskId, f64)])> {
        self.entries.iter().flat_map(|(&tax, by_lt)| {
            by_lt.iter().map(move |(&lt, pairs)| (tax, lt, pairs.as_slice()))
        })
    }
}

/// Per loss-type curve metadata, derived once across all taxonomies. When
/// submodels carry different curve resolutions the widest ratio array wins,
/// so every loss curve of one loss type shares one shape.
#[derive(Debug, Clone)]
pub struct CurveParams {
    pub index: usize,
    pub loss_type: LossType,
    pub ratios: Vec<f64>,
}

/// Everything `get_output` produces for one asset group: one result per
/// loss type, plus named consequence arrays derived from damage fractions.
#[derive(Debug, Clone, Default)]
pub struct TaxonomyOutput {
    pub by_loss_type: BTreeMap<LossType, RiskOutput>,
    /// consequence name -> `[asset][event]` values.
    pub consequences: BTreeMap<String, Vec<Vec<f64>>>,
    /// The hazard-realization index the sample came from, when the caller
    /// tracks one; carried through untouched for labeling output rows.
    pub realization: Option<usize>,
}

/// A post-processing pass over the combined output, e.g. insurance or
/// business-interruption adjustments supplied by the caller.
pub trait SecondaryLoss: Send + Sync {
    fn update(&self, output: &mut TaxonomyOutput, assets: &[Asset]);
}

/// The full registry: risk-id -> per-taxonomy model, the taxonomy weighting
/// map, derived curve parameters and consequence coefficients. Built once
/// per calculation, read-only afterwards, shareable across workers.
#[derive(Debug, Clone)]
pub struct CompositeRiskModel {
    models: BTreeMap<RiskId, Arc<RiskModel>>,
    tmap: TaxonomyMapping,
    loss_types: Vec<LossType>,
    pub damage_states: Vec<String>,
    pub curve_params: Vec<CurveParams>,
    consequences: ConsequenceModel,
    cfg: RiskConfig,
}

impl CompositeRiskModel {
    pub fn build(catalog: Catalog, tmap: TaxonomyMapping, cfg: RiskConfig) -> Result<Self> {
        cfg.validate()?;
        if catalog.is_empty() {
            return Err(RiskError::EmptyCatalog);
        }

        let mut grouped: BTreeMap<RiskId, BTreeMap<(LossType, FunctionKind), RiskFunction>> =
            BTreeMap::new();
        let mut consequences = ConsequenceModel::default();
        let mut limit_states: Option<Vec<String>> = None;

        for (key, function) in catalog.entries {
            match &function {
                RiskFunction::Fragility(ffl) => {
                    let found = ffl.limit_states();
                    match &limit_states {
                        None => limit_states = Some(found),
                        Some(expected) if *expected != found => {
                            return Err(RiskError::MixedLimitStates {
                                risk_id: key.risk_id,
                                expected: expected.clone(),
                                found,
                            });
                        }
                        Some(_) => {}
                    }
                }
                RiskFunction::Consequence(table) => {
                    if table.loss_type != key.loss_type {
                        return Err(RiskError::LossCategoryMismatch {
                            risk_id: key.risk_id,
                            declared: table.loss_type,
                            expected: key.loss_type,
                        });
                    }
                    consequences.insert(
                        table.consequence.clone(),
                        table.id.0.clone(),
                        table.loss_type,
                        table.coefficients.clone(),
                    );
                    continue;
                }
                RiskFunction::Vulnerability(_) => {}
            }
            grouped
                .entry(key.risk_id)
                .or_default()
                .insert((key.loss_type, key.kind), function);
        }

        let mut models: BTreeMap<RiskId, RiskModel> = BTreeMap::new();
        for (risk_id, functions) in grouped {
            let model = RiskModel::new(risk_id.clone(), functions, &cfg)?;
            models.insert(risk_id, model);
        }

        let mut loss_types: Vec<LossType> = models
            .values()
            .flat_map(|m| m.loss_types())
            .collect();
        loss_types.sort();
        loss_types.dedup();

        // Fail fast on the mapping before any evaluation happens.
        for (taxonomy, loss_type, pairs) in tmap.iter() {
            let sum: f64 = pairs.iter().map(|(_, w)| w).sum();
            if (sum - 1.0).abs() > WEIGHT_TOL {
                return Err(RiskError::WeightSum { taxonomy, loss_type, sum });
            }
            if cfg.calculation_mode.is_curve_based() && pairs.len() > 1 {
                return Err(RiskError::MultipleClassicalModels {
                    taxonomy,
                    loss_type,
                    count: pairs.len(),
                });
            }
            for (risk_id, _) in pairs {
                let model = models
                    .get(risk_id)
                    .ok_or_else(|| RiskError::UnknownRiskModel(risk_id.clone()))?;
                if !model.loss_types().contains(&loss_type) {
                    let kind = match cfg.calculation_mode {
                        CalcMode::ClassicalRisk | CalcMode::ClassicalBcr
                        | CalcMode::EventBasedRisk => FunctionKind::Vulnerability,
                        CalcMode::ClassicalDamage | CalcMode::ScenarioDamage => {
                            FunctionKind::Fragility
                        }
                    };
                    return Err(RiskError::MissingRiskFunction {
                        risk_id: risk_id.clone(),
                        loss_type,
                        kind,
                    });
                }
            }
        }

        let curve_params = make_curve_params(&mut models, &loss_types, &cfg);

        let damage_states = match limit_states {
            Some(states) => {
                let mut all = Vec::with_capacity(states.len() + 1);
                all.push("no_damage".to_string());
                all.extend(states);
                all
            }
            None => Vec::new(),
        };

        info!(
            mode = %cfg.calculation_mode,
            models = models.len(),
            taxonomies = tmap.entries.len(),
            loss_types = loss_types.len(),
            "built composite risk model"
        );

        Ok(CompositeRiskModel {
            models: models.into_iter().map(|(id, m)| (id, Arc::new(m))).collect(),
            tmap,
            loss_types,
            damage_states,
            curve_params,
            consequences,
            cfg,
        })
    }

    pub fn config(&self) -> &RiskConfig {
        &self.cfg
    }

    pub fn loss_types(&self) -> &[LossType] {
        &self.loss_types
    }

    pub fn get(&self, risk_id: &RiskId) -> Result<&RiskModel> {
        self.models
            .get(risk_id)
            .map(Arc::as_ref)
            .ok_or_else(|| RiskError::UnknownRiskModel(risk_id.clone()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RiskId, &RiskModel)> {
        self.models.iter().map(|(id, m)| (id, m.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Evaluate one asset group of one taxonomy against one hazard sample,
    /// producing one combined result per loss type. Sub-model results are
    /// blended per the taxonomy mapping, secondary loss effects are applied
    /// as a post-processing pass, then named consequences are derived. The
    /// sample is a single realization; `rlz` is its index when the caller
    /// tracks one, echoed back on the output.
    pub fn get_output(
        &self,
        taxonomy: TaxonomyIndex,
        assets: &[Asset],
        hazard: &HazardSample,
        secondary: &[&dyn SecondaryLoss],
        rng: &MultiEventRng,
        rlz: Option<usize>,
    ) -> Result<TaxonomyOutput> {
        let mut out = TaxonomyOutput { realization: rlz, ..TaxonomyOutput::default() };
        for &loss_type in &self.loss_types {
            let pairs = self.tmap.resolve(taxonomy, loss_type)?;
            let mut parts = Vec::with_capacity(pairs.len());
            for (risk_id, weight) in pairs {
                let model = self.get(risk_id)?;
                parts.push((*weight, model.evaluate(loss_type, assets, hazard, rng)?));
            }
            debug!(taxonomy = taxonomy.0, %loss_type, submodels = parts.len(), "combined sub-model outputs");
            out.by_loss_type
                .insert(loss_type, combine(taxonomy, loss_type, parts)?);
        }
        for pass in secondary {
            pass.update(&mut out, assets);
        }
        self.apply_consequences(&mut out, assets);
        Ok(out)
    }

    fn apply_consequences(&self, out: &mut TaxonomyOutput, assets: &[Asset]) {
        if self.consequences.is_empty() {
            return;
        }
        let names: Vec<String> = self.consequences.names().map(String::from).collect();
        for name in names {
            let mut acc: Option<Vec<Vec<f64>>> = None;
            for (&loss_type, output) in &out.by_loss_type {
                let RiskOutput::DamageFractions(fractions) = output else {
                    continue;
                };
                let rows = acc.get_or_insert_with(|| {
                    fractions.iter().map(|per_event| vec![0.0; per_event.len()]).collect()
                });
                for ((asset, per_event), row) in assets.iter().zip(fractions).zip(rows) {
                    for (value, cell) in per_event
                        .iter()
                        .map(|fr| self.consequences.losses(&name, asset, loss_type, fr, &self.cfg))
                        .zip(row)
                    {
                        *cell += value;
                    }
                }
            }
            if let Some(rows) = acc {
                out.consequences.insert(name, rows);
            }
        }
    }

    /// A restricted copy covering only the given taxonomies. Risk models are
    /// shared, not cloned; the mapping and registry are independent. Used
    /// when splitting a portfolio across parallel tasks.
    pub fn reduce(&self, taxonomies: &[TaxonomyIndex]) -> CompositeRiskModel {
        let entries: BTreeMap<_, _> = self
            .tmap
            .entries
            .iter()
            .filter(|(tax, _)| taxonomies.contains(tax))
            .map(|(tax, by_lt)| (*tax, by_lt.clone()))
            .collect();
        let kept: Vec<&RiskId> = entries
            .values()
            .flat_map(|by_lt| by_lt.values())
            .flatten()
            .map(|(id, _)| id)
            .collect();
        let models = self
            .models
            .iter()
            .filter(|(id, _)| kept.contains(id))
            .map(|(id, m)| (id.clone(), Arc::clone(m)))
            .collect();
        CompositeRiskModel {
            models,
            tmap: TaxonomyMapping { entries },
            loss_types: self.loss_types.clone(),
            damage_states: self.damage_states.clone(),
            curve_params: self.curve_params.clone(),
            consequences: self.consequences.clone(),
            cfg: self.cfg.clone(),
        }
    }
}

/// Widest-wins reconciliation of the canonical loss-ratio arrays, so curves
/// of one loss type share one shape across taxonomies.
fn make_curve_params(
    models: &mut BTreeMap<RiskId, RiskModel>,
    loss_types: &[LossType],
    cfg: &RiskConfig,
) -> Vec<CurveParams> {
    if !cfg.calculation_mode.is_curve_based() {
        return Vec::new();
    }
    let mut params = Vec::new();
    for (index, &loss_type) in loss_types.iter().enumerate() {
        let widest: Vec<f64> = models
            .values()
            .filter_map(|m| m.loss_ratios(loss_type))
            .max_by_key(|r| r.len())
            .map(<[f64]>::to_vec)
            .unwrap_or_default();
        if widest.is_empty() {
            continue;
        }
        for model in models.values_mut() {
            if model.loss_ratios(loss_type).is_some() {
                model.set_loss_ratios(loss_type, widest.clone());
            }
        }
        params.push(CurveParams { index, loss_type, ratios: widest });
    }
    params
}

fn combine(
    taxonomy: TaxonomyIndex,
    loss_type: LossType,
    mut parts: Vec<(f64, RiskOutput)>,
) -> Result<RiskOutput> {
    if parts.len() == 1 {
        return Ok(parts.remove(0).1);
    }
    match &parts[0].1 {
        // Loss is additive over probability-weighted scenarios: the blend of
        // event losses is the weighted sum per (asset, event).
        RiskOutput::EventLosses(_) => {
            let mut acc: BTreeMap<(AssetId, EventId), f64> = BTreeMap::new();
            for (weight, part) in parts {
                let RiskOutput::EventLosses(records) = part else {
                    continue;
                };
                for r in records {
                    *acc.entry((r.asset, r.event)).or_insert(0.0) += weight * r.loss;
                }
            }
            Ok(RiskOutput::EventLosses(
                acc.into_iter()
                    .map(|((asset, event), loss)| crate::riskmodel::EventLoss {
                        asset,
                        event,
                        loss,
                    })
                    .collect(),
            ))
        }
        // Damage arrays stay probability distributions, so the blend is a
        // weighted average along the state axis.
        RiskOutput::DamageCounts(_) => {
            let mut acc: Option<Vec<Vec<f64>>> = None;
            for (weight, part) in parts {
                let RiskOutput::DamageCounts(counts) = part else {
                    continue;
                };
                let acc = acc.get_or_insert_with(|| {
                    counts.iter().map(|row| vec![0.0; row.len()]).collect()
                });
                for (row, acc_row) in counts.iter().zip(acc) {
                    for (v, a) in row.iter().zip(acc_row) {
                        *a += weight * v;
                    }
                }
            }
            Ok(RiskOutput::DamageCounts(acc.unwrap_or_default()))
        }
        RiskOutput::DamageFractions(_) => {
            let mut acc: Option<Vec<Vec<Vec<f64>>>> = None;
            for (weight, part) in parts {
                let RiskOutput::DamageFractions(fractions) = part else {
                    continue;
                };
                let acc = acc.get_or_insert_with(|| {
                    fractions
                        .iter()
                        .map(|rows| rows.iter().map(|row| vec![0.0; row.len()]).collect())
                        .collect()
                });
                for (rows, acc_rows) in fractions.iter().zip(acc) {
                    for (row, acc_row) in rows.iter().zip(acc_rows) {
                        for (v, a) in row.iter().zip(acc_row) {
                            *a += weight * v;
                        }
                    }
                }
            }
            Ok(RiskOutput::DamageFractions(acc.unwrap_or_default()))
        }
        // Averaging loss-exceedance curves or BCR rows is not well defined;
        // build already rejects multi-model mappings for these modes.
        RiskOutput::LossCurves(_) | RiskOutput::Bcr(_) => {
            Err(RiskError::MultipleClassicalModels { taxonomy, loss_type, count: parts.len() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::{
        ConsequenceTable, FragilityFunction, FragilityFunctionList, LossDistribution,
        RiskFunctionKey, VulnerabilityFunction,
    };
    use crate::hazard::{GmfTable, HazardCurve};
    use crate::types::{CalcMode, SiteId};

    fn vf(id: &str, mean: f64) -> RiskFunction {
        RiskFunction::Vulnerability(
            VulnerabilityFunction::new(
                RiskId::new(id),
                "PGA",
                vec![0.1, 0.2, 0.4],
                vec![mean, mean, mean],
                vec![0.0; 3],
                LossDistribution::Degenerate,
            )
            .unwrap(),
        )
    }

    fn vf_graded(id: &str, imls: &[f64], means: &[f64]) -> RiskFunction {
        RiskFunction::Vulnerability(
            VulnerabilityFunction::new(
                RiskId::new(id),
                "PGA",
                imls.to_vec(),
                means.to_vec(),
                vec![0.0; imls.len()],
                LossDistribution::Degenerate,
            )
            .unwrap(),
        )
    }

    fn ffl(id: &str, states: &[(&str, [f64; 3])]) -> RiskFunction {
        RiskFunction::Fragility(
            FragilityFunctionList::new(
                RiskId::new(id),
                "PGA",
                vec![0.1, 0.2, 0.3],
                states
                    .iter()
                    .map(|(name, poes)| FragilityFunction {
                        limit_state: (*name).into(),
                        poes: poes.to_vec(),
                    })
                    .collect(),
            )
            .unwrap(),
        )
    }

    fn key(id: &str, kind: FunctionKind) -> RiskFunctionKey {
        RiskFunctionKey::new(RiskId::new(id), LossType::Structural, kind)
    }

    fn structural_asset(id: u32, value: f64) -> Asset {
        Asset::new(AssetId(id), SiteId(0), "RC").with_value(LossType::Structural, value)
    }

    fn curve_sample() -> HazardSample {
        HazardSample::Curves(vec![
            HazardCurve::new(
                "PGA",
                vec![0.05, 0.1, 0.2, 0.4, 0.8],
                vec![0.99, 0.9, 0.5, 0.1, 0.01],
            )
            .unwrap(),
        ])
    }

    fn one_event(gmv: f64) -> HazardSample {
        HazardSample::Gmfs(
            GmfTable::new(vec![EventId(0)]).with_column("PGA", vec![gmv]).unwrap(),
        )
    }

    fn blend_tmap(weights: [f64; 2]) -> TaxonomyMapping {
        let mut tmap = TaxonomyMapping::new();
        tmap.insert(
            TaxonomyIndex(0),
            LossType::Structural,
            vec![(RiskId::new("A"), weights[0]), (RiskId::new("B"), weights[1])],
        );
        tmap
    }

    fn blend_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.push(key("A", FunctionKind::Vulnerability), vf("A", 0.1));
        catalog.push(key("B", FunctionKind::Vulnerability), vf("B", 0.3));
        catalog
    }

    #[test]
    fn empty_catalog_is_rejected() {
        let err = CompositeRiskModel::build(
            Catalog::new(),
            TaxonomyMapping::new(),
            RiskConfig::new(CalcMode::EventBasedRisk),
        )
        .unwrap_err();
        assert!(matches!(err, RiskError::EmptyCatalog));
    }

    #[test]
    fn weights_must_sum_to_one() {
        let err = CompositeRiskModel::build(
            blend_catalog(),
            blend_tmap([0.5, 0.4]),
            RiskConfig::new(CalcMode::EventBasedRisk),
        )
        .unwrap_err();
        assert!(
            matches!(err, RiskError::WeightSum { sum, .. } if (sum - 0.9).abs() < 1e-12),
            "got: {err}"
        );
    }

    #[test]
    fn unknown_risk_model_in_mapping_is_rejected() {
        let mut tmap = TaxonomyMapping::new();
        tmap.single(TaxonomyIndex(0), &RiskId::new("Z"), &[LossType::Structural]);
        let err = CompositeRiskModel::build(
            blend_catalog(),
            tmap,
            RiskConfig::new(CalcMode::EventBasedRisk),
        )
        .unwrap_err();
        assert!(matches!(err, RiskError::UnknownRiskModel(id) if id.0 == "Z"));
    }

    #[test]
    fn classical_curves_allow_only_one_submodel_per_taxonomy() {
        let err = CompositeRiskModel::build(
            blend_catalog(),
            blend_tmap([0.5, 0.5]),
            RiskConfig::new(CalcMode::ClassicalRisk),
        )
        .unwrap_err();
        assert!(matches!(err, RiskError::MultipleClassicalModels { count: 2, .. }));
    }

    #[test]
    fn curve_grid_takes_the_widest_ratio_array_across_taxonomies() {
        // "A" resolves three vulnerability levels, "B" six; after build both
        // taxonomies must discretise their curves on the finer model's grid.
        let mut catalog = Catalog::new();
        catalog.push(
            key("A", FunctionKind::Vulnerability),
            vf_graded("A", &[0.1, 0.2, 0.4], &[0.05, 0.1, 0.2]),
        );
        catalog.push(
            key("B", FunctionKind::Vulnerability),
            vf_graded(
                "B",
                &[0.05, 0.1, 0.2, 0.3, 0.4, 0.5],
                &[0.02, 0.05, 0.08, 0.12, 0.16, 0.2],
            ),
        );
        let mut tmap = TaxonomyMapping::new();
        tmap.single(TaxonomyIndex(0), &RiskId::new("A"), &[LossType::Structural]);
        tmap.single(TaxonomyIndex(1), &RiskId::new("B"), &[LossType::Structural]);
        let crm = CompositeRiskModel::build(
            catalog,
            tmap,
            RiskConfig::new(CalcMode::ClassicalRisk),
        )
        .unwrap();

        assert_eq!(crm.curve_params.len(), 1);
        let width = crm.curve_params[0].ratios.len();
        // six ratios plus a zero head, five steps per interval
        assert_eq!(width, 31);

        let rng = MultiEventRng::new(42);
        for taxonomy in [TaxonomyIndex(0), TaxonomyIndex(1)] {
            let out = crm
                .get_output(
                    taxonomy,
                    &[structural_asset(0, 1_000.0)],
                    &curve_sample(),
                    &[],
                    &rng,
                    None,
                )
                .unwrap();
            match &out.by_loss_type[&LossType::Structural] {
                RiskOutput::LossCurves(curves) => {
                    assert_eq!(curves[0].curve.losses.len(), width, "taxonomy {taxonomy:?}");
                }
                other => panic!("unexpected output {other:?}"),
            }
        }
    }

    #[test]
    fn mixed_limit_state_sets_are_rejected() {
        let mut catalog = Catalog::new();
        catalog.push(
            key("A", FunctionKind::Fragility),
            ffl("A", &[("slight", [0.9, 0.5, 0.1]), ("severe", [0.5, 0.2, 0.05])]),
        );
        catalog.push(
            key("B", FunctionKind::Fragility),
            ffl("B", &[("minor", [0.9, 0.5, 0.1]), ("severe", [0.5, 0.2, 0.05])]),
        );
        let err = CompositeRiskModel::build(
            catalog,
            TaxonomyMapping::new(),
            RiskConfig::new(CalcMode::ScenarioDamage),
        )
        .unwrap_err();
        assert!(matches!(err, RiskError::MixedLimitStates { .. }), "got: {err}");
    }

    #[test]
    fn consequence_loss_category_must_match_its_key() {
        let mut catalog = blend_catalog();
        catalog.push(
            key("A", FunctionKind::Consequence),
            RiskFunction::Consequence(ConsequenceTable {
                id: RiskId::new("RC"),
                consequence: "losses".into(),
                loss_type: LossType::Contents,
                coefficients: vec![0.1, 1.0],
            }),
        );
        let err = CompositeRiskModel::build(
            catalog,
            blend_tmap([0.5, 0.5]),
            RiskConfig::new(CalcMode::EventBasedRisk),
        )
        .unwrap_err();
        assert!(matches!(err, RiskError::LossCategoryMismatch { .. }), "got: {err}");
    }

    #[test]
    fn unmapped_taxonomy_fails_at_evaluation() {
        let crm = CompositeRiskModel::build(
            blend_catalog(),
            blend_tmap([0.5, 0.5]),
            RiskConfig::new(CalcMode::EventBasedRisk),
        )
        .unwrap();
        let err = crm
            .get_output(
                TaxonomyIndex(7),
                &[structural_asset(0, 1.0)],
                &one_event(0.2),
                &[],
                &MultiEventRng::new(42),
                None,
            )
            .unwrap_err();
        assert!(
            matches!(err, RiskError::UnmappedTaxonomy { taxonomy: TaxonomyIndex(7), .. }),
            "got: {err}"
        );
    }

    #[test]
    fn blended_event_loss_is_the_weighted_sum() {
        // sub-model A gives ratio 0.1, B gives 0.3; 0.5/0.5 blend at value
        // 1000 must yield 0.5*100 + 0.5*300 = 200.
        let crm = CompositeRiskModel::build(
            blend_catalog(),
            blend_tmap([0.5, 0.5]),
            RiskConfig::new(CalcMode::EventBasedRisk),
        )
        .unwrap();
        let out = crm
            .get_output(
                TaxonomyIndex(0),
                &[structural_asset(0, 1_000.0)],
                &one_event(0.2),
                &[],
                &MultiEventRng::new(42),
                None,
            )
            .unwrap();
        match &out.by_loss_type[&LossType::Structural] {
            RiskOutput::EventLosses(rows) => {
                assert_eq!(rows.len(), 1);
                assert!((rows[0].loss - 200.0).abs() < 1e-9, "got {}", rows[0].loss);
            }
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[test]
    fn output_carries_the_realization_it_was_sampled_from() {
        let crm = CompositeRiskModel::build(
            blend_catalog(),
            blend_tmap([0.5, 0.5]),
            RiskConfig::new(CalcMode::EventBasedRisk),
        )
        .unwrap();
        let out = crm
            .get_output(
                TaxonomyIndex(0),
                &[structural_asset(0, 1_000.0)],
                &one_event(0.2),
                &[],
                &MultiEventRng::new(42),
                Some(2),
            )
            .unwrap();
        assert_eq!(out.realization, Some(2));
    }

    #[test]
    fn blended_damage_fractions_remain_a_distribution() {
        let mut catalog = Catalog::new();
        catalog.push(
            key("A", FunctionKind::Fragility),
            ffl("A", &[("slight", [0.9, 0.5, 0.1]), ("severe", [0.5, 0.2, 0.05])]),
        );
        catalog.push(
            key("B", FunctionKind::Fragility),
            ffl("B", &[("slight", [0.8, 0.4, 0.2]), ("severe", [0.4, 0.1, 0.02])]),
        );
        let crm = CompositeRiskModel::build(
            catalog,
            blend_tmap([0.25, 0.75]),
            RiskConfig::new(CalcMode::ScenarioDamage),
        )
        .unwrap();
        assert_eq!(crm.damage_states, ["no_damage", "slight", "severe"]);
        let out = crm
            .get_output(
                TaxonomyIndex(0),
                &[structural_asset(0, 0.0)],
                &one_event(0.25),
                &[],
                &MultiEventRng::new(42),
                None,
            )
            .unwrap();
        match &out.by_loss_type[&LossType::Structural] {
            RiskOutput::DamageFractions(fr) => {
                for row in &fr[0] {
                    let total: f64 = row.iter().sum();
                    assert!((total - 1.0).abs() < 1e-9, "not a distribution: {row:?}");
                }
            }
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[test]
    fn consequences_are_derived_from_damage_fractions() {
        let mut catalog = Catalog::new();
        catalog.push(
            key("A", FunctionKind::Fragility),
            ffl("A", &[("slight", [0.9, 0.5, 0.1]), ("severe", [0.5, 0.2, 0.05])]),
        );
        catalog.push(
            key("A", FunctionKind::Consequence),
            RiskFunction::Consequence(ConsequenceTable {
                id: RiskId::new("RC"),
                consequence: "losses".into(),
                loss_type: LossType::Structural,
                coefficients: vec![0.1, 1.0],
            }),
        );
        let mut tmap = TaxonomyMapping::new();
        tmap.single(TaxonomyIndex(0), &RiskId::new("A"), &[LossType::Structural]);
        let crm = CompositeRiskModel::build(
            catalog,
            tmap,
            RiskConfig::new(CalcMode::ScenarioDamage),
        )
        .unwrap();
        let out = crm
            .get_output(
                TaxonomyIndex(0),
                &[structural_asset(0, 1_000.0)],
                // at 0.2: slight exceedance 0.5, severe 0.2
                &one_event(0.2),
                &[],
                &MultiEventRng::new(42),
                None,
            )
            .unwrap();
        let rows = &out.consequences["losses"];
        // fractions [0.5, 0.3, 0.2], coefficients [0.1, 1.0], value 1000
        let want = (0.3 * 0.1 + 0.2 * 1.0) * 1_000.0;
        assert!((rows[0][0] - want).abs() < 1e-9, "got {}, want {want}", rows[0][0]);
    }

    #[test]
    fn secondary_loss_pass_runs_after_combination() {
        struct Halve;
        impl SecondaryLoss for Halve {
            fn update(&self, output: &mut TaxonomyOutput, _assets: &[Asset]) {
                for out in output.by_loss_type.values_mut() {
                    if let RiskOutput::EventLosses(rows) = out {
                        for r in rows {
                            r.loss *= 0.5;
                        }
                    }
                }
            }
        }
        let crm = CompositeRiskModel::build(
            blend_catalog(),
            blend_tmap([0.5, 0.5]),
            RiskConfig::new(CalcMode::EventBasedRisk),
        )
        .unwrap();
        let out = crm
            .get_output(
                TaxonomyIndex(0),
                &[structural_asset(0, 1_000.0)],
                &one_event(0.2),
                &[&Halve],
                &MultiEventRng::new(42),
                None,
            )
            .unwrap();
        match &out.by_loss_type[&LossType::Structural] {
            RiskOutput::EventLosses(rows) => {
                assert!((rows[0].loss - 100.0).abs() < 1e-9, "got {}", rows[0].loss);
            }
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[test]
    fn reduce_shares_models_and_restricts_the_mapping() {
        let mut tmap = blend_tmap([0.5, 0.5]);
        tmap.single(TaxonomyIndex(1), &RiskId::new("A"), &[LossType::Structural]);
        let crm = CompositeRiskModel::build(
            blend_catalog(),
            tmap,
            RiskConfig::new(CalcMode::EventBasedRisk),
        )
        .unwrap();
        let reduced = crm.reduce(&[TaxonomyIndex(1)]);
        assert_eq!(reduced.len(), 1, "only model A remains referenced");
        assert!(reduced.get(&RiskId::new("A")).is_ok());
        assert!(reduced.get(&RiskId::new("B")).is_err());
        assert_eq!(reduced.tmap.taxonomies().collect::<Vec<_>>(), [TaxonomyIndex(1)]);
        // the reduced copy still evaluates its taxonomy
        let out = reduced
            .get_output(
                TaxonomyIndex(1),
                &[structural_asset(0, 1_000.0)],
                &one_event(0.2),
                &[],
                &MultiEventRng::new(42),
                None,
            )
            .unwrap();
        assert!(out.by_loss_type.contains_key(&LossType::Structural));
    }
}

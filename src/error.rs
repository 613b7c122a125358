use thiserror::Error;

use crate::types::{AssetId, FunctionKind, LossType, RiskId, TaxonomyIndex};

pub type Result<T> = std::result::Result<T, RiskError>;

/// Failures of the risk computation core.
///
/// Configuration and data errors are raised at model-build time and abort the
/// calculation with a message naming the offending key. Runtime numeric edge
/// cases (intensity below the lowest defined level, zero contributing events)
/// are never errors: they are absorbed as zero contributions by the
/// evaluation methods.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("unknown calculation mode '{0}'")]
    UnknownCalcMode(String),

    #[error("the risk function catalog is empty")]
    EmptyCatalog,

    #[error("risk function '{id}': {reason}")]
    InvalidFunction { id: RiskId, reason: String },

    #[error("risk model '{risk_id}' has no {kind} function for loss type {loss_type}")]
    MissingRiskFunction {
        risk_id: RiskId,
        loss_type: LossType,
        kind: FunctionKind,
    },

    #[error(
        "fragility functions must share one limit-state set: \
         '{risk_id}' declares {found:?}, the catalog established {expected:?}"
    )]
    MixedLimitStates {
        risk_id: RiskId,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error(
        "consequence table '{risk_id}' declares loss category {declared} \
         but is keyed under {expected}"
    )]
    LossCategoryMismatch {
        risk_id: RiskId,
        declared: LossType,
        expected: LossType,
    },

    #[error("benefit-cost ratio is only defined for structural, requested for {0}")]
    BcrUnsupportedLossType(LossType),

    #[error("taxonomy #{} has no risk-model mapping for loss type {loss_type}", taxonomy.0)]
    UnmappedTaxonomy {
        taxonomy: TaxonomyIndex,
        loss_type: LossType,
    },

    #[error(
        "weights for taxonomy #{} / {loss_type} sum to {sum}, expected 1.0", taxonomy.0
    )]
    WeightSum {
        taxonomy: TaxonomyIndex,
        loss_type: LossType,
        sum: f64,
    },

    #[error("taxonomy mapping references unknown risk model '{0}'")]
    UnknownRiskModel(RiskId),

    #[error(
        "loss-exceedance curves are only defined for a single risk model per \
         taxonomy; taxonomy #{} / {loss_type} maps {count} models", taxonomy.0
    )]
    MultipleClassicalModels {
        taxonomy: TaxonomyIndex,
        loss_type: LossType,
        count: usize,
    },

    #[error("the {dist} distribution is not supported by the classical convolution")]
    UnsupportedDistribution { dist: &'static str },

    #[error("hazard sample mismatch: {mode} needs {expected}")]
    HazardMismatch {
        mode: crate::types::CalcMode,
        expected: &'static str,
    },

    #[error("no hazard data for intensity measure type '{imt}'")]
    MissingIntensityMeasure { imt: String },

    #[error("asset #{} has no retrofit cost, required by classical_bcr", asset.0)]
    MissingRetrofitCost { asset: AssetId },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(
        "refusing to allocate damage output of shape \
         ({assets} assets x {events} events x {states} states), \
         {bytes} bytes > {limit} byte limit; reduce the batch size"
    )]
    Allocation {
        assets: usize,
        events: usize,
        states: usize,
        bytes: u64,
        limit: u64,
    },
}

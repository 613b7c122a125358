//! Probabilistic seismic risk computation: vulnerability and fragility
//! function evaluation, per-taxonomy risk models dispatched by calculation
//! mode, and the composite registry that blends weighted sub-models into
//! portfolio losses, damage distributions and consequences.

pub mod assets;
pub mod composite;
pub mod config;
pub mod consequence;
pub mod error;
pub mod functions;
pub mod hazard;
pub mod riskmodel;
pub mod rng;
pub mod scientific;
pub mod types;
pub mod worker;

pub use composite::{CompositeRiskModel, CurveParams, SecondaryLoss, TaxonomyMapping, TaxonomyOutput};
pub use config::RiskConfig;
pub use error::{Result, RiskError};
pub use riskmodel::{RiskModel, RiskOutput};
pub use types::CalcMode;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::str::FromStr;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde_json::json;

use temblor::assets::Asset;
use temblor::composite::{CompositeRiskModel, TaxonomyMapping};
use temblor::config::RiskConfig;
use temblor::functions::{
    Catalog, FragilityFunction, FragilityFunctionList, LossDistribution, RiskFunction,
    RiskFunctionKey, VulnerabilityFunction,
};
use temblor::hazard::{GmfTable, HazardSample};
use temblor::rng::MultiEventRng;
use temblor::types::{
    AssetId, CalcMode, EventId, FunctionKind, LossType, RiskId, SiteId, TaxonomyIndex,
};
use temblor::worker::{self, WorkUnit};

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut seed: u64 = 42;
    let mut n_events: usize = 1_000;
    let mut n_assets: usize = 100;
    let mut mode = CalcMode::EventBasedRisk;
    let mut output_path = "losses.ndjson".to_string();
    let mut quiet = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--seed" => {
                i += 1;
                seed = args[i].parse().expect("--seed requires a u64");
            }
            "--events" => {
                i += 1;
                n_events = args[i].parse().expect("--events requires a positive integer");
            }
            "--assets" => {
                i += 1;
                n_assets = args[i].parse().expect("--assets requires a positive integer");
            }
            "--mode" => {
                i += 1;
                mode = CalcMode::from_str(&args[i]).expect("--mode requires a calculation mode");
            }
            "--output" => {
                i += 1;
                output_path = args[i].clone();
            }
            "--quiet" => quiet = true,
            other => {
                eprintln!("unknown argument: {other}");
                std::process::exit(2);
            }
        }
        i += 1;
    }

    if !quiet {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    if mode.is_curve_based() {
        eprintln!("the demo drives GMF modes only (event_based_risk, scenario_damage)");
        std::process::exit(2);
    }

    let crm = CompositeRiskModel::build(demo_catalog(), demo_tmap(), RiskConfig::new(mode))
        .expect("demo model must build");
    let units = demo_units(n_assets, n_events, seed);
    let rng = MultiEventRng::new(seed);

    let result = worker::evaluate_portfolio(&crm, &units, &[], &rng)
        .expect("portfolio evaluation failed");

    let file = File::create(&output_path).expect("cannot create output file");
    let mut out = BufWriter::new(file);
    let mut rows = 0u64;
    for (loss_type, by_key) in &result.event_losses {
        for ((asset, event), loss) in by_key {
            let row = json!({
                "loss_type": loss_type,
                "asset": asset.0,
                "event": event.0,
                "loss": loss,
            });
            writeln!(out, "{row}").expect("write failed");
            rows += 1;
        }
    }
    for (loss_type, by_asset) in &result.damage {
        for (asset, states) in by_asset {
            let row = json!({
                "loss_type": loss_type,
                "asset": asset.0,
                "damage": states,
            });
            writeln!(out, "{row}").expect("write failed");
            rows += 1;
        }
    }
    out.flush().expect("flush failed");

    if !quiet {
        let total: f64 = result
            .event_losses
            .values()
            .flat_map(|by_key| by_key.values())
            .sum();
        println!("mode {mode}: {rows} rows -> {output_path} (total event loss {total:.2})");
    }
}

fn demo_catalog() -> Catalog {
    let mut catalog = Catalog::new();
    for (id, means) in [("code-low", [0.05, 0.15, 0.4, 0.75]), ("code-high", [0.02, 0.08, 0.25, 0.5])] {
        let vf = VulnerabilityFunction::new(
            RiskId::new(id),
            "PGA",
            vec![0.1, 0.2, 0.4, 0.8],
            means.to_vec(),
            vec![0.4; 4],
            LossDistribution::Ln,
        )
        .expect("demo vulnerability function");
        catalog.push(
            RiskFunctionKey::new(RiskId::new(id), LossType::Structural, FunctionKind::Vulnerability),
            RiskFunction::Vulnerability(vf),
        );
        let ffl = FragilityFunctionList::new(
            RiskId::new(id),
            "PGA",
            vec![0.1, 0.2, 0.4, 0.8],
            vec![
                FragilityFunction { limit_state: "slight".into(), poes: vec![0.9, 0.6, 0.3, 0.1] },
                FragilityFunction { limit_state: "moderate".into(), poes: vec![0.5, 0.3, 0.12, 0.04] },
                FragilityFunction { limit_state: "collapse".into(), poes: vec![0.1, 0.05, 0.02, 0.005] },
            ],
        )
        .expect("demo fragility function");
        catalog.push(
            RiskFunctionKey::new(RiskId::new(id), LossType::Structural, FunctionKind::Fragility),
            RiskFunction::Fragility(ffl),
        );
    }
    catalog
}

fn demo_tmap() -> TaxonomyMapping {
    let mut tmap = TaxonomyMapping::new();
    tmap.insert(
        TaxonomyIndex(0),
        LossType::Structural,
        vec![(RiskId::new("code-low"), 0.4), (RiskId::new("code-high"), 0.6)],
    );
    tmap.single(TaxonomyIndex(1), &RiskId::new("code-high"), &[LossType::Structural]);
    tmap
}

fn demo_units(n_assets: usize, n_events: usize, seed: u64) -> Vec<WorkUnit> {
    let mut field_rng = ChaCha20Rng::seed_from_u64(seed);
    let mut units = Vec::new();
    for taxonomy in [TaxonomyIndex(0), TaxonomyIndex(1)] {
        let eids = (0..n_events as u64).map(EventId).collect();
        let gmvs: Vec<f64> = (0..n_events)
            .map(|_| {
                let u: f64 = field_rng.random();
                // a crude lognormal-ish ground-motion field
                (0.05 + 0.9 * u * u).min(1.2)
            })
            .collect();
        let table = GmfTable::new(eids)
            .with_column("PGA", gmvs)
            .expect("demo GMF table");
        let assets = (0..n_assets as u32)
            .map(|i| {
                Asset::new(AssetId(taxonomy.0 as u32 * n_assets as u32 + i), SiteId(i % 16), "RC")
                    .with_value(LossType::Structural, 50_000.0 + 1_000.0 * i as f64)
            })
            .collect();
        units.push(WorkUnit {
            taxonomy,
            assets,
            hazard: HazardSample::Gmfs(table),
            realization: None,
        });
    }
    units
}

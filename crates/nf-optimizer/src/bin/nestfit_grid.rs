//! Grid search over a toy Gaussian line profile.
//!
//! Usage: `nestfit-grid [settings.json] [steps]`. Without a settings file the
//! defaults are read from `NESTFIT_OUTPUT_ROOT` and `NESTFIT_CORES`.

use anyhow::Context;
use nf_optimizer::{
    GridSearch, OptimizationDriver, OptimizerSettings, RandomSearch, RunIdentity,
};
use nf_types::{Analysis, Instance, ModelMapper, NfError, NfResult, Prior};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Noisy Gaussian profile sampled on a fixed grid of x positions.
struct LineProfile {
    xs: Vec<f64>,
    data: Vec<f64>,
    noise: f64,
}

impl LineProfile {
    fn simulate(centre: f64, sigma: f64, intensity: f64) -> Self {
        let xs: Vec<f64> = (0..100).map(|i| i as f64 / 99.0).collect();
        let data = xs
            .iter()
            .enumerate()
            .map(|(i, x)| {
                let wobble = 0.01 * ((i * 37 % 11) as f64 - 5.0) / 5.0;
                intensity * (-0.5 * ((x - centre) / sigma).powi(2)).exp() + wobble
            })
            .collect();
        Self {
            xs,
            data,
            noise: 0.01,
        }
    }
}

impl Analysis for LineProfile {
    fn log_likelihood(&self, instance: &Instance) -> NfResult<f64> {
        let param = |name: &str| {
            instance
                .get(name)
                .ok_or_else(|| NfError::Analysis(format!("instance has no {name}")))
        };
        let (centre, sigma, intensity) = (param("centre")?, param("sigma")?, param("intensity")?);
        let chi_squared: f64 = self
            .xs
            .iter()
            .zip(&self.data)
            .map(|(x, y)| {
                let model = intensity * (-0.5 * ((x - centre) / sigma).powi(2)).exp();
                ((y - model) / self.noise).powi(2)
            })
            .sum();
        Ok(-0.5 * chi_squared)
    }

    fn visualize(&self, instance: &Instance, is_final: bool) {
        if is_final {
            info!(
                centre = ?instance.get("centre"),
                sigma = ?instance.get("sigma"),
                "final best fit"
            );
        }
    }
}

fn enable_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

fn main() -> anyhow::Result<()> {
    enable_tracing();

    let mut args = std::env::args().skip(1);
    let settings = match args.next() {
        Some(path) => OptimizerSettings::from_json_file(&path)
            .with_context(|| format!("loading settings from {path}"))?,
        None => OptimizerSettings::from_env()?,
    };
    let steps: usize = match args.next() {
        Some(steps) => steps.parse().context("steps must be a positive integer")?,
        None => 3,
    };

    let model = ModelMapper::new()
        .with_prior("centre", Prior::uniform(0.0, 1.0))
        .with_prior("sigma", Prior::log_uniform(0.01, 0.5))
        .with_constant("intensity", 1.0);
    let analysis = Arc::new(LineProfile::simulate(0.62, 0.08, 1.0));

    let driver = OptimizationDriver::new(
        RunIdentity::new("line_profile").with_tag("grid"),
        Arc::new(RandomSearch::new(500).with_seed(2024)),
        settings,
    )?;
    let result = GridSearch::new(driver, steps)
        .with_parallel(true)
        .fit(&model, analysis, &["centre"], None)?;

    let fom = result.figure_of_merit_array();
    println!("Figure of merit per centre cell: {fom}");
    for failure in result.failures() {
        println!("cell {} failed: {}", failure.name, failure.error);
    }
    if let Some(best) = result.best_result() {
        println!("{best}");
    }
    Ok(())
}

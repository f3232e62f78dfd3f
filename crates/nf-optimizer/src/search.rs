//! Built-in search algorithms and the registry used to rebuild them from
//! snapshots.

use nf_types::{ModelMapper, NfError, NfResult, Samples};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::driver::{AlgorithmSnapshot, SearchAlgorithm};
use crate::fitness::FitnessWrapper;
use crate::paths::{write_atomic, CheckpointStore};
use crate::pool::WorkerPool;

/// Name under which [`RandomSearch`] is recorded.
pub const RANDOM_SEARCH: &str = "random_search";

const TRACE_FILE: &str = "trace.json";

/// Resolve a built-in algorithm from its persisted snapshot.
pub fn algorithm_from_snapshot(snapshot: &AlgorithmSnapshot) -> NfResult<Arc<dyn SearchAlgorithm>> {
    match snapshot.search.as_str() {
        RANDOM_SEARCH => {
            let search: RandomSearch = serde_json::from_value(snapshot.settings.clone())?;
            Ok(Arc::new(search))
        }
        other => Err(NfError::Snapshot(format!("unknown search algorithm {other}"))),
    }
}

/// One evaluated point of a search trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracePoint {
    pub unit: Vec<f64>,
    pub parameters: Vec<f64>,
    pub log_likelihood: f64,
}

/// Independent uniform draws from the unit cube.
///
/// The trace is written to the run's `search/` directory after every batch,
/// so an interrupted run resumes with only the remaining draws.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomSearch {
    pub n_samples: usize,
    pub batch_size: usize,
    pub seed: u64,
}

impl RandomSearch {
    pub fn new(n_samples: usize) -> Self {
        Self {
            n_samples,
            batch_size: 100,
            seed: 0,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn trace_path(store: &CheckpointStore) -> std::path::PathBuf {
        store.search_dir().join(TRACE_FILE)
    }

    fn load_trace(path: &Path) -> NfResult<Vec<TracePoint>> {
        if !path.is_file() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }

    fn save_trace(path: &Path, trace: &[TracePoint]) -> NfResult<()> {
        write_atomic(path, &serde_json::to_vec(trace)?)
    }

    fn draw_batch(&self, rng: &mut ChaCha8Rng, size: usize, dimensions: usize) -> Vec<Vec<f64>> {
        (0..size)
            .map(|_| (0..dimensions).map(|_| rng.gen_range(0.0..1.0)).collect())
            .collect()
    }
}

impl SearchAlgorithm for RandomSearch {
    fn name(&self) -> &str {
        RANDOM_SEARCH
    }

    fn settings(&self) -> NfResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn run(&self, fitness: &Arc<FitnessWrapper>, pool: Option<&WorkerPool>) -> NfResult<()> {
        let path = Self::trace_path(fitness.store());
        let mut trace = Self::load_trace(&path)?;
        if trace.len() >= self.n_samples {
            info!(samples = trace.len(), "search trace already complete");
            return Ok(());
        }
        if !trace.is_empty() {
            info!(
                resumed = trace.len(),
                remaining = self.n_samples - trace.len(),
                "resuming random search"
            );
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(trace.len() as u64));
        let dimensions = fitness.model().prior_count();

        while trace.len() < self.n_samples {
            let size = (self.n_samples - trace.len()).min(self.batch_size.max(1));
            let units = self.draw_batch(&mut rng, size, dimensions);

            let scores: Vec<NfResult<f64>> = match pool {
                Some(pool) => {
                    let shared = Arc::clone(fitness);
                    pool.map(units.clone(), move |context, unit: Vec<f64>| {
                        shared.evaluate(&unit, Some(context))
                    })?
                }
                None => units.iter().map(|unit| fitness.evaluate(unit, None)).collect(),
            };

            for (unit, score) in units.into_iter().zip(scores) {
                let log_likelihood = score?;
                let parameters = fitness.model().vector_from_unit_vector(&unit)?;
                trace.push(TracePoint {
                    unit,
                    parameters,
                    log_likelihood,
                });
            }
            Self::save_trace(&path, &trace)?;
            debug!(
                done = trace.len(),
                total = self.n_samples,
                best = ?fitness.max_log_likelihood(),
                "batch evaluated"
            );
        }
        Ok(())
    }

    /// Draws come from the prior, so each is weighted by its likelihood
    /// relative to the best one. The evidence is the log of the mean
    /// likelihood over the draws.
    fn samples_from_model(&self, model: &ModelMapper, store: &CheckpointStore) -> NfResult<Samples> {
        let trace = Self::load_trace(&Self::trace_path(store))?;
        let mut parameters = Vec::with_capacity(trace.len());
        let mut log_likelihoods = Vec::with_capacity(trace.len());
        let mut log_priors = Vec::with_capacity(trace.len());
        for point in trace {
            log_priors.push(model.log_prior(&point.parameters)?);
            log_likelihoods.push(point.log_likelihood);
            parameters.push(point.parameters);
        }
        let weights = likelihood_weights(&log_likelihoods);
        let log_evidence = log_mean_exp(&log_likelihoods);
        Samples::new(
            model.clone(),
            parameters,
            log_likelihoods,
            log_priors,
            weights,
            log_evidence,
        )
    }
}

/// `exp(ll - max)` per draw; draws without a finite likelihood weigh zero.
fn likelihood_weights(log_likelihoods: &[f64]) -> Vec<f64> {
    let max = log_likelihoods
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    log_likelihoods
        .iter()
        .map(|ll| if ll.is_finite() { (ll - max).exp() } else { 0.0 })
        .collect()
}

fn log_mean_exp(values: &[f64]) -> Option<f64> {
    let max = values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return None;
    }
    let sum: f64 = values
        .iter()
        .filter(|v| !v.is_nan())
        .map(|v| (v - max).exp())
        .sum();
    Some(max + (sum / values.len() as f64).ln())
}

//! Run orchestration: validate, persist, search, mark complete, build the
//! result.

use chrono::{DateTime, Utc};
use nf_types::{Analysis, FitResult, ModelMapper, NfResult, Samples};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::OptimizerSettings;
use crate::fitness::FitnessWrapper;
use crate::paths::{CheckpointStore, RunIdentity, RunMetadata};
use crate::pool::WorkerPool;
use crate::report;
use crate::search;

/// A concrete search algorithm plugged into an [`OptimizationDriver`].
pub trait SearchAlgorithm: Send + Sync {
    /// Identifier written to the run metadata and used to resolve snapshots.
    fn name(&self) -> &str;

    /// Whether every free prior must map from the unit cube onto finite
    /// limits.
    fn requires_bounded_priors(&self) -> bool {
        true
    }

    /// Tunable settings, persisted in the optimizer snapshot.
    fn settings(&self) -> NfResult<serde_json::Value>;

    /// Drive the search to completion, evaluating through `fitness`.
    fn run(&self, fitness: &Arc<FitnessWrapper>, pool: Option<&WorkerPool>) -> NfResult<()>;

    /// Convert the algorithm's native trace into samples.
    fn samples_from_model(&self, model: &ModelMapper, store: &CheckpointStore)
        -> NfResult<Samples>;
}

/// Persisted description of the algorithm driving a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmSnapshot {
    pub search: String,
    pub settings: serde_json::Value,
}

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Created,
    Prepared,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub id: Uuid,
    pub state: RunState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RunStatus {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: RunState::Created,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_prepared(&mut self) {
        self.state = RunState::Prepared;
    }

    pub fn mark_running(&mut self) {
        self.state = RunState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = RunState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = RunState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one search algorithm against one run directory.
#[derive(Clone)]
pub struct OptimizationDriver {
    store: CheckpointStore,
    algorithm: Arc<dyn SearchAlgorithm>,
    settings: OptimizerSettings,
    status: RunStatus,
}

impl OptimizationDriver {
    pub fn new(
        identity: RunIdentity,
        algorithm: Arc<dyn SearchAlgorithm>,
        settings: OptimizerSettings,
    ) -> NfResult<Self> {
        settings.validate()?;
        let store = CheckpointStore::new(settings.output_root.clone(), identity)?;
        Ok(Self {
            store,
            algorithm,
            settings,
            status: RunStatus::new(),
        })
    }

    /// Rebuild a driver from the snapshots in `store`. Built-in algorithms
    /// are resolved by the name recorded in the snapshot.
    pub fn from_snapshot(settings: OptimizerSettings, store: CheckpointStore) -> NfResult<Self> {
        settings.validate()?;
        store.restore()?;
        let snapshot: AlgorithmSnapshot = store.load_optimizer_snapshot()?;
        let algorithm = search::algorithm_from_snapshot(&snapshot)?;
        info!(run = %store.identity().name, search = %snapshot.search, "driver loaded from snapshot");
        Ok(Self {
            store,
            algorithm,
            settings,
            status: RunStatus::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.store.identity().name
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn algorithm(&self) -> &Arc<dyn SearchAlgorithm> {
        &self.algorithm
    }

    /// A driver with the same algorithm and settings targeting
    /// `{name}/{suffix}`.
    pub fn copy_with_name_extension(&self, suffix: &str, remove_tag: bool) -> NfResult<Self> {
        let identity = self.store.identity().extended(suffix, remove_tag);
        Self::new(identity, Arc::clone(&self.algorithm), self.settings.clone())
    }

    /// Fit `model` with the scoring supplied by `analysis`.
    ///
    /// A run whose completion marker already exists is not searched again;
    /// its samples are re-read and the same result is returned.
    pub fn fit(
        &mut self,
        model: &ModelMapper,
        analysis: Arc<dyn Analysis>,
        info: Option<serde_json::Value>,
    ) -> NfResult<FitResult> {
        model.validate(self.algorithm.requires_bounded_priors())?;
        self.prepare(model, info.as_ref())?;

        if self.store.is_complete() {
            info!(run = %self.name(), "run already completed, loading samples");
        } else {
            self.status.mark_running();
            info!(
                run = %self.name(),
                search = %self.algorithm.name(),
                dimensions = model.prior_count(),
                cores = self.settings.number_of_cores,
                "starting search"
            );
            if let Err(e) = self.search(model, &analysis) {
                error!(run = %self.name(), error = %e, "search failed");
                self.status.mark_failed(e.to_string());
                return Err(e);
            }
            if let Err(e) = self.store.backup() {
                warn!(run = %self.name(), error = %e, "final backup failed");
            }
            self.store.mark_complete()?;
        }

        let samples = self.algorithm.samples_from_model(model, &self.store)?;
        if let Some(instance) = samples.max_log_likelihood_instance() {
            analysis.visualize(instance, true);
        }
        self.store.write_results(&report::results_text(&samples)?)?;

        self.status.mark_completed();
        info!(
            run = %self.name(),
            samples = samples.total_samples(),
            max_log_likelihood = ?samples.max_log_likelihood(),
            "run complete"
        );
        Ok(FitResult::new(samples, Some(model.clone())))
    }

    fn prepare(&mut self, model: &ModelMapper, info: Option<&serde_json::Value>) -> NfResult<()> {
        self.store.prepare()?;
        self.store.write_model_info(model)?;
        self.store.write_param_names(model)?;
        self.store.write_metadata(&RunMetadata {
            name: self.store.identity().name.clone(),
            tag: self.store.identity().tag.clone(),
            search: self.algorithm.name().to_string(),
        })?;
        self.store
            .write_info(info.unwrap_or(&serde_json::Value::Null))?;
        self.store.write_model_snapshot(model)?;
        self.store.write_optimizer_snapshot(&AlgorithmSnapshot {
            search: self.algorithm.name().to_string(),
            settings: self.algorithm.settings()?,
        })?;
        self.status.mark_prepared();
        Ok(())
    }

    fn search(&self, model: &ModelMapper, analysis: &Arc<dyn Analysis>) -> NfResult<()> {
        let fitness = Arc::new(FitnessWrapper::new(
            model.clone(),
            Arc::clone(analysis),
            self.store.clone(),
            Arc::clone(&self.algorithm),
            &self.settings.intervals,
        ));
        let pool = match self.settings.number_of_cores {
            1 => None,
            cores => Some(WorkerPool::new(cores)?),
        };
        self.algorithm.run(&fitness, pool.as_ref())
    }
}

impl std::fmt::Debug for OptimizationDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizationDriver")
            .field("run_dir", &self.store.run_dir())
            .field("search", &self.algorithm.name())
            .field("state", &self.status.state)
            .finish()
    }
}

//! Adapter between a search algorithm's unit-cube proposals and the user's
//! analysis, tracking the best log likelihood and firing gated side effects.

use nf_types::{Analysis, Instance, ModelMapper, NfResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::OutputIntervals;
use crate::driver::SearchAlgorithm;
use crate::interval::IntervalGate;
use crate::paths::CheckpointStore;
use crate::pool::WorkerContext;
use crate::report;

struct SideEffectGates {
    log: IntervalGate,
    visualize: IntervalGate,
    backup: IntervalGate,
    model_results: IntervalGate,
}

impl SideEffectGates {
    fn new(intervals: &OutputIntervals) -> Self {
        Self {
            log: IntervalGate::new(intervals.log),
            visualize: IntervalGate::new(intervals.visualize),
            backup: IntervalGate::new(intervals.backup),
            model_results: IntervalGate::new(intervals.model_results_output),
        }
    }
}

/// Scores unit-cube vectors for one run.
///
/// The running maximum is shared by every worker; the interval gates are only
/// ever advanced by the master worker (or by the caller when no pool is in
/// use), so each side effect fires at most once per tick.
pub struct FitnessWrapper {
    model: ModelMapper,
    analysis: Arc<dyn Analysis>,
    store: CheckpointStore,
    algorithm: Arc<dyn SearchAlgorithm>,
    max_log_likelihood: AtomicU64,
    gates: Mutex<SideEffectGates>,
    evaluations: AtomicU64,
}

impl FitnessWrapper {
    pub fn new(
        model: ModelMapper,
        analysis: Arc<dyn Analysis>,
        store: CheckpointStore,
        algorithm: Arc<dyn SearchAlgorithm>,
        intervals: &OutputIntervals,
    ) -> Self {
        Self {
            model,
            analysis,
            store,
            algorithm,
            max_log_likelihood: AtomicU64::new(f64::NEG_INFINITY.to_bits()),
            gates: Mutex::new(SideEffectGates::new(intervals)),
            evaluations: AtomicU64::new(0),
        }
    }

    pub fn model(&self) -> &ModelMapper {
        &self.model
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Best log likelihood seen so far, if any evaluation produced one.
    pub fn max_log_likelihood(&self) -> Option<f64> {
        let value = f64::from_bits(self.max_log_likelihood.load(Ordering::Acquire));
        (value > f64::NEG_INFINITY).then_some(value)
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    /// Log likelihood of the point at `unit_vector`.
    ///
    /// `worker` is the context of the pool worker running the evaluation, or
    /// `None` when evaluating on the caller's thread. Only analysis and
    /// mapping failures propagate.
    pub fn evaluate(&self, unit_vector: &[f64], worker: Option<&WorkerContext>) -> NfResult<f64> {
        let instance = self.model.instance_from_unit_vector(unit_vector)?;
        let log_likelihood = self.analysis.log_likelihood(&instance)?;
        self.evaluations.fetch_add(1, Ordering::Relaxed);

        if !self.raise_maximum(log_likelihood) {
            return Ok(log_likelihood);
        }
        if matches!(worker, Some(context) if !context.is_master()) {
            return Ok(log_likelihood);
        }
        self.on_improvement(log_likelihood, &instance);
        Ok(log_likelihood)
    }

    /// Replace the maximum when `candidate` is strictly larger. Returns
    /// whether this call won the update.
    fn raise_maximum(&self, candidate: f64) -> bool {
        if candidate.is_nan() {
            return false;
        }
        let mut current = self.max_log_likelihood.load(Ordering::Acquire);
        loop {
            if candidate <= f64::from_bits(current) {
                return false;
            }
            match self.max_log_likelihood.compare_exchange_weak(
                current,
                candidate.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn on_improvement(&self, log_likelihood: f64, instance: &Instance) {
        let (log, visualize, backup, model_results) = {
            let mut gates = self.gates.lock();
            (
                gates.log.should_fire(),
                gates.visualize.should_fire(),
                gates.backup.should_fire(),
                gates.model_results.should_fire(),
            )
        };

        if log {
            info!(
                run = %self.store.identity().name,
                max_log_likelihood = log_likelihood,
                evaluations = self.evaluations(),
                "new best log likelihood"
            );
        }
        if visualize {
            self.analysis.visualize(instance, false);
        }
        if backup {
            if let Err(e) = self.store.backup() {
                warn!(run = %self.store.identity().name, error = %e, "backup failed");
            }
        }
        if model_results {
            match self.write_partial_results() {
                Ok(()) => debug!(run = %self.store.identity().name, "partial results written"),
                Err(e) => warn!(
                    run = %self.store.identity().name,
                    error = %e,
                    "could not write partial results"
                ),
            }
        }
    }

    fn write_partial_results(&self) -> NfResult<()> {
        let samples = self.algorithm.samples_from_model(&self.model, &self.store)?;
        self.store.write_results(&report::results_text(&samples)?)
    }
}

impl std::fmt::Debug for FitnessWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FitnessWrapper")
            .field("run", &self.store.identity().name)
            .field("max_log_likelihood", &self.max_log_likelihood())
            .field("evaluations", &self.evaluations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::RunIdentity;
    use crate::pool::WorkerPool;
    use nf_types::{internal_error, NfError, Prior, Samples};
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    /// Log likelihood equal to the value of `x`, counting visualizations.
    #[derive(Default)]
    struct Identity {
        visualized: AtomicUsize,
    }

    impl Analysis for Identity {
        fn log_likelihood(&self, instance: &Instance) -> NfResult<f64> {
            instance
                .get("x")
                .ok_or_else(|| internal_error!("missing x"))
        }

        fn visualize(&self, _instance: &Instance, _is_final: bool) {
            self.visualized.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Failing;

    impl Analysis for Failing {
        fn log_likelihood(&self, _instance: &Instance) -> NfResult<f64> {
            Err(NfError::Analysis("data missing".into()))
        }
    }

    /// Search whose sample reader always fails.
    struct BrokenReport;

    impl SearchAlgorithm for BrokenReport {
        fn name(&self) -> &str {
            "broken_report"
        }

        fn settings(&self) -> NfResult<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }

        fn run(&self, _fitness: &Arc<FitnessWrapper>, _pool: Option<&WorkerPool>) -> NfResult<()> {
            Ok(())
        }

        fn samples_from_model(
            &self,
            _model: &ModelMapper,
            _store: &CheckpointStore,
        ) -> NfResult<Samples> {
            Err(internal_error!("trace unreadable"))
        }
    }

    fn wrapper(
        dir: &std::path::Path,
        analysis: Arc<dyn Analysis>,
        intervals: OutputIntervals,
    ) -> FitnessWrapper {
        let store = CheckpointStore::new(dir, RunIdentity::new("fitness")).unwrap();
        store.prepare().unwrap();
        let model = ModelMapper::new().with_prior("x", Prior::uniform(0.0, 10.0));
        FitnessWrapper::new(model, analysis, store, Arc::new(BrokenReport), &intervals)
    }

    #[test]
    fn evaluate_maps_unit_vector_to_physical_space() {
        let dir = tempdir().unwrap();
        let fitness = wrapper(dir.path(), Arc::new(Identity::default()), OutputIntervals::silent());
        let score = fitness.evaluate(&[0.25], None).unwrap();
        assert!((score - 2.5).abs() < 1e-12);
        assert_eq!(fitness.evaluations(), 1);
    }

    #[test]
    fn maximum_only_rises_on_strict_improvement() {
        let dir = tempdir().unwrap();
        let fitness = wrapper(dir.path(), Arc::new(Identity::default()), OutputIntervals::silent());
        assert!(fitness.max_log_likelihood().is_none());

        fitness.evaluate(&[0.5], None).unwrap();
        fitness.evaluate(&[0.2], None).unwrap();
        assert_eq!(fitness.max_log_likelihood(), Some(5.0));

        assert!(!fitness.raise_maximum(5.0));
        assert!(!fitness.raise_maximum(f64::NAN));
        assert!(fitness.raise_maximum(5.5));
    }

    #[test]
    fn visualization_fires_on_interval_of_improvements() {
        let dir = tempdir().unwrap();
        let analysis = Arc::new(Identity::default());
        let mut intervals = OutputIntervals::silent();
        intervals.visualize = 2;
        let fitness = wrapper(dir.path(), analysis.clone(), intervals);

        for unit in [0.1, 0.2, 0.15, 0.3, 0.4] {
            fitness.evaluate(&[unit], None).unwrap();
        }
        // Four improvements, the second and fourth fire.
        assert_eq!(analysis.visualized.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn non_master_workers_skip_side_effects() {
        let dir = tempdir().unwrap();
        let analysis = Arc::new(Identity::default());
        let mut intervals = OutputIntervals::silent();
        intervals.visualize = 1;
        let fitness = wrapper(dir.path(), analysis.clone(), intervals);

        let worker = WorkerContext { id: 2, master_id: 0 };
        fitness.evaluate(&[0.3], Some(&worker)).unwrap();
        assert_eq!(analysis.visualized.load(Ordering::SeqCst), 0);
        assert_eq!(fitness.max_log_likelihood(), Some(3.0));

        let master = WorkerContext { id: 0, master_id: 0 };
        fitness.evaluate(&[0.2], Some(&master)).unwrap();
        assert_eq!(analysis.visualized.load(Ordering::SeqCst), 0);
        fitness.evaluate(&[0.4], Some(&master)).unwrap();
        assert_eq!(analysis.visualized.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn partial_result_failures_are_swallowed() {
        let dir = tempdir().unwrap();
        let mut intervals = OutputIntervals::silent();
        intervals.model_results_output = 1;
        let fitness = wrapper(dir.path(), Arc::new(Identity::default()), intervals);

        assert!(fitness.evaluate(&[0.9], None).is_ok());
        assert!(!fitness.store().results_path().exists());
    }

    #[test]
    fn analysis_errors_propagate() {
        let dir = tempdir().unwrap();
        let fitness = wrapper(dir.path(), Arc::new(Failing), OutputIntervals::silent());
        let err = fitness.evaluate(&[0.5], None).unwrap_err();
        assert!(matches!(err, NfError::Analysis(_)));
        assert_eq!(fitness.evaluations(), 0);
    }

    #[test]
    fn backup_copies_working_state_on_improvement() {
        let dir = tempdir().unwrap();
        let mut intervals = OutputIntervals::silent();
        intervals.backup = 1;
        let fitness = wrapper(dir.path(), Arc::new(Identity::default()), intervals);
        std::fs::write(fitness.store().search_dir().join("state"), b"1").unwrap();

        fitness.evaluate(&[0.5], None).unwrap();
        assert!(fitness.store().backup_dir().join("state").exists());
    }

    /// Records which thread visualized which value.
    #[derive(Default)]
    struct ThreadRecorder {
        views: parking_lot::Mutex<Vec<(String, f64)>>,
    }

    impl Analysis for ThreadRecorder {
        fn log_likelihood(&self, instance: &Instance) -> NfResult<f64> {
            instance
                .get("x")
                .ok_or_else(|| internal_error!("missing x"))
        }

        fn visualize(&self, instance: &Instance, _is_final: bool) {
            let thread = std::thread::current().name().unwrap_or_default().to_string();
            self.views
                .lock()
                .push((thread, instance.get("x").unwrap_or(f64::NAN)));
        }
    }

    #[test]
    fn pool_workers_share_one_maximum() {
        let dir = tempdir().unwrap();
        let analysis = Arc::new(ThreadRecorder::default());
        let mut intervals = OutputIntervals::silent();
        intervals.visualize = 1;
        let fitness = Arc::new(wrapper(dir.path(), analysis.clone(), intervals));

        let pool = WorkerPool::new(3).unwrap();
        let units: Vec<f64> = (1..=30).map(|i| i as f64 / 31.0).collect();
        let shared = Arc::clone(&fitness);
        let scores = pool
            .map(units, move |context, unit| shared.evaluate(&[unit], Some(context)))
            .unwrap();
        assert!(scores.iter().all(|s| s.is_ok()));
        assert_eq!(fitness.evaluations(), 30);

        let best = fitness.max_log_likelihood().unwrap();
        assert!((best - 300.0 / 31.0).abs() < 1e-9);

        // Only the master visualizes, once per improvement it made.
        let views = analysis.views.lock();
        assert!(views.len() <= 30);
        let threads: std::collections::HashSet<&str> =
            views.iter().map(|(thread, _)| thread.as_str()).collect();
        assert!(threads.len() <= 1, "visualized from {threads:?}");
        assert!(threads.iter().all(|t| t.starts_with("nestfit-worker-")));
        assert!(views.windows(2).all(|pair| pair[1].1 > pair[0].1));
    }
}

//! Sequences of fits where each stage can build on the results so far.

use nf_types::{Analysis, FitResult, ModelMapper, NfResult, ResultsCollection};
use std::ops::Add;
use std::sync::Arc;
use tracing::info;

use crate::driver::OptimizationDriver;

/// One step of a [`Pipeline`].
pub trait Stage: Send {
    fn name(&self) -> &str;

    /// Run the stage given every earlier stage's result.
    fn run(&mut self, results: &ResultsCollection) -> NfResult<FitResult>;
}

type ModelBuilder = Box<dyn Fn(&ResultsCollection) -> NfResult<ModelMapper> + Send>;

/// Stage fitting a model derived from earlier results.
pub struct FitStage {
    name: String,
    driver: OptimizationDriver,
    analysis: Arc<dyn Analysis>,
    model: ModelBuilder,
}

impl FitStage {
    /// `model` receives the results collected so far; the first stage sees an
    /// empty collection.
    pub fn new<F>(
        name: impl Into<String>,
        driver: OptimizationDriver,
        analysis: Arc<dyn Analysis>,
        model: F,
    ) -> Self
    where
        F: Fn(&ResultsCollection) -> NfResult<ModelMapper> + Send + 'static,
    {
        Self {
            name: name.into(),
            driver,
            analysis,
            model: Box::new(model),
        }
    }

    pub fn driver(&self) -> &OptimizationDriver {
        &self.driver
    }
}

impl Stage for FitStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, results: &ResultsCollection) -> NfResult<FitResult> {
        let model = (self.model)(results)?;
        self.driver.fit(&model, Arc::clone(&self.analysis), None)
    }
}

pub struct Pipeline {
    name: String,
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order. The first failing stage aborts the pipeline.
    pub fn run(&mut self) -> NfResult<ResultsCollection> {
        let mut results = ResultsCollection::new();
        for stage in &mut self.stages {
            info!(pipeline = %self.name, stage = %stage.name(), "Running stage");
            let result = stage.run(&results)?;
            results.add(stage.name().to_string(), result);
        }
        Ok(results)
    }
}

impl Add for Pipeline {
    type Output = Pipeline;

    fn add(mut self, other: Pipeline) -> Pipeline {
        self.stages.extend(other.stages);
        Pipeline {
            name: format!("{} + {}", self.name, other.name),
            stages: self.stages,
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stages: Vec<&str> = self.stages.iter().map(|s| s.name()).collect();
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &stages)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OptimizerSettings, OutputIntervals};
    use crate::paths::RunIdentity;
    use crate::search::RandomSearch;
    use nf_types::{internal_error, Instance, NfError, Prior, PriorKind};
    use tempfile::tempdir;

    struct Parabola;

    impl Analysis for Parabola {
        fn log_likelihood(&self, instance: &Instance) -> NfResult<f64> {
            let x = instance.get("x").ok_or_else(|| internal_error!("missing x"))?;
            Ok(-((x - 0.6) / 0.05).powi(2))
        }
    }

    /// Records the results it was given.
    struct Probe {
        name: String,
        seen: Arc<parking_lot::Mutex<Vec<usize>>>,
        template: FitResult,
    }

    impl Stage for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        fn run(&mut self, results: &ResultsCollection) -> NfResult<FitResult> {
            self.seen.lock().push(results.len());
            Ok(self.template.clone())
        }
    }

    fn template() -> FitResult {
        let model = ModelMapper::new().with_prior("x", Prior::uniform(0.0, 1.0));
        let samples =
            nf_types::Samples::new(model, vec![vec![0.5]], vec![-1.0], vec![0.0], vec![1.0], None)
                .unwrap();
        FitResult::new(samples, None)
    }

    fn probe(name: &str, seen: &Arc<parking_lot::Mutex<Vec<usize>>>) -> Probe {
        Probe {
            name: name.to_string(),
            seen: Arc::clone(seen),
            template: template(),
        }
    }

    #[test]
    fn stages_see_earlier_results_in_order() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new("chain")
            .with_stage(probe("first", &seen))
            .with_stage(probe("second", &seen))
            .with_stage(probe("third", &seen));

        let results = pipeline.run().unwrap();
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
        assert_eq!(results.names(), &["first", "second", "third"]);
    }

    #[test]
    fn adding_pipelines_concatenates_stages() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let a = Pipeline::new("a").with_stage(probe("one", &seen));
        let b = Pipeline::new("b")
            .with_stage(probe("two", &seen))
            .with_stage(probe("three", &seen));

        let mut combined = a + b;
        assert_eq!(combined.name(), "a + b");
        assert_eq!(combined.len(), 3);
        let results = combined.run().unwrap();
        assert_eq!(results.last().map(|r| r.max_log_likelihood()), Some(Some(-1.0)));
    }

    #[test]
    fn failing_stage_stops_the_pipeline() {
        let dir = tempdir().unwrap();
        let settings = OptimizerSettings::new(dir.path()).with_intervals(OutputIntervals::silent());
        let driver = OptimizationDriver::new(
            RunIdentity::new("needs_previous"),
            Arc::new(RandomSearch::new(10)),
            settings,
        )
        .unwrap();
        let stage = FitStage::new("chained", driver, Arc::new(Parabola), |results| {
            results
                .last()
                .ok_or_else(|| NfError::Validation("no previous stage".into()))?
                .model_absolute(0.1)
        });
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new("broken")
            .with_stage(stage)
            .with_stage(probe("after", &seen));

        assert!(matches!(pipeline.run(), Err(NfError::Validation(_))));
        assert!(seen.lock().is_empty());
    }

    struct Spike;

    impl Analysis for Spike {
        fn log_likelihood(&self, instance: &Instance) -> NfResult<f64> {
            let x = instance.get("x").ok_or_else(|| internal_error!("missing x"))?;
            Ok(-0.5 * ((x - 0.6) / 1e-4).powi(2))
        }
    }

    #[test]
    fn sharply_peaked_stage_still_feeds_the_next() {
        let dir = tempdir().unwrap();
        let settings = OptimizerSettings::new(dir.path()).with_intervals(OutputIntervals::silent());
        let search = Arc::new(RandomSearch::new(200).with_seed(3));
        let driver = |name: &str| {
            OptimizationDriver::new(RunIdentity::new(name), search.clone(), settings.clone())
                .unwrap()
        };

        let spike = FitStage::new("spike", driver("spike"), Arc::new(Spike), |_| {
            Ok(ModelMapper::new().with_prior("x", Prior::uniform(0.0, 1.0)))
        });
        let follow = FitStage::new("follow", driver("follow"), Arc::new(Spike), |results| {
            results
                .last()
                .ok_or_else(|| NfError::Validation("no previous stage".into()))?
                .model()
                .cloned()
        });

        let mut pipeline = Pipeline::new("spiky").with_stage(spike).with_stage(follow);
        let results = pipeline.run().unwrap();
        let prior = results.from_name("follow").unwrap().samples().model().prior("x").unwrap();
        match prior.kind {
            PriorKind::Gaussian { sigma, .. } => assert!(sigma >= 0.01 - 1e-12),
            ref other => panic!("expected gaussian prior, got {other:?}"),
        }
    }

    #[test]
    fn fit_stages_pass_priors_forward() {
        let dir = tempdir().unwrap();
        let settings = OptimizerSettings::new(dir.path()).with_intervals(OutputIntervals::silent());
        let search = Arc::new(RandomSearch::new(300).with_seed(1));
        let first_driver = OptimizationDriver::new(
            RunIdentity::new("broad").with_path_prefix("pipeline"),
            search.clone(),
            settings.clone(),
        )
        .unwrap();
        let second_driver = OptimizationDriver::new(
            RunIdentity::new("narrow").with_path_prefix("pipeline"),
            search,
            settings,
        )
        .unwrap();

        let broad = FitStage::new("broad", first_driver, Arc::new(Parabola), |_| {
            Ok(ModelMapper::new().with_prior("x", Prior::uniform(0.0, 1.0)))
        });
        let narrow = FitStage::new("narrow", second_driver, Arc::new(Parabola), |results| {
            results.from_name("broad")?.model_relative(0.1)
        });

        let mut pipeline = Pipeline::new("refine").with_stage(broad).with_stage(narrow);
        let results = pipeline.run().unwrap();
        assert_eq!(results.len(), 2);

        let narrow_result = results.from_name("narrow").unwrap();
        let prior = narrow_result.samples().model().prior("x").unwrap();
        match prior.kind {
            PriorKind::Gaussian {
                mean,
                lower_limit,
                upper_limit,
                ..
            } => {
                assert!((mean - 0.6).abs() < 0.05);
                assert_eq!((lower_limit, upper_limit), (0.0, 1.0));
            }
            ref other => panic!("expected gaussian prior, got {other:?}"),
        }
    }
}

//! # nf-optimizer
//!
//! Fit orchestration for NestFit.
//!
//! Provides the optimization driver and its search-algorithm capability,
//! the fitness wrapper with interval-gated side effects, the worker pool with
//! master election, per-run checkpointing, grid search over prior cells,
//! stage pipelines and a typed catalog of past runs.

mod catalog;
mod config;
mod driver;
mod fitness;
mod grid;
mod interval;
mod paths;
mod pipeline;
mod pool;
mod report;
mod search;

pub use catalog::{FitCatalog, FitField, FitPredicate, FitRecord};
pub use config::{OptimizerSettings, OutputIntervals, CORES_ENV, OUTPUT_ROOT_ENV};
pub use driver::{AlgorithmSnapshot, OptimizationDriver, RunState, RunStatus, SearchAlgorithm};
pub use fitness::FitnessWrapper;
pub use grid::{
    CellFailure, GridAxis, GridCell, GridCellSummary, GridPartitioner, GridSearch,
    GridSearchResult,
};
pub use interval::{IntervalGate, NEVER};
pub use paths::{
    CheckpointStore, RunIdentity, RunMetadata, SnapshotEnvelope, SNAPSHOT_SCHEMA_VERSION,
};
pub use pipeline::{FitStage, Pipeline, Stage};
pub use pool::{WorkerContext, WorkerPool};
pub use report::results_text;
pub use search::{algorithm_from_snapshot, RandomSearch, TracePoint, RANDOM_SEARCH};

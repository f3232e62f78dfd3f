//! Grid search: split chosen priors into equal cells and fit every cell as
//! its own run.

use ndarray::{ArrayD, IxDyn};
use nf_types::{
    Analysis, FitResult, GridError, ModelMapper, NfResult, Prior, PriorError, PriorId,
    ResultsCollection,
};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info};

use crate::driver::OptimizationDriver;

/// One gridded dimension: a prior's physical range split into `steps` cells.
#[derive(Debug, Clone, PartialEq)]
pub struct GridAxis {
    pub prior_id: PriorId,
    pub label: String,
    pub lower: f64,
    pub upper: f64,
    pub steps: usize,
}

impl GridAxis {
    fn edge(&self, i: usize) -> f64 {
        if i >= self.steps {
            self.upper
        } else {
            self.lower + (self.upper - self.lower) * i as f64 / self.steps as f64
        }
    }

    /// Bounds of cell `i`.
    pub fn bounds(&self, i: usize) -> (f64, f64) {
        (self.edge(i), self.edge(i + 1))
    }

    /// Index of the cell holding `value`. Cells are half-open except the
    /// last, which includes the upper limit.
    pub fn locate(&self, value: f64) -> Option<usize> {
        if value.is_nan() || value < self.lower || value > self.upper {
            return None;
        }
        let fraction = (value - self.lower) / (self.upper - self.lower);
        let index = (fraction * self.steps as f64).floor() as usize;
        let mut index = index.min(self.steps - 1);
        // Correct for rounding at the cell edges.
        if index > 0 && value < self.edge(index) {
            index -= 1;
        } else if index + 1 < self.steps && value >= self.edge(index + 1) {
            index += 1;
        }
        Some(index)
    }
}

/// A single grid cell and the model restricted to it.
#[derive(Debug, Clone)]
pub struct GridCell {
    /// Position along each axis, row-major.
    pub index: Vec<usize>,
    pub bounds: Vec<(f64, f64)>,
    /// Name suffix, e.g. `centre_0.00_0.50_sigma_0.50_1.00`.
    pub suffix: String,
    pub model: ModelMapper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridPartitioner {
    number_of_steps: usize,
}

impl GridPartitioner {
    pub fn new(number_of_steps: usize) -> NfResult<Self> {
        if number_of_steps == 0 {
            return Err(GridError::InvalidGridSpecification {
                message: "number of steps must be at least 1".to_string(),
            }
            .into());
        }
        Ok(Self { number_of_steps })
    }

    pub fn number_of_steps(&self) -> usize {
        self.number_of_steps
    }

    /// Distinct axes for the named grid priors, in the order given. Tied
    /// parameters share a prior and yield a single axis.
    pub fn axes(&self, model: &ModelMapper, grid_priors: &[&str]) -> NfResult<Vec<GridAxis>> {
        if grid_priors.is_empty() {
            return Err(GridError::InvalidGridSpecification {
                message: "at least one grid prior is required".to_string(),
            }
            .into());
        }

        let mut seen = HashSet::new();
        let mut axes = Vec::new();
        for &name in grid_priors {
            let prior = model
                .prior(name)
                .map_err(|_| GridError::UnknownGridPrior {
                    prior: name.to_string(),
                })?;
            if !seen.insert(prior.id) {
                continue;
            }
            if !prior.is_bounded() {
                return Err(PriorError::PriorConfiguration {
                    name: name.to_string(),
                    message: "grid priors need finite limits".to_string(),
                }
                .into());
            }
            axes.push(GridAxis {
                prior_id: prior.id,
                label: model.name_for_prior(prior.id).unwrap_or(name).to_string(),
                lower: prior.lower_limit(),
                upper: prior.upper_limit(),
                steps: self.number_of_steps,
            });
        }
        Ok(axes)
    }

    /// Every cell, later axes varying fastest.
    pub fn model_mappers(&self, model: &ModelMapper, grid_priors: &[&str]) -> NfResult<Vec<GridCell>> {
        let axes = self.axes(model, grid_priors)?;
        let dimensions = axes.len();
        let total = self
            .number_of_steps
            .checked_pow(dimensions as u32)
            .ok_or_else(|| GridError::InvalidGridSpecification {
                message: format!(
                    "{} steps over {} dimensions is too many cells",
                    self.number_of_steps, dimensions
                ),
            })?;

        let mut cells = Vec::with_capacity(total);
        for flat in 0..total {
            let mut index = vec![0; dimensions];
            let mut rest = flat;
            for slot in index.iter_mut().rev() {
                *slot = rest % self.number_of_steps;
                rest /= self.number_of_steps;
            }

            let bounds: Vec<(f64, f64)> = axes
                .iter()
                .zip(&index)
                .map(|(axis, i)| axis.bounds(*i))
                .collect();
            let replacements: HashMap<PriorId, Prior> = axes
                .iter()
                .zip(&bounds)
                .map(|(axis, (lo, hi))| (axis.prior_id, Prior::uniform(*lo, *hi)))
                .collect();
            let suffix = axes
                .iter()
                .zip(&bounds)
                .map(|(axis, (lo, hi))| format!("{}_{lo:.2}_{hi:.2}", axis.label))
                .collect::<Vec<_>>()
                .join("_");

            cells.push(GridCell {
                index,
                bounds,
                suffix,
                model: model.with_replaced_priors(&replacements),
            });
        }
        Ok(cells)
    }
}

/// A cell whose fit returned an error.
#[derive(Debug, Clone, PartialEq)]
pub struct CellFailure {
    pub name: String,
    pub index: Vec<usize>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridCellSummary {
    pub name: String,
    pub index: Vec<usize>,
    pub bounds: Vec<(f64, f64)>,
    position: Option<usize>,
}

/// Results of every cell, in enumeration order.
#[derive(Debug, Clone)]
pub struct GridSearchResult {
    results: ResultsCollection,
    cells: Vec<GridCellSummary>,
    failures: Vec<CellFailure>,
    shape: Vec<usize>,
}

impl GridSearchResult {
    pub fn results(&self) -> &ResultsCollection {
        &self.results
    }

    pub fn cells(&self) -> &[GridCellSummary] {
        &self.cells
    }

    pub fn failures(&self) -> &[CellFailure] {
        &self.failures
    }

    pub fn no_dimensions(&self) -> usize {
        self.shape.len()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Result of a cell, `None` if it failed.
    pub fn result_for(&self, cell: &GridCellSummary) -> Option<&FitResult> {
        cell.position.and_then(|position| self.results.get(position))
    }

    /// Per-cell maximum log likelihood; failed cells are NaN.
    pub fn figure_of_merit_array(&self) -> ArrayD<f64> {
        self.figure_of_merit_array_with(|result| {
            result.max_log_likelihood().unwrap_or(f64::NAN)
        })
    }

    pub fn figure_of_merit_array_with<F>(&self, figure_of_merit: F) -> ArrayD<f64>
    where
        F: Fn(&FitResult) -> f64,
    {
        let mut array = ArrayD::from_elem(IxDyn(&self.shape), f64::NAN);
        for cell in &self.cells {
            if let Some(result) = self.result_for(cell) {
                array[IxDyn(&cell.index)] = figure_of_merit(result);
            }
        }
        array
    }

    /// Cell result with the highest maximum log likelihood.
    pub fn best_result(&self) -> Option<&FitResult> {
        self.results
            .iter()
            .filter_map(|result| result.max_log_likelihood().map(|ll| (result, ll)))
            .filter(|(_, ll)| !ll.is_nan())
            .fold(None, |best: Option<(&FitResult, f64)>, (result, ll)| match best {
                Some((_, current)) if ll <= current => best,
                _ => Some((result, ll)),
            })
            .map(|(result, _)| result)
    }
}

/// Fits one derived run per grid cell.
#[derive(Debug, Clone)]
pub struct GridSearch {
    driver: OptimizationDriver,
    number_of_steps: usize,
    parallel: bool,
}

impl GridSearch {
    pub fn new(driver: OptimizationDriver, number_of_steps: usize) -> Self {
        Self {
            driver,
            number_of_steps,
            parallel: false,
        }
    }

    /// Fit cells concurrently on the rayon thread pool.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn fit(
        &self,
        model: &ModelMapper,
        analysis: Arc<dyn Analysis>,
        grid_priors: &[&str],
        info: Option<serde_json::Value>,
    ) -> NfResult<GridSearchResult> {
        let partitioner = GridPartitioner::new(self.number_of_steps)?;
        model.validate(self.driver.algorithm().requires_bounded_priors())?;
        let cells = partitioner.model_mappers(model, grid_priors)?;
        let dimensions = cells.first().map_or(0, |cell| cell.index.len());
        info!(
            run = %self.driver.name(),
            cells = cells.len(),
            dimensions,
            parallel = self.parallel,
            "starting grid search"
        );

        let fit_cell = |cell: &GridCell| -> (String, NfResult<FitResult>) {
            match self.driver.copy_with_name_extension(&cell.suffix, false) {
                Ok(mut driver) => {
                    let outcome = driver.fit(&cell.model, Arc::clone(&analysis), info.clone());
                    (driver.name().to_string(), outcome)
                }
                Err(e) => (format!("{}/{}", self.driver.name(), cell.suffix), Err(e)),
            }
        };
        let outcomes: Vec<(String, NfResult<FitResult>)> = if self.parallel {
            cells.par_iter().map(fit_cell).collect()
        } else {
            cells.iter().map(fit_cell).collect()
        };

        let mut results = ResultsCollection::new();
        let mut summaries = Vec::with_capacity(cells.len());
        let mut failures = Vec::new();
        for (cell, (name, outcome)) in cells.into_iter().zip(outcomes) {
            let position = match outcome {
                Ok(result) => {
                    results.add(name.clone(), result);
                    Some(results.len() - 1)
                }
                Err(e) => {
                    error!(cell = %name, error = %e, "grid cell failed");
                    failures.push(CellFailure {
                        name: name.clone(),
                        index: cell.index.clone(),
                        error: e.to_string(),
                    });
                    None
                }
            };
            summaries.push(GridCellSummary {
                name,
                index: cell.index,
                bounds: cell.bounds,
                position,
            });
        }

        info!(
            run = %self.driver.name(),
            completed = results.len(),
            failed = failures.len(),
            "grid search finished"
        );
        Ok(GridSearchResult {
            results,
            cells: summaries,
            failures,
            shape: vec![self.number_of_steps; dimensions],
        })
    }
}

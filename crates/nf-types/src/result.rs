//! Fit results and the ordered collection that chains stages together.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use crate::errors::{LookupError, NfResult};
use crate::model::{GaussianWidth, Instance, ModelMapper};
use crate::samples::Samples;
use crate::validation_error;

/// Sigma level used to turn samples into the next stage's priors.
pub const PRIOR_PASSING_SIGMA: f64 = 3.0;

/// The outcome of one fit.
#[derive(Debug, Clone)]
pub struct FitResult {
    samples: Samples,
    previous_model: Option<ModelMapper>,
    model: OnceLock<ModelMapper>,
}

impl FitResult {
    pub fn new(samples: Samples, previous_model: Option<ModelMapper>) -> Self {
        Self {
            samples,
            previous_model,
            model: OnceLock::new(),
        }
    }

    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    pub fn previous_model(&self) -> Option<&ModelMapper> {
        self.previous_model.as_ref()
    }

    /// Best-fit instance.
    pub fn instance(&self) -> Option<&Instance> {
        self.samples.max_log_likelihood_instance()
    }

    pub fn max_log_likelihood(&self) -> Option<f64> {
        self.samples.max_log_likelihood()
    }

    fn gaussian_model(&self, width: GaussianWidth) -> NfResult<ModelMapper> {
        let previous = self
            .previous_model
            .as_ref()
            .ok_or_else(|| validation_error!("result has no previous model to build priors from"))?;
        let tuples = self.samples.gaussian_priors_at_sigma(PRIOR_PASSING_SIGMA)?;
        previous.mapper_from_gaussian_tuples(&tuples, width)
    }

    /// Model with Gaussian priors whose widths come from the samples. Built
    /// once and cached.
    pub fn model(&self) -> NfResult<&ModelMapper> {
        if let Some(model) = self.model.get() {
            return Ok(model);
        }
        let model = self.gaussian_model(GaussianWidth::FromSamples)?;
        Ok(self.model.get_or_init(|| model))
    }

    /// Model with Gaussian priors of absolute width `a`.
    pub fn model_absolute(&self, a: f64) -> NfResult<ModelMapper> {
        self.gaussian_model(GaussianWidth::Absolute(a))
    }

    /// Model with Gaussian priors of width `r` times the magnitude of each mean.
    pub fn model_relative(&self, r: f64) -> NfResult<ModelMapper> {
        self.gaussian_model(GaussianWidth::Relative(r))
    }
}

impl fmt::Display for FitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Analysis Result:")?;
        match self.max_log_likelihood() {
            Some(ll) => writeln!(f, "max_log_likelihood: {ll}")?,
            None => writeln!(f, "max_log_likelihood: none")?,
        }
        if let Some(instance) = self.instance() {
            for (name, value) in instance.iter() {
                writeln!(f, "{name}: {value}")?;
            }
        }
        Ok(())
    }
}

/// Ordered results with lookup by name.
///
/// Re-adding a name points the lookup at the newer result; the older entry
/// stays in the sequence.
#[derive(Debug, Clone, Default)]
pub struct ResultsCollection {
    results: Vec<FitResult>,
    names: Vec<String>,
    by_name: HashMap<String, usize>,
}

impl ResultsCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, result: FitResult) {
        let name = name.into();
        if !self.by_name.contains_key(&name) {
            self.names.push(name.clone());
        }
        self.by_name.insert(name, self.results.len());
        self.results.push(result);
    }

    pub fn from_name(&self, name: &str) -> Result<&FitResult, LookupError> {
        self.by_name
            .get(name)
            .map(|index| &self.results[*index])
            .ok_or_else(|| LookupError::NotFound {
                name: name.to_string(),
                known: self.names.clone(),
            })
    }

    pub fn first(&self) -> Option<&FitResult> {
        self.results.first()
    }

    pub fn last(&self) -> Option<&FitResult> {
        self.results.last()
    }

    pub fn get(&self, index: usize) -> Option<&FitResult> {
        self.results.get(index)
    }

    /// Known names in first-insertion order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = &FitResult> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

//! Parameter space: named parameters, each driven by a prior or fixed to a
//! constant, and the instances built from physical vectors.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::errors::{NfResult, PriorError};
use crate::prior::{Prior, PriorId, PriorKind};
use crate::validation_error;

/// Smallest Gaussian width passed between fits, as a fraction of the
/// replaced prior's limit range.
pub const MIN_WIDTH_FRACTION: f64 = 0.01;

/// What drives a named parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    Free(Prior),
    Constant(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    /// Display label written to the parameter-names file. Defaults to the name.
    pub label: Option<String>,
    pub value: ParameterValue,
}

impl Parameter {
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    pub fn prior(&self) -> Option<&Prior> {
        match &self.value {
            ParameterValue::Free(prior) => Some(prior),
            ParameterValue::Constant(_) => None,
        }
    }
}

/// How wide the Gaussian priors built from a previous fit should be.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GaussianWidth {
    /// Use the width measured from the samples.
    FromSamples,
    /// Fixed absolute sigma.
    Absolute(f64),
    /// Sigma proportional to the magnitude of the mean.
    Relative(f64),
}

/// Ordered parameter space mapping unit-cube and physical vectors onto
/// concrete instances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMapper {
    parameters: Vec<Parameter>,
}

impl ModelMapper {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn with_prior(mut self, name: impl Into<String>, prior: Prior) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            label: None,
            value: ParameterValue::Free(prior),
        });
        self
    }

    pub fn with_constant(mut self, name: impl Into<String>, value: f64) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            label: None,
            value: ParameterValue::Constant(value),
        });
        self
    }

    pub fn with_label(mut self, name: &str, label: impl Into<String>) -> Self {
        if let Some(parameter) = self.parameters.iter_mut().find(|p| p.name == name) {
            parameter.label = Some(label.into());
        }
        self
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    fn parameter_mut(&mut self, name: &str) -> NfResult<&mut Parameter> {
        self.parameters
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| PriorError::UnknownParameter { name: name.to_string() }.into())
    }

    pub fn set_prior(&mut self, name: &str, prior: Prior) -> NfResult<()> {
        self.parameter_mut(name)?.value = ParameterValue::Free(prior);
        Ok(())
    }

    pub fn set_constant(&mut self, name: &str, value: f64) -> NfResult<()> {
        self.parameter_mut(name)?.value = ParameterValue::Constant(value);
        Ok(())
    }

    /// Make `target` share the prior of `source`.
    pub fn tie(&mut self, target: &str, source: &str) -> NfResult<()> {
        let prior = self.prior(source)?.clone();
        self.set_prior(target, prior)
    }

    /// The prior driving the named parameter.
    pub fn prior(&self, name: &str) -> NfResult<&Prior> {
        let parameter = self
            .parameters
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| PriorError::UnknownParameter { name: name.to_string() })?;
        parameter
            .prior()
            .ok_or_else(|| PriorError::NotFree { name: name.to_string() }.into())
    }

    /// Distinct free priors in order of first appearance.
    pub fn priors(&self) -> Vec<&Prior> {
        let mut seen = HashSet::new();
        self.parameters
            .iter()
            .filter_map(Parameter::prior)
            .filter(|prior| seen.insert(prior.id))
            .collect()
    }

    /// Number of free dimensions.
    pub fn prior_count(&self) -> usize {
        self.priors().len()
    }

    /// Name of the first parameter driven by each free dimension.
    pub fn prior_names(&self) -> Vec<&str> {
        self.priors()
            .into_iter()
            .filter_map(|prior| self.name_for_prior(prior.id))
            .collect()
    }

    /// Label of the first parameter driven by each free dimension.
    pub fn prior_labels(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.parameters
            .iter()
            .filter(|p| p.prior().map_or(false, |prior| seen.insert(prior.id)))
            .map(Parameter::label)
            .collect()
    }

    pub fn name_for_prior(&self, id: PriorId) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.prior().map_or(false, |prior| prior.id == id))
            .map(|p| p.name.as_str())
    }

    fn dimension_index(&self) -> HashMap<PriorId, usize> {
        self.priors()
            .into_iter()
            .enumerate()
            .map(|(index, prior)| (prior.id, index))
            .collect()
    }

    fn check_width(&self, actual: usize) -> NfResult<()> {
        let expected = self.prior_count();
        if actual != expected {
            return Err(PriorError::Dimension { expected, actual }.into());
        }
        Ok(())
    }

    /// Validate every free prior. With `require_bounded`, priors whose limits
    /// are not both finite are rejected.
    pub fn validate(&self, require_bounded: bool) -> NfResult<()> {
        for prior in self.priors() {
            let name = self.name_for_prior(prior.id).unwrap_or("<unnamed>");
            prior.validate(name)?;
            if require_bounded && !prior.is_bounded() {
                return Err(PriorError::PriorConfiguration {
                    name: name.to_string(),
                    message: format!(
                        "limits [{}, {}] cannot be sampled from the unit cube",
                        prior.lower_limit(),
                        prior.upper_limit()
                    ),
                }
                .into());
            }
        }
        Ok(())
    }

    pub fn vector_from_unit_vector(&self, unit_vector: &[f64]) -> NfResult<Vec<f64>> {
        self.check_width(unit_vector.len())?;
        Ok(self
            .priors()
            .into_iter()
            .zip(unit_vector)
            .map(|(prior, unit)| prior.value_for(*unit))
            .collect())
    }

    pub fn instance_from_vector(&self, vector: &[f64]) -> NfResult<Instance> {
        self.check_width(vector.len())?;
        let index = self.dimension_index();
        let values = self
            .parameters
            .iter()
            .map(|parameter| {
                let value = match &parameter.value {
                    ParameterValue::Free(prior) => vector[index[&prior.id]],
                    ParameterValue::Constant(value) => *value,
                };
                (parameter.name.clone(), value)
            })
            .collect();
        Ok(Instance { values })
    }

    pub fn instance_from_unit_vector(&self, unit_vector: &[f64]) -> NfResult<Instance> {
        let vector = self.vector_from_unit_vector(unit_vector)?;
        self.instance_from_vector(&vector)
    }

    /// Sum of the log prior densities of a physical vector.
    pub fn log_prior(&self, vector: &[f64]) -> NfResult<f64> {
        self.check_width(vector.len())?;
        Ok(self
            .priors()
            .into_iter()
            .zip(vector)
            .map(|(prior, value)| prior.log_density(*value))
            .sum())
    }

    /// Copy of this model in which the priors keyed by id are swapped for the
    /// given replacements. Tied parameters stay tied.
    pub fn with_replaced_priors(&self, replacements: &HashMap<PriorId, Prior>) -> Self {
        let parameters = self
            .parameters
            .iter()
            .map(|parameter| {
                let mut parameter = parameter.clone();
                if let ParameterValue::Free(prior) = &parameter.value {
                    if let Some(replacement) = replacements.get(&prior.id) {
                        parameter.value = ParameterValue::Free(replacement.clone());
                    }
                }
                parameter
            })
            .collect();
        Self { parameters }
    }

    /// Build a model whose free priors are Gaussians centred on `tuples`
    /// (one `(mean, sigma)` per free dimension). Limits of the replaced priors
    /// are kept. For bounded priors the sigma is at least
    /// [`MIN_WIDTH_FRACTION`] of the limit range; an unbounded prior whose
    /// sigma comes out non-positive is a validation error.
    pub fn mapper_from_gaussian_tuples(
        &self,
        tuples: &[(f64, f64)],
        width: GaussianWidth,
    ) -> NfResult<Self> {
        self.check_width(tuples.len())?;
        let mut replacements = HashMap::new();
        for (prior, &(mean, sample_sigma)) in self.priors().into_iter().zip(tuples) {
            let sigma = match width {
                GaussianWidth::FromSamples => sample_sigma,
                GaussianWidth::Absolute(a) => a,
                GaussianWidth::Relative(r) => r * mean.abs(),
            };
            let (lower_limit, upper_limit) = (prior.lower_limit(), prior.upper_limit());
            let sigma = if prior.is_bounded() {
                sigma.max(MIN_WIDTH_FRACTION * (upper_limit - lower_limit))
            } else {
                sigma
            };
            if !(sigma.is_finite() && sigma > 0.0) {
                let name = self.name_for_prior(prior.id).unwrap_or("<unnamed>");
                return Err(validation_error!(
                    "gaussian prior for {name} would have width {sigma}"
                ));
            }
            let replacement = Prior::new(PriorKind::Gaussian {
                mean,
                sigma,
                lower_limit,
                upper_limit,
            });
            replacements.insert(prior.id, replacement);
        }
        Ok(self.with_replaced_priors(&replacements))
    }

    /// Text summary, one parameter per line.
    pub fn info(&self) -> String {
        let mut text = String::new();
        for parameter in &self.parameters {
            let description = match &parameter.value {
                ParameterValue::Free(prior) => prior.to_string(),
                ParameterValue::Constant(value) => format!("Constant, value = {value}"),
            };
            text.push_str(&format!("{:<40}{}\n", parameter.name, description));
        }
        text
    }
}

/// A concrete point in parameter space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    values: Vec<(String, f64)>,
}

impl Instance {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(key, value)| (key.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

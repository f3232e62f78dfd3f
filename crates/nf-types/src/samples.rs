//! Snapshot of the samples produced by a search.

use serde::{Deserialize, Serialize};
use statrs::function::erf::erf;
use std::sync::OnceLock;

use crate::errors::{NfResult, SamplesError};
use crate::model::{Instance, ModelMapper};

/// Samples of a completed or in-progress fit.
///
/// Every per-sample sequence has the same length. Weights are non-negative
/// and need not be normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Samples {
    model: ModelMapper,
    parameters: Vec<Vec<f64>>,
    log_likelihoods: Vec<f64>,
    log_priors: Vec<f64>,
    weights: Vec<f64>,
    log_evidence: Option<f64>,
    #[serde(skip)]
    max_log_likelihood_index: OnceLock<Option<usize>>,
    #[serde(skip)]
    max_log_likelihood_instance: OnceLock<Option<Instance>>,
}

impl Samples {
    pub fn new(
        model: ModelMapper,
        parameters: Vec<Vec<f64>>,
        log_likelihoods: Vec<f64>,
        log_priors: Vec<f64>,
        weights: Vec<f64>,
        log_evidence: Option<f64>,
    ) -> NfResult<Self> {
        let lengths = [
            parameters.len(),
            log_likelihoods.len(),
            log_priors.len(),
            weights.len(),
        ];
        if lengths.iter().any(|len| *len != lengths[0]) {
            return Err(SamplesError::LengthMismatch {
                parameters: lengths[0],
                log_likelihoods: lengths[1],
                log_priors: lengths[2],
                weights: lengths[3],
            }
            .into());
        }

        let expected = model.prior_count();
        if let Some((index, vector)) = parameters
            .iter()
            .enumerate()
            .find(|(_, vector)| vector.len() != expected)
        {
            return Err(SamplesError::VectorWidth {
                index,
                expected,
                actual: vector.len(),
            }
            .into());
        }

        if let Some((index, weight)) = weights
            .iter()
            .enumerate()
            .find(|(_, weight)| !(weight.is_finite() && **weight >= 0.0))
        {
            return Err(SamplesError::InvalidWeight {
                index,
                weight: *weight,
            }
            .into());
        }

        Ok(Self {
            model,
            parameters,
            log_likelihoods,
            log_priors,
            weights,
            log_evidence,
            max_log_likelihood_index: OnceLock::new(),
            max_log_likelihood_instance: OnceLock::new(),
        })
    }

    pub fn model(&self) -> &ModelMapper {
        &self.model
    }

    pub fn parameters(&self) -> &[Vec<f64>] {
        &self.parameters
    }

    pub fn log_likelihoods(&self) -> &[f64] {
        &self.log_likelihoods
    }

    pub fn log_priors(&self) -> &[f64] {
        &self.log_priors
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn log_evidence(&self) -> Option<f64> {
        self.log_evidence
    }

    pub fn total_samples(&self) -> usize {
        self.parameters.len()
    }

    pub fn log_posteriors(&self) -> Vec<f64> {
        self.log_likelihoods
            .iter()
            .zip(&self.log_priors)
            .map(|(ll, lp)| ll + lp)
            .collect()
    }

    /// Weights scaled to sum to one. All-zero weights fall back to uniform.
    pub fn normalized_weights(&self) -> Vec<f64> {
        let total: f64 = self.weights.iter().sum();
        if total > 0.0 {
            self.weights.iter().map(|w| w / total).collect()
        } else {
            let n = self.weights.len().max(1) as f64;
            vec![1.0 / n; self.weights.len()]
        }
    }

    /// Index of the sample with the highest log likelihood; the first one wins
    /// a tie. NaN log likelihoods are never selected.
    pub fn max_log_likelihood_index(&self) -> Option<usize> {
        *self.max_log_likelihood_index.get_or_init(|| {
            let mut best: Option<(usize, f64)> = None;
            for (index, ll) in self.log_likelihoods.iter().enumerate() {
                if ll.is_nan() {
                    continue;
                }
                match best {
                    Some((_, current)) if *ll <= current => {}
                    _ => best = Some((index, *ll)),
                }
            }
            best.map(|(index, _)| index)
        })
    }

    pub fn max_log_likelihood(&self) -> Option<f64> {
        self.max_log_likelihood_index()
            .map(|index| self.log_likelihoods[index])
    }

    pub fn max_log_likelihood_vector(&self) -> Option<&[f64]> {
        self.max_log_likelihood_index()
            .map(|index| self.parameters[index].as_slice())
    }

    pub fn max_log_likelihood_instance(&self) -> Option<&Instance> {
        self.max_log_likelihood_instance
            .get_or_init(|| {
                self.max_log_likelihood_vector()
                    .and_then(|vector| self.model.instance_from_vector(vector).ok())
            })
            .as_ref()
    }

    pub fn max_log_posterior_vector(&self) -> Option<&[f64]> {
        let posteriors = self.log_posteriors();
        let mut best: Option<(usize, f64)> = None;
        for (index, lp) in posteriors.iter().enumerate() {
            if lp.is_nan() {
                continue;
            }
            match best {
                Some((_, current)) if *lp <= current => {}
                _ => best = Some((index, *lp)),
            }
        }
        best.map(|(index, _)| self.parameters[index].as_slice())
    }

    /// Weighted quantile of one free dimension.
    fn weighted_quantile(&self, dimension: usize, quantile: f64) -> NfResult<f64> {
        if self.parameters.is_empty() {
            return Err(SamplesError::Empty.into());
        }
        let weights = self.normalized_weights();
        let mut order: Vec<usize> = (0..self.parameters.len()).collect();
        order.sort_by(|a, b| {
            self.parameters[*a][dimension].total_cmp(&self.parameters[*b][dimension])
        });

        let mut cumulative = 0.0;
        for index in &order {
            cumulative += weights[*index];
            if cumulative >= quantile {
                return Ok(self.parameters[*index][dimension]);
            }
        }
        let last = order[order.len() - 1];
        Ok(self.parameters[last][dimension])
    }

    /// Weighted median of every free dimension.
    pub fn median_pdf_vector(&self) -> NfResult<Vec<f64>> {
        (0..self.model.prior_count())
            .map(|dimension| self.weighted_quantile(dimension, 0.5))
            .collect()
    }

    /// Lower and upper bounds of the credible region at `sigma`.
    pub fn vector_at_sigma(&self, sigma: f64) -> NfResult<Vec<(f64, f64)>> {
        let limit = erf(sigma / std::f64::consts::SQRT_2);
        let (lower_q, upper_q) = (0.5 - limit / 2.0, 0.5 + limit / 2.0);
        (0..self.model.prior_count())
            .map(|dimension| {
                Ok((
                    self.weighted_quantile(dimension, lower_q)?,
                    self.weighted_quantile(dimension, upper_q)?,
                ))
            })
            .collect()
    }

    /// `(best_fit, width)` per free dimension, where the width is the larger
    /// distance from the best fit to the credible bounds at `sigma`.
    pub fn gaussian_priors_at_sigma(&self, sigma: f64) -> NfResult<Vec<(f64, f64)>> {
        let best_fit = self
            .max_log_likelihood_vector()
            .ok_or(SamplesError::Empty)?
            .to_vec();
        let bounds = self.vector_at_sigma(sigma)?;
        Ok(best_fit
            .into_iter()
            .zip(bounds)
            .map(|(mean, (lower, upper))| (mean, (upper - mean).max(mean - lower)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prior::Prior;

    fn line_model() -> ModelMapper {
        ModelMapper::new()
            .with_prior("slope", Prior::uniform(-10.0, 10.0))
            .with_prior("intercept", Prior::uniform(-10.0, 10.0))
    }

    fn samples_with(log_likelihoods: Vec<f64>) -> Samples {
        let n = log_likelihoods.len();
        let parameters = (0..n).map(|i| vec![i as f64, -(i as f64)]).collect();
        Samples::new(
            line_model(),
            parameters,
            log_likelihoods,
            vec![0.0; n],
            vec![1.0; n],
            None,
        )
        .unwrap()
    }

    #[test]
    fn max_log_likelihood_instance_matches_best_record() {
        let samples = samples_with(vec![-5.0, -1.0, -3.0]);
        assert_eq!(samples.total_samples(), 3);
        assert_eq!(samples.max_log_likelihood(), Some(-1.0));

        let instance = samples.max_log_likelihood_instance().unwrap();
        assert_eq!(instance.get("slope"), Some(1.0));
        assert_eq!(instance.get("intercept"), Some(-1.0));
    }

    #[test]
    fn ties_resolve_to_first_record() {
        let samples = samples_with(vec![-2.0, 4.0, 4.0, f64::NAN]);
        assert_eq!(samples.max_log_likelihood_index(), Some(1));
        assert_eq!(samples.max_log_likelihood_vector(), Some(&[1.0, -1.0][..]));
    }

    #[test]
    fn empty_samples_have_no_best_instance() {
        let samples = samples_with(Vec::new());
        assert!(samples.max_log_likelihood_instance().is_none());
        assert!(samples.median_pdf_vector().is_err());
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let err = Samples::new(
            line_model(),
            vec![vec![0.0, 0.0]],
            vec![-1.0, -2.0],
            vec![0.0],
            vec![1.0],
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("differ in length"));
    }

    #[test]
    fn negative_weight_is_rejected() {
        let err = Samples::new(
            line_model(),
            vec![vec![0.0, 0.0]],
            vec![-1.0],
            vec![0.0],
            vec![-0.5],
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid weight"));
    }

    #[test]
    fn weights_need_not_be_normalized() {
        let samples = Samples::new(
            line_model(),
            vec![vec![1.0, 0.0], vec![2.0, 0.0], vec![3.0, 0.0]],
            vec![-1.0, -1.0, -1.0],
            vec![0.0; 3],
            vec![0.0, 10.0, 0.0],
            Some(-1.0),
        )
        .unwrap();
        assert_eq!(samples.normalized_weights(), vec![0.0, 1.0, 0.0]);
        assert_eq!(samples.median_pdf_vector().unwrap()[0], 2.0);
        assert_eq!(samples.log_evidence(), Some(-1.0));
    }

    fn uniform_weight_grid(peak: usize) -> Samples {
        let parameters: Vec<Vec<f64>> = (0..=100).map(|i| vec![i as f64, 0.0]).collect();
        let log_likelihoods = (0..=100).map(|i| -(i as f64 - peak as f64).abs()).collect();
        let n = parameters.len();
        Samples::new(line_model(), parameters, log_likelihoods, vec![0.0; n], vec![1.0; n], None)
            .unwrap()
    }

    #[test]
    fn gaussian_priors_use_widest_side() {
        let tuples = uniform_weight_grid(50).gaussian_priors_at_sigma(1.0).unwrap();
        let (mean, width) = tuples[0];
        assert_eq!(mean, 50.0);
        assert!(width > 30.0 && width < 40.0, "width was {width}");
        assert_eq!(tuples[1], (0.0, 0.0));
    }

    #[test]
    fn gaussian_priors_centre_on_best_fit_not_median() {
        let samples = uniform_weight_grid(20);
        assert_eq!(samples.median_pdf_vector().unwrap()[0], 50.0);

        let (mean, width) = samples.gaussian_priors_at_sigma(1.0).unwrap()[0];
        assert_eq!(mean, 20.0);
        assert!(width > 60.0 && width < 70.0, "width was {width}");
    }
}

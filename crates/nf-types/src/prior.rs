//! Prior distributions over single model dimensions.

use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use std::fmt;
use uuid::Uuid;

use crate::errors::{NfResult, PriorError};

/// Identity of a prior. Two parameters holding priors with the same id are
/// tied: they are driven by one free dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PriorId(Uuid);

impl PriorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PriorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PriorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shape of a prior distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PriorKind {
    /// Flat density on [lower, upper].
    Uniform { lower: f64, upper: f64 },
    /// Flat density in log-space on [lower, upper], lower > 0.
    LogUniform { lower: f64, upper: f64 },
    /// Normal density truncated to [lower_limit, upper_limit].
    Gaussian {
        mean: f64,
        sigma: f64,
        lower_limit: f64,
        upper_limit: f64,
    },
}

/// A prior with a stable identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prior {
    pub id: PriorId,
    pub kind: PriorKind,
}

impl Prior {
    pub fn new(kind: PriorKind) -> Self {
        Self {
            id: PriorId::new(),
            kind,
        }
    }

    pub fn uniform(lower: f64, upper: f64) -> Self {
        Self::new(PriorKind::Uniform { lower, upper })
    }

    pub fn log_uniform(lower: f64, upper: f64) -> Self {
        Self::new(PriorKind::LogUniform { lower, upper })
    }

    /// Unbounded Gaussian prior.
    pub fn gaussian(mean: f64, sigma: f64) -> Self {
        Self::gaussian_with_limits(mean, sigma, f64::NEG_INFINITY, f64::INFINITY)
    }

    pub fn gaussian_with_limits(mean: f64, sigma: f64, lower_limit: f64, upper_limit: f64) -> Self {
        Self::new(PriorKind::Gaussian {
            mean,
            sigma,
            lower_limit,
            upper_limit,
        })
    }

    pub fn lower_limit(&self) -> f64 {
        match self.kind {
            PriorKind::Uniform { lower, .. } | PriorKind::LogUniform { lower, .. } => lower,
            PriorKind::Gaussian { lower_limit, .. } => lower_limit,
        }
    }

    pub fn upper_limit(&self) -> f64 {
        match self.kind {
            PriorKind::Uniform { upper, .. } | PriorKind::LogUniform { upper, .. } => upper,
            PriorKind::Gaussian { upper_limit, .. } => upper_limit,
        }
    }

    /// True when both limits are finite.
    pub fn is_bounded(&self) -> bool {
        self.lower_limit().is_finite() && self.upper_limit().is_finite()
    }

    /// Check that the prior describes a non-empty, well-formed range.
    pub fn validate(&self, name: &str) -> NfResult<()> {
        let fail = |message: String| -> NfResult<()> {
            Err(PriorError::PriorConfiguration {
                name: name.to_string(),
                message,
            }
            .into())
        };

        let (lower, upper) = (self.lower_limit(), self.upper_limit());
        if lower.is_nan() || upper.is_nan() {
            return fail("limits must not be NaN".to_string());
        }
        if lower >= upper {
            return fail(format!("lower limit {lower} must be below upper limit {upper}"));
        }

        match self.kind {
            PriorKind::Uniform { .. } => {
                if !self.is_bounded() {
                    return fail("uniform prior requires finite limits".to_string());
                }
            }
            PriorKind::LogUniform { .. } => {
                if lower <= 0.0 || !upper.is_finite() {
                    return fail("log-uniform prior requires 0 < lower < upper < inf".to_string());
                }
            }
            PriorKind::Gaussian { mean, sigma, .. } => {
                if !mean.is_finite() || !(sigma.is_finite() && sigma > 0.0) {
                    return fail(format!("gaussian prior needs finite mean and positive sigma, got ({mean}, {sigma})"));
                }
            }
        }
        Ok(())
    }

    /// Map a unit-cube coordinate onto the physical range of this prior.
    pub fn value_for(&self, unit: f64) -> f64 {
        match self.kind {
            PriorKind::Uniform { lower, upper } => lower + unit * (upper - lower),
            PriorKind::LogUniform { lower, upper } => {
                let (log_lower, log_upper) = (lower.ln(), upper.ln());
                (log_lower + unit * (log_upper - log_lower)).exp()
            }
            PriorKind::Gaussian {
                mean,
                sigma,
                lower_limit,
                upper_limit,
            } => match Normal::new(mean, sigma) {
                Ok(normal) => normal
                    .inverse_cdf(unit.max(0.0).min(1.0))
                    .max(lower_limit)
                    .min(upper_limit),
                Err(_) => f64::NAN,
            },
        }
    }

    /// Log prior density at a physical value. Values outside the support
    /// return negative infinity.
    pub fn log_density(&self, value: f64) -> f64 {
        if value < self.lower_limit() || value > self.upper_limit() {
            return f64::NEG_INFINITY;
        }
        match self.kind {
            PriorKind::Uniform { lower, upper } => -(upper - lower).ln(),
            PriorKind::LogUniform { lower, upper } => -value.ln() - (upper / lower).ln().ln(),
            PriorKind::Gaussian { mean, sigma, .. } => match Normal::new(mean, sigma) {
                Ok(normal) => normal.ln_pdf(value),
                Err(_) => f64::NAN,
            },
        }
    }
}

impl fmt::Display for Prior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PriorKind::Uniform { lower, upper } => {
                write!(f, "UniformPrior, lower_limit = {lower}, upper_limit = {upper}")
            }
            PriorKind::LogUniform { lower, upper } => {
                write!(f, "LogUniformPrior, lower_limit = {lower}, upper_limit = {upper}")
            }
            PriorKind::Gaussian {
                mean,
                sigma,
                lower_limit,
                upper_limit,
            } => write!(
                f,
                "GaussianPrior, mean = {mean}, sigma = {sigma}, lower_limit = {lower_limit}, upper_limit = {upper_limit}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_maps_unit_interval_linearly() {
        let prior = Prior::uniform(2.0, 4.0);
        assert_eq!(prior.value_for(0.0), 2.0);
        assert_eq!(prior.value_for(0.5), 3.0);
        assert_eq!(prior.value_for(1.0), 4.0);
        assert!((prior.log_density(3.0) - (-(2.0f64).ln())).abs() < 1e-12);
        assert_eq!(prior.log_density(5.0), f64::NEG_INFINITY);
    }

    #[test]
    fn log_uniform_maps_in_log_space() {
        let prior = Prior::log_uniform(1e-3, 1e1);
        let mid = prior.value_for(0.5);
        assert!((mid - 0.1).abs() < 1e-12, "midpoint was {mid}");
        assert!(prior.validate("lr").is_ok());
        assert!(Prior::log_uniform(0.0, 1.0).validate("lr").is_err());
    }

    #[test]
    fn gaussian_median_is_mean_and_respects_limits() {
        let prior = Prior::gaussian_with_limits(1.0, 2.0, 0.0, 1.5);
        assert!((prior.value_for(0.5) - 1.0).abs() < 1e-9);
        assert_eq!(prior.value_for(0.999), 1.5);
        assert_eq!(prior.value_for(0.001), 0.0);
        assert!(prior.is_bounded());
        assert!(!Prior::gaussian(0.0, 1.0).is_bounded());
    }

    #[test]
    fn validate_rejects_inverted_and_unbounded_uniform() {
        assert!(Prior::uniform(1.0, 0.0).validate("x").is_err());
        assert!(Prior::uniform(0.0, f64::INFINITY).validate("x").is_err());
        assert!(Prior::gaussian(0.0, -1.0).validate("x").is_err());
        assert!(Prior::gaussian(0.0, 1.0).validate("x").is_ok());
    }
}

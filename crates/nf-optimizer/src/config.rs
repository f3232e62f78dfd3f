//! Settings handed to every driver at construction.

use nf_types::{config_error, NfResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::interval::NEVER;

/// Env var overriding [`OptimizerSettings::output_root`].
pub const OUTPUT_ROOT_ENV: &str = "NESTFIT_OUTPUT_ROOT";
/// Env var overriding [`OptimizerSettings::number_of_cores`].
pub const CORES_ENV: &str = "NESTFIT_CORES";

/// How often each gated side effect fires, counted in improvements of the
/// best log likelihood. `-1` disables the effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputIntervals {
    pub log: i64,
    pub backup: i64,
    pub visualize: i64,
    pub model_results_output: i64,
}

impl Default for OutputIntervals {
    fn default() -> Self {
        Self {
            log: 100,
            backup: 10,
            visualize: 100,
            model_results_output: 100,
        }
    }
}

impl OutputIntervals {
    /// Every gated effect disabled.
    pub fn silent() -> Self {
        Self {
            log: NEVER,
            backup: NEVER,
            visualize: NEVER,
            model_results_output: NEVER,
        }
    }

    pub fn validate(&self) -> NfResult<()> {
        for (name, value) in [
            ("log", self.log),
            ("backup", self.backup),
            ("visualize", self.visualize),
            ("model_results_output", self.model_results_output),
        ] {
            if value != NEVER && value < 1 {
                return Err(config_error!(
                    "{name} interval must be -1 or at least 1, got {value}"
                ));
            }
        }
        Ok(())
    }
}

/// Settings shared by a driver and every copy derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSettings {
    /// Root under which every run directory is created.
    pub output_root: PathBuf,

    /// Worker processes evaluating the likelihood; 1 disables the pool.
    pub number_of_cores: usize,

    pub intervals: OutputIntervals,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("output"),
            number_of_cores: 1,
            intervals: OutputIntervals::default(),
        }
    }
}

impl OptimizerSettings {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            ..Self::default()
        }
    }

    pub fn with_cores(mut self, n: usize) -> Self {
        self.number_of_cores = n;
        self
    }

    pub fn with_intervals(mut self, intervals: OutputIntervals) -> Self {
        self.intervals = intervals;
        self
    }

    pub fn validate(&self) -> NfResult<()> {
        if self.number_of_cores == 0 {
            return Err(config_error!("number_of_cores must be at least 1"));
        }
        self.intervals.validate()
    }

    /// Load settings from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> NfResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let settings: Self = serde_json::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults overridden by `NESTFIT_OUTPUT_ROOT` and `NESTFIT_CORES`.
    pub fn from_env() -> NfResult<Self> {
        let mut settings = Self::default();
        if let Ok(root) = std::env::var(OUTPUT_ROOT_ENV) {
            settings.output_root = PathBuf::from(root);
        }
        if let Ok(cores) = std::env::var(CORES_ENV) {
            settings.number_of_cores = cores
                .trim()
                .parse()
                .map_err(|_| config_error!("{CORES_ENV} must be a positive integer, got {cores:?}"))?;
        }
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_settings_are_valid() {
        let settings = OptimizerSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.number_of_cores, 1);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut intervals = OutputIntervals::default();
        intervals.backup = 0;
        let err = OptimizerSettings::default()
            .with_intervals(intervals)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("backup interval"));
    }

    #[test]
    fn zero_cores_is_rejected() {
        assert!(OptimizerSettings::default().with_cores(0).validate().is_err());
    }

    #[test]
    fn settings_load_from_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = OptimizerSettings::new(dir.path().join("out"))
            .with_cores(3)
            .with_intervals(OutputIntervals::silent());
        std::fs::write(&path, serde_json::to_string_pretty(&settings).unwrap()).unwrap();

        let loaded = OptimizerSettings::from_json_file(&path).unwrap();
        assert_eq!(loaded, settings);
    }
}

use thiserror::Error;

/// Main error type for the NestFit system
#[derive(Error, Debug)]
pub enum NfError {
    #[error("Prior error: {0}")]
    Prior(#[from] PriorError),

    #[error("Grid error: {0}")]
    Grid(#[from] GridError),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Samples error: {0}")]
    Samples(#[from] SamplesError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Prior and parameter-space errors
#[derive(Error, Debug)]
pub enum PriorError {
    #[error("Invalid prior configuration for {name}: {message}")]
    PriorConfiguration { name: String, message: String },

    #[error("Unknown parameter: {name}")]
    UnknownParameter { name: String },

    #[error("Parameter {name} is fixed to a constant and has no prior")]
    NotFree { name: String },

    #[error("Vector has {actual} entries but the model has {expected} free dimensions")]
    Dimension { expected: usize, actual: usize },
}

/// Grid partitioning errors
#[derive(Error, Debug)]
pub enum GridError {
    #[error("Invalid grid specification: {message}")]
    InvalidGridSpecification { message: String },

    #[error("Grid prior {prior} is not a free prior of the model")]
    UnknownGridPrior { prior: String },
}

/// Named lookup errors
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("No result named {name} found in results ({})", .known.join(", "))]
    NotFound { name: String, known: Vec<String> },
}

/// Errors raised while assembling a [`crate::Samples`] snapshot
#[derive(Error, Debug)]
pub enum SamplesError {
    #[error("Sample sequences differ in length: parameters {parameters}, log likelihoods {log_likelihoods}, log priors {log_priors}, weights {weights}")]
    LengthMismatch {
        parameters: usize,
        log_likelihoods: usize,
        log_priors: usize,
        weights: usize,
    },

    #[error("Sample {index} has {actual} parameters, expected {expected}")]
    VectorWidth {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Sample {index} has invalid weight {weight}")]
    InvalidWeight { index: usize, weight: f64 },

    #[error("No samples available")]
    Empty,
}

/// Result type alias for NestFit operations
pub type NfResult<T> = Result<T, NfError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::NfError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::NfError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::NfError::Config(format!($($arg)*))
    };
}

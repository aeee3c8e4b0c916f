//! # Centralized Error Handling
//!
//! Every failure the engine can report is fatal for the run: corrupt input, a dataset
//! too large for the contingency counter, an impossible configuration, or an I/O
//! failure on one of the output streams. Once a dataset has been validated the search
//! loops themselves cannot fail.

use crate::types::Order;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while writing results: {0}")]
    Write(#[from] std::io::Error),

    #[error("Malformed CSV in '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error(
        "Class label '{value}' for sample {sample} is invalid. Labels must be 1 (case) or 0 (control)."
    )]
    InvalidLabel { sample: usize, value: String },

    #[error(
        "Genotype '{value}' of variable '{variable}' at sample {sample} is invalid. Genotypes must be 0, 1 or 2."
    )]
    InvalidGenotype {
        variable: String,
        sample: usize,
        value: String,
    },

    #[error("Line {line} has {found} fields, but the header line has {expected}.")]
    FieldCount {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error(
        "The genotype buffer holds {found} calls, but {variables} variables of {samples} samples need {}.",
        variables * samples
    )]
    CallCount {
        found: usize,
        variables: usize,
        samples: usize,
    },

    #[error(
        "The dataset has {found} samples, but the contingency counter supports at most {max}."
    )]
    TooManySamples { found: usize, max: usize },

    #[error("The dataset is empty: {0}")]
    EmptyDataset(&'static str),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse configuration file '{path}': {source}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to render the scan request as TOML: {0}")]
    ConfigRender(#[from] toml::ser::Error),

    #[error("Cannot allocate {bytes} bytes for the {order} purity table.")]
    Allocation { order: Order, bytes: usize },

    #[error(
        "The {order} pass needs the {lower} purity table as its information-gain baseline, but it was not saved."
    )]
    MissingBaseline { order: Order, lower: Order },

    #[error("Failed to build the worker thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Type alias for Results using ScanError
pub type Result<T> = std::result::Result<T, ScanError>;

impl ScanError {
    /// Attach a path to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

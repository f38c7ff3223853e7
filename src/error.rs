//! Error types for design generation, registration and export.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while expanding a tier of the sample hierarchy.
///
/// All variants except [`GenerationError::FormatMismatch`] are recoverable: the caller
/// re-prompts for input and the previously generated state stays untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    /// Condition declarations for a tier are missing or not ready; no table is built.
    #[error("no table: input for tier '{tier}' is incomplete")]
    InputIncomplete { tier: String },

    /// The declared factors produce an empty cross-product.
    #[error("no samples to generate for tier '{tier}'")]
    NoSamples { tier: String },

    /// Existing identifiers of the project do not follow the segmented layout.
    #[error("project {project} doesn't fit the expected layout: {detail}")]
    FormatMismatch { project: String, detail: String },

    #[error("invalid pool '{pool}': {reason}")]
    InvalidPool { pool: String, reason: String },

    #[error("unknown sample {code}")]
    UnknownSample { code: String },

    #[error("invalid factor metadata: {0}")]
    InvalidFactorXml(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl GenerationError {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, GenerationError::FormatMismatch { .. })
    }

    pub fn incomplete(tier: impl Into<String>) -> Self {
        GenerationError::InputIncomplete { tier: tier.into() }
    }

    pub fn no_samples(tier: impl Into<String>) -> Self {
        GenerationError::NoSamples { tier: tier.into() }
    }
}

/// Errors rejecting a registration before anything is submitted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistrationError {
    /// Another registration for the same project is still in flight.
    #[error("a registration for project {project} is already running")]
    AlreadyRunning { project: String },
}

/// Local failures writing an export.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write export {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to render factor metadata: {0}")]
    Render(#[from] GenerationError),
}

use thiserror::Error;

/// Failures surfaced by the reconstruction stages.
///
/// Hard variants abort a reconstruction. [`Error::NumericalNonConvergence`] and
/// [`Error::ModelNotLoaded`] describe soft conditions: stages that hit them still return a
/// best-effort result and the pipeline records the message as a warning.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("{stage} needs at least {required} inputs, found {found}")]
    InsufficientData {
        stage: &'static str,
        required: usize,
        found: usize,
    },
    #[error("feature extraction failed: {0}")]
    FeatureExtractionFailed(String),
    #[error("surface reconstruction failed: {0}")]
    ReconstructionFailed(String),
    #[error("model not loaded: {0}")]
    ModelNotLoaded(String),
    #[error("{stage} did not converge within {iterations} iterations")]
    NumericalNonConvergence {
        stage: &'static str,
        iterations: usize,
    },
    #[error("images differ in size: {expected:?} vs {actual:?}")]
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("reconstruction cancelled")]
    Cancelled,
}

impl Error {
    /// Soft conditions never abort the pipeline.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Self::NumericalNonConvergence { .. } | Self::ModelNotLoaded(_)
        )
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

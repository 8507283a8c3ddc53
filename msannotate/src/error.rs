use msformula::error::{FeatureError, FormulaError, ParseError};
use thiserror::Error;

/// Configuration problems that cannot be corrected automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown instrument `{0}`, expected orbitrap, fticr or qtof")]
    UnknownInstrument(String),
}

/// Errors raised by the annotation pipeline and its collaborators.
#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("no features to annotate: {0}")]
    EmptyInput(&'static str),

    #[error("batch {batch} requested before the loaded features were prepared")]
    NotPrepared { batch: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("timed out while annotating feature {identifier} (mz {mz}, rt {rt:?})")]
    Timeout { identifier: String, mz: f64, rt: Option<f64> },

    #[error("candidate generation failed: {0}")]
    Candidate(String),

    #[error(transparent)]
    Adduct(#[from] ParseError),

    #[error(transparent)]
    Formula(#[from] FormulaError),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("failed to encode formula database: {0}")]
    DatabaseEncode(#[from] bincode::error::EncodeError),

    #[error("failed to decode formula database: {0}")]
    DatabaseDecode(#[from] bincode::error::DecodeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

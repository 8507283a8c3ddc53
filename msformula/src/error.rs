use thiserror::Error;

/// Errors raised while reading or evaluating an element formula.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
    #[error("unknown element `{0}`")]
    UnknownElement(String),
    #[error("invalid count `{count}` for element `{element}`")]
    InvalidCount { element: String, count: String },
    #[error("unexpected character `{0}` in formula")]
    UnexpectedCharacter(char),
    #[error("m/z requested for a formula with charge 0")]
    ZeroCharge,
}

/// Errors raised by the strict adduct parser.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("adduct `{0}` does not follow the [xM+A-B]z+/- style or has the wrong polarity")]
    InvalidStyle(String),
    #[error("adduct `{0}` contains characters outside the element alphabet")]
    InvalidCharacter(String),
    #[error("adduct `{0}` has an invalid charge")]
    InvalidCharge(String),
    #[error("adduct `{0}` has an invalid multiplicity")]
    InvalidMultiplicity(String),
    #[error("adduct `{0}` carries no modification")]
    NoModification(String),
    #[error("adduct `{0}` has an empty or malformed group")]
    MalformedGroup(String),
    #[error("adduct `{adduct}` contains an invalid formula: {source}")]
    Formula {
        adduct: String,
        #[source]
        source: FormulaError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpectrumError {
    #[error("m/z and intensity lengths differ ({mz} vs {intensity})")]
    LengthMismatch { mz: usize, intensity: usize },
}

/// Errors raised when a feature is constructed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureError {
    #[error("feature {0} has charge 0")]
    ZeroCharge(String),
    #[error("feature {identifier} has a non-positive m/z {mz}")]
    InvalidMz { identifier: String, mz: f64 },
    #[error(transparent)]
    Adduct(#[from] ParseError),
}

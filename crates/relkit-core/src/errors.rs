//! Error types for the relkit core library.

/// Top-level error enum for the relkit core library.
#[derive(Debug, thiserror::Error)]
pub enum RelkitError {
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Degenerate result: {0}")]
    DegenerateResult(String),

    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Invalid formula: {0}")]
    InvalidFormula(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RelkitError {
    /// Stable machine-readable code handed back to the collaborator alongside
    /// the display message.
    pub fn code(&self) -> &'static str {
        match self {
            RelkitError::DuplicateKey(_) => "duplicate_key",
            RelkitError::NotFound(_) => "not_found",
            RelkitError::MissingData(_) => "missing_data",
            RelkitError::DegenerateResult(_) => "degenerate_result",
            RelkitError::InvalidMethod(_) => "invalid_method",
            RelkitError::OutOfRange(_) => "out_of_range",
            RelkitError::InvalidFormula(_) => "invalid_formula",
            RelkitError::Persistence(_) => "persistence",
            RelkitError::Io(_) => "io",
            RelkitError::Json(_) => "json",
        }
    }

    /// `(error_code, message)` pair.
    pub fn to_pair(&self) -> (String, String) {
        (self.code().to_string(), self.to_string())
    }
}

#[cfg(feature = "python")]
impl From<RelkitError> for pyo3::PyErr {
    fn from(err: RelkitError) -> pyo3::PyErr {
        use pyo3::exceptions::{PyIOError, PyKeyError, PyLookupError, PyValueError};
        match &err {
            RelkitError::DuplicateKey(_) => PyKeyError::new_err(err.to_string()),
            RelkitError::NotFound(_) => PyLookupError::new_err(err.to_string()),
            RelkitError::MissingData(_)
            | RelkitError::DegenerateResult(_)
            | RelkitError::InvalidMethod(_)
            | RelkitError::OutOfRange(_)
            | RelkitError::InvalidFormula(_) => PyValueError::new_err(err.to_string()),
            RelkitError::Persistence(_) | RelkitError::Io(_) => PyIOError::new_err(err.to_string()),
            RelkitError::Json(_) => PyValueError::new_err(err.to_string()),
        }
    }
}

pub type RelkitResult<T> = Result<T, RelkitError>;

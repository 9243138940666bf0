use thiserror::Error;

/// Fatal build failures.
///
/// Anything resolvable by degradation is not an error: it becomes a warning
/// appended to [`Plan::warnings`](crate::pipeline::Plan) and the build
/// continues.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unsupported card version: {0}")]
    UnsupportedVersion(String),

    #[error("strict mode violation: {0}")]
    StrictModeViolation(String),

    #[error("unknown dialect: {0}")]
    UnknownDialect(String),
}

impl BuildError {
    pub fn invalid<E: std::fmt::Display>(err: E) -> Self {
        BuildError::InvalidInput(err.to_string())
    }
}

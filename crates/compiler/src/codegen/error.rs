//! Code generation error types.

/// Error type for code generation.
///
/// Code generation runs only on programs that passed semantic analysis, so
/// `Logic` errors indicate an internal inconsistency (an unresolved
/// identifier, a slot released out of order) rather than a user mistake.
/// `Format` carries write failures from assembling the output text, which
/// lets every emitter use `?` on `write!`.
#[derive(Debug)]
pub enum CodeGenError {
    Logic(String),
    Format(std::fmt::Error),
}

impl std::fmt::Display for CodeGenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodeGenError::Logic(s) => write!(f, "{}", s),
            CodeGenError::Format(e) => write!(f, "assembly generation error: {}", e),
        }
    }
}

impl std::error::Error for CodeGenError {}

impl From<String> for CodeGenError {
    fn from(s: String) -> Self {
        CodeGenError::Logic(s)
    }
}

impl From<std::fmt::Error> for CodeGenError {
    fn from(e: std::fmt::Error) -> Self {
        CodeGenError::Format(e)
    }
}

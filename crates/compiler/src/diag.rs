//! Compiler diagnostics
//!
//! Every user-facing error is a [`Diagnostic`] with a file, an optional
//! source position, and a message. Phases accumulate diagnostics and keep
//! going where they can; the driver renders them to stderr and maps any
//! accumulated error to exit code 2.

use crate::ast::Span;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub file: PathBuf,
    pub span: Option<Span>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(file: impl Into<PathBuf>, span: Span, message: impl Into<String>) -> Self {
        Diagnostic {
            file: file.into(),
            span: Some(span),
            message: message.into(),
        }
    }

    /// A diagnostic with no source position (e.g. a missing required
    /// class).
    pub fn global(message: impl Into<String>) -> Self {
        Diagnostic {
            file: PathBuf::new(),
            span: None,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.span {
            Some(span) => write!(
                f,
                "{}:{}:{}: {}",
                self.file.display(),
                span.line + 1,
                span.column + 1,
                self.message
            ),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Accumulating diagnostic sink shared by the analysis phases.
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn report(&mut self, file: &Path, span: Span, message: impl Into<String>) {
        self.items.push(Diagnostic::new(file, span, message));
    }

    pub fn report_global(&mut self, message: impl Into<String>) {
        self.items.push(Diagnostic::global(message));
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_span() {
        let d = Diagnostic::new("foo.cool", Span::new(4, 2), "unexpected token");
        assert_eq!(d.to_string(), "foo.cool:5:3: unexpected token");
    }

    #[test]
    fn test_display_global() {
        let d = Diagnostic::global("missing required class: Main");
        assert_eq!(d.to_string(), "missing required class: Main");
    }

    #[test]
    fn test_sink_accumulates() {
        let mut sink = Diagnostics::new();
        assert!(sink.is_empty());
        sink.report(Path::new("a.cool"), Span::new(0, 0), "first");
        sink.report_global("second");
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.into_vec().len(), 2);
    }
}

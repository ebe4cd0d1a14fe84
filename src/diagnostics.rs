use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Severity levels relayed unchanged from the front end's validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Ignore,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
            Severity::Ignore => write!(f, "ignore"),
        }
    }
}

/// A position in the original program description, used to translate
/// diagnostics on generated code back to what the user wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    pub file: PathBuf,
    pub line: u32,
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub position: Option<SourcePosition>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.position {
            Some(position) => write!(f, "{}: {}: {}", position, self.severity, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// Collects diagnostics during one build. Each federate generation gets its
/// own bag; bags are merged when results are aggregated, so no locking is
/// needed across concurrently generated federates.
#[derive(Debug, Default)]
pub struct DiagnosticBag {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, severity: Severity, message: impl Into<String>, position: Option<SourcePosition>) {
        self.diagnostics.push(Diagnostic {
            severity,
            message: message.into(),
            position,
        });
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.report(Severity::Error, message, None);
    }

    pub fn error_at(&mut self, message: impl Into<String>, position: SourcePosition) {
        self.report(Severity::Error, message, Some(position));
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.report(Severity::Warning, message, None);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.report(Severity::Info, message, None);
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn merge(&mut self, other: DiagnosticBag) {
        self.diagnostics.extend(other.diagnostics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_errors_ignores_lower_severities() {
        let mut bag = DiagnosticBag::new();
        bag.warning("unused reactor");
        bag.info("generated 3 files");
        assert!(!bag.has_errors());

        bag.error("unresolved instantiation");
        assert!(bag.has_errors());
        assert_eq!(bag.iter().count(), 3);
    }

    #[test]
    fn display_includes_position_when_present() {
        let diagnostic = Diagnostic {
            severity: Severity::Error,
            message: "boom".to_string(),
            position: Some(SourcePosition {
                file: PathBuf::from("Main.rhea"),
                line: 12,
            }),
        };
        assert_eq!(diagnostic.to_string(), "Main.rhea:12: error: boom");
    }
}

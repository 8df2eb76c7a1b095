//! Diagnostics returned to Terraform.

use crate::proto::{self, attribute_path, diagnostic::Severity};

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
    /// Error that prevents operation
    Error,
    /// Warning that doesn't prevent operation
    Warning,
}

impl From<DiagnosticSeverity> for Severity {
    fn from(value: DiagnosticSeverity) -> Self {
        match value {
            DiagnosticSeverity::Error => Self::Error,
            DiagnosticSeverity::Warning => Self::Warning,
        }
    }
}

/// A single provider diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDiagnostic {
    /// Severity level
    pub severity: DiagnosticSeverity,

    /// Summary message
    pub summary: String,

    /// Detailed message
    pub detail: String,

    /// Attribute path (if applicable)
    pub attribute_path: Option<Vec<String>>,
}

impl ProviderDiagnostic {
    /// Creates an error diagnostic.
    #[must_use]
    pub fn error(summary: impl Into<String>) -> Self {
        Self::new(DiagnosticSeverity::Error, summary)
    }

    /// Creates a warning diagnostic.
    #[must_use]
    pub fn warning(summary: impl Into<String>) -> Self {
        Self::new(DiagnosticSeverity::Warning, summary)
    }

    fn new(severity: DiagnosticSeverity, summary: impl Into<String>) -> Self {
        Self {
            severity,
            summary: summary.into(),
            detail: String::new(),
            attribute_path: None,
        }
    }

    /// Adds detail text.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    /// Points the diagnostic at an attribute. Numeric segments become list
    /// indexes, so `["auth", "0", "address"]` is `auth[0].address`.
    #[must_use]
    pub fn with_attribute<I, S>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attribute_path = Some(path.into_iter().map(Into::into).collect());
        self
    }
}

impl From<ProviderDiagnostic> for proto::Diagnostic {
    fn from(diagnostic: ProviderDiagnostic) -> Self {
        let attribute = diagnostic.attribute_path.map(|segments| proto::AttributePath {
            steps: segments
                .into_iter()
                .map(|segment| {
                    let selector = match segment.parse::<i64>() {
                        Ok(index) => attribute_path::step::Selector::ElementKeyInt(index),
                        Err(_) => attribute_path::step::Selector::AttributeName(segment),
                    };
                    attribute_path::Step {
                        selector: Some(selector),
                    }
                })
                .collect(),
        });

        Self {
            severity: Severity::from(diagnostic.severity).into(),
            summary: diagnostic.summary,
            detail: diagnostic.detail,
            attribute,
        }
    }
}

/// Diagnostics accumulated while handling one RPC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics(Vec<ProviderDiagnostic>);

impl Diagnostics {
    /// Creates an empty collection.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Adds a diagnostic.
    pub fn push(&mut self, diagnostic: ProviderDiagnostic) {
        self.0.push(diagnostic);
    }

    /// Returns true if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.0
            .iter()
            .any(|d| d.severity == DiagnosticSeverity::Error)
    }

    /// Returns true if there are no diagnostics.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the diagnostics.
    pub fn iter(&self) -> impl Iterator<Item = &ProviderDiagnostic> {
        self.0.iter()
    }

    /// Converts into wire diagnostics.
    #[must_use]
    pub fn into_proto(self) -> Vec<proto::Diagnostic> {
        self.0.into_iter().map(Into::into).collect()
    }
}

impl From<ProviderDiagnostic> for Diagnostics {
    fn from(diagnostic: ProviderDiagnostic) -> Self {
        Self(vec![diagnostic])
    }
}

impl Extend<ProviderDiagnostic> for Diagnostics {
    fn extend<T: IntoIterator<Item = ProviderDiagnostic>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

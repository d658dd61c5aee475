//! Failures of a render call.
//!
//! Lexing and compiling fail before any output exists and are returned
//! directly. Everything that goes wrong while the compiled body runs is
//! delivered as the last item of the [`RenderStream`](crate::RenderStream).

use std::fmt;
use std::path::PathBuf;

use ariadne::{Config, Label, Report, ReportKind, Source};
use thiserror::Error;

use crate::include::LoadError;
use crate::parser::Span;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationFault),
    #[error(transparent)]
    Include(#[from] IncludeError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("output stream was closed before rendering finished")]
    OutputClosed,
}

impl RenderError {
    /// Human readable report, with the offending source excerpt when the
    /// failure has a location.
    pub fn report(&self) -> String {
        let report = match self {
            Self::Lex(error) => error.report.as_deref(),
            Self::Syntax(error) => Some(error.report.as_str()),
            Self::Evaluation(fault) => fault.report(),
            _ => None,
        };
        report.map_or_else(|| self.to_string(), str::to_owned)
    }

    /// The evaluation fault, if this failure is one.
    pub fn as_fault(&self) -> Option<&EvaluationFault> {
        match self {
            Self::Evaluation(fault) => Some(fault),
            _ => None,
        }
    }

    /// Attaches `span` to an evaluation fault that has no location yet.
    pub(crate) fn at(self, span: Span) -> Self {
        match self {
            Self::Evaluation(fault) => Self::Evaluation(fault.at(span)),
            other => other,
        }
    }

    /// Renders the ariadne report of an evaluation fault raised in the
    /// template `name`. Faults coming out of included templates already
    /// carry their own report and are left alone.
    pub(crate) fn locate(self, name: &str, source: &str) -> Self {
        match self {
            Self::Evaluation(mut fault) => {
                if fault.report.is_none() {
                    if let Some(span) = fault.span {
                        fault.report = Some(render_report(
                            name,
                            source,
                            span,
                            &fault.to_string(),
                            &fault.kind.to_string(),
                        ));
                    }
                }
                Self::Evaluation(fault)
            }
            other => other,
        }
    }
}

/// Malformed tag structure, found before any code is compiled.
#[derive(Debug, Clone, Error)]
#[error("{message} (at byte {})", .span.start)]
pub struct LexError {
    pub message: String,
    pub span: Span,
    pub(crate) report: Option<String>,
}

impl LexError {
    pub(crate) fn unterminated_tag(span: Span) -> Self {
        Self {
            message: "unterminated tag: `<%` has no matching `%>`".to_owned(),
            span,
            report: None,
        }
    }

    pub(crate) fn with_report(mut self, name: &str, source: &str) -> Self {
        self.report = Some(render_report(
            name,
            source,
            self.span,
            &self.message,
            "tag opened here",
        ));
        self
    }
}

/// One problem found in the code of a template.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub message: String,
    pub reason: String,
    pub span: Span,
}

/// Code inside the tags does not lex or parse, including blocks that are
/// opened in one tag and never closed.
#[derive(Debug, Clone, Error)]
#[error("invalid code in template `{name}`: {}", first_message(.diagnostics))]
pub struct SyntaxError {
    pub name: String,
    pub diagnostics: Vec<Diagnostic>,
    report: String,
}

impl SyntaxError {
    pub(crate) fn new(name: &str, source: &str, diagnostics: Vec<Diagnostic>) -> Self {
        let report = diagnostics
            .iter()
            .map(|diagnostic| {
                render_report(
                    name,
                    source,
                    diagnostic.span,
                    &diagnostic.message,
                    &diagnostic.reason,
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            name: name.to_owned(),
            diagnostics,
            report,
        }
    }
}

fn first_message(diagnostics: &[Diagnostic]) -> &str {
    diagnostics
        .first()
        .map_or("", |diagnostic| diagnostic.message.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    ReferenceError,
    TypeError,
    RangeError,
    SyntaxError,
    /// Value raised by a `throw` statement.
    Thrown,
    /// A native function panicked.
    Internal,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReferenceError => "ReferenceError",
            Self::TypeError => "TypeError",
            Self::RangeError => "RangeError",
            Self::SyntaxError => "SyntaxError",
            Self::Thrown => "Uncaught",
            Self::Internal => "InternalError",
        };
        f.write_str(name)
    }
}

/// Fault raised by embedded code while the template runs.
///
/// `message` is kept verbatim, e.g. `unknown is not defined` for a
/// reference to an unbound name, so callers can match on it.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct EvaluationFault {
    pub kind: FaultKind,
    pub message: String,
    pub span: Option<Span>,
    report: Option<String>,
}

impl EvaluationFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
            report: None,
        }
    }

    pub fn reference_error(message: impl Into<String>) -> Self {
        Self::new(FaultKind::ReferenceError, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(FaultKind::TypeError, message)
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        Self::new(FaultKind::RangeError, message)
    }

    pub fn syntax_error(message: impl Into<String>) -> Self {
        Self::new(FaultKind::SyntaxError, message)
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span.get_or_insert(span);
        self
    }

    pub fn report(&self) -> Option<&str> {
        self.report.as_deref()
    }
}

#[derive(Debug, Error)]
pub enum IncludeError {
    #[error("cannot include `{reference}`: {source}")]
    Load {
        reference: String,
        #[source]
        source: LoadError,
    },
    #[error("include depth limit of {limit} exceeded while including {}", .path.display())]
    TooDeep { path: PathBuf, limit: usize },
}

pub(crate) fn render_report(
    name: &str,
    source: &str,
    span: Span,
    message: &str,
    label: &str,
) -> String {
    let mut report_bytes = Vec::new();
    let written = Report::build(ReportKind::Error, (name, span.into_range()))
        .with_config(Config::default().with_color(false))
        .with_message(message)
        .with_label(Label::new((name, span.into_range())).with_message(label))
        .finish()
        .write((name, Source::from(source)), &mut report_bytes);
    match written {
        Ok(()) => String::from_utf8_lossy(&report_bytes).into_owned(),
        Err(_) => message.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_display_keeps_message() {
        let fault = EvaluationFault::reference_error("unknown is not defined");
        assert_eq!(fault.to_string(), "ReferenceError: unknown is not defined");
        assert_eq!(fault.message, "unknown is not defined");
    }

    #[test]
    fn test_fault_keeps_first_span() {
        let fault = EvaluationFault::type_error("x")
            .at(Span::from(3..5))
            .at(Span::from(0..10));
        assert_eq!(fault.span, Some(Span::from(3..5)));
    }

    #[test]
    fn test_locate_renders_report() {
        let source = "hello <%= who %>";
        let error = RenderError::from(
            EvaluationFault::reference_error("who is not defined").at(Span::from(10..13)),
        )
        .locate("greeting.ejs", source);
        let report = error.report();
        assert!(report.contains("who is not defined"));
        assert!(report.contains("greeting.ejs"));
    }

    #[test]
    fn test_report_falls_back_to_display() {
        assert_eq!(
            RenderError::OutputClosed.report(),
            "output stream was closed before rendering finished"
        );
    }
}

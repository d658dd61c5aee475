//! Turns template text into an executable [`Template`].
//!
//! Every code tag is lexed on its own and the resulting tokens are spliced,
//! in source order, into one stream together with synthetic tokens for the
//! text between the tags and for interpolations. The stream is parsed once,
//! so a block opened in one tag can close in a later one:
//!
//! ```text
//! <% for (const item of items) { %>- <%= item %>
//! <% } %>
//! ```
//!
//! A block that is never closed, or code that does not parse, fails here
//! before anything is rendered.

use std::sync::Arc;

use log::debug;

use crate::engine::{Engine, RenderStream};
use crate::error::{Diagnostic, RenderError, SyntaxError};
use crate::options::RenderOptions;
use crate::parser::{
    Input, ParseError, Parser, Program, Span, Spanned, Token, lexer, parser, span_at,
};
use crate::template::{self, Fragment, FragmentKind};
use crate::value::Namespace;

/// Name of templates compiled without one.
pub const DEFAULT_NAME: &str = "template";

/// A compiled template. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Template {
    name: Arc<str>,
    source: Arc<str>,
    program: Arc<Program>,
}

impl Template {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub(crate) fn shared_program(&self) -> Arc<Program> {
        self.program.clone()
    }

    /// Renders this template with the default file loader.
    pub fn render(&self, namespace: Namespace, options: &RenderOptions) -> RenderStream {
        Engine::new()
            .with_options(options.clone())
            .render_compiled(self, namespace)
    }
}

pub fn compile(source: &str) -> Result<Template, RenderError> {
    compile_named(DEFAULT_NAME, source)
}

/// Compiles `source`, using `name` in diagnostics.
pub fn compile_named(name: &str, source: &str) -> Result<Template, RenderError> {
    let fragments = template::lex(source).map_err(|error| error.with_report(name, source))?;

    let mut diagnostics = Vec::new();
    let mut tokens = Vec::new();
    for fragment in &fragments {
        match fragment.kind {
            FragmentKind::Text => {
                if !fragment.content.is_empty() {
                    tokens.push(Spanned {
                        node: Token::EmitText(fragment.content.as_ref()),
                        span: fragment.span,
                    });
                }
            }
            FragmentKind::Comment => {}
            FragmentKind::Evaluate => tokens.extend(lex_code(fragment, &mut diagnostics)),
            FragmentKind::InterpolateEscaped | FragmentKind::InterpolateRaw => {
                let mut code = lex_code(fragment, &mut diagnostics);
                while matches!(code.last(), Some(token) if token.node == Token::Semicolon) {
                    code.pop();
                }
                let marker = if fragment.kind == FragmentKind::InterpolateEscaped {
                    Token::EmitEscaped
                } else {
                    Token::EmitRaw
                };
                let start = fragment.span.start;
                let end = fragment.span.end;
                tokens.push(Spanned {
                    node: marker,
                    span: Span::from(start..start + 3),
                });
                tokens.push(Spanned {
                    node: Token::BracketRoundOpen,
                    span: span_at(fragment.content_offset),
                });
                tokens.extend(code);
                tokens.push(Spanned {
                    node: Token::BracketRoundClose,
                    span: Span::from(end - 2..end),
                });
            }
        }
    }
    if !diagnostics.is_empty() {
        return Err(SyntaxError::new(name, source, diagnostics).into());
    }

    let (program, errors) = parser()
        .parse(tokens.map(span_at(source.len()), |Spanned { node, span }| {
            (node, span)
        }))
        .into_output_errors();
    diagnostics.extend(errors.into_iter().map(|error| diagnostic(error, 0)));
    let program = match program {
        Some(program) if diagnostics.is_empty() => program,
        _ => {
            if diagnostics.is_empty() {
                diagnostics.push(Diagnostic {
                    message: "template code could not be parsed".to_owned(),
                    reason: "here".to_owned(),
                    span: span_at(source.len()),
                });
            }
            return Err(SyntaxError::new(name, source, diagnostics).into());
        }
    };

    debug!(
        "compiled template `{name}`: {} fragments, {} statements",
        fragments.len(),
        program.len()
    );
    Ok(Template {
        name: name.into(),
        source: source.into(),
        program: Arc::new(program),
    })
}

/// Lexes the code of one tag, with spans shifted to template positions.
fn lex_code<'a>(
    fragment: &'a Fragment<'_>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<Spanned<Token<'a>>> {
    let offset = fragment.content_offset;
    let (tokens, errors) = lexer().parse(fragment.content.as_ref()).into_output_errors();
    diagnostics.extend(errors.into_iter().map(|error| diagnostic(error, offset)));
    tokens
        .unwrap_or_default()
        .into_iter()
        .map(|Spanned { node, span }| Spanned {
            node,
            span: Span::from(span.start + offset..span.end + offset),
        })
        .collect()
}

fn diagnostic<T: std::fmt::Display>(error: ParseError<'_, T>, offset: usize) -> Diagnostic {
    let span = error.span();
    Diagnostic {
        message: error.to_string(),
        reason: error.reason().to_string(),
        span: Span::from(span.start + offset..span.end + offset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Statement;

    #[test]
    fn test_text_only() {
        let template = compile("normal test").unwrap();
        assert!(matches!(
            template.program().as_slice(),
            [Spanned { node: Statement::EmitText(text), .. }] if text.as_ref() == "normal test"
        ));
    }

    #[test]
    fn test_block_spans_tags() {
        let template = compile("<% for (let i = 0; i < n; i++) { %>x<% } %>").unwrap();
        assert!(matches!(
            template.program().as_slice(),
            [Spanned { node: Statement::For { .. }, .. }]
        ));
    }

    #[test]
    fn test_trailing_semicolon_in_interpolation() {
        let template = compile("<%= param; %>").unwrap();
        assert!(matches!(
            template.program().as_slice(),
            [Spanned { node: Statement::Emit { escape: true, .. }, .. }]
        ));
    }

    #[test]
    fn test_comment_and_empty_template() {
        assert!(compile("<%# nothing to see %>").unwrap().program().is_empty());
        assert!(compile("").unwrap().program().is_empty());
    }

    #[test]
    fn test_unclosed_block_fails_before_rendering() {
        let error = compile_named("page.ejs", "<% if (a) { %>never closed").unwrap_err();
        let RenderError::Syntax(error) = error else {
            panic!("expected a syntax error, got {error:?}");
        };
        assert_eq!(error.name, "page.ejs");
        assert!(!error.diagnostics.is_empty());
    }

    #[test]
    fn test_script_spans_point_into_template() {
        let source = "abc <% let x = @ %>";
        let RenderError::Syntax(error) = compile(source).unwrap_err() else {
            panic!("expected a syntax error");
        };
        let span = error.diagnostics[0].span;
        assert_eq!(&source[span.start..span.end], "@");
    }

    #[test]
    fn test_unterminated_tag_has_report() {
        let error = compile("text <% oops").unwrap_err();
        assert!(matches!(error, RenderError::Lex(_)));
        assert!(error.report().contains("unterminated tag"));
    }
}

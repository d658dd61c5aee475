//! Tag lexer.
//!
//! Splits raw template text into literal text runs and delimited code
//! regions:
//!
//! - `<% code %>` runs `code` in place,
//! - `<%= expr %>` writes the HTML-escaped value of `expr`,
//! - `<%- expr %>` writes the value of `expr` unescaped,
//! - `<%# anything %>` is dropped.
//!
//! Tags don't nest: the first `%>` after a `<%` closes the tag, so code
//! can't contain the literal sequence `%>`.

use std::borrow::Cow;

use chumsky::prelude::*;

use crate::error::LexError;
use crate::parser::{ParseError, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentKind {
    Text,
    Evaluate,
    InterpolateEscaped,
    InterpolateRaw,
    Comment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fragment<'src> {
    pub kind: FragmentKind,
    /// Literal text, or the code between the delimiters without the
    /// surrounding whitespace.
    pub content: Cow<'src, str>,
    /// The whole fragment, delimiters included.
    pub span: Span,
    /// Byte offset of `content` in the template.
    pub content_offset: usize,
}

/// Lexes `source` into fragments, in source order.
pub fn lex(source: &str) -> Result<Vec<Fragment<'_>>, LexError> {
    let (pieces, errors) = tag_lexer().parse(source).into_output_errors();
    if let Some(error) = errors.into_iter().next() {
        return Err(LexError {
            message: error.to_string(),
            span: *error.span(),
            report: None,
        });
    }
    let pieces = pieces.unwrap_or_default();
    let count = pieces.len();
    let mut fragments = Vec::with_capacity(count);
    for (index, piece) in pieces.into_iter().enumerate() {
        let mut fragment = piece?;
        if fragment.kind == FragmentKind::Text {
            let at_end = index + 1 == count;
            fragment.content = match fragment.content {
                Cow::Borrowed(text) => trim_line_continuations(text, at_end),
                Cow::Owned(text) => Cow::Owned(trim_line_continuations(&text, at_end).into_owned()),
            };
        }
        fragments.push(fragment);
    }
    Ok(fragments)
}

/// Removes the backslashes standing right before a line break. With
/// `at_end`, backslashes closing the text are removed too.
pub fn trim_line_continuations(text: &str, at_end: bool) -> Cow<'_, str> {
    if !text.contains('\\') {
        return Cow::Borrowed(text);
    }
    let mut trimmed = String::with_capacity(text.len());
    let mut lines = text.split_inclusive('\n').peekable();
    while let Some(line) = lines.next() {
        let (body, line_break) = if let Some(body) = line.strip_suffix("\r\n") {
            (body, "\r\n")
        } else if let Some(body) = line.strip_suffix('\n') {
            (body, "\n")
        } else {
            (line, "")
        };
        let continued = !line_break.is_empty() || (at_end && lines.peek().is_none());
        if continued {
            trimmed.push_str(body.trim_end_matches('\\'));
        } else {
            trimmed.push_str(body);
        }
        trimmed.push_str(line_break);
    }
    if trimmed.len() == text.len() {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(trimmed)
    }
}

type Piece<'src> = Result<Fragment<'src>, LexError>;

fn tag_lexer<'src>()
-> impl Parser<'src, &'src str, Vec<Piece<'src>>, extra::Err<ParseError<'src, char>>> {
    let open = just("<%");
    let close = just("%>");

    let marker = choice((
        just('=').to(FragmentKind::InterpolateEscaped),
        just('-').to(FragmentKind::InterpolateRaw),
        just('#').to(FragmentKind::Comment),
    ))
    .or_not()
    .map(|kind| kind.unwrap_or(FragmentKind::Evaluate));

    let code = any()
        .and_is(close.clone().not())
        .repeated()
        .to_slice()
        .map_with(|code: &'src str, extra| {
            let span: Span = extra.span();
            (code, span.start)
        });

    // An unclosed tag runs to the end of input and is reported afterwards,
    // so the error always points at its `<%`.
    let tag = open
        .clone()
        .ignore_then(marker)
        .then(code)
        .then(close.or_not())
        .map_with(|((kind, (code, code_start)), close), extra| {
            let span: Span = extra.span();
            if close.is_none() {
                return Err(LexError::unterminated_tag(Span::from(
                    span.start..span.start + 2,
                )));
            }
            let content = code.trim();
            let leading = code.len() - code.trim_start().len();
            Ok(Fragment {
                kind,
                content: Cow::Borrowed(content),
                span,
                content_offset: code_start + leading,
            })
        });

    let text = any()
        .and_is(open.not())
        .repeated()
        .at_least(1)
        .to_slice()
        .map_with(|text: &'src str, extra| {
            let span: Span = extra.span();
            Ok::<_, LexError>(Fragment {
                kind: FragmentKind::Text,
                content: Cow::Borrowed(text),
                span,
                content_offset: span.start,
            })
        });

    choice((tag, text)).repeated().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds_and_contents(source: &str) -> Vec<(FragmentKind, String)> {
        lex(source)
            .unwrap()
            .into_iter()
            .map(|fragment| (fragment.kind, fragment.content.into_owned()))
            .collect()
    }

    #[test]
    fn test_plain_text_is_one_fragment() {
        assert_eq!(
            kinds_and_contents("normal test"),
            vec![(FragmentKind::Text, "normal test".to_owned())]
        );
    }

    #[test]
    fn test_empty_template_has_no_fragments() {
        assert!(lex("").unwrap().is_empty());
    }

    #[test]
    fn test_all_tag_kinds() {
        assert_eq!(
            kinds_and_contents("a<% x %>b<%= y %>c<%- z %>d<%# w %>"),
            vec![
                (FragmentKind::Text, "a".to_owned()),
                (FragmentKind::Evaluate, "x".to_owned()),
                (FragmentKind::Text, "b".to_owned()),
                (FragmentKind::InterpolateEscaped, "y".to_owned()),
                (FragmentKind::Text, "c".to_owned()),
                (FragmentKind::InterpolateRaw, "z".to_owned()),
                (FragmentKind::Text, "d".to_owned()),
                (FragmentKind::Comment, "w".to_owned()),
            ]
        );
    }

    #[test]
    fn test_spacing_inside_delimiters_is_stripped() {
        assert_eq!(kinds_and_contents("<%=param%>"), kinds_and_contents("<%=   param \n %>"));
    }

    #[test]
    fn test_content_offset_points_at_code() {
        let fragments = lex("ab<%=  name %>").unwrap();
        let tag = &fragments[1];
        assert_eq!(tag.span, Span::from(2..14));
        assert_eq!(&"ab<%=  name %>"[tag.content_offset..tag.content_offset + 4], "name");
    }

    #[test]
    fn test_close_delimiter_in_text_is_literal() {
        assert_eq!(
            kinds_and_contents("100%> done"),
            vec![(FragmentKind::Text, "100%> done".to_owned())]
        );
    }

    #[test]
    fn test_first_close_ends_the_tag() {
        assert_eq!(
            kinds_and_contents("<% a %> b %>"),
            vec![
                (FragmentKind::Evaluate, "a".to_owned()),
                (FragmentKind::Text, " b %>".to_owned()),
            ]
        );
    }

    #[test]
    fn test_unterminated_tag() {
        let error = lex("hello <%= name").unwrap_err();
        assert_eq!(error.span, Span::from(6..8));
        assert!(error.message.contains("unterminated"));
    }

    #[test]
    fn test_backslash_before_line_break_is_removed() {
        assert_eq!(
            kinds_and_contents("one \\\ntwo\\\r\nthree"),
            vec![(FragmentKind::Text, "one \ntwo\r\nthree".to_owned())]
        );
    }

    #[test]
    fn test_backslashes_at_template_end_are_removed() {
        assert_eq!(
            kinds_and_contents("<%= param %>console.log(`${param}`)\\\\"),
            vec![
                (FragmentKind::InterpolateEscaped, "param".to_owned()),
                (FragmentKind::Text, "console.log(`${param}`)".to_owned()),
            ]
        );
    }

    #[test]
    fn test_backslash_before_tag_is_kept() {
        assert_eq!(
            kinds_and_contents("a\\<%= b %>"),
            vec![
                (FragmentKind::Text, "a\\".to_owned()),
                (FragmentKind::InterpolateEscaped, "b".to_owned()),
            ]
        );
    }

    #[test]
    fn test_inner_backslashes_are_kept() {
        assert_eq!(trim_line_continuations("C:\\dir\\file", false), "C:\\dir\\file");
    }
}

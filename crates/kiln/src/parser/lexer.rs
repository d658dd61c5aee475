use super::{ParseError, Spanned};
use chumsky::prelude::*;
use std::borrow::Cow;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token<'code> {
    BracketRoundOpen,
    BracketRoundClose,
    BracketCurlyOpen,
    BracketCurlyClose,
    BracketSquareOpen,
    BracketSquareClose,
    Number(f64),
    // Raw content between the quotes, escapes are resolved by the parser.
    Str(&'code str),
    Identifier(&'code str),
    Comma,
    Semicolon,
    Dot,
    Colon,
    Question,
    Plus,
    Minus,
    Asterisk,
    Slash,
    Percent,
    Not,
    Increment,
    Decrement,
    Assign,
    PlusAssign,
    MinusAssign,
    AsteriskAssign,
    SlashAssign,
    PercentAssign,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    And,
    Or,
    Nullish,
    Let,
    Const,
    Var,
    If,
    Else,
    For,
    Of,
    In,
    While,
    Break,
    Continue,
    Throw,
    Await,
    Typeof,
    True,
    False,
    Null,
    Undefined,
    // Produced by the compiler around template text and interpolation tags,
    // never by the lexer.
    EmitText(&'code str),
    EmitEscaped,
    EmitRaw,
}

impl<'code> Token<'code> {
    pub fn into_cow_str(self) -> Cow<'code, str> {
        match self {
            Self::BracketRoundOpen => "(".into(),
            Self::BracketRoundClose => ")".into(),
            Self::BracketCurlyOpen => "{".into(),
            Self::BracketCurlyClose => "}".into(),
            Self::BracketSquareOpen => "[".into(),
            Self::BracketSquareClose => "]".into(),
            Self::Number(number) => number.to_string().into(),
            Self::Str(text) => format!("'{text}'").into(),
            Self::Identifier(identifier) => identifier.into(),
            Self::Comma => ",".into(),
            Self::Semicolon => ";".into(),
            Self::Dot => ".".into(),
            Self::Colon => ":".into(),
            Self::Question => "?".into(),
            Self::Plus => "+".into(),
            Self::Minus => "-".into(),
            Self::Asterisk => "*".into(),
            Self::Slash => "/".into(),
            Self::Percent => "%".into(),
            Self::Not => "!".into(),
            Self::Increment => "++".into(),
            Self::Decrement => "--".into(),
            Self::Assign => "=".into(),
            Self::PlusAssign => "+=".into(),
            Self::MinusAssign => "-=".into(),
            Self::AsteriskAssign => "*=".into(),
            Self::SlashAssign => "/=".into(),
            Self::PercentAssign => "%=".into(),
            Self::Equal => "==".into(),
            Self::NotEqual => "!=".into(),
            Self::StrictEqual => "===".into(),
            Self::StrictNotEqual => "!==".into(),
            Self::Less => "<".into(),
            Self::LessOrEqual => "<=".into(),
            Self::Greater => ">".into(),
            Self::GreaterOrEqual => ">=".into(),
            Self::And => "&&".into(),
            Self::Or => "||".into(),
            Self::Nullish => "??".into(),
            Self::Let => "let".into(),
            Self::Const => "const".into(),
            Self::Var => "var".into(),
            Self::If => "if".into(),
            Self::Else => "else".into(),
            Self::For => "for".into(),
            Self::Of => "of".into(),
            Self::In => "in".into(),
            Self::While => "while".into(),
            Self::Break => "break".into(),
            Self::Continue => "continue".into(),
            Self::Throw => "throw".into(),
            Self::Await => "await".into(),
            Self::Typeof => "typeof".into(),
            Self::True => "true".into(),
            Self::False => "false".into(),
            Self::Null => "null".into(),
            Self::Undefined => "undefined".into(),
            Self::EmitText(_) => "template text".into(),
            Self::EmitEscaped => "<%=".into(),
            Self::EmitRaw => "<%-".into(),
        }
    }
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.into_cow_str())
    }
}

pub fn lexer<'code>()
-> impl Parser<'code, &'code str, Vec<Spanned<Token<'code>>>, extra::Err<ParseError<'code, char>>> {
    let bracket = choice((
        just('(').to(Token::BracketRoundOpen),
        just(')').to(Token::BracketRoundClose),
        just('{').to(Token::BracketCurlyOpen),
        just('}').to(Token::BracketCurlyClose),
        just('[').to(Token::BracketSquareOpen),
        just(']').to(Token::BracketSquareClose),
    ));

    // Longest operators first.
    let comparator_or_logical = choice((
        just("===").to(Token::StrictEqual),
        just("!==").to(Token::StrictNotEqual),
        just("==").to(Token::Equal),
        just("!=").to(Token::NotEqual),
        just("<=").to(Token::LessOrEqual),
        just(">=").to(Token::GreaterOrEqual),
        just("&&").to(Token::And),
        just("||").to(Token::Or),
        just("??").to(Token::Nullish),
        just('<').to(Token::Less),
        just('>').to(Token::Greater),
    ));

    let arithmetic_or_assignment = choice((
        just("++").to(Token::Increment),
        just("--").to(Token::Decrement),
        just("+=").to(Token::PlusAssign),
        just("-=").to(Token::MinusAssign),
        just("*=").to(Token::AsteriskAssign),
        just("/=").to(Token::SlashAssign),
        just("%=").to(Token::PercentAssign),
        just('+').to(Token::Plus),
        just('-').to(Token::Minus),
        just('*').to(Token::Asterisk),
        just('/').to(Token::Slash),
        just('%').to(Token::Percent),
        just('!').to(Token::Not),
        just('=').to(Token::Assign),
    ));

    let punctuation = choice((
        just(',').to(Token::Comma),
        just(';').to(Token::Semicolon),
        just('.').to(Token::Dot),
        just(':').to(Token::Colon),
        just('?').to(Token::Question),
    ));

    // @TODO hexadecimal literals
    let exponent = one_of("eE").then(one_of("+-").or_not()).then(text::digits(10));
    let number = choice((
        text::int(10)
            .then(just('.').then(text::digits(10)).or_not())
            .ignored(),
        just('.').then(text::digits(10)).ignored(),
    ))
    .then(exponent.or_not())
    .to_slice()
        .from_str()
        .unwrapped()
        .map(Token::Number);

    let escape = just('\\').then(any()).ignored();
    let single_quoted = just('\'')
        .ignore_then(
            choice((escape.clone(), none_of("\\'\n").ignored()))
                .repeated()
                .to_slice(),
        )
        .then_ignore(just('\''));
    let double_quoted = just('"')
        .ignore_then(
            choice((escape, none_of("\\\"\n").ignored()))
                .repeated()
                .to_slice(),
        )
        .then_ignore(just('"'));
    let string = single_quoted.or(double_quoted).map(Token::Str);

    let identifier_or_keyword = any()
        .filter(|character: &char| {
            character.is_ascii_alphabetic() || *character == '_' || *character == '$'
        })
        .then(
            any()
                .filter(|character: &char| {
                    character.is_ascii_alphanumeric() || *character == '_' || *character == '$'
                })
                .repeated(),
        )
        .to_slice()
        .map(|identifier: &str| match identifier {
            "let" => Token::Let,
            "const" => Token::Const,
            "var" => Token::Var,
            "if" => Token::If,
            "else" => Token::Else,
            "for" => Token::For,
            "of" => Token::Of,
            "in" => Token::In,
            "while" => Token::While,
            "break" => Token::Break,
            "continue" => Token::Continue,
            "throw" => Token::Throw,
            "await" => Token::Await,
            "typeof" => Token::Typeof,
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            "undefined" => Token::Undefined,
            identifier => Token::Identifier(identifier),
        });

    let token = choice((
        bracket,
        number,
        string,
        identifier_or_keyword,
        comparator_or_logical,
        arithmetic_or_assignment,
        punctuation,
    ));

    let line_comment = just("//")
        .then(any().and_is(text::newline().not()).repeated())
        .ignored();
    let block_comment = just("/*")
        .then(any().and_is(just("*/").not()).repeated())
        .then(just("*/"))
        .ignored();
    let padding = choice((
        text::whitespace().at_least(1).ignored(),
        line_comment,
        block_comment,
    ))
    .repeated();

    padding.clone().ignore_then(
        token
            .map_with(|token, extra| Spanned {
                node: token,
                span: extra.span(),
            })
            .then_ignore(padding)
            .recover_with(skip_then_retry_until(any().ignored(), end()))
            .repeated()
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chumsky::prelude::Parser;

    fn tokens(code: &str) -> Vec<Token<'_>> {
        lexer()
            .parse(code)
            .into_output()
            .unwrap()
            .into_iter()
            .map(|token| token.node)
            .collect()
    }

    #[test]
    fn test_for_loop_header() {
        assert_eq!(
            tokens("for (let i = 0; i < 3; i++) {"),
            vec![
                Token::For,
                Token::BracketRoundOpen,
                Token::Let,
                Token::Identifier("i"),
                Token::Assign,
                Token::Number(0.),
                Token::Semicolon,
                Token::Identifier("i"),
                Token::Less,
                Token::Number(3.),
                Token::Semicolon,
                Token::Identifier("i"),
                Token::Increment,
                Token::BracketRoundClose,
                Token::BracketCurlyOpen,
            ]
        );
    }

    #[test]
    fn test_strings_keep_raw_escapes() {
        assert_eq!(
            tokens(r#"'it\'s' "say \"hi\"""#),
            vec![Token::Str(r"it\'s"), Token::Str(r#"say \"hi\""#)]
        );
    }

    #[test]
    fn test_comments_are_padding() {
        assert_eq!(
            tokens("a // first\n/* second */ b"),
            vec![Token::Identifier("a"), Token::Identifier("b")]
        );
    }

    #[test]
    fn test_longest_operator_wins() {
        assert_eq!(
            tokens("a === b !== c ?? d"),
            vec![
                Token::Identifier("a"),
                Token::StrictEqual,
                Token::Identifier("b"),
                Token::StrictNotEqual,
                Token::Identifier("c"),
                Token::Nullish,
                Token::Identifier("d"),
            ]
        );
    }

    #[test]
    fn test_number_literals() {
        assert_eq!(
            tokens("1e3 .5 2.5E-1 7"),
            vec![
                Token::Number(1000.),
                Token::Number(0.5),
                Token::Number(0.25),
                Token::Number(7.),
            ]
        );
        assert_eq!(
            tokens("a.b"),
            vec![Token::Identifier("a"), Token::Dot, Token::Identifier("b")]
        );
    }

    #[test]
    fn test_spans_are_relative_to_code() {
        let spanned = lexer().parse("  name").into_output().unwrap();
        assert_eq!(spanned[0].span, crate::parser::Span::from(2..6));
    }

    #[test]
    fn test_unknown_character_is_an_error() {
        let (_, errors) = lexer().parse("a # b").into_output_errors();
        assert!(!errors.is_empty());
    }
}

//! Parser of the code embedded in templates.
//!
//! The dialect borrows JavaScript's surface syntax: `let`/`const`/`var`
//! declarations, `if`/`else`, C-style `for`, `for..of`, `for..in`, `while`,
//! object and array literals, calls, member access and the usual operators.
//! Semicolons are optional.
//!
//! The compiler feeds the parser one token stream for a whole template, with
//! [`Token::EmitText`], [`Token::EmitEscaped`] and [`Token::EmitRaw`] marking
//! where template text and interpolations go.

use chumsky::{input::ValueInput, pratt::*, prelude::*};
use std::sync::Arc;

mod lexer;
pub use lexer::{Token, lexer};

pub use chumsky::prelude::{Input, Parser};

pub type Span = SimpleSpan;
pub type ParseError<'code, T> = Rich<'code, T, Span>;

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

/// Empty span at `offset`, used as the end of input for token streams.
pub fn span_at(offset: usize) -> Span {
    Span::from(offset..offset)
}

pub type Program = Vec<Spanned<Statement>>;

pub fn parser<'code, I>()
-> impl Parser<'code, I, Program, extra::Err<ParseError<'code, Token<'code>>>>
where
    I: ValueInput<'code, Token = Token<'code>, Span = Span>,
{
    let expression = expression_parser();

    let statement = recursive(|statement| {
        let semicolon = just(Token::Semicolon).or_not();
        let bracket_round_open = just(Token::BracketRoundOpen);
        let bracket_round_close = just(Token::BracketRoundClose);

        let identifier = select! { Token::Identifier(identifier) => identifier };
        let binding = identifier.map_with(|name, extra| Spanned {
            node: Arc::<str>::from(name),
            span: extra.span(),
        });
        let declaration_kind = select! {
            Token::Let => DeclarationKind::Let,
            Token::Const => DeclarationKind::Const,
            Token::Var => DeclarationKind::Var,
        };

        let emit_text = select! { Token::EmitText(text) => Statement::EmitText(text.into()) };

        let emit = select! {
            Token::EmitEscaped => true,
            Token::EmitRaw => false,
        }
        .then(
            expression
                .clone()
                .delimited_by(bracket_round_open.clone(), bracket_round_close.clone()),
        )
        .then_ignore(semicolon.clone())
        .map(|(escape, expression)| Statement::Emit { expression, escape });

        let block = statement
            .clone()
            .repeated()
            .collect()
            .delimited_by(
                just(Token::BracketCurlyOpen),
                just(Token::BracketCurlyClose),
            )
            .map(Statement::Block);

        let declaration = declaration_kind
            .clone()
            .then(
                binding
                    .clone()
                    .then(just(Token::Assign).ignore_then(expression.clone()).or_not())
                    .map(|(name, value)| Declarator { name, value })
                    .separated_by(just(Token::Comma))
                    .at_least(1)
                    .collect(),
            )
            .map(|(kind, declarators)| Statement::Declaration { kind, declarators });

        let condition = expression
            .clone()
            .delimited_by(bracket_round_open.clone(), bracket_round_close.clone());

        let if_ = just(Token::If)
            .ignore_then(condition.clone())
            .then(statement.clone())
            .then(just(Token::Else).ignore_then(statement.clone()).or_not())
            .map(|((condition, then_branch), else_branch)| Statement::If {
                condition,
                then_branch: Box::new(then_branch),
                else_branch: else_branch.map(Box::new),
            });

        let for_each = just(Token::For)
            .ignore_then(
                group((
                    declaration_kind,
                    binding,
                    select! {
                        Token::Of => Iteration::Values,
                        Token::In => Iteration::Keys,
                    },
                    expression.clone(),
                ))
                .delimited_by(bracket_round_open.clone(), bracket_round_close.clone()),
            )
            .then(statement.clone())
            .map(
                |((kind, binding, iteration, iterable), body)| Statement::ForEach {
                    kind,
                    binding,
                    iteration,
                    iterable,
                    body: Box::new(body),
                },
            );

        let for_init = declaration
            .clone()
            .or(expression.clone().map(Statement::Expression))
            .map_with(|node, extra| Spanned {
                node,
                span: extra.span(),
            });

        let c_for = just(Token::For)
            .ignore_then(
                group((
                    for_init.or_not().then_ignore(just(Token::Semicolon)),
                    expression.clone().or_not().then_ignore(just(Token::Semicolon)),
                    expression.clone().or_not(),
                ))
                .delimited_by(bracket_round_open.clone(), bracket_round_close.clone()),
            )
            .then(statement.clone())
            .map(|((init, condition, update), body)| Statement::For {
                init: init.map(Box::new),
                condition,
                update,
                body: Box::new(body),
            });

        let while_ = just(Token::While)
            .ignore_then(condition)
            .then(statement.clone())
            .map(|(condition, body)| Statement::While {
                condition,
                body: Box::new(body),
            });

        let simple = choice((
            declaration,
            just(Token::Break).to(Statement::Break),
            just(Token::Continue).to(Statement::Continue),
            just(Token::Throw)
                .ignore_then(expression.clone())
                .map(Statement::Throw),
            expression.clone().map(Statement::Expression),
        ))
        .then_ignore(semicolon);

        let empty = just(Token::Semicolon).to(Statement::Empty);

        choice((
            emit_text, emit, block, if_, for_each, c_for, while_, simple, empty,
        ))
        .map_with(|node, extra| Spanned {
            node,
            span: extra.span(),
        })
    });

    statement.repeated().collect()
}

fn expression_parser<'code, I>()
-> impl Parser<'code, I, Spanned<Expression>, extra::Err<ParseError<'code, Token<'code>>>> + Clone
where
    I: ValueInput<'code, Token = Token<'code>, Span = Span>,
{
    recursive(|expression| {
        let comma = just(Token::Comma);
        let bracket_round_open = just(Token::BracketRoundOpen);
        let bracket_round_close = just(Token::BracketRoundClose);
        let bracket_square_open = just(Token::BracketSquareOpen);
        let bracket_square_close = just(Token::BracketSquareClose);

        let identifier = select! { Token::Identifier(identifier) => identifier };

        let literal = select! {
            Token::Number(number) => Literal::Number(number),
            Token::Str(text) => Literal::String(unescape(text).into()),
            Token::True => Literal::Bool(true),
            Token::False => Literal::Bool(false),
            Token::Null => Literal::Null,
            Token::Undefined => Literal::Undefined,
        };

        let items = expression
            .clone()
            .separated_by(comma.clone())
            .allow_trailing()
            .collect::<Vec<_>>();

        let array = items
            .clone()
            .delimited_by(bracket_square_open.clone(), bracket_square_close.clone())
            .map(Expression::Array);

        let property_key = select! {
            Token::Identifier(name) => Arc::<str>::from(name),
            Token::Str(text) => Arc::<str>::from(unescape(text)),
        };
        let entry = property_key
            .then_ignore(just(Token::Colon))
            .then(expression.clone())
            .or(identifier.clone().map_with(|name, extra| {
                let name = Arc::<str>::from(name);
                let value = Spanned {
                    node: Expression::Identifier(name.clone()),
                    span: extra.span(),
                };
                (name, value)
            }));
        let object = entry
            .separated_by(comma.clone())
            .allow_trailing()
            .collect()
            .delimited_by(
                just(Token::BracketCurlyOpen),
                just(Token::BracketCurlyClose),
            )
            .map(Expression::Object);

        let atom = choice((
            literal.map(Expression::Literal),
            identifier.clone().map(|name| Expression::Identifier(name.into())),
            array,
            object,
        ))
        .map_with(|node, extra| Spanned {
            node,
            span: extra.span(),
        })
        .or(expression
            .clone()
            .delimited_by(bracket_round_open.clone(), bracket_round_close.clone()));

        let postfix = choice((
            just(Token::Dot)
                .ignore_then(identifier)
                .map(|property| Postfix::Member(property.into())),
            expression
                .clone()
                .delimited_by(bracket_square_open, bracket_square_close)
                .map(Postfix::Index),
            items
                .delimited_by(bracket_round_open, bracket_round_close)
                .map(Postfix::Call),
        ))
        .map_with(|postfix, extra| (postfix, extra.span()));

        let call_chain = atom.foldl(
            postfix.repeated(),
            |object: Spanned<Expression>, (postfix, postfix_span): (Postfix, Span)| {
                let span = Span::from(object.span.start..postfix_span.end);
                let object = Box::new(object);
                let node = match postfix {
                    Postfix::Member(property) => Expression::Member { object, property },
                    Postfix::Index(index) => Expression::Index {
                        object,
                        index: Box::new(index),
                    },
                    Postfix::Call(arguments) => Expression::Call {
                        callee: object,
                        arguments,
                    },
                };
                Spanned { node, span }
            },
        );

        let postfix_update = call_chain
            .then(
                select! {
                    Token::Increment => UpdateOperator::Increment,
                    Token::Decrement => UpdateOperator::Decrement,
                }
                .or_not(),
            )
            .map_with(|(target, operator), extra| match operator {
                Some(operator) => Spanned {
                    node: Expression::Update {
                        operator,
                        prefix: false,
                        target: Box::new(target),
                    },
                    span: extra.span(),
                },
                None => target,
            });

        let prefix_operator = select! {
            Token::Not => Prefix::Unary(UnaryOperator::Not),
            Token::Minus => Prefix::Unary(UnaryOperator::Negate),
            Token::Plus => Prefix::Unary(UnaryOperator::Plus),
            Token::Typeof => Prefix::Unary(UnaryOperator::Typeof),
            Token::Await => Prefix::Unary(UnaryOperator::Await),
            Token::Increment => Prefix::Update(UpdateOperator::Increment),
            Token::Decrement => Prefix::Update(UpdateOperator::Decrement),
        };

        let binary = |operator: BinaryOperator,
                      operand_a: Spanned<Expression>,
                      operand_b: Spanned<Expression>,
                      span: Span| Spanned {
            node: Expression::Binary {
                operator,
                operand_a: Box::new(operand_a),
                operand_b: Box::new(operand_b),
            },
            span,
        };
        let logical = |operator: LogicalOperator,
                       operand_a: Spanned<Expression>,
                       operand_b: Spanned<Expression>,
                       span: Span| Spanned {
            node: Expression::Logical {
                operator,
                operand_a: Box::new(operand_a),
                operand_b: Box::new(operand_b),
            },
            span,
        };

        let operators = postfix_update.pratt((
            prefix(15, prefix_operator, |operator, operand, extra| {
                let operand = Box::new(operand);
                let node = match operator {
                    Prefix::Unary(operator) => Expression::Unary { operator, operand },
                    Prefix::Update(operator) => Expression::Update {
                        operator,
                        prefix: true,
                        target: operand,
                    },
                };
                Spanned {
                    node,
                    span: extra.span(),
                }
            }),
            // Precedence 13: Multiplicative operators
            infix(
                left(13),
                select! {
                    Token::Asterisk => BinaryOperator::Multiply,
                    Token::Slash => BinaryOperator::Divide,
                    Token::Percent => BinaryOperator::Remainder,
                },
                move |l, operator, r, extra| binary(operator, l, r, extra.span()),
            ),
            // Precedence 12: Additive operators
            infix(
                left(12),
                select! {
                    Token::Plus => BinaryOperator::Add,
                    Token::Minus => BinaryOperator::Subtract,
                },
                move |l, operator, r, extra| binary(operator, l, r, extra.span()),
            ),
            // Precedence 10: Relational operators
            infix(
                left(10),
                select! {
                    Token::Less => BinaryOperator::Less,
                    Token::LessOrEqual => BinaryOperator::LessOrEqual,
                    Token::Greater => BinaryOperator::Greater,
                    Token::GreaterOrEqual => BinaryOperator::GreaterOrEqual,
                },
                move |l, operator, r, extra| binary(operator, l, r, extra.span()),
            ),
            // Precedence 9: Equality operators
            infix(
                left(9),
                select! {
                    Token::Equal => BinaryOperator::Equal,
                    Token::NotEqual => BinaryOperator::NotEqual,
                    Token::StrictEqual => BinaryOperator::StrictEqual,
                    Token::StrictNotEqual => BinaryOperator::StrictNotEqual,
                },
                move |l, operator, r, extra| binary(operator, l, r, extra.span()),
            ),
            infix(left(5), just(Token::And), move |l, _, r, extra| {
                logical(LogicalOperator::And, l, r, extra.span())
            }),
            infix(
                left(4),
                select! {
                    Token::Or => LogicalOperator::Or,
                    Token::Nullish => LogicalOperator::Nullish,
                },
                move |l, operator, r, extra| logical(operator, l, r, extra.span()),
            ),
        ));

        let conditional = operators
            .then(
                just(Token::Question)
                    .ignore_then(expression.clone())
                    .then_ignore(just(Token::Colon))
                    .then(expression.clone())
                    .or_not(),
            )
            .map_with(|(condition, branches), extra| match branches {
                Some((consequent, alternate)) => Spanned {
                    node: Expression::Conditional {
                        condition: Box::new(condition),
                        consequent: Box::new(consequent),
                        alternate: Box::new(alternate),
                    },
                    span: extra.span(),
                },
                None => condition,
            });

        let assign_operator = select! {
            Token::Assign => AssignOperator::Assign,
            Token::PlusAssign => AssignOperator::Add,
            Token::MinusAssign => AssignOperator::Subtract,
            Token::AsteriskAssign => AssignOperator::Multiply,
            Token::SlashAssign => AssignOperator::Divide,
            Token::PercentAssign => AssignOperator::Remainder,
        };

        conditional
            .then(assign_operator.then(expression).or_not())
            .try_map(|(target, assignment), span| match assignment {
                None => Ok(target),
                Some(_) if !target.node.is_assignable() => Err(ParseError::custom(
                    target.span,
                    "Invalid left-hand side in assignment",
                )),
                Some((operator, value)) => Ok(Spanned {
                    node: Expression::Assign {
                        operator,
                        target: Box::new(target),
                        value: Box::new(value),
                    },
                    span,
                }),
            })
    })
}

/// Resolves the escape sequences of a string literal body.
pub fn unescape(raw: &str) -> String {
    let mut text = String::with_capacity(raw.len());
    let mut characters = raw.chars();
    while let Some(character) = characters.next() {
        if character != '\\' {
            text.push(character);
            continue;
        }
        match characters.next() {
            Some('n') => text.push('\n'),
            Some('t') => text.push('\t'),
            Some('r') => text.push('\r'),
            Some('0') => text.push('\0'),
            Some(other) => text.push(other),
            None => text.push('\\'),
        }
    }
    text
}

#[derive(Debug, Clone)]
enum Postfix {
    Member(Arc<str>),
    Index(Spanned<Expression>),
    Call(Vec<Spanned<Expression>>),
}

#[derive(Debug, Clone, Copy)]
enum Prefix {
    Unary(UnaryOperator),
    Update(UpdateOperator),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Literal template text.
    EmitText(Arc<str>),
    /// `<%= expression %>` (escaped) or `<%- expression %>`.
    Emit {
        expression: Spanned<Expression>,
        escape: bool,
    },
    Declaration {
        kind: DeclarationKind,
        declarators: Vec<Declarator>,
    },
    Expression(Spanned<Expression>),
    If {
        condition: Spanned<Expression>,
        then_branch: Box<Spanned<Statement>>,
        else_branch: Option<Box<Spanned<Statement>>>,
    },
    For {
        init: Option<Box<Spanned<Statement>>>,
        condition: Option<Spanned<Expression>>,
        update: Option<Spanned<Expression>>,
        body: Box<Spanned<Statement>>,
    },
    ForEach {
        kind: DeclarationKind,
        binding: Spanned<Arc<str>>,
        iteration: Iteration,
        iterable: Spanned<Expression>,
        body: Box<Spanned<Statement>>,
    },
    While {
        condition: Spanned<Expression>,
        body: Box<Spanned<Statement>>,
    },
    Block(Vec<Spanned<Statement>>),
    Break,
    Continue,
    Throw(Spanned<Expression>),
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationKind {
    Let,
    Const,
    Var,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    pub name: Spanned<Arc<str>>,
    pub value: Option<Spanned<Expression>>,
}

/// `for..of` walks values, `for..in` walks keys (or indexes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    Values,
    Keys,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    Identifier(Arc<str>),
    Array(Vec<Spanned<Self>>),
    Object(Vec<(Arc<str>, Spanned<Self>)>),
    Member {
        object: Box<Spanned<Self>>,
        property: Arc<str>,
    },
    Index {
        object: Box<Spanned<Self>>,
        index: Box<Spanned<Self>>,
    },
    Call {
        callee: Box<Spanned<Self>>,
        arguments: Vec<Spanned<Self>>,
    },
    Unary {
        operator: UnaryOperator,
        operand: Box<Spanned<Self>>,
    },
    Update {
        operator: UpdateOperator,
        prefix: bool,
        target: Box<Spanned<Self>>,
    },
    Binary {
        operator: BinaryOperator,
        operand_a: Box<Spanned<Self>>,
        operand_b: Box<Spanned<Self>>,
    },
    Logical {
        operator: LogicalOperator,
        operand_a: Box<Spanned<Self>>,
        operand_b: Box<Spanned<Self>>,
    },
    Conditional {
        condition: Box<Spanned<Self>>,
        consequent: Box<Spanned<Self>>,
        alternate: Box<Spanned<Self>>,
    },
    Assign {
        operator: AssignOperator,
        target: Box<Spanned<Self>>,
        value: Box<Spanned<Self>>,
    },
}

impl Expression {
    /// Identifiers, member accesses and index accesses can be written to.
    pub fn is_assignable(&self) -> bool {
        matches!(
            self,
            Self::Identifier(_) | Self::Member { .. } | Self::Index { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Negate,
    Plus,
    Typeof,
    Await,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOperator {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOperator {
    Assign,
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
}

impl AssignOperator {
    /// The arithmetic behind a compound assignment like `+=`.
    pub fn binary(self) -> Option<BinaryOperator> {
        match self {
            Self::Assign => None,
            Self::Add => Some(BinaryOperator::Add),
            Self::Subtract => Some(BinaryOperator::Subtract),
            Self::Multiply => Some(BinaryOperator::Multiply),
            Self::Divide => Some(BinaryOperator::Divide),
            Self::Remainder => Some(BinaryOperator::Remainder),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(code: &str) -> Result<Program, Vec<String>> {
        let tokens = lexer().parse(code).into_output().unwrap();
        let (program, errors) = parser()
            .parse(tokens.map(span_at(code.len()), |Spanned { node, span }| {
                (node, span)
            }))
            .into_output_errors();
        if errors.is_empty() {
            Ok(program.unwrap())
        } else {
            Err(errors.into_iter().map(|error| error.to_string()).collect())
        }
    }

    fn single_expression(code: &str) -> Expression {
        let mut program = parse(code).unwrap();
        assert_eq!(program.len(), 1);
        match program.remove(0).node {
            Statement::Expression(expression) => expression.node,
            other => panic!("expected an expression statement, got {other:?}"),
        }
    }

    #[test]
    fn test_multiplication_binds_tighter() {
        let Expression::Binary {
            operator,
            operand_b,
            ..
        } = single_expression("1 + 2 * 3")
        else {
            panic!("expected a binary expression");
        };
        assert_eq!(operator, BinaryOperator::Add);
        assert!(matches!(
            operand_b.node,
            Expression::Binary {
                operator: BinaryOperator::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn test_call_chain_is_left_to_right() {
        let Expression::Call { callee, arguments } = single_expression("a.b[0](1, 2)") else {
            panic!("expected a call");
        };
        assert_eq!(arguments.len(), 2);
        assert!(matches!(callee.node, Expression::Index { .. }));
    }

    #[test]
    fn test_assignment_is_right_associative() {
        let Expression::Assign { value, .. } = single_expression("a = b = 1") else {
            panic!("expected an assignment");
        };
        assert!(matches!(value.node, Expression::Assign { .. }));
    }

    #[test]
    fn test_invalid_assignment_target() {
        assert!(parse("1 = 2").is_err());
    }

    #[test]
    fn test_semicolons_are_optional() {
        let program = parse("let a = 1\nlet b = 2; a + b").unwrap();
        assert_eq!(program.len(), 3);
    }

    #[test]
    fn test_for_of_and_c_for() {
        let program = parse("for (const item of items) {} for (let i = 0; i < 3; i++) {}").unwrap();
        assert!(matches!(
            program[0].node,
            Statement::ForEach {
                iteration: Iteration::Values,
                ..
            }
        ));
        assert!(matches!(program[1].node, Statement::For { .. }));
    }

    #[test]
    fn test_object_literal_with_shorthand() {
        let Expression::Assign { value, .. } = single_expression("x = { param, 'b': 2, c: 3, }")
        else {
            panic!("expected an assignment");
        };
        let Expression::Object(entries) = value.node else {
            panic!("expected an object literal");
        };
        let keys: Vec<_> = entries.iter().map(|(key, _)| key.as_ref()).collect();
        assert_eq!(keys, ["param", "b", "c"]);
    }

    #[test]
    fn test_unclosed_block_is_an_error() {
        assert!(parse("if (a) {").is_err());
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape(r"a\nb\'c\\"), "a\nb'c\\");
    }
}

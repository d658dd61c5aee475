//! Runs a compiled [`Template`] and writes its output into an
//! [`OutputSink`].

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::compiler::Template;
use crate::engine::OutputSink;
use crate::error::{EvaluationFault, FaultKind, RenderError};
use crate::escape::escape_html;
use crate::parser::{
    DeclarationKind, Expression, Iteration, Literal, LogicalOperator, Spanned, Statement,
    UnaryOperator, UpdateOperator,
};
use crate::value::{Namespace, Object, Value};

mod builtins;
mod operators;

/// Executes `template` against `namespace`.
///
/// Output written before a fault is flushed before the fault is returned.
pub(crate) async fn execute(
    template: Template,
    namespace: Namespace,
    output: OutputSink,
) -> Result<(), RenderError> {
    let program = template.shared_program();
    let mut evaluator = Evaluator::new(namespace, output);
    let result = evaluator.statements(&program).await;
    let flushed = evaluator.output.flush().await;
    match result {
        Ok(_) => flushed,
        Err(error) => Err(error.locate(template.name(), template.source())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Break,
    Continue,
}

#[derive(Debug)]
struct Binding {
    value: Value,
    constant: bool,
}

type Scope = HashMap<Arc<str>, Binding>;

struct Evaluator {
    // Innermost last. The first scope holds the namespace.
    scopes: Vec<Scope>,
    output: OutputSink,
    loop_depth: usize,
}

impl Evaluator {
    fn new(namespace: Namespace, output: OutputSink) -> Self {
        let globals = namespace
            .into_iter()
            .map(|(name, value)| {
                let binding = Binding {
                    value,
                    constant: false,
                };
                (name, binding)
            })
            .collect();
        Self {
            scopes: vec![globals, Scope::new()],
            output,
            loop_depth: 0,
        }
    }

    fn statements<'a>(
        &'a mut self,
        statements: &'a [Spanned<Statement>],
    ) -> BoxFuture<'a, Result<Flow, RenderError>> {
        async move {
            for statement in statements {
                let flow = self.statement(statement).await?;
                if flow != Flow::Normal {
                    return Ok(flow);
                }
            }
            Ok(Flow::Normal)
        }
        .boxed()
    }

    async fn block(&mut self, statements: &[Spanned<Statement>]) -> Result<Flow, RenderError> {
        self.scopes.push(Scope::new());
        let flow = self.statements(statements).await;
        self.scopes.pop();
        flow
    }

    fn statement<'a>(
        &'a mut self,
        statement: &'a Spanned<Statement>,
    ) -> BoxFuture<'a, Result<Flow, RenderError>> {
        async move {
            let span = statement.span;
            match &statement.node {
                Statement::EmitText(text) => self.output.write(text).await?,
                Statement::Emit { expression, escape } => {
                    let value = self.expression(expression).await?;
                    let text = value.to_text();
                    if *escape {
                        self.output.write(&escape_html(&text)).await?;
                    } else {
                        self.output.write(&text).await?;
                    }
                }
                Statement::Declaration { kind, declarators } => {
                    for declarator in declarators {
                        let value = match &declarator.value {
                            Some(value) => self.expression(value).await?,
                            None if *kind == DeclarationKind::Const => {
                                return Err(EvaluationFault::syntax_error(
                                    "Missing initializer in const declaration",
                                )
                                .at(declarator.name.span)
                                .into());
                            }
                            None => Value::Undefined,
                        };
                        self.declare(&declarator.name, *kind, value)?;
                    }
                }
                Statement::Expression(expression) => {
                    self.expression(expression).await?;
                }
                Statement::If {
                    condition,
                    then_branch,
                    else_branch,
                } => {
                    if self.expression(condition).await?.is_truthy() {
                        return self.statement(then_branch).await;
                    }
                    if let Some(else_branch) = else_branch {
                        return self.statement(else_branch).await;
                    }
                }
                Statement::For {
                    init,
                    condition,
                    update,
                    body,
                } => {
                    self.scopes.push(Scope::new());
                    let result = self
                        .c_for(init.as_deref(), condition.as_ref(), update.as_ref(), body)
                        .await;
                    self.scopes.pop();
                    result?;
                }
                Statement::ForEach {
                    kind,
                    binding,
                    iteration,
                    iterable,
                    body,
                } => {
                    self.for_each(*kind, binding, *iteration, iterable, body)
                        .await?;
                }
                Statement::While { condition, body } => {
                    self.loop_depth += 1;
                    let result = self.repeat(Some(condition), None, body).await;
                    self.loop_depth -= 1;
                    result?;
                }
                Statement::Block(statements) => return self.block(statements).await,
                Statement::Break if self.loop_depth == 0 => {
                    return Err(EvaluationFault::syntax_error("Illegal break statement")
                        .at(span)
                        .into());
                }
                Statement::Break => return Ok(Flow::Break),
                Statement::Continue if self.loop_depth == 0 => {
                    return Err(EvaluationFault::syntax_error(
                        "Illegal continue statement: no surrounding iteration statement",
                    )
                    .at(span)
                    .into());
                }
                Statement::Continue => return Ok(Flow::Continue),
                Statement::Throw(expression) => {
                    let value = self.expression(expression).await?;
                    return Err(thrown(&value).at(span).into());
                }
                Statement::Empty => {}
            }
            Ok(Flow::Normal)
        }
        .boxed()
    }

    async fn c_for(
        &mut self,
        init: Option<&Spanned<Statement>>,
        condition: Option<&Spanned<Expression>>,
        update: Option<&Spanned<Expression>>,
        body: &Spanned<Statement>,
    ) -> Result<(), RenderError> {
        if let Some(init) = init {
            self.statement(init).await?;
        }
        self.loop_depth += 1;
        let result = self.repeat(condition, update, body).await;
        self.loop_depth -= 1;
        result
    }

    async fn repeat(
        &mut self,
        condition: Option<&Spanned<Expression>>,
        update: Option<&Spanned<Expression>>,
        body: &Spanned<Statement>,
    ) -> Result<(), RenderError> {
        loop {
            if let Some(condition) = condition {
                if !self.expression(condition).await?.is_truthy() {
                    return Ok(());
                }
            }
            if self.statement(body).await? == Flow::Break {
                return Ok(());
            }
            if let Some(update) = update {
                self.expression(update).await?;
            }
        }
    }

    async fn for_each(
        &mut self,
        kind: DeclarationKind,
        binding: &Spanned<Arc<str>>,
        iteration: Iteration,
        iterable: &Spanned<Expression>,
        body: &Spanned<Statement>,
    ) -> Result<(), RenderError> {
        let collection = self.expression(iterable).await?;
        let items = match (iteration, &collection) {
            (Iteration::Values, Value::Array(items)) => items.as_ref().clone(),
            (Iteration::Values, Value::String(text)) => text
                .chars()
                .map(|character| Value::from(character.to_string()))
                .collect(),
            (Iteration::Values, _) => {
                return Err(EvaluationFault::type_error(format!(
                    "{} is not iterable",
                    describe(&iterable.node)
                ))
                .at(iterable.span)
                .into());
            }
            (Iteration::Keys, collection) => builtins::keys(collection),
        };

        self.loop_depth += 1;
        let mut result = Ok(());
        for item in items {
            self.scopes.push(Scope::new());
            let flow = match self.declare(binding, kind, item) {
                Ok(()) => self.statement(body).await,
                Err(error) => Err(error),
            };
            self.scopes.pop();
            match flow {
                Ok(Flow::Break) => break,
                Ok(_) => {}
                Err(error) => {
                    result = Err(error);
                    break;
                }
            }
        }
        self.loop_depth -= 1;
        result
    }

    fn declare(
        &mut self,
        name: &Spanned<Arc<str>>,
        kind: DeclarationKind,
        value: Value,
    ) -> Result<(), RenderError> {
        let Some(scope) = self.scopes.last_mut() else {
            return Err(EvaluationFault::new(FaultKind::Internal, "no scope to declare in").into());
        };
        if kind != DeclarationKind::Var && scope.contains_key(&name.node) {
            return Err(EvaluationFault::syntax_error(format!(
                "Identifier '{}' has already been declared",
                name.node
            ))
            .at(name.span)
            .into());
        }
        let binding = Binding {
            value,
            constant: kind == DeclarationKind::Const,
        };
        scope.insert(name.node.clone(), binding);
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .map(|binding| &binding.value)
    }

    fn binding_mut(&mut self, name: &str) -> Option<&mut Binding> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.get_mut(name))
    }

    fn read_identifier(&self, name: &str) -> Result<Value, RenderError> {
        if let Some(value) = self.lookup(name) {
            return Ok(value.clone());
        }
        builtins::global(name)
            .ok_or_else(|| EvaluationFault::reference_error(format!("{name} is not defined")).into())
    }

    fn expression<'a>(
        &'a mut self,
        expression: &'a Spanned<Expression>,
    ) -> BoxFuture<'a, Result<Value, RenderError>> {
        async move {
            self.evaluate(&expression.node)
                .await
                .map_err(|error| error.at(expression.span))
        }
        .boxed()
    }

    async fn evaluate(&mut self, expression: &Expression) -> Result<Value, RenderError> {
        match expression {
            Expression::Literal(literal) => Ok(match literal {
                Literal::Undefined => Value::Undefined,
                Literal::Null => Value::Null,
                Literal::Bool(bool) => Value::Bool(*bool),
                Literal::Number(number) => Value::Number(*number),
                Literal::String(text) => Value::String(text.clone()),
            }),
            Expression::Identifier(name) => self.read_identifier(name),
            Expression::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.expression(item).await?);
                }
                Ok(Value::from(values))
            }
            Expression::Object(entries) => {
                let mut object = Object::with_capacity(entries.len());
                for (key, value) in entries {
                    let value = self.expression(value).await?;
                    object.insert(key.clone(), value);
                }
                Ok(Value::from(object))
            }
            Expression::Member { object, property } => {
                let target = self.expression(object).await?;
                builtins::get_property(&target, property)
            }
            Expression::Index { object, index } => {
                let target = self.expression(object).await?;
                let key = self.expression(index).await?;
                builtins::get_index(&target, &key)
            }
            Expression::Call { callee, arguments } => self.call(callee, arguments).await,
            Expression::Unary { operator, operand } => {
                if *operator == UnaryOperator::Typeof {
                    if let Expression::Identifier(name) = &operand.node {
                        if self.lookup(name).is_none() && builtins::global(name).is_none() {
                            return Ok(Value::from("undefined"));
                        }
                    }
                }
                let value = self.expression(operand).await?;
                Ok(operators::unary(*operator, value))
            }
            Expression::Update {
                operator,
                prefix,
                target,
            } => {
                if !target.node.is_assignable() {
                    let position = if *prefix { "prefix" } else { "postfix" };
                    return Err(EvaluationFault::syntax_error(format!(
                        "Invalid left-hand side expression in {position} operation"
                    ))
                    .into());
                }
                let old = self.expression(target).await?.to_number();
                let new = match operator {
                    UpdateOperator::Increment => old + 1.,
                    UpdateOperator::Decrement => old - 1.,
                };
                self.assign(target, Value::from(new)).await?;
                Ok(Value::from(if *prefix { new } else { old }))
            }
            Expression::Binary {
                operator,
                operand_a,
                operand_b,
            } => {
                let a = self.expression(operand_a).await?;
                let b = self.expression(operand_b).await?;
                Ok(operators::binary(*operator, &a, &b))
            }
            Expression::Logical {
                operator,
                operand_a,
                operand_b,
            } => {
                let a = self.expression(operand_a).await?;
                let settled = match operator {
                    LogicalOperator::And => !a.is_truthy(),
                    LogicalOperator::Or => a.is_truthy(),
                    LogicalOperator::Nullish => !a.is_nullish(),
                };
                if settled {
                    Ok(a)
                } else {
                    self.expression(operand_b).await
                }
            }
            Expression::Conditional {
                condition,
                consequent,
                alternate,
            } => {
                if self.expression(condition).await?.is_truthy() {
                    self.expression(consequent).await
                } else {
                    self.expression(alternate).await
                }
            }
            Expression::Assign {
                operator,
                target,
                value,
            } => {
                let value = match operator.binary() {
                    None => self.expression(value).await?,
                    Some(binary) => {
                        let current = self.expression(target).await?;
                        let operand = self.expression(value).await?;
                        operators::binary(binary, &current, &operand)
                    }
                };
                self.assign(target, value.clone()).await?;
                Ok(value)
            }
        }
    }

    /// Writes `value` to an identifier, member or index target. Containers
    /// on the way are copied when shared.
    async fn assign(
        &mut self,
        target: &Spanned<Expression>,
        value: Value,
    ) -> Result<(), RenderError> {
        let mut keys = Vec::new();
        let mut current = target;
        let name = loop {
            match &current.node {
                Expression::Identifier(name) => break name,
                Expression::Member { object, property } => {
                    keys.push(Value::String(property.clone()));
                    current = object;
                }
                Expression::Index { object, index } => {
                    keys.push(self.expression(index).await?);
                    current = object;
                }
                // `make().field = value` writes into a temporary.
                _ => {
                    self.expression(current).await?;
                    return Ok(());
                }
            }
        };
        keys.reverse();

        let Some(binding) = self.binding_mut(name) else {
            return Err(EvaluationFault::reference_error(format!("{name} is not defined")).into());
        };
        if keys.is_empty() {
            if binding.constant {
                return Err(EvaluationFault::type_error("Assignment to constant variable.").into());
            }
            binding.value = value;
            return Ok(());
        }
        builtins::set_path(&mut binding.value, &keys, value)
    }

    async fn call(
        &mut self,
        callee: &Spanned<Expression>,
        arguments: &[Spanned<Expression>],
    ) -> Result<Value, RenderError> {
        if let Expression::Member { object, property } = &callee.node {
            let receiver = self.expression(object).await?;
            let arguments = self.arguments(arguments).await?;
            if let Value::Object(entries) = &receiver {
                if let Some(Value::Function(function)) = entries.get(property) {
                    let function = function.clone();
                    return function.call(arguments).await;
                }
            }
            if receiver.is_nullish() {
                builtins::get_property(&receiver, property)?;
            }
            return builtins::call_method(&receiver, property, &arguments).unwrap_or_else(|| {
                Err(EvaluationFault::type_error(format!(
                    "{} is not a function",
                    describe(&callee.node)
                ))
                .into())
            });
        }

        let function = self.expression(callee).await?;
        let arguments = self.arguments(arguments).await?;
        match function {
            Value::Function(function) => function.call(arguments).await,
            _ => Err(EvaluationFault::type_error(format!(
                "{} is not a function",
                describe(&callee.node)
            ))
            .into()),
        }
    }

    async fn arguments(
        &mut self,
        arguments: &[Spanned<Expression>],
    ) -> Result<Vec<Value>, RenderError> {
        let mut values = Vec::with_capacity(arguments.len());
        for argument in arguments {
            values.push(self.expression(argument).await?);
        }
        Ok(values)
    }
}

/// Source-like name of an expression for error messages.
fn describe(expression: &Expression) -> String {
    match expression {
        Expression::Identifier(name) => name.to_string(),
        Expression::Member { object, property } => {
            format!("{}.{property}", describe(&object.node))
        }
        Expression::Index { object, .. } => format!("{}[...]", describe(&object.node)),
        Expression::Call { callee, .. } => format!("{}(...)", describe(&callee.node)),
        Expression::Literal(Literal::String(text)) => format!("\"{text}\""),
        Expression::Literal(Literal::Number(number)) => crate::value::format_number(*number),
        Expression::Literal(Literal::Bool(bool)) => bool.to_string(),
        Expression::Literal(Literal::Null) => "null".to_owned(),
        Expression::Literal(Literal::Undefined) => "undefined".to_owned(),
        _ => "expression".to_owned(),
    }
}

fn thrown(value: &Value) -> EvaluationFault {
    let message = match value {
        Value::Object(entries) => entries
            .get("message")
            .map_or_else(|| value.to_text().into_owned(), |message| message.to_text().into_owned()),
        value => value.to_text().into_owned(),
    };
    EvaluationFault::new(FaultKind::Thrown, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::render_to_string;
    use crate::value::Function;
    use serde_json::json;

    async fn render(source: &str) -> Result<String, RenderError> {
        render_to_string(source, Namespace::new()).await
    }

    async fn fault_of(source: &str) -> EvaluationFault {
        match render(source).await {
            Err(RenderError::Evaluation(fault)) => fault,
            other => panic!("expected an evaluation fault, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_let_is_block_scoped() {
        let output = render("<% let x = 'outer' %><% { let x = 'inner' %><%= x %><% } %>:<%= x %>")
            .await
            .unwrap();
        assert_eq!(output, "inner:outer");
    }

    #[tokio::test]
    async fn test_const_reassignment() {
        let fault = fault_of("<% const x = 1; x = 2 %>").await;
        assert_eq!(fault.kind, FaultKind::TypeError);
        assert_eq!(fault.message, "Assignment to constant variable.");
    }

    #[tokio::test]
    async fn test_const_object_can_be_mutated() {
        let output = render("<% const user = { name: 'a' }; user.name = 'b' %><%= user.name %>")
            .await
            .unwrap();
        assert_eq!(output, "b");
    }

    #[tokio::test]
    async fn test_redeclaration() {
        let fault = fault_of("<% let x = 1 %><% let x = 2 %>").await;
        assert_eq!(fault.kind, FaultKind::SyntaxError);
        assert_eq!(fault.message, "Identifier 'x' has already been declared");
    }

    #[tokio::test]
    async fn test_assignment_to_undeclared_name() {
        let fault = fault_of("<% total = 1 %>").await;
        assert_eq!(fault.kind, FaultKind::ReferenceError);
        assert_eq!(fault.message, "total is not defined");
    }

    #[tokio::test]
    async fn test_typeof_undeclared_name() {
        assert_eq!(render("<%= typeof nothing %>").await.unwrap(), "undefined");
    }

    #[tokio::test]
    async fn test_loops_with_break_and_continue() {
        let source = "<% for (let i = 0; i < 10; i++) { if (i % 2) continue; if (i > 6) break %><%= i %><% } %>";
        assert_eq!(render(source).await.unwrap(), "0246");
        let source = "<% let n = 0; while (n < 3) { n++ %>w<% } %>";
        assert_eq!(render(source).await.unwrap(), "www");
    }

    #[tokio::test]
    async fn test_for_of_and_for_in() {
        let namespace = Namespace::new().with("user", json!({"name": "Ada", "age": 36}));
        let output = render_to_string(
            "<% for (const key in user) { %><%= key %>=<%= user[key] %>;<% } %>",
            namespace,
        )
        .await
        .unwrap();
        assert_eq!(output, "name=Ada;age=36;");
        let output = render("<% for (const c of 'abc') { %>[<%= c %>]<% } %>").await.unwrap();
        assert_eq!(output, "[a][b][c]");
    }

    #[tokio::test]
    async fn test_break_outside_loop() {
        let fault = fault_of("<% break %>").await;
        assert_eq!(fault.kind, FaultKind::SyntaxError);
        assert_eq!(fault.message, "Illegal break statement");
    }

    #[tokio::test]
    async fn test_throw_uses_message_property() {
        let fault = fault_of("<% throw { message: 'custom failure' } %>").await;
        assert_eq!(fault.kind, FaultKind::Thrown);
        assert_eq!(fault.message, "custom failure");
        assert_eq!(fault.to_string(), "Uncaught: custom failure");
    }

    #[tokio::test]
    async fn test_reading_property_of_undefined() {
        let fault = fault_of("<%= missing_property_holder %>").await;
        assert_eq!(fault.kind, FaultKind::ReferenceError);
        let fault = fault_of("<% let user %><%= user.name %>").await;
        assert_eq!(fault.kind, FaultKind::TypeError);
        assert_eq!(fault.message, "Cannot read properties of undefined (reading 'name')");
    }

    #[tokio::test]
    async fn test_calling_a_non_function() {
        let fault = fault_of("<% let user = {} %><%= user.greet() %>").await;
        assert_eq!(fault.message, "user.greet is not a function");
    }

    #[tokio::test]
    async fn test_nested_assignment_copies_shared_values() {
        let namespace = Namespace::new().with("items", json!([[1, 2], [3]]));
        let output = render_to_string(
            "<% const copy = items; copy[0][1] = 9 %><%= items[0] %>|<%= copy[0] %>",
            namespace,
        )
        .await
        .unwrap();
        assert_eq!(output, "1,2|1,9");
    }

    #[tokio::test]
    async fn test_native_function_and_panic() {
        let namespace = Namespace::new()
            .with(
                "double",
                Function::from_fn("double", |arguments| {
                    Ok(Value::from(arguments[0].to_number() * 2.))
                }),
            )
            .with(
                "explode",
                Function::from_fn("explode", |_| panic!("boom")),
            );
        let output = render_to_string("<%= double(21) %>", namespace.clone())
            .await
            .unwrap();
        assert_eq!(output, "42");
        let Err(RenderError::Evaluation(fault)) =
            render_to_string("<%= explode() %>", namespace).await
        else {
            panic!("expected a fault");
        };
        assert_eq!(fault.kind, FaultKind::Internal);
        assert_eq!(fault.message, "boom");
    }

    #[tokio::test]
    async fn test_fault_report_points_at_expression() {
        let error = render("line one\n<%= nope %>").await.unwrap_err();
        let fault = error.as_fault().unwrap();
        assert_eq!(fault.span.map(|span| span.start), Some(13));
        assert!(error.report().contains("nope is not defined"));
    }
}

use futures_util::StreamExt;
use kiln::{FaultKind, Function, Namespace, RenderError, RenderOptions, Value};
use serde_json::json;

async fn render(body: &str, param: impl Into<Value>) -> Result<String, RenderError> {
    kiln::render_to_string(body, Namespace::new().with("param", param)).await
}

const MARKUP: &str = "<div>test</div>";
const ESCAPED_MARKUP: &str = "&lt;div&gt;test&lt;/div&gt;";

#[tokio::test]
async fn test_text_without_tags() {
    assert_eq!(render("normal test", ()).await.unwrap(), "normal test");
}

#[tokio::test]
async fn test_escaped_and_raw_interpolation() {
    assert_eq!(render("<%= param %>", MARKUP).await.unwrap(), ESCAPED_MARKUP);
    assert_eq!(render("<%- param %>", MARKUP).await.unwrap(), MARKUP);
}

#[tokio::test]
async fn test_spacing_and_trailing_semicolon_do_not_matter() {
    for body in ["<%= param %>", "<%=param%>", "<%= param; %>"] {
        assert_eq!(render(body, MARKUP).await.unwrap(), ESCAPED_MARKUP, "{body}");
    }
    for body in ["<%- param %>", "<%-param%>", "<%- param; %>"] {
        assert_eq!(render(body, MARKUP).await.unwrap(), MARKUP, "{body}");
    }
}

#[tokio::test]
async fn test_comments_produce_nothing() {
    assert_eq!(render("<%# param %>", MARKUP).await.unwrap(), "");
    assert_eq!(render("<%#param%>", MARKUP).await.unwrap(), "");
}

#[tokio::test]
async fn test_conditional_across_tags() {
    let body = "<% if (param) { %>test<% } %>";
    assert_eq!(render(body, true).await.unwrap(), "test");
    assert_eq!(render(body, false).await.unwrap(), "");
    let body = "<% if (param) { %>yes<% } else { %>no<% } %>";
    assert_eq!(render(body, 0).await.unwrap(), "no");
}

#[tokio::test]
async fn test_loops() {
    for count in 0..=3 {
        let output = render(
            "<% for (let i = 0; i < param; i++) { %>Test<% } %>",
            count,
        )
        .await
        .unwrap();
        assert_eq!(output, "Test".repeat(count as usize));
    }
    let nested = "<% for (let i = 0; i < 2; i++) { %><% for (let j = 0; j < 2; j++) { %>Test<% } %><% } %>";
    assert_eq!(render(nested, ()).await.unwrap(), "TestTestTestTest");
}

#[tokio::test]
async fn test_loop_over_parameters() {
    let namespace = Namespace::new().with("users", json!([{"name": "Ada"}, {"name": "<Grace>"}]));
    let output = kiln::render_to_string(
        "<% for (const user of users) { %><%= user.name %>;<% } %>",
        namespace,
    )
    .await
    .unwrap();
    assert_eq!(output, "Ada;&lt;Grace&gt;;");
}

#[tokio::test]
async fn test_trailing_backslashes_are_trimmed() {
    let output = render("<%= param %>console.log(`${param}`)\\\\", "test")
        .await
        .unwrap();
    assert_eq!(output, "testconsole.log(`${param}`)");
    let output = render("one \\\ntwo", ()).await.unwrap();
    assert_eq!(output, "one \ntwo");
}

#[tokio::test]
async fn test_unknown_name_is_a_reference_error() {
    let error = render("<%= unknown %>", "").await.unwrap_err();
    let fault = error.as_fault().unwrap();
    assert_eq!(fault.kind, FaultKind::ReferenceError);
    assert_eq!(fault.message, "unknown is not defined");
    assert!(error.report().contains("unknown is not defined"));
}

#[tokio::test]
async fn test_output_before_failure_is_delivered() {
    let options = RenderOptions::default().with_chunk_size(0);
    let stream = kiln::render_with(
        "a<%= 'b' %><% throw 'stop' %>c",
        Namespace::new(),
        &options,
    )
    .unwrap();
    let items: Vec<_> = stream.collect().await;
    let text: String = items
        .iter()
        .filter_map(|item| item.as_ref().ok())
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect();
    assert_eq!(text, "ab");
    let Some(Err(RenderError::Evaluation(fault))) = items.last() else {
        panic!("expected the failure last");
    };
    assert_eq!(fault.to_string(), "Uncaught: stop");
}

#[tokio::test]
async fn test_syntax_errors_fail_before_rendering() {
    let error = kiln::render("<% for (const x of items) { %>open", Namespace::new())
        .err()
        .unwrap();
    assert!(matches!(error, RenderError::Syntax(_)));
}

#[tokio::test]
async fn test_functions_from_namespace() {
    let namespace = Namespace::new()
        .with("title", "kiln")
        .with(
            "shout",
            Function::from_fn("shout", |arguments| {
                let text = arguments.first().cloned().unwrap_or_default();
                Ok(Value::from(text.to_text().to_uppercase()))
            }),
        );
    let output = kiln::render_to_string("<%= shout(title) %>!", namespace)
        .await
        .unwrap();
    assert_eq!(output, "KILN!");
}

#[tokio::test]
async fn test_builtins() {
    let namespace = Namespace::new().with("data", json!({"list": [1, 2, 3]}));
    let output = kiln::render_to_string(
        "<%- JSON.stringify(data) %> <%= data.list.join('-') %> <%= 'ab'.repeat(2) %> <%= Object.keys(data) %>",
        namespace,
    )
    .await
    .unwrap();
    assert_eq!(output, r#"{"list":[1,2,3]} 1-2-3 abab list"#);
}

#[tokio::test]
async fn test_oversized_repeat_is_a_range_error() {
    let error = render("<%= 'ab'.repeat(100000000000000) %>", ()).await.unwrap_err();
    let fault = error.as_fault().unwrap();
    assert_eq!(fault.kind, FaultKind::RangeError);
    assert_eq!(fault.message, "Invalid string length");
}

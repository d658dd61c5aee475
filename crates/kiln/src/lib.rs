//! Kiln renders text templates with embedded script tags.
//!
//! | Tag         | Effect                                          |
//! |-------------|-------------------------------------------------|
//! | `<% %>`     | runs the code, writes nothing                   |
//! | `<%= %>`    | writes the value of the expression, HTML-escaped |
//! | `<%- %>`    | writes the value of the expression as is         |
//! | `<%# %>`    | comment, dropped                                 |
//!
//! A backslash right before a line break in template text removes both.
//! Code inside a tag cannot contain `%>`, not even inside a string literal:
//! the first `%>` always closes the tag.
//!
//! ```no_run
//! # async fn run() -> Result<(), kiln::RenderError> {
//! use kiln::Namespace;
//!
//! let namespace = Namespace::new().with("names", serde_json::json!(["Ada", "Grace"]));
//! let output = kiln::render_to_string(
//!     "<% for (const name of names) { %>Hi <%= name %>!\n<% } %>",
//!     namespace,
//! )
//! .await?;
//! assert_eq!(output, "Hi Ada!\nHi Grace!\n");
//! # Ok(())
//! # }
//! ```

mod compiler;
mod engine;
mod error;
mod escape;
mod evaluator;
mod include;
mod options;
pub mod parser;
pub mod template;
mod value;

pub use compiler::{DEFAULT_NAME, Template, compile, compile_named};
pub use engine::{
    Engine, RenderStream, render, render_file, render_file_to_string, render_file_with,
    render_to_string, render_with,
};
pub use error::{
    Diagnostic, EvaluationFault, FaultKind, IncludeError, LexError, RenderError, SyntaxError,
};
pub use escape::escape_html;
pub use include::{FileLoader, LoadError, MemoryLoader, TemplateLoader, normalize_path};
pub use options::RenderOptions;
pub use value::{Callable, Function, Namespace, Object, Value, format_number};

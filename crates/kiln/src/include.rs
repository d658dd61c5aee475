//! Loading templates by path and the default `include` function.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use log::debug;
use thiserror::Error;

use crate::compiler::compile_named;
use crate::engine::Engine;
use crate::error::{EvaluationFault, IncludeError, RenderError};
use crate::value::{Callable, Function, Namespace, Value};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("template {} not found", .path.display())]
    NotFound { path: PathBuf },
    #[error("cannot read template {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Source of template text.
pub trait TemplateLoader: Send + Sync {
    fn load<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<String, LoadError>>;
}

/// Reads templates from the file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader;

impl TemplateLoader for FileLoader {
    fn load<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<String, LoadError>> {
        async move {
            tokio::fs::read_to_string(path)
                .await
                .map_err(|error| match error.kind() {
                    io::ErrorKind::NotFound => LoadError::NotFound {
                        path: path.to_owned(),
                    },
                    _ => LoadError::Io {
                        path: path.to_owned(),
                        source: error,
                    },
                })
        }
        .boxed()
    }
}

/// Templates kept in memory, keyed by normalized path.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    files: HashMap<PathBuf, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl AsRef<Path>, text: impl Into<String>) -> Self {
        self.insert(path, text);
        self
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, text: impl Into<String>) {
        self.files.insert(normalize_path(path.as_ref()), text.into());
    }
}

impl TemplateLoader for MemoryLoader {
    fn load<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<String, LoadError>> {
        let result = self
            .files
            .get(&normalize_path(path))
            .cloned()
            .ok_or_else(|| LoadError::NotFound {
                path: path.to_owned(),
            });
        futures_util::future::ready(result).boxed()
    }
}

/// Removes `.` components and folds `..` into the preceding component.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if normalized.file_name().is_some() {
                    normalized.pop();
                } else {
                    normalized.push("..");
                }
            }
            component => normalized.push(component),
        }
    }
    normalized
}

/// Directory `include` resolves against for a template loaded from `path`.
pub(crate) fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_owned)
}

/// The default `include(path, bindings?)`.
///
/// Resolves `path` against the directory of the including template and
/// renders the target with exactly the `bindings` object as its namespace.
/// Nothing else of the caller's scope is visible to the included template.
pub struct FileInclude {
    engine: Engine,
    base_dir: PathBuf,
    depth: usize,
}

impl FileInclude {
    pub(crate) fn new(engine: Engine, base_dir: PathBuf, depth: usize) -> Self {
        Self {
            engine,
            base_dir,
            depth,
        }
    }

    pub(crate) fn into_function(self) -> Function {
        Function::new("include", self)
    }

    async fn include(&self, arguments: Vec<Value>) -> Result<Value, RenderError> {
        let mut arguments = arguments.into_iter();
        let reference = match arguments.next() {
            Some(Value::String(reference)) => reference,
            Some(other) => {
                return Err(EvaluationFault::type_error(format!(
                    "include() expects a template path, got {}",
                    other.type_of()
                ))
                .into());
            }
            None => {
                return Err(
                    EvaluationFault::type_error("include() expects a template path").into(),
                );
            }
        };
        let bindings = match arguments.next() {
            None | Some(Value::Undefined | Value::Null) => Namespace::new(),
            Some(Value::Object(entries)) => Namespace::from(Arc::unwrap_or_clone(entries)),
            Some(other) => {
                return Err(EvaluationFault::type_error(format!(
                    "include() bindings must be an object, got {}",
                    other.type_of()
                ))
                .into());
            }
        };

        let path = normalize_path(&self.base_dir.join(&*reference));
        let limit = self.engine.options().max_include_depth;
        if self.depth >= limit {
            return Err(IncludeError::TooDeep { path, limit }.into());
        }
        debug!("including {} at depth {}", path.display(), self.depth + 1);

        let source = self
            .engine
            .loader()
            .load(&path)
            .await
            .map_err(|source| IncludeError::Load {
                reference: reference.to_string(),
                source,
            })?;
        let template = compile_named(&path.display().to_string(), &source)?;
        let rendered = self
            .engine
            .render_template(&template, bindings, parent_dir(&path), self.depth + 1)
            .into_string()
            .await?;
        Ok(Value::from(rendered))
    }
}

impl Callable for FileInclude {
    fn call(&self, arguments: Vec<Value>) -> BoxFuture<'_, Result<Value, RenderError>> {
        self.include(arguments).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("./views/../partials/./row.ejs")),
            PathBuf::from("partials/row.ejs")
        );
        assert_eq!(normalize_path(Path::new("../up.ejs")), PathBuf::from("../up.ejs"));
    }

    #[test]
    fn test_parent_dir_of_bare_name() {
        assert_eq!(parent_dir(Path::new("page.ejs")), PathBuf::from("."));
        assert_eq!(parent_dir(Path::new("views/page.ejs")), PathBuf::from("views"));
    }

    #[tokio::test]
    async fn test_memory_loader() {
        let loader = MemoryLoader::new().with_file("views/a.ejs", "A");
        assert_eq!(loader.load(Path::new("./views/a.ejs")).await.unwrap(), "A");
        assert!(matches!(
            loader.load(Path::new("views/b.ejs")).await,
            Err(LoadError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_file_loader_reports_missing_file() {
        let error = FileLoader
            .load(Path::new("tests/testdata/does-not-exist.ejs"))
            .await
            .unwrap_err();
        assert!(matches!(error, LoadError::NotFound { .. }));
    }
}

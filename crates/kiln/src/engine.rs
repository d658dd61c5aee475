//! Render entry points and the streamed result.

use std::fmt;
use std::io;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_channel::mpsc;
use futures_util::future::BoxFuture;
use futures_util::io::AsyncRead;
use futures_util::{FutureExt, SinkExt, Stream, StreamExt, TryStreamExt};
use log::{debug, trace, warn};

use crate::compiler::{DEFAULT_NAME, Template, compile_named};
use crate::error::{EvaluationFault, FaultKind, RenderError};
use crate::evaluator;
use crate::include::{FileInclude, FileLoader, TemplateLoader, parent_dir};
use crate::options::RenderOptions;
use crate::value::Namespace;

/// Renders templates with a fixed set of options and a template loader.
#[derive(Clone)]
pub struct Engine {
    options: RenderOptions,
    loader: Arc<dyn TemplateLoader>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            options: RenderOptions::default(),
            loader: Arc::new(FileLoader),
        }
    }

    pub fn with_options(mut self, options: RenderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_loader(mut self, loader: impl TemplateLoader + 'static) -> Self {
        self.loader = Arc::new(loader);
        self
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn loader(&self) -> &dyn TemplateLoader {
        self.loader.as_ref()
    }

    /// Compiles and renders an in-memory template.
    ///
    /// Lex and syntax errors are returned right away. Failures while the
    /// template runs arrive as the last item of the stream.
    pub fn render(&self, source: &str, namespace: Namespace) -> Result<RenderStream, RenderError> {
        let name = self.options.name.as_deref().unwrap_or(DEFAULT_NAME);
        let template = compile_named(name, source)?;
        Ok(self.render_compiled(&template, namespace))
    }

    /// Loads, compiles and renders the template at `path`. `include` calls
    /// resolve against the directory of `path`.
    pub async fn render_file(
        &self,
        path: impl AsRef<Path>,
        namespace: Namespace,
    ) -> Result<RenderStream, RenderError> {
        let path = path.as_ref();
        let source = self.loader.load(path).await?;
        let template = compile_named(&path.display().to_string(), &source)?;
        Ok(self.render_template(&template, namespace, parent_dir(path), 0))
    }

    pub fn render_compiled(&self, template: &Template, namespace: Namespace) -> RenderStream {
        let include_base = self
            .options
            .include_base
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        self.render_template(template, namespace, include_base, 0)
    }

    pub(crate) fn render_template(
        &self,
        template: &Template,
        mut namespace: Namespace,
        include_base: PathBuf,
        depth: usize,
    ) -> RenderStream {
        if !namespace.contains("include") {
            let include = FileInclude::new(self.clone(), include_base, depth);
            namespace.insert("include", include.into_function());
        }
        debug!("rendering template `{}`", template.name());

        let (sender, receiver) = mpsc::channel(self.options.channel_capacity);
        let output = OutputSink::new(sender, self.options.chunk_size);
        let execution = evaluator::execute(template.clone(), namespace, output);
        let execution = AssertUnwindSafe(execution)
            .catch_unwind()
            .map(|result| {
                result.unwrap_or_else(|panic| {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|message| message.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "native function panicked".to_owned());
                    warn!("caught panic while rendering: {message}");
                    Err(EvaluationFault::new(FaultKind::Internal, message).into())
                })
            })
            .boxed();

        RenderStream {
            execution: Some(execution),
            receiver,
            failure: None,
        }
    }
}

/// Renders an in-memory template with default options. Includes resolve
/// against the working directory.
pub fn render(source: &str, namespace: Namespace) -> Result<RenderStream, RenderError> {
    Engine::new().render(source, namespace)
}

pub fn render_with(
    source: &str,
    namespace: Namespace,
    options: &RenderOptions,
) -> Result<RenderStream, RenderError> {
    Engine::new().with_options(options.clone()).render(source, namespace)
}

pub async fn render_file(
    path: impl AsRef<Path>,
    namespace: Namespace,
) -> Result<RenderStream, RenderError> {
    Engine::new().render_file(path, namespace).await
}

pub async fn render_file_with(
    path: impl AsRef<Path>,
    namespace: Namespace,
    options: &RenderOptions,
) -> Result<RenderStream, RenderError> {
    Engine::new()
        .with_options(options.clone())
        .render_file(path, namespace)
        .await
}

/// [`render`] collected into a `String`.
pub async fn render_to_string(source: &str, namespace: Namespace) -> Result<String, RenderError> {
    render(source, namespace)?.into_string().await
}

/// [`render_file`] collected into a `String`.
pub async fn render_file_to_string(
    path: impl AsRef<Path>,
    namespace: Namespace,
) -> Result<String, RenderError> {
    render_file(path, namespace).await?.into_string().await
}

/// Output of a render, as chunks in emission order.
///
/// Rendering runs while the stream is polled. The first failure ends the
/// stream as its last item, after every chunk written before it. Dropping
/// the stream stops rendering.
pub struct RenderStream {
    execution: Option<BoxFuture<'static, Result<(), RenderError>>>,
    receiver: mpsc::Receiver<Bytes>,
    failure: Option<RenderError>,
}

impl RenderStream {
    /// Collects the whole output. Fails with the render failure, if any.
    pub async fn into_string(mut self) -> Result<String, RenderError> {
        let mut output = BytesMut::new();
        while let Some(chunk) = self.next().await {
            output.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// The output as an [`AsyncRead`]. A render failure becomes an
    /// [`io::Error`] wrapping the [`RenderError`].
    pub fn into_async_read(self) -> impl AsyncRead + Unpin + Send {
        self.map_err(io::Error::other).into_async_read()
    }
}

impl Stream for RenderStream {
    type Item = Result<Bytes, RenderError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(execution) = this.execution.as_mut() {
            if let Poll::Ready(result) = execution.poll_unpin(cx) {
                this.execution = None;
                if let Err(error) = result {
                    this.failure = Some(error);
                }
            }
        }
        match this.receiver.poll_next_unpin(cx) {
            Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(chunk))),
            // The sender lives in the execution future, so the channel only
            // ends once rendering is over.
            Poll::Ready(None) => Poll::Ready(this.failure.take().map(Err)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Buffers emitted text and sends it into the render channel in chunks.
pub(crate) struct OutputSink {
    sender: mpsc::Sender<Bytes>,
    buffer: BytesMut,
    chunk_size: usize,
}

impl OutputSink {
    pub(crate) fn new(sender: mpsc::Sender<Bytes>, chunk_size: usize) -> Self {
        Self {
            sender,
            buffer: BytesMut::with_capacity(chunk_size),
            chunk_size,
        }
    }

    pub(crate) async fn write(&mut self, text: &str) -> Result<(), RenderError> {
        self.buffer.extend_from_slice(text.as_bytes());
        if self.buffer.len() >= self.chunk_size {
            self.flush().await?;
        }
        Ok(())
    }

    pub(crate) async fn flush(&mut self) -> Result<(), RenderError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = self.buffer.split().freeze();
        trace!("sending {} byte chunk", chunk.len());
        self.sender
            .send(chunk)
            .await
            .map_err(|_| RenderError::OutputClosed)
    }
}

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser as ClapParser, Subcommand};
use futures_util::StreamExt;
use kiln::{Engine, Namespace, RenderError, RenderStream};
use log::LevelFilter;
use tokio::io::{AsyncWrite, AsyncWriteExt};

mod config;

#[derive(ClapParser)]
#[command(name = "kiln")]
#[command(about = "Render Kiln templates")]
struct Cli {
    /// Config file to use instead of searching for kiln.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory `include` resolves against for inline templates
    #[arg(long, global = true)]
    include_base: Option<PathBuf>,
    /// Log more, repeat for even more
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a template file
    Render {
        file: PathBuf,
        #[command(flatten)]
        bindings: Bindings,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Render an inline template
    Eval {
        template: String,
        #[command(flatten)]
        bindings: Bindings,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check that template files compile
    Check { files: Vec<PathBuf> },
}

#[derive(Args)]
struct Bindings {
    /// Binding as NAME=VALUE. VALUE is read as JSON and falls back to a
    /// plain string
    #[arg(long = "param", value_name = "NAME=VALUE")]
    params: Vec<String>,
    /// JSON file holding an object of bindings
    #[arg(long = "params", value_name = "FILE")]
    params_file: Option<PathBuf>,
}

impl Bindings {
    async fn namespace(&self) -> Result<Namespace> {
        let mut namespace = Namespace::new();
        if let Some(path) = &self.params_file {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("cannot read {}", path.display()))?;
            let value: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("{} is not valid JSON", path.display()))?;
            let serde_json::Value::Object(entries) = value else {
                bail!("{} must hold a JSON object", path.display());
            };
            namespace = Namespace::from(entries);
        }
        for param in &self.params {
            let (name, value) = parse_param(param)?;
            namespace.insert(name, value);
        }
        Ok(namespace)
    }
}

fn parse_param(param: &str) -> Result<(String, serde_json::Value)> {
    let Some((name, value)) = param.split_once('=') else {
        bail!("expected NAME=VALUE, got `{param}`");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("missing binding name in `{param}`");
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_owned()));
    Ok((name.to_owned(), value))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_default_env();
    match cli.verbose {
        0 => {}
        1 => {
            logger.filter_level(LevelFilter::Debug);
        }
        _ => {
            logger.filter_level(LevelFilter::Trace);
        }
    }
    logger.init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            match error.downcast_ref::<RenderError>() {
                Some(error) => eprintln!("{}", error.report()),
                None => eprintln!("Error: {error:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut options = config::resolve(cli.config.as_deref())?.render;
    if let Some(include_base) = cli.include_base {
        options.include_base = Some(include_base);
    }
    let engine = Engine::new().with_options(options);

    match cli.command {
        Commands::Render {
            file,
            bindings,
            output,
        } => {
            let namespace = bindings.namespace().await?;
            let stream = engine.render_file(&file, namespace).await?;
            write_output(stream, output.as_deref()).await
        }
        Commands::Eval {
            template,
            bindings,
            output,
        } => {
            let namespace = bindings.namespace().await?;
            let stream = engine.render(&template, namespace)?;
            write_output(stream, output.as_deref()).await
        }
        Commands::Check { files } => {
            for file in &files {
                let source = tokio::fs::read_to_string(file)
                    .await
                    .with_context(|| format!("cannot read {}", file.display()))?;
                let template = kiln::compile_named(&file.display().to_string(), &source)?;
                eprintln!(
                    "{}: OK, {} top-level statements",
                    file.display(),
                    template.program().len()
                );
            }
            Ok(())
        }
    }
}

/// Copies chunks out as they are rendered. Output produced before a render
/// failure is kept.
async fn write_output(mut stream: RenderStream, output: Option<&Path>) -> Result<()> {
    let mut writer: Box<dyn AsyncWrite + Unpin> = match output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("cannot create {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };
    let mut result = Ok(());
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => writer.write_all(&chunk).await?,
            Err(error) => {
                result = Err(error.into());
                break;
            }
        }
    }
    writer.flush().await?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_param() {
        let (name, value) = parse_param("count=3").unwrap();
        assert_eq!(name, "count");
        assert_eq!(value, serde_json::json!(3));
        let (_, value) = parse_param("title=Hello there").unwrap();
        assert_eq!(value, serde_json::json!("Hello there"));
        let (_, value) = parse_param("list=[1,2]").unwrap();
        assert_eq!(value, serde_json::json!([1, 2]));
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=1").is_err());
    }
}

//! `kiln.toml` discovery and loading.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kiln::RenderOptions;
use log::debug;
use serde::Deserialize;

pub const CONFIG_FILE: &str = "kiln.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub render: RenderOptions,
}

/// Finds `kiln.toml` in `start` or the closest ancestor that has one.
fn find_config(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Loads `explicit`, or the `kiln.toml` found upward from the working
/// directory, or the defaults when there is none.
pub fn resolve(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let cwd = std::env::current_dir().context("cannot read the working directory")?;
            match find_config(&cwd) {
                Some(path) => path,
                None => return Ok(Config::default()),
            }
        }
    };
    debug!("loading config from {}", path.display());
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("cannot read config {}", path.display()))?;
    parse(&content, &path)
}

/// Parses config text. A relative `include-base` is taken relative to the
/// directory of the config file.
fn parse(content: &str, path: &Path) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| format!("invalid config {}", path.display()))?;
    if let (Some(base), Some(dir)) = (&config.render.include_base, path.parent()) {
        if base.is_relative() {
            config.render.include_base = Some(dir.join(base));
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_render_table() {
        let config = parse(
            "[render]\ninclude-base = \"views\"\nchunk-size = 0\n",
            Path::new("/site/kiln.toml"),
        )
        .unwrap();
        assert_eq!(config.render.include_base, Some(PathBuf::from("/site/views")));
        assert_eq!(config.render.chunk_size, 0);
        assert_eq!(config.render.max_include_depth, 32);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse("", Path::new("kiln.toml")).unwrap();
        assert_eq!(config.render, RenderOptions::default());
    }

    #[test]
    fn test_unknown_table_is_rejected() {
        assert!(parse("[server]\nport = 1\n", Path::new("kiln.toml")).is_err());
    }
}

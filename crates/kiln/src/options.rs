use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Knobs of a render call.
///
/// Deserializable from the `[render]` table of a `kiln.toml`:
///
/// ```toml
/// [render]
/// include-base = "templates"
/// chunk-size = 0
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RenderOptions {
    /// Name shown in reports for in-memory templates.
    pub name: Option<String>,
    /// Directory that `include` resolves against for in-memory templates.
    /// Templates rendered from a file always use the file's directory.
    pub include_base: Option<PathBuf>,
    /// Bytes buffered before a chunk is sent to the stream. `0` sends every
    /// emission as its own chunk.
    pub chunk_size: usize,
    /// Chunks the stream holds before rendering waits for the reader.
    pub channel_capacity: usize,
    pub max_include_depth: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            name: None,
            include_base: None,
            chunk_size: 4096,
            channel_capacity: 16,
            max_include_depth: 32,
        }
    }
}

impl RenderOptions {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_include_base(mut self, include_base: impl Into<PathBuf>) -> Self {
        self.include_base = Some(include_base.into());
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_channel_capacity(mut self, channel_capacity: usize) -> Self {
        self.channel_capacity = channel_capacity;
        self
    }

    pub fn with_max_include_depth(mut self, max_include_depth: usize) -> Self {
        self.max_include_depth = max_include_depth;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_table_keeps_defaults() {
        let options: RenderOptions = serde_json::from_str(r#"{"chunk-size": 0}"#).unwrap();
        assert_eq!(options.chunk_size, 0);
        assert_eq!(options.channel_capacity, 16);
        assert_eq!(options.max_include_depth, 32);
    }
}

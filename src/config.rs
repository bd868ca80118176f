//! Engine configuration
//!
//! Loaded from a TOML file when one exists, with sensible defaults
//! otherwise. Every field is optional in the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Compiler command line, split on whitespace before spawning.
    pub command: String,

    /// Upper bound on a blocking compile, in seconds.
    pub compile_timeout_secs: u64,

    /// Upper bound on a blocking query, in seconds.
    pub query_timeout_secs: u64,

    /// Forward the compiler's plain (non-markup) output to the editor sink.
    pub echo_process_output: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: "poly --ide".to_string(),
            compile_timeout_secs: 60,
            query_timeout_secs: 15,
            echo_process_output: false,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Config from the user's config directory, or defaults when no file
    /// exists there.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("polyide").join("config.toml"))
    }

    /// Program and arguments for spawning the compiler.
    pub fn command_line(&self) -> Vec<String> {
        self.command.split_whitespace().map(str::to_string).collect()
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.command, "poly --ide");
        assert_eq!(config.compile_timeout(), Duration::from_secs(60));
        assert_eq!(config.query_timeout(), Duration::from_secs(15));
        assert!(!config.echo_process_output);
    }

    #[test]
    fn test_command_line_splits_on_whitespace() {
        let config = EngineConfig {
            command: "  /opt/polyml/bin/poly   --ide -q ".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.command_line(),
            vec!["/opt/polyml/bin/poly", "--ide", "-q"]
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: EngineConfig = toml::from_str("command = \"poly-5.9 --ide\"\n").unwrap();
        assert_eq!(config.command, "poly-5.9 --ide");
        assert_eq!(config.compile_timeout_secs, 60);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "compile_timeout_secs = 5\necho_process_output = true").unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.compile_timeout_secs, 5);
        assert!(config.echo_process_output);
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "compile_timeout_secs = \"soon\"").unwrap();

        let err = EngineConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}

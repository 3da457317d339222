// Configuration management for flowtrace

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::grammar::Language;
use crate::resolver::InputLimits;
use crate::sandbox::TraceLimits;

/// File name looked up in the project directory.
pub const CONFIG_FILE: &str = ".flowtrace.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project: ProjectConfig,
    pub languages: LanguagesConfig,
    pub input: InputConfig,
    pub sandbox: TraceLimits,
    pub query: QueryConfig,
    pub watch: WatchConfig,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
    pub root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguagesConfig {
    pub enabled: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub max_file_bytes: usize,
    pub max_files: usize,
    /// Patterns skipped when importing a directory.
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Flow graphs kept in the analysis cache.
    pub cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub transport: String,
    /// Open MCP sessions kept before the oldest is closed.
    pub max_sessions: usize,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "unnamed-project".to_string(),
            root: ".".to_string(),
        }
    }
}

impl Default for LanguagesConfig {
    fn default() -> Self {
        Self {
            enabled: Language::ALL.iter().map(|l| l.as_str().to_string()).collect(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        let limits = InputLimits::default();
        Self {
            max_file_bytes: limits.max_file_bytes,
            max_files: limits.max_files,
            exclude: vec![
                "target/".to_string(),
                "node_modules/".to_string(),
                ".git/".to_string(),
                "__pycache__/".to_string(),
                "build/".to_string(),
            ],
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { cache_size: 1000 }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 500 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".to_string(),
            max_sessions: 64,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from project directory
    /// Looks for .flowtrace.toml in the project root
    pub fn from_project_dir<P: AsRef<Path>>(project_dir: P) -> Self {
        let config_path = project_dir.as_ref().join(CONFIG_FILE);

        match Self::from_file(&config_path) {
            Ok(config) => {
                tracing::info!("Loaded configuration from {}", config_path.display());
                config
            }
            Err(e) => {
                tracing::debug!("Could not load config from {}: {}", config_path.display(), e);
                tracing::info!("Using default configuration");
                Self::default()
            }
        }
    }

    /// Check if a file should be picked up by a directory import
    pub fn should_import_file(&self, file_path: &str) -> bool {
        let normalized = file_path.replace('\\', "/");
        !self
            .input
            .exclude
            .iter()
            .any(|pattern| Self::matches_pattern(&normalized, pattern))
    }

    /// Directory patterns end in `/`, `*.ext` matches a suffix, anything
    /// else matches a substring.
    fn matches_pattern(file_path: &str, pattern: &str) -> bool {
        if let Some(dir) = pattern.strip_suffix('/') {
            file_path.starts_with(pattern) || file_path.contains(&format!("/{}/", dir))
        } else if let Some(ext) = pattern.strip_prefix("*.") {
            file_path.ends_with(&format!(".{}", ext))
        } else {
            file_path.contains(pattern)
        }
    }

    /// Enabled languages that parse; unknown names are skipped.
    pub fn enabled_languages(&self) -> Vec<Language> {
        self.languages
            .enabled
            .iter()
            .filter_map(|name| Language::from_str(name).ok())
            .collect()
    }

    pub fn input_limits(&self) -> InputLimits {
        InputLimits {
            max_file_bytes: self.input.max_file_bytes,
            max_files: self.input.max_files,
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.project.name.is_empty() {
            return Err(anyhow::anyhow!("Project name cannot be empty"));
        }

        for lang in &self.languages.enabled {
            if Language::from_str(lang).is_err() {
                return Err(anyhow::anyhow!("Unsupported language: {}", lang));
            }
        }
        if self.languages.enabled.is_empty() {
            return Err(anyhow::anyhow!("At least one language must be enabled"));
        }

        if self.input.max_file_bytes == 0 {
            return Err(anyhow::anyhow!("Maximum file size must be greater than 0"));
        }
        if self.input.max_files == 0 {
            return Err(anyhow::anyhow!("Maximum file count must be greater than 0"));
        }

        if self.sandbox.timeout_ms == 0 {
            return Err(anyhow::anyhow!("Sandbox timeout must be greater than 0"));
        }
        if self.sandbox.max_steps == 0 {
            return Err(anyhow::anyhow!("Sandbox step limit must be greater than 0"));
        }
        if self.sandbox.max_call_depth == 0 {
            return Err(anyhow::anyhow!("Sandbox call depth must be greater than 0"));
        }

        if self.query.cache_size == 0 {
            return Err(anyhow::anyhow!("Query cache size must be greater than 0"));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!("Invalid log level: {}", self.logging.level));
        }
        let valid_formats = ["compact", "pretty", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!("Invalid log format: {}", self.logging.format));
        }

        if self.server.transport != "stdio" {
            return Err(anyhow::anyhow!("Invalid server transport: {}", self.server.transport));
        }
        if self.server.max_sessions == 0 {
            return Err(anyhow::anyhow!("Server session limit must be greater than 0"));
        }

        Ok(())
    }
}

/// Load configuration for a project
pub fn load_config(project_dir: &str) -> Config {
    Config::from_project_dir(project_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.project.name, "unnamed-project");
        assert_eq!(config.enabled_languages().len(), 5);
        assert_eq!(config.watch.debounce_ms, 500);
        assert_eq!(config.input.max_file_bytes, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_should_import_file() {
        let config = Config::default();

        assert!(config.should_import_file("src/main.rs"));
        assert!(config.should_import_file("lib/utils.py"));

        assert!(!config.should_import_file("target/debug/main.rs"));
        assert!(!config.should_import_file("app/node_modules/pkg/index.py"));
        assert!(!config.should_import_file("pkg\\__pycache__\\mod.py"));
    }

    #[test]
    fn test_pattern_matching() {
        assert!(Config::matches_pattern("target/debug/file", "target/"));
        assert!(Config::matches_pattern("src/target/file", "target/"));
        assert!(!Config::matches_pattern("src/targets.rs", "target/"));

        assert!(Config::matches_pattern("test.py", "*.py"));
        assert!(!Config::matches_pattern("test.rs", "*.py"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.project.name = "".to_string();
        assert!(config.validate().is_err());
        config.project.name = "test".to_string();

        config.languages.enabled = vec!["cobol".to_string()];
        assert!(config.validate().is_err());
        config.languages.enabled = vec!["py".to_string()];
        assert!(config.validate().is_ok());

        config.sandbox.max_steps = 0;
        assert!(config.validate().is_err());
        config.sandbox.max_steps = 100;

        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
        config.logging.level = "info".to_string();

        config.server.transport = "http".to_string();
        assert!(config.validate().is_err());
        config.server.transport = "stdio".to_string();

        config.server.max_sessions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join(CONFIG_FILE)).unwrap();
        writeln!(file, "[sandbox]\nmax_steps = 250\n\n[watch]\ndebounce_ms = 100\n\n[server]\nmax_sessions = 8").unwrap();

        let config = Config::from_project_dir(dir.path());
        assert_eq!(config.sandbox.max_steps, 250);
        assert_eq!(config.sandbox.timeout_ms, TraceLimits::default().timeout_ms);
        assert_eq!(config.watch.debounce_ms, 100);
        assert_eq!(config.query.cache_size, 1000);
        assert_eq!(config.server.max_sessions, 8);
        assert_eq!(config.server.transport, "stdio");
    }

    #[test]
    fn test_invalid_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[logging]\nlevel = \"loud\"\n").unwrap();
        let config = Config::from_project_dir(dir.path());
        assert_eq!(config.logging.level, "info");
    }
}

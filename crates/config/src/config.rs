//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Locations of the external binaries driven by the comparer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    /// Transcoder executable
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
    /// Inspection executable
    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,
    /// Quality scorer executable
    #[serde(default = "default_scorer")]
    pub scorer: PathBuf,
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

/// Bundled scorer location relative to the working directory
fn default_scorer() -> PathBuf {
    if cfg!(target_os = "linux") {
        PathBuf::from("tools/linux/vmaf")
    } else if cfg!(target_os = "windows") {
        PathBuf::from("tools/win/vmaf.exe")
    } else {
        PathBuf::from("vmaf")
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            scorer: default_scorer(),
        }
    }
}

/// Scorer-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScorerConfig {
    /// Threads handed to the scorer (0 = one per logical core)
    #[serde(default = "default_scorer_threads")]
    pub threads: u32,
}

fn default_scorer_threads() -> u32 {
    8
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            threads: default_scorer_threads(),
        }
    }
}

/// Temporary workspace configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceConfig {
    /// Parent directory for the per-run workspace (system temp dir if None)
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    /// Delay after cancelling before artifacts are deleted
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    /// Number of stderr lines kept per subprocess for error reports
    #[serde(default = "default_stderr_tail_lines")]
    pub stderr_tail_lines: usize,
}

fn default_cancel_grace_ms() -> u64 {
    200
}

fn default_stderr_tail_lines() -> usize {
    64
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            cancel_grace_ms: default_cancel_grace_ms(),
            stderr_tail_lines: default_stderr_tail_lines(),
        }
    }
}

impl WorkspaceConfig {
    /// Directory under which the run workspace is created
    pub fn resolved_base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(env::temp_dir)
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub scorer: ScorerConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - COMPARER_FFMPEG -> tools.ffmpeg
    /// - COMPARER_FFPROBE -> tools.ffprobe
    /// - COMPARER_SCORER -> tools.scorer
    /// - COMPARER_THREADS -> scorer.threads
    /// - COMPARER_TEMP_DIR -> workspace.base_dir
    /// - COMPARER_CANCEL_GRACE_MS -> workspace.cancel_grace_ms
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("COMPARER_FFMPEG") {
            if !val.is_empty() {
                self.tools.ffmpeg = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("COMPARER_FFPROBE") {
            if !val.is_empty() {
                self.tools.ffprobe = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("COMPARER_SCORER") {
            if !val.is_empty() {
                self.tools.scorer = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("COMPARER_THREADS") {
            if let Ok(threads) = val.parse::<u32>() {
                self.scorer.threads = threads;
            }
        }

        if let Ok(val) = env::var("COMPARER_TEMP_DIR") {
            if !val.is_empty() {
                self.workspace.base_dir = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = env::var("COMPARER_CANCEL_GRACE_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                self.workspace.cancel_grace_ms = ms;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            let mut config = Self::default();
            config.apply_env_overrides();
            return Ok(config);
        }
        Self::load(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to clear all config-related env vars
    fn clear_env_vars() {
        env::remove_var("COMPARER_FFMPEG");
        env::remove_var("COMPARER_FFPROBE");
        env::remove_var("COMPARER_SCORER");
        env::remove_var("COMPARER_THREADS");
        env::remove_var("COMPARER_TEMP_DIR");
        env::remove_var("COMPARER_CANCEL_GRACE_MS");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            ffmpeg in "[a-z/]{1,20}",
            threads in 0u32..256,
            grace in 0u64..5000,
            tail in 1usize..1024,
        ) {
            let toml_str = format!(
                r#"
[tools]
ffmpeg = "{}"

[scorer]
threads = {}

[workspace]
cancel_grace_ms = {}
stderr_tail_lines = {}
"#,
                ffmpeg, threads, grace, tail
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.tools.ffmpeg, PathBuf::from(&ffmpeg));
            prop_assert_eq!(config.tools.ffprobe, PathBuf::from("ffprobe"));
            prop_assert_eq!(config.scorer.threads, threads);
            prop_assert_eq!(config.workspace.cancel_grace_ms, grace);
            prop_assert_eq!(config.workspace.stderr_tail_lines, tail);
        }

        #[test]
        fn prop_env_overrides_threads(
            initial in 0u32..64,
            override_threads in 0u32..256,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[scorer]\nthreads = {}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("COMPARER_THREADS", override_threads.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.scorer.threads, override_threads);
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.tools.ffmpeg, PathBuf::from("ffmpeg"));
        assert_eq!(config.tools.ffprobe, PathBuf::from("ffprobe"));
        assert_eq!(config.scorer.threads, 8);
        assert_eq!(config.workspace.base_dir, None);
        assert_eq!(config.workspace.cancel_grace_ms, 200);
        assert_eq!(config.workspace.stderr_tail_lines, 64);
    }

    #[test]
    fn test_env_overrides_tool_paths() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("COMPARER_FFMPEG", "/opt/ffmpeg/bin/ffmpeg");
        env::set_var("COMPARER_SCORER", "/usr/local/bin/vmaf");
        env::set_var("COMPARER_TEMP_DIR", "/scratch");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.tools.ffmpeg, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(config.tools.scorer, PathBuf::from("/usr/local/bin/vmaf"));
        assert_eq!(config.workspace.resolved_base_dir(), PathBuf::from("/scratch"));
    }

    #[test]
    fn test_invalid_numeric_env_keeps_existing() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("COMPARER_THREADS", "many");
        env::set_var("COMPARER_CANCEL_GRACE_MS", "-5");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.scorer.threads, 8);
        assert_eq!(config.workspace.cancel_grace_ms, 200);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_file_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("comparer.toml");
        fs::write(&path, "[scorer]\nthreads = \"lots\"\n").unwrap();

        let result = Config::load_from_file(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}

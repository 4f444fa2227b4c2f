//! Startup checks module for the encoder comparer
//!
//! Provides preflight checks to verify the external tools before a run:
//! - Transcoder availability (and its version, for the log)
//! - Inspection tool availability
//! - Scorer executable presence

use crate::config::Config;
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::info;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{tool} not available: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    #[error("VMAF executable not found at {0:?}")]
    ScorerMissing(std::path::PathBuf),
}

/// Parse FFmpeg version string and extract major version number
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 8.0 ..."
/// - N-prefixed: "ffmpeg version n8.0-... ..."
/// - ffprobe: "ffprobe version 7.1 ..."
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output.lines().find(|line| {
        let lower = line.to_lowercase();
        lower.contains("ffmpeg version") || lower.contains("ffprobe version")
    })?;

    // Extract the token after "version"
    let version_part = version_line
        .to_lowercase()
        .split(" version ")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    // Handle n-prefixed versions (e.g., "n8.0-...")
    let version_str = version_part.trim_start_matches('n');

    // Extract major version (before first '.' or '-')
    let major_str = version_str.split(['.', '-']).next()?;

    major_str.parse().ok()
}

/// Run `program flag` and return its stdout if it exits successfully
pub fn check_tool_available(program: &Path, flag: &str) -> Result<String, StartupError> {
    let tool = program.display().to_string();
    let output = Command::new(program).arg(flag).output().map_err(|e| {
        StartupError::ToolUnavailable {
            tool: tool.clone(),
            reason: format!(
                "{} {} failed; make sure it's accessible in PATH. Error: {}",
                tool, flag, e
            ),
        }
    })?;

    if !output.status.success() {
        return Err(StartupError::ToolUnavailable {
            tool: tool.clone(),
            reason: format!("{} {} exited with {}", tool, flag, output.status),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Verify the scorer can be found
///
/// A path with directory components must exist on disk; a bare name is
/// resolved through PATH by running it with `--version`.
pub fn check_scorer_present(scorer: &Path) -> Result<(), StartupError> {
    if scorer.components().count() > 1 {
        if scorer.is_file() {
            return Ok(());
        }
        return Err(StartupError::ScorerMissing(scorer.to_path_buf()));
    }

    check_tool_available(scorer, "--version")
        .map(|_| ())
        .map_err(|_| StartupError::ScorerMissing(scorer.to_path_buf()))
}

/// Run all startup checks in order
///
/// Checks are run in the following order:
/// 1. Transcoder availability
/// 2. Inspection tool availability
/// 3. Scorer presence
pub fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    let ffmpeg_output = check_tool_available(&cfg.tools.ffmpeg, "-version")?;
    match parse_ffmpeg_version(&ffmpeg_output) {
        Some(major) => info!(major, "detected ffmpeg"),
        None => info!("ffmpeg version could not be determined"),
    }

    check_tool_available(&cfg.tools.ffprobe, "-version")?;
    check_scorer_present(&cfg.tools.scorer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::PathBuf;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_ffmpeg_version_parsing_standard(
            major in 1u32..20,
            minor in 0u32..10,
            patch in 0u32..10,
        ) {
            let version_output = format!(
                "ffmpeg version {}.{}.{} Copyright (c) 2000-2024 the FFmpeg developers",
                major, minor, patch
            );
            prop_assert_eq!(parse_ffmpeg_version(&version_output), Some(major));
        }

        #[test]
        fn prop_ffmpeg_version_parsing_n_prefixed(
            major in 1u32..20,
            minor in 0u32..10,
            git_hash in "[a-f0-9]{7}",
        ) {
            let version_output = format!(
                "ffmpeg version n{}.{}-123-g{} Copyright (c) 2000-2024",
                major, minor, git_hash
            );
            prop_assert_eq!(parse_ffmpeg_version(&version_output), Some(major));
        }
    }

    #[test]
    fn test_parse_ffmpeg_version_multiline() {
        let output = r#"ffmpeg version n8.0-5-g1234567 Copyright (c) 2000-2024
built with gcc 12.2.0
configuration: --enable-gpl"#;
        assert_eq!(parse_ffmpeg_version(output), Some(8));
    }

    #[test]
    fn test_parse_ffprobe_version() {
        let output = "ffprobe version 7.1.1 Copyright (c) 2007-2025 the FFmpeg developers";
        assert_eq!(parse_ffmpeg_version(output), Some(7));
    }

    #[test]
    fn test_parse_ffmpeg_version_invalid() {
        assert_eq!(parse_ffmpeg_version("not ffmpeg output"), None);
        assert_eq!(parse_ffmpeg_version(""), None);
    }

    #[test]
    fn test_missing_tool_unavailable() {
        let result = check_tool_available(Path::new("/nonexistent/ffmpeg-missing"), "-version");
        assert!(matches!(result, Err(StartupError::ToolUnavailable { .. })));
    }

    #[test]
    fn test_scorer_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let scorer = dir.path().join("tools").join("vmaf");
        assert!(matches!(
            check_scorer_present(&scorer),
            Err(StartupError::ScorerMissing(_))
        ));

        std::fs::create_dir_all(scorer.parent().unwrap()).unwrap();
        std::fs::write(&scorer, b"#!/bin/sh\n").unwrap();
        assert!(check_scorer_present(&scorer).is_ok());
    }

    #[test]
    fn test_bare_scorer_name_resolved_via_path() {
        let result = check_scorer_present(&PathBuf::from("definitely-not-a-scorer-binary"));
        assert!(matches!(result, Err(StartupError::ScorerMissing(_))));
    }
}

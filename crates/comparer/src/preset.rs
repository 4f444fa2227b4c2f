//! Preset parsing and static validation
//!
//! A preset is one line of transcoder arguments. It must name an output
//! format and exactly one video codec, and must not name an input file;
//! the orchestrator supplies input and output itself.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Input file flag, owned by the orchestrator
pub const INPUT_FLAG: &str = "-i";
/// Output container format flag
pub const FORMAT_FLAG: &str = "-f";
/// Accepted spellings of the video codec flag
pub const CODEC_FLAGS: &[&str] = &["-c:v", "-codec:v", "-vcodec"];

/// Error type for preset validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PresetValidationError {
    #[error("Preset can not contain an input file argument! (-i)")]
    ContainsInput,

    #[error("Preset must specify output format! (-f)")]
    MissingFormat,

    #[error("Preset must specify output video codec! (-c:v)")]
    MissingCodec,

    #[error("Preset must specify only one output video codec, found {0}")]
    MultipleCodecs(usize),

    #[error("Preset must contain a valid format name!")]
    MissingFormatValue,
}

/// Error type for loading a preset file
#[derive(Debug, Error)]
pub enum PresetFileError {
    #[error("Failed to read presets file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("INVALID PRESET! {source} ({preset}) at line {line}")]
    Invalid {
        line: usize,
        preset: String,
        #[source]
        source: PresetValidationError,
    },

    #[error("Presets file {0:?} contains no presets")]
    Empty(PathBuf),
}

fn is_flag(token: &str, flag: &str) -> bool {
    token.eq_ignore_ascii_case(flag)
}

/// Check a token sequence and return the output format value.
///
/// Flag matching ignores case; the returned format keeps its original case.
pub fn validate_preset<S: AsRef<str>>(tokens: &[S]) -> Result<String, PresetValidationError> {
    if tokens.iter().any(|t| is_flag(t.as_ref(), INPUT_FLAG)) {
        return Err(PresetValidationError::ContainsInput);
    }

    let format_index = tokens
        .iter()
        .position(|t| is_flag(t.as_ref(), FORMAT_FLAG))
        .ok_or(PresetValidationError::MissingFormat)?;

    let codec_flags = tokens
        .iter()
        .filter(|t| CODEC_FLAGS.iter().any(|flag| is_flag(t.as_ref(), flag)))
        .count();
    match codec_flags {
        0 => return Err(PresetValidationError::MissingCodec),
        1 => {}
        n => return Err(PresetValidationError::MultipleCodecs(n)),
    }

    match tokens.get(format_index + 1).map(|t| t.as_ref()) {
        Some(format) if !format.is_empty() => Ok(format.to_string()),
        _ => Err(PresetValidationError::MissingFormatValue),
    }
}

/// A validated set of transcoder arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    raw: String,
    tokens: Vec<String>,
    format: String,
}

impl Preset {
    /// Tokenize on whitespace and validate
    pub fn parse(line: &str) -> Result<Self, PresetValidationError> {
        let tokens: Vec<String> = line.split_whitespace().map(String::from).collect();
        let format = validate_preset(&tokens)?;
        Ok(Self {
            raw: line.trim().to_string(),
            tokens,
            format,
        })
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Container format named by `-f`
    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Run the static checks again
    pub fn revalidate(&self) -> Result<(), PresetValidationError> {
        validate_preset(&self.tokens).map(|_| ())
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parse preset lines, skipping blank ones. The first invalid line aborts.
pub fn parse_presets(content: &str) -> Result<Vec<Preset>, PresetFileError> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            Preset::parse(line).map_err(|source| PresetFileError::Invalid {
                line: index + 1,
                preset: line.trim().to_string(),
                source,
            })
        })
        .collect()
}

/// Read and validate every preset in `path`, one per line
pub fn load_presets(path: &Path) -> Result<Vec<Preset>, PresetFileError> {
    let content = fs::read_to_string(path).map_err(|source| PresetFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let presets = parse_presets(&content)?;
    if presets.is_empty() {
        return Err(PresetFileError::Empty(path.to_path_buf()));
    }
    Ok(presets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tokens(s: &str) -> Vec<&str> {
        s.split_whitespace().collect()
    }

    #[test]
    fn test_valid_preset_extracts_format() {
        assert_eq!(
            validate_preset(&tokens("-f mp4 -c:v libx264")),
            Ok("mp4".to_string())
        );
        let preset = Preset::parse("  -c:v libx265 -crf 28 -f matroska ").unwrap();
        assert_eq!(preset.format(), "matroska");
        assert_eq!(preset.as_str(), "-c:v libx265 -crf 28 -f matroska");
        assert_eq!(preset.tokens().len(), 6);
    }

    #[test]
    fn test_all_codec_spellings_accepted() {
        for flag in CODEC_FLAGS {
            let line = format!("-f webm {} libvpx-vp9", flag);
            assert!(Preset::parse(&line).is_ok(), "{} should be accepted", flag);
        }
    }

    #[test]
    fn test_flags_case_insensitive_values_preserved() {
        let preset = Preset::parse("-F MP4 -C:V libx264").unwrap();
        assert_eq!(preset.format(), "MP4");
    }

    #[test]
    fn test_missing_format() {
        assert_eq!(
            validate_preset(&tokens("-c:v libx264 -crf 20")),
            Err(PresetValidationError::MissingFormat)
        );
    }

    #[test]
    fn test_missing_codec() {
        assert_eq!(
            validate_preset(&tokens("-f mp4 -crf 20")),
            Err(PresetValidationError::MissingCodec)
        );
    }

    #[test]
    fn test_multiple_codecs() {
        assert_eq!(
            validate_preset(&tokens("-f mp4 -c:v libx264 -vcodec libx265")),
            Err(PresetValidationError::MultipleCodecs(2))
        );
    }

    #[test]
    fn test_format_flag_last_fails() {
        assert_eq!(
            validate_preset(&tokens("-c:v libx264 -f")),
            Err(PresetValidationError::MissingFormatValue)
        );
    }

    #[test]
    fn test_check_order_input_first() {
        // Missing everything else, but the input flag is reported first
        assert_eq!(
            validate_preset(&tokens("-i x.mkv")),
            Err(PresetValidationError::ContainsInput)
        );
    }

    #[test]
    fn test_parse_presets_skips_blank_lines_and_reports_line() {
        let presets = parse_presets("-f mp4 -c:v libx264\n\n   \n-f webm -c:v libvpx-vp9\n").unwrap();
        assert_eq!(presets.len(), 2);
        assert_eq!(presets[1].format(), "webm");

        let err = parse_presets("-f mp4 -c:v libx264\n-f mp4\n").unwrap_err();
        match err {
            PresetFileError::Invalid { line, preset, source } => {
                assert_eq!(line, 2);
                assert_eq!(preset, "-f mp4");
                assert_eq!(source, PresetValidationError::MissingCodec);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_load_presets_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("presets.txt");
        fs::write(&path, "-f mp4 -c:v libx264 -crf 23\n-f matroska -vcodec libsvtav1\n").unwrap();

        let presets = load_presets(&path).unwrap();
        assert_eq!(presets.len(), 2);
        assert_eq!(presets[0].format(), "mp4");

        let empty = dir.path().join("empty.txt");
        fs::write(&empty, "\n\n").unwrap();
        assert!(matches!(load_presets(&empty), Err(PresetFileError::Empty(_))));

        let missing = dir.path().join("missing.txt");
        assert!(matches!(load_presets(&missing), Err(PresetFileError::Read { .. })));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_input_flag_always_rejected(
            before in proptest::collection::vec("[a-z0-9:-]{1,8}", 0..6),
            after in proptest::collection::vec("[a-z0-9:-]{1,8}", 0..6),
            upper in proptest::bool::ANY,
        ) {
            let mut all: Vec<String> = before;
            all.push(if upper { "-I".to_string() } else { "-i".to_string() });
            all.extend(after);
            all.extend(["-f".to_string(), "mp4".to_string(), "-c:v".to_string(), "libx264".to_string()]);

            prop_assert_eq!(validate_preset(&all), Err(PresetValidationError::ContainsInput));
        }

        #[test]
        fn prop_format_value_extracted(format in "[a-z0-9_]{1,12}") {
            let line = format!("-c:v libx264 -preset slow -f {}", format);
            let preset = Preset::parse(&line).unwrap();
            prop_assert_eq!(preset.format(), format.as_str());
        }
    }
}

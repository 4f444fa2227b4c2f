//! Reference clip inspection
//!
//! Runs the inspection tool once against the reference and turns its
//! `key=value` output into a [`ReferenceVideo`].

use crate::cancel::CancelToken;
use crate::runner::{RunError, ToolCommand, ToolRunner};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Error type for metadata probing
#[derive(Debug, Error)]
pub enum MetadataError {
    /// Inspection tool exited with non-zero status
    #[error("Invalid video file! Failed to get metadata (exit code {exit_code:?}): {stderr}")]
    ProbeFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// Output could not be interpreted
    #[error("Failed to parse video metadata: {reason}")]
    Parse { reason: String },

    /// Inspection tool could not be run
    #[error(transparent)]
    Run(#[from] RunError),
}

/// Chroma subsampling class of the reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromaSubsampling {
    Yuv420,
    Yuv422,
    Yuv444,
}

impl ChromaSubsampling {
    /// Code passed to the scorer's pixel-format parameter
    pub fn code(&self) -> &'static str {
        match self {
            ChromaSubsampling::Yuv420 => "420",
            ChromaSubsampling::Yuv422 => "422",
            ChromaSubsampling::Yuv444 => "444",
        }
    }

    /// Classify a pixel format string; 420 unless 422 or 444 appears
    pub fn from_pixel_format(pixel_format: &str) -> Self {
        if pixel_format.contains("420") {
            ChromaSubsampling::Yuv420
        } else if pixel_format.contains("422") {
            ChromaSubsampling::Yuv422
        } else if pixel_format.contains("444") {
            ChromaSubsampling::Yuv444
        } else {
            ChromaSubsampling::Yuv420
        }
    }
}

impl fmt::Display for ChromaSubsampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Bit depth implied by a pixel format string (8 unless `p10`/`p12` appears)
pub fn bit_depth_from_pixel_format(pixel_format: &str) -> u8 {
    if pixel_format.contains("p10") {
        10
    } else if pixel_format.contains("p12") {
        12
    } else {
        8
    }
}

/// Immutable facts about the reference clip
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceVideo {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub chroma: ChromaSubsampling,
    pub pixel_format: String,
    pub frame_rate: f64,
    /// Seconds; zero when the container does not report it
    pub duration: f64,
}

/// Build the inspection command for `input`
pub fn build_probe_command(ffprobe: &Path, input: &Path) -> ToolCommand {
    ToolCommand::new(ffprobe).args([
        "-hide_banner".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-show_streams".to_string(),
        "-select_streams".to_string(),
        "v:0".to_string(),
        "-show_format".to_string(),
    ])
}

/// Probe the reference clip.
pub async fn probe_reference<R: ToolRunner + ?Sized>(
    runner: &R,
    ffprobe: &Path,
    input: &Path,
    cancel: &CancelToken,
) -> Result<ReferenceVideo, MetadataError> {
    let command = build_probe_command(ffprobe, input);
    let mut lines = Vec::new();

    let output = runner
        .run(&command, &mut |line: &str| lines.push(line.to_string()), cancel)
        .await?;

    if !output.success() {
        return Err(MetadataError::ProbeFailed {
            exit_code: output.exit_code,
            stderr: output.stderr,
        });
    }

    let video = parse_probe_output(&lines)?;
    debug!(?video, "probed reference");
    Ok(video)
}

/// Interpret the inspection tool's `key=value` lines.
///
/// `width`, `height` and `pix_fmt` take the last value seen. `avg_frame_rate`
/// and `duration` are only assigned while still zero, so the first non-zero
/// value wins. A `duration` of `N/A` counts as zero.
pub fn parse_probe_output<S: AsRef<str>>(lines: &[S]) -> Result<ReferenceVideo, MetadataError> {
    let mut width = 0u32;
    let mut height = 0u32;
    let mut pixel_format = String::new();
    let mut frame_rate = 0.0f64;
    let mut duration = 0.0f64;

    for line in lines {
        let Some((key, value)) = line.as_ref().split_once('=') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }

        match key.as_str() {
            "width" => width = parse_field(&key, value)?,
            "height" => height = parse_field(&key, value)?,
            "pix_fmt" => pixel_format = value.to_string(),
            "avg_frame_rate" if frame_rate == 0.0 => frame_rate = parse_frame_rate(value)?,
            "duration" if duration == 0.0 => {
                duration = if value.eq_ignore_ascii_case("n/a") {
                    0.0
                } else {
                    parse_field(&key, value)?
                };
            }
            _ => {}
        }
    }

    Ok(ReferenceVideo {
        width,
        height,
        bit_depth: bit_depth_from_pixel_format(&pixel_format),
        chroma: ChromaSubsampling::from_pixel_format(&pixel_format),
        pixel_format,
        frame_rate,
        duration,
    })
}

fn parse_field<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, MetadataError> {
    value.parse().map_err(|_| MetadataError::Parse {
        reason: format!("invalid {} '{}'", key, value),
    })
}

/// `num/den` as a float; a zero denominator is malformed
fn parse_frame_rate(value: &str) -> Result<f64, MetadataError> {
    let malformed = || MetadataError::Parse {
        reason: format!("invalid avg_frame_rate '{}'", value),
    };

    let (num, den) = value.split_once('/').ok_or_else(malformed)?;
    let num: f64 = num.trim().parse().map_err(|_| malformed())?;
    let den: f64 = den.trim().parse().map_err(|_| malformed())?;
    if den == 0.0 {
        return Err(malformed());
    }
    Ok(num / den)
}

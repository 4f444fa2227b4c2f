//! Transcoder invocations
//!
//! Every transcoder run reports progress as `key=value` lines on stdout and
//! overwrites its output.

use crate::preset::Preset;
use crate::probe::ReferenceVideo;
use crate::runner::ToolCommand;
use crate::timestamp::ClipWindow;
use std::path::Path;

/// Leading arguments shared by every transcoder invocation
pub const TRANSCODER_BASE_ARGS: &[&str] = &["-hide_banner", "-nostats", "-progress", "pipe:1", "-y"];

fn transcoder(ffmpeg: &Path) -> ToolCommand {
    ToolCommand::new(ffmpeg).args(TRANSCODER_BASE_ARGS.iter().copied())
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Cut `window` out of the reference into raw video, dropping audio
///
/// The end bound is only passed when it is known and positive.
pub fn build_extract_command(
    ffmpeg: &Path,
    input: &Path,
    window: &ClipWindow,
    output: &Path,
) -> ToolCommand {
    let mut cmd = transcoder(ffmpeg)
        .arg("-i")
        .arg(path_arg(input))
        .arg("-ss")
        .arg(window.from.to_string());

    if let Some(to) = window.to.filter(|to| *to > 0.0) {
        cmd = cmd.arg("-to").arg(to.to_string());
    }

    cmd.args(["-an", "-f", "rawvideo"]).arg(path_arg(output))
}

/// Encode the raw reference with the preset's arguments
pub fn build_encode_command(
    ffmpeg: &Path,
    reference: &ReferenceVideo,
    raw_reference: &Path,
    preset: &Preset,
    output: &Path,
) -> ToolCommand {
    transcoder(ffmpeg)
        .args(["-f", "rawvideo", "-framerate"])
        .arg(reference.frame_rate.to_string())
        .arg("-pixel_format")
        .arg(reference.pixel_format.clone())
        .arg("-video_size")
        .arg(format!("{}x{}", reference.width, reference.height))
        .arg("-i")
        .arg(path_arg(raw_reference))
        .args(preset.tokens().iter().cloned())
        .arg("-an")
        .arg(path_arg(output))
}

/// Decode the preset's output back into raw video
pub fn build_decode_command(ffmpeg: &Path, format: &str, encoded: &Path, output: &Path) -> ToolCommand {
    transcoder(ffmpeg)
        .arg("-f")
        .arg(format)
        .arg("-i")
        .arg(path_arg(encoded))
        .args(["-f", "rawvideo"])
        .arg(path_arg(output))
}

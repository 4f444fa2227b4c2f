//! Quality scorer invocation

use crate::probe::ReferenceVideo;
use crate::runner::ToolCommand;
use std::path::Path;

/// Files the scorer compares and writes
#[derive(Debug, Clone, Copy)]
pub struct ScoreInputs<'a> {
    pub reference_raw: &'a Path,
    pub distorted_raw: &'a Path,
    pub output: &'a Path,
}

/// Compare the raw reference with the raw decode, writing a JSON result
pub fn build_score_command(
    scorer: &Path,
    inputs: ScoreInputs<'_>,
    reference: &ReferenceVideo,
    threads: u32,
) -> ToolCommand {
    ToolCommand::new(scorer)
        .arg("-r")
        .arg(inputs.reference_raw.to_string_lossy().to_string())
        .arg("-d")
        .arg(inputs.distorted_raw.to_string_lossy().to_string())
        .arg("-w")
        .arg(reference.width.to_string())
        .arg("-h")
        .arg(reference.height.to_string())
        .arg("-b")
        .arg(reference.bit_depth.to_string())
        .arg("-p")
        .arg(reference.chroma.code())
        .arg("--threads")
        .arg(threads.to_string())
        .arg("--json")
        .arg("-o")
        .arg(inputs.output.to_string_lossy().to_string())
}

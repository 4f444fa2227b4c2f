//! Command builders for the external tools

pub mod ffmpeg;
pub mod vmaf;

pub use ffmpeg::{
    build_decode_command, build_encode_command, build_extract_command, TRANSCODER_BASE_ARGS,
};
pub use vmaf::{build_score_command, ScoreInputs};

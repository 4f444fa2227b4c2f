//! Encoder Comparer
//!
//! Compares transcoder presets on one reference clip: each preset's output is
//! decoded and scored against the raw reference with VMAF.

pub mod cancel;
pub mod concurrency;
pub mod pipeline;
pub mod preset;
pub mod probe;
pub mod progress;
pub mod runner;
pub mod score;
pub mod startup;
pub mod timestamp;
pub mod tools;
pub mod workspace;

pub use cancel::{CancelSource, CancelToken};
pub use concurrency::{resolve_scorer_threads, scorer_threads};
pub use encoder_comparer_config as config;
pub use encoder_comparer_config::Config;
pub use pipeline::{
    ComparisonReport, ComparisonRequest, NoopObserver, Pipeline, PipelineError,
    PipelineObserver, PipelineOptions, PipelineState, PresetError, PresetReport, Stage,
};
pub use preset::{load_presets, parse_presets, validate_preset, Preset, PresetFileError, PresetValidationError};
pub use probe::{probe_reference, ChromaSubsampling, MetadataError, ReferenceVideo};
pub use progress::{percent_complete, ProgressParseError, ProgressReport, ProgressState};
pub use runner::{RunError, SystemRunner, ToolCommand, ToolOutput, ToolRunner};
pub use score::{parse_score, read_score, QualityScore, ScoreError};
pub use startup::{run_startup_checks, StartupError};
pub use timestamp::{parse_timestamp, ClipWindow, TimeRange, TimestampError};
pub use workspace::{CleanupWarning, Workspace};

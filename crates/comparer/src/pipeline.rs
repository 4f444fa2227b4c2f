//! Comparison pipeline
//!
//! Drives one run: probe the reference, extract the clip to raw video once,
//! then encode, decode and score it under every preset in order. A failing
//! preset is recorded and the run moves on; cancellation unwinds the whole
//! run. The temporary workspace is removed on every exit path.

use crate::cancel::CancelToken;
use crate::concurrency::scorer_threads;
use crate::config::Config;
use crate::preset::{Preset, PresetValidationError};
use crate::probe::{probe_reference, MetadataError, ReferenceVideo};
use crate::progress::{ProgressReport, ProgressState};
use crate::runner::{RunError, ToolCommand, ToolOutput, ToolRunner};
use crate::score::{read_score, QualityScore, ScoreError};
use crate::timestamp::{ClipWindow, TimeRange, TimestampError};
use crate::tools::{
    build_decode_command, build_encode_command, build_extract_command, build_score_command,
    ScoreInputs,
};
use crate::workspace::{CleanupWarning, Workspace};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Tool invocation a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Probe,
    Extract,
    Encode,
    Decode,
    Score,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Probe => "probe",
            Stage::Extract => "extract",
            Stage::Encode => "encode",
            Stage::Decode => "decode",
            Stage::Score => "score",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the pipeline currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    ProbingMetadata,
    ExtractingReference,
    /// Preset index (zero-based) being encoded
    Encoding { preset: usize },
    Decoding { preset: usize },
    Scoring { preset: usize },
    Cancelling,
    CleaningUp,
    Done,
}

impl PipelineState {
    /// Convert state to string for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Init => "init",
            PipelineState::ProbingMetadata => "probing_metadata",
            PipelineState::ExtractingReference => "extracting_reference",
            PipelineState::Encoding { .. } => "encoding",
            PipelineState::Decoding { .. } => "decoding",
            PipelineState::Scoring { .. } => "scoring",
            PipelineState::Cancelling => "cancelling",
            PipelineState::CleaningUp => "cleaning_up",
            PipelineState::Done => "done",
        }
    }

    fn preset(&self) -> Option<usize> {
        match self {
            PipelineState::Encoding { preset }
            | PipelineState::Decoding { preset }
            | PipelineState::Scoring { preset } => Some(*preset),
            _ => None,
        }
    }
}

/// Failure of a single preset; the run continues with the next one
#[derive(Debug, Error)]
pub enum PresetError {
    #[error("Preset #{} is no longer valid: {}", .index + 1, .source)]
    Invalid {
        index: usize,
        #[source]
        source: PresetValidationError,
    },

    #[error("Failed to {} video with preset #{} (exit code {:?}): {}", .stage, .index + 1, .exit_code, .stderr)]
    ToolFailed {
        stage: Stage,
        index: usize,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Could not run {} for preset #{}: {}", .stage, .index + 1, .source)]
    Run {
        stage: Stage,
        index: usize,
        #[source]
        source: RunError,
    },

    #[error("Failed to read VMAF result for preset #{}: {}", .index + 1, .source)]
    Score {
        index: usize,
        #[source]
        source: ScoreError,
    },

    #[error("Workspace error during preset #{}: {}", .index + 1, .source)]
    Io {
        index: usize,
        #[source]
        source: std::io::Error,
    },
}

impl PresetError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PresetError::ToolFailed { stage, .. } | PresetError::Run { stage, .. } => Some(*stage),
            PresetError::Score { .. } => Some(Stage::Score),
            PresetError::Invalid { .. } | PresetError::Io { .. } => None,
        }
    }
}

/// Run-level failure
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Timestamp(TimestampError),

    #[error(transparent)]
    TimeRange(TimestampError),

    #[error("INVALID PRESET! {source} ({preset})")]
    InvalidPreset {
        index: usize,
        preset: String,
        #[source]
        source: PresetValidationError,
    },

    #[error("Failed to create temporary workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error(transparent)]
    Metadata(MetadataError),

    #[error("FFmpeg failed to convert original video to raw YUV format (exit code {exit_code:?}): {stderr}")]
    Extraction {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Could not extract reference clip: {0}")]
    ExtractionRun(#[source] RunError),

    #[error("Process cancelled")]
    Cancelled { completed: Vec<PresetReport> },
}

impl PipelineError {
    /// Caused by operator input rather than by a tool
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            PipelineError::Timestamp(_)
                | PipelineError::TimeRange(_)
                | PipelineError::InvalidPreset { .. }
        )
    }
}

impl From<TimestampError> for PipelineError {
    fn from(e: TimestampError) -> Self {
        match e {
            TimestampError::Format { .. } => PipelineError::Timestamp(e),
            TimestampError::EndBeforeStart { .. } => PipelineError::TimeRange(e),
        }
    }
}

/// Outcome of one preset
#[derive(Debug)]
pub struct PresetReport {
    /// Zero-based position in the preset list
    pub index: usize,
    pub preset: Preset,
    /// Wall time for the whole preset, encode through scoring
    pub elapsed: Duration,
    pub encode_time: Option<Duration>,
    /// Size of the encoded output in bytes
    pub encoded_size: Option<u64>,
    pub outcome: Result<QualityScore, PresetError>,
}

impl PresetReport {
    pub fn score(&self) -> Option<&QualityScore> {
        self.outcome.as_ref().ok()
    }

    /// Encoded size in decimal megabytes
    pub fn encoded_megabytes(&self) -> Option<f64> {
        self.encoded_size.map(|bytes| bytes as f64 / 1_000_000.0)
    }
}

/// Result of a run that reached the end of the preset list
#[derive(Debug)]
pub struct ComparisonReport {
    pub reference: ReferenceVideo,
    pub window: ClipWindow,
    pub presets: Vec<PresetReport>,
}

/// What to compare
#[derive(Debug, Clone)]
pub struct ComparisonRequest {
    pub input: PathBuf,
    /// Start of the clip; the beginning when `None`
    pub from: Option<String>,
    /// End of the clip; the probed duration when `None`
    pub to: Option<String>,
    pub presets: Vec<Preset>,
}

/// Tool locations and run parameters
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub scorer: PathBuf,
    pub scorer_threads: u32,
    pub workspace_base: PathBuf,
    /// Wait after cancelling before artifacts are deleted
    pub cancel_grace: Duration,
}

impl PipelineOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            ffmpeg: cfg.tools.ffmpeg.clone(),
            ffprobe: cfg.tools.ffprobe.clone(),
            scorer: cfg.tools.scorer.clone(),
            scorer_threads: scorer_threads(cfg),
            workspace_base: cfg.workspace.resolved_base_dir(),
            cancel_grace: Duration::from_millis(cfg.workspace.cancel_grace_ms),
        }
    }
}

/// Receives pipeline events as they happen
///
/// Every method defaults to doing nothing.
pub trait PipelineObserver: Send {
    fn on_stage(&mut self, _state: &PipelineState) {}

    fn on_reference(&mut self, _reference: &ReferenceVideo, _window: &ClipWindow) {}

    /// `percent` is `None` while the clip length is unknown
    fn on_progress(&mut self, _percent: Option<f64>, _speed: &str) {}

    fn on_preset_finished(&mut self, _report: &PresetReport) {}

    fn on_cleanup_warning(&mut self, _warning: &CleanupWarning) {}
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

enum StageFailure {
    Cancelled,
    Failed(PresetError),
}

#[derive(Default)]
struct PresetMeasurements {
    encode_time: Option<Duration>,
    encoded_size: Option<u64>,
}

/// Runs comparisons through a [`ToolRunner`]
pub struct Pipeline<R: ToolRunner> {
    runner: R,
    options: PipelineOptions,
}

impl<R: ToolRunner> Pipeline<R> {
    pub fn new(runner: R, options: PipelineOptions) -> Self {
        Self { runner, options }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Run the comparison.
    ///
    /// Timestamps and presets are checked before anything is spawned. After
    /// the workspace exists, every exit path (success, fatal error, or
    /// cancellation) removes it; a removal problem is reported through
    /// [`PipelineObserver::on_cleanup_warning`] and never replaces the result.
    pub async fn run(
        &self,
        request: &ComparisonRequest,
        observer: &mut dyn PipelineObserver,
        cancel: &CancelToken,
    ) -> Result<ComparisonReport, PipelineError> {
        enter(observer, PipelineState::Init);

        let range = TimeRange::parse(request.from.as_deref(), request.to.as_deref())?;
        for (index, preset) in request.presets.iter().enumerate() {
            preset
                .revalidate()
                .map_err(|source| PipelineError::InvalidPreset {
                    index,
                    preset: preset.to_string(),
                    source,
                })?;
        }

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled {
                completed: Vec::new(),
            });
        }

        let workspace =
            Workspace::create(&self.options.workspace_base).map_err(PipelineError::Workspace)?;
        debug!(root = %workspace.root().display(), "created workspace");

        let result = self
            .execute(&workspace, request, range, observer, cancel)
            .await;

        if matches!(result, Err(PipelineError::Cancelled { .. })) {
            enter(observer, PipelineState::Cancelling);
            tokio::time::sleep(self.options.cancel_grace).await;
        }

        enter(observer, PipelineState::CleaningUp);
        if let Some(warning) = workspace.cleanup() {
            warn!(%warning, "workspace cleanup incomplete");
            observer.on_cleanup_warning(&warning);
        }

        enter(observer, PipelineState::Done);
        result
    }

    async fn execute(
        &self,
        workspace: &Workspace,
        request: &ComparisonRequest,
        range: TimeRange,
        observer: &mut dyn PipelineObserver,
        cancel: &CancelToken,
    ) -> Result<ComparisonReport, PipelineError> {
        let cancelled = || PipelineError::Cancelled {
            completed: Vec::new(),
        };

        enter(observer, PipelineState::ProbingMetadata);
        let reference = probe_reference(&self.runner, &self.options.ffprobe, &request.input, cancel)
            .await
            .map_err(|e| match e {
                MetadataError::Run(RunError::Cancelled) => cancelled(),
                other => PipelineError::Metadata(other),
            })?;

        let window = range.resolve(reference.duration)?;
        observer.on_reference(&reference, &window);

        enter(observer, PipelineState::ExtractingReference);
        let extract = build_extract_command(
            &self.options.ffmpeg,
            &request.input,
            &window,
            &workspace.reference_raw(),
        );
        let output = self
            .run_transcoder(&extract, window.duration(), observer, cancel)
            .await
            .map_err(|e| match e {
                RunError::Cancelled => cancelled(),
                other => PipelineError::ExtractionRun(other),
            })?;
        if !output.success() {
            return Err(PipelineError::Extraction {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        let mut reports = Vec::with_capacity(request.presets.len());
        for (index, preset) in request.presets.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled { completed: reports });
            }

            let started = Instant::now();
            let mut measured = PresetMeasurements::default();
            let outcome = self
                .run_preset(
                    workspace,
                    index,
                    preset,
                    &reference,
                    &window,
                    &mut measured,
                    observer,
                    cancel,
                )
                .await;

            let outcome = match outcome {
                Ok(score) => Ok(score),
                Err(StageFailure::Cancelled) => {
                    return Err(PipelineError::Cancelled { completed: reports })
                }
                Err(StageFailure::Failed(e)) => {
                    error!(preset = index, error = %e, "preset failed");
                    Err(e)
                }
            };

            let report = PresetReport {
                index,
                preset: preset.clone(),
                elapsed: started.elapsed(),
                encode_time: measured.encode_time,
                encoded_size: measured.encoded_size,
                outcome,
            };
            observer.on_preset_finished(&report);
            reports.push(report);
        }

        Ok(ComparisonReport {
            reference,
            window,
            presets: reports,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_preset(
        &self,
        workspace: &Workspace,
        index: usize,
        preset: &Preset,
        reference: &ReferenceVideo,
        window: &ClipWindow,
        measured: &mut PresetMeasurements,
        observer: &mut dyn PipelineObserver,
        cancel: &CancelToken,
    ) -> Result<QualityScore, StageFailure> {
        preset
            .revalidate()
            .map_err(|source| StageFailure::Failed(PresetError::Invalid { index, source }))?;
        workspace
            .clear_preset_artifacts()
            .map_err(|source| StageFailure::Failed(PresetError::Io { index, source }))?;

        let target = window.duration();

        enter(observer, PipelineState::Encoding { preset: index });
        let encode = build_encode_command(
            &self.options.ffmpeg,
            reference,
            &workspace.reference_raw(),
            preset,
            &workspace.encoded(),
        );
        let encode_started = Instant::now();
        let output = self.run_transcoder(&encode, target, observer, cancel).await;
        check_stage(Stage::Encode, index, output)?;
        measured.encode_time = Some(encode_started.elapsed());

        let size = tokio::fs::metadata(workspace.encoded())
            .await
            .map_err(|source| StageFailure::Failed(PresetError::Io { index, source }))?
            .len();
        measured.encoded_size = Some(size);

        enter(observer, PipelineState::Decoding { preset: index });
        let decode = build_decode_command(
            &self.options.ffmpeg,
            preset.format(),
            &workspace.encoded(),
            &workspace.distorted_raw(),
        );
        let output = self.run_transcoder(&decode, target, observer, cancel).await;
        check_stage(Stage::Decode, index, output)?;

        enter(observer, PipelineState::Scoring { preset: index });
        let reference_raw = workspace.reference_raw();
        let distorted_raw = workspace.distorted_raw();
        let score_file = workspace.score_file();
        let score = build_score_command(
            &self.options.scorer,
            ScoreInputs {
                reference_raw: &reference_raw,
                distorted_raw: &distorted_raw,
                output: &score_file,
            },
            reference,
            self.options.scorer_threads,
        );
        let output = self
            .runner
            .run(&score, &mut |_line: &str| {}, cancel)
            .await;
        check_stage(Stage::Score, index, output)?;

        read_score(&score_file).map_err(|source| StageFailure::Failed(PresetError::Score { index, source }))
    }

    /// Run a transcoder, turning its progress stream into observer events
    async fn run_transcoder(
        &self,
        command: &ToolCommand,
        target_duration: f64,
        observer: &mut dyn PipelineObserver,
        cancel: &CancelToken,
    ) -> Result<ToolOutput, RunError> {
        let mut progress = ProgressState::new(target_duration);
        let mut on_line = |line: &str| match progress.feed_line(line) {
            Ok(Some(ProgressReport { percent, speed, .. })) => observer.on_progress(percent, &speed),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "ignoring malformed progress line"),
        };
        self.runner.run(command, &mut on_line, cancel).await
    }
}

fn enter(observer: &mut dyn PipelineObserver, state: PipelineState) {
    match state.preset() {
        Some(preset) => info!(state = state.as_str(), preset, "pipeline stage"),
        None => info!(state = state.as_str(), "pipeline stage"),
    }
    observer.on_stage(&state);
}

fn check_stage(
    stage: Stage,
    index: usize,
    output: Result<ToolOutput, RunError>,
) -> Result<(), StageFailure> {
    match output {
        Ok(output) if output.success() => Ok(()),
        Ok(output) => Err(StageFailure::Failed(PresetError::ToolFailed {
            stage,
            index,
            exit_code: output.exit_code,
            stderr: output.stderr,
        })),
        Err(RunError::Cancelled) => Err(StageFailure::Cancelled),
        Err(source) => Err(StageFailure::Failed(PresetError::Run {
            stage,
            index,
            source,
        })),
    }
}

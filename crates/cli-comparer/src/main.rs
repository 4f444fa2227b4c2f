//! CLI entry point for the encoder comparer
//!
//! Parses command line arguments, runs the comparison and renders progress
//! and results on stdout. Logs go to stderr.

use clap::Parser;
use crossterm::cursor::{RestorePosition, SavePosition};
use crossterm::style::{style, Print, Stylize};
use crossterm::terminal::{Clear, ClearType};
use crossterm::tty::IsTty;
use crossterm::{execute, queue};
use encoder_comparer::{
    load_presets, run_startup_checks, CancelSource, CleanupWarning, ClipWindow, ComparisonRequest,
    Config, Pipeline, PipelineError, PipelineObserver, PipelineOptions, PipelineState,
    PresetReport, ReferenceVideo, SystemRunner,
};
use std::io::{self, Stdout, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, error};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Encoder Comparer - score transcoder presets against a reference clip with VMAF
#[derive(Parser, Debug)]
#[command(name = "encoder-comparer")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Reference video to compare against
    input: PathBuf,

    /// Start of the clip (SS, MM:SS or HH:MM:SS)
    #[arg(short, long, default_value = "00:00")]
    from: String,

    /// End of the clip; defaults to the end of the video
    #[arg(short, long)]
    to: Option<String>,

    /// File with one preset per line
    #[arg(short, long)]
    presets: PathBuf,

    /// Threads for the VMAF scorer (0 = one per logical core)
    #[arg(long)]
    threads: Option<u32>,

    /// Path to the configuration file
    #[arg(short, long, default_value = "comparer.toml")]
    config: PathBuf,

    /// Path to the VMAF executable
    #[arg(long)]
    scorer: Option<PathBuf>,

    /// Skip startup checks (ffmpeg, ffprobe, vmaf). For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    /// Log debug events to stderr
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn seconds(d: Duration) -> String {
    format!("{:.2}s", d.as_secs_f64())
}

/// Renders pipeline events on stdout
///
/// On a terminal the progress line is redrawn in place; otherwise each
/// update is appended.
struct ConsoleObserver {
    out: Stdout,
    interactive: bool,
    progress_open: bool,
    presets: Vec<String>,
}

impl ConsoleObserver {
    fn new(presets: Vec<String>) -> Self {
        let out = io::stdout();
        let interactive = out.is_tty();
        Self {
            out,
            interactive,
            progress_open: false,
            presets,
        }
    }

    fn heading(&mut self, text: &str) {
        self.close_progress();
        println!("{}", style(text).cyan().bold());
        if self.interactive {
            let _ = execute!(self.out, SavePosition);
        }
    }

    fn close_progress(&mut self) {
        if self.progress_open {
            println!();
            self.progress_open = false;
        }
    }
}

impl PipelineObserver for ConsoleObserver {
    fn on_stage(&mut self, state: &PipelineState) {
        match state {
            PipelineState::Init => {}
            PipelineState::ProbingMetadata => self.heading("Loading video metadata..."),
            PipelineState::ExtractingReference => {
                self.heading("Converting original video to raw YUV format...")
            }
            PipelineState::Encoding { preset } => {
                self.close_progress();
                let text = self.presets.get(*preset).cloned().unwrap_or_default();
                println!();
                println!("{} {}", format!("Preset #{}:", preset + 1).bold(), text);
                self.heading("Encoding...");
            }
            PipelineState::Decoding { .. } => self.heading("Decoding to raw YUV format..."),
            PipelineState::Scoring { .. } => self.heading("Calculating VMAF score..."),
            PipelineState::Cancelling => {
                self.close_progress();
                println!("{}", "Cancelling...".yellow());
            }
            PipelineState::CleaningUp => {
                self.close_progress();
                debug!("removing temporary files");
            }
            PipelineState::Done => self.close_progress(),
        }
    }

    fn on_reference(&mut self, reference: &ReferenceVideo, window: &ClipWindow) {
        self.close_progress();
        println!("  Resolution:   {}x{}", reference.width, reference.height);
        println!("  Frame rate:   {:.3}", reference.frame_rate);
        println!(
            "  Pixel format: {} ({}-bit, {})",
            reference.pixel_format, reference.bit_depth, reference.chroma
        );
        println!("  Duration:     {:.2}s", reference.duration);
        match window.to {
            Some(to) => println!("  Clip:         {:.2}s - {:.2}s", window.from, to),
            None => println!("  Clip:         {:.2}s - end", window.from),
        }
    }

    fn on_progress(&mut self, percent: Option<f64>, speed: &str) {
        let line = match percent {
            Some(percent) => format!("[{:.2}%] (Speed: {})", percent, speed),
            None => format!("[--.--%] (Speed: {})", speed),
        };

        if self.interactive {
            let _ = queue!(
                self.out,
                RestorePosition,
                Clear(ClearType::UntilNewLine),
                Print(line)
            );
            let _ = self.out.flush();
            self.progress_open = true;
        } else {
            println!("{}", line);
        }
    }

    fn on_preset_finished(&mut self, report: &PresetReport) {
        self.close_progress();
        if let Some(encode_time) = report.encode_time {
            println!("  Encode time:  {}", seconds(encode_time));
        }
        if let Some(mb) = report.encoded_megabytes() {
            println!("  Size:         {:.2} MB", mb);
        }
        match &report.outcome {
            Ok(score) => {
                println!("  VMAF:         {:.3} - {:.3}", score.min, score.max);
                println!("  Mean:         {}", format!("{:.3}", score.mean).green().bold());
                println!("  Harm. mean:   {:.3}", score.harmonic_mean);
            }
            Err(e) => println!("  {}", e.to_string().red()),
        }
        println!("  Elapsed:      {}", seconds(report.elapsed));
    }

    fn on_cleanup_warning(&mut self, warning: &CleanupWarning) {
        self.close_progress();
        println!("{}", warning.to_string().yellow());
    }
}

/// One line per preset, in run order
fn summary_rows(reports: &[PresetReport]) -> Vec<String> {
    let mut rows = vec![format!(
        "{:>3}  {:>10}  {:>10}  {:>9}  {:>10}  {:>9}  {}",
        "#", "Size (MB)", "Encode", "VMAF mean", "Harm. mean", "VMAF min", "Preset"
    )];

    for report in reports {
        let size = report
            .encoded_megabytes()
            .map(|mb| format!("{:.2}", mb))
            .unwrap_or_else(|| "-".to_string());
        let encode = report
            .encode_time
            .map(seconds)
            .unwrap_or_else(|| "-".to_string());
        let scores = match report.score() {
            Some(score) => format!(
                "{:>9.3}  {:>10.3}  {:>9.3}",
                score.mean, score.harmonic_mean, score.min
            ),
            None => {
                let stage = report
                    .outcome
                    .as_ref()
                    .err()
                    .and_then(|e| e.stage())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "setup".to_string());
                format!("{:>33}", format!("FAILED ({})", stage))
            }
        };
        rows.push(format!(
            "{:>3}  {:>10}  {:>10}  {}  {}",
            report.index + 1,
            size,
            encode,
            scores,
            report.preset
        ));
    }
    rows
}

fn print_summary(reports: &[PresetReport]) {
    if reports.is_empty() {
        return;
    }
    println!();
    println!("{}", "Summary".cyan().bold());
    for row in summary_rows(reports) {
        println!("{}", row);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = match Config::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config {}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(threads) = args.threads {
        config.scorer.threads = threads;
    }
    if let Some(scorer) = args.scorer.clone() {
        config.tools.scorer = scorer;
    }

    if args.skip_checks {
        eprintln!("WARNING: Skipping startup checks (--skip-checks enabled)");
    } else if let Err(e) = run_startup_checks(&config) {
        eprintln!("{}", e.to_string().red());
        return ExitCode::FAILURE;
    }

    let presets = match load_presets(&args.presets) {
        Ok(presets) => presets,
        Err(e) => {
            eprintln!("{}", e.to_string().red());
            return ExitCode::FAILURE;
        }
    };

    let request = ComparisonRequest {
        input: args.input.clone(),
        from: Some(args.from.clone()),
        to: args.to.clone(),
        presets,
    };

    let cancel = CancelSource::new();
    let signal_source = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_source.cancel();
        }
    });

    let pipeline = Pipeline::new(
        SystemRunner::new(config.workspace.stderr_tail_lines),
        PipelineOptions::from_config(&config),
    );
    let mut observer =
        ConsoleObserver::new(request.presets.iter().map(|p| p.to_string()).collect());

    match pipeline.run(&request, &mut observer, &cancel.token()).await {
        Ok(report) => {
            print_summary(&report.presets);
            ExitCode::SUCCESS
        }
        Err(PipelineError::Cancelled { completed }) => {
            println!("{}", "Process cancelled".yellow().bold());
            print_summary(&completed);
            ExitCode::from(130)
        }
        Err(e) => {
            error!(error = %e, input_error = e.is_input_error(), "comparison failed");
            eprintln!("{}", e.to_string().red());
            ExitCode::FAILURE
        }
    }
}

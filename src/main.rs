use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use dialoguer::{Confirm, Input};
use indicatif::{ProgressBar, ProgressStyle};
use seqgif::{
    plan_renames, AppConfig, CommandRunner, CommandSpec, ProgressMode, RenamePlan, RunEvent, RunOutcome,
    RunnerOptions, SequenceScan,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const BAR_SCALE: u64 = 1000;

#[derive(Parser, Debug)]
#[command(version, about = "Interactive image sequence to GIF generator built on ffmpeg.")]
struct Args {
    /// Directory containing the numbered images
    dir: Option<PathBuf>,

    /// Output GIF path
    out: Option<PathBuf>,

    /// Input frames per second
    #[arg(long, allow_negative_numbers = true)]
    framerate: Option<i64>,

    /// Output width in pixels (height keeps the aspect ratio)
    #[arg(long, allow_negative_numbers = true)]
    width: Option<i64>,

    /// Quality 1-31, lower is better (omitted when not set)
    #[arg(long, allow_negative_numbers = true)]
    quality: Option<i64>,

    /// Number of loops, 0 loops forever
    #[arg(long, allow_negative_numbers = true)]
    loop_count: Option<i64>,

    /// Image file extension to pick up (e.g. jpg)
    #[arg(long)]
    ext: Option<String>,

    /// Zero-padding width of renamed frames (3 gives image_001)
    #[arg(long)]
    padding: Option<usize>,

    /// Marker used for the progress bar
    #[arg(long, value_enum)]
    progress: Option<ProgressMode>,

    /// Expected GIF duration in seconds for --progress time
    #[arg(long)]
    duration: Option<f64>,

    /// Config file (JSON or TOML) instead of the default lookup
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write ffmpeg output to this file
    #[arg(long, conflicts_with = "no_log")]
    log_file: Option<PathBuf>,

    /// Do not write an ffmpeg log file
    #[arg(long, default_value_t = false)]
    no_log: bool,

    /// Use default preset
    #[arg(long, default_value_t = false, conflicts_with_all = &["small", "large"])]
    default: bool,

    /// Use the small preset
    #[arg(long, short, default_value_t = false, conflicts_with_all = &["default", "large"])]
    small: bool,

    /// Use the large preset
    #[arg(long, short, default_value_t = false, conflicts_with_all = &["default", "small"])]
    large: bool,

    /// Only rename the sequence, do not encode
    #[arg(long, default_value_t = false, conflicts_with_all = &["print_command", "skip_rename"])]
    rename_only: bool,

    /// Print the ffmpeg command for the current parameters and exit
    #[arg(long, default_value_t = false)]
    print_command: bool,

    /// Leave file names untouched
    #[arg(long, default_value_t = false)]
    skip_rename: bool,

    /// Show planned renames and the command without changing anything
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Rename without asking for confirmation
    #[arg(long, short, default_value_t = false)]
    yes: bool,

    /// Cancel ffmpeg after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Treat a non-zero ffmpeg exit status as failure even without error lines
    #[arg(long, default_value_t = false)]
    fail_on_exit_code: bool,

    /// Echo ffmpeg output while encoding
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

fn load_config(args: &Args) -> Result<AppConfig> {
    match &args.config {
        Some(p) => AppConfig::from_file(p),
        None => AppConfig::discover(),
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let mut args = Args::parse();
    let is_interactive = !(args.default || args.small || args.large);

    let cfg = load_config(&args)?;

    let dir = args.dir.clone().unwrap_or_else(|| PathBuf::from("."));
    if !dir.is_dir() {
        return Err(anyhow!("Input directory does not exist: {}", dir.display()));
    }

    if is_interactive && args.ext.is_none() {
        args.ext = Some(
            Input::new()
                .with_prompt("Image extension")
                .default(cfg.extension.clone())
                .interact_text()?,
        );
    }
    let extension = args.ext.clone().unwrap_or_else(|| cfg.extension.clone());
    let padding = args.padding.unwrap_or(cfg.padding);
    if !(1..=9).contains(&padding) {
        return Err(anyhow!("--padding must be between 1 and 9"));
    }

    let (scan, plan) = plan_renames(&dir, &extension, padding)
        .with_context(|| format!("scanning {}", dir.display()))?;
    report_scan(&scan, &plan, &extension);

    if !args.print_command && !args.skip_rename {
        let renamed = run_rename(&plan, &args, is_interactive)?;
        if !renamed {
            println!("Operation cancelled.");
            return Ok(());
        }
    }
    if args.rename_only {
        return Ok(());
    }

    // --- Encode parameters ---
    let preset_name = if args.small {
        "small"
    } else if args.large {
        "large"
    } else {
        cfg.default_preset.as_str()
    };
    let preset = cfg.preset(preset_name)?.clone();

    let mut output = args.out.clone();
    if is_interactive {
        if output.is_none() {
            let default_out = cfg.output.to_string_lossy().into_owned();
            let answer: String = Input::new().with_prompt("Output path").default(default_out).interact_text()?;
            output = Some(PathBuf::from(answer));
        }
        if args.framerate.is_none() {
            args.framerate = Some(Input::new().with_prompt("Framerate (fps)").default(preset.framerate).interact_text()?);
        }
        if args.width.is_none() {
            args.width = Some(Input::new().with_prompt("Width (px)").default(preset.width).interact_text()?);
        }
        if args.quality.is_none() {
            let default_q = preset.quality.map(|q| q.to_string()).unwrap_or_default();
            let answer: String = Input::new()
                .with_prompt("Quality 1-31, empty to omit")
                .default(default_q)
                .allow_empty(true)
                .interact_text()?;
            args.quality = parse_optional_int(&answer).context("quality must be an integer")?;
        }
        if args.loop_count.is_none() {
            args.loop_count = Some(Input::new().with_prompt("Loop count (0 = forever)").default(cfg.loop_count).interact_text()?);
        }
    } else {
        args.quality = args.quality.or(preset.quality);
    }

    let framerate = args.framerate.unwrap_or(preset.framerate);
    let spec = CommandSpec {
        framerate,
        width: args.width.unwrap_or(preset.width),
        quality: args.quality,
        loop_count: args.loop_count.unwrap_or(cfg.loop_count),
        input_pattern: plan.input_pattern(),
        output_path: output.unwrap_or_else(|| cfg.output.clone()),
    };
    let invocation = spec.build()?.with_program(cfg.ffmpeg_program());

    println!("FFmpeg command:\n  {}", invocation);
    if args.print_command || args.dry_run {
        return Ok(());
    }

    // --- Execution ---
    let mode = args.progress.unwrap_or(cfg.progress);
    let strategy = mode.strategy(plan.len() as u64, framerate, args.duration);
    let log_file = if args.no_log { None } else { args.log_file.clone().or_else(|| cfg.log_file.clone()) };
    let runner = CommandRunner::new(RunnerOptions {
        log_file,
        fail_on_exit_code: args.fail_on_exit_code,
        ..RunnerOptions::default()
    });
    let handle = runner.start(&invocation, strategy).context("launching ffmpeg")?;

    let pb = ProgressBar::new(BAR_SCALE);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_message("Encoding");

    let deadline = args.timeout.map(|secs| Instant::now() + Duration::from_secs(secs));
    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) && !handle.cancel_token().is_cancelled() {
            pb.println("Timeout reached, stopping ffmpeg...");
            handle.cancel();
        }
        match handle.events().recv_timeout(Duration::from_millis(100)) {
            Ok(RunEvent::Progress(p)) => pb.set_position((p * BAR_SCALE as f32).round() as u64),
            Ok(RunEvent::Output(line)) => {
                if args.verbose {
                    pb.println(line);
                }
            }
            Err(RecvTimeoutError::Timeout) => pb.tick(),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let summary = handle.wait();
    match summary.outcome {
        RunOutcome::Succeeded => {
            pb.set_position(BAR_SCALE);
            pb.finish_with_message("Done");
            println!("\n{}", summary.message);
            println!("Output: {}", spec.output_path.display());
            Ok(())
        }
        RunOutcome::Cancelled => {
            pb.abandon_with_message("Cancelled");
            Err(anyhow!("ffmpeg was cancelled"))
        }
        RunOutcome::Failed => {
            pb.abandon_with_message("Failed");
            Err(anyhow!("{}", summary.message))
        }
    }
}

fn parse_optional_int(s: &str) -> Result<Option<i64>> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }
    Ok(Some(s.parse::<i64>()?))
}

fn report_scan(scan: &SequenceScan, plan: &RenamePlan, extension: &str) {
    println!("Found {} numbered .{} images", plan.len(), seqgif::sequence::normalize_extension(extension));
    for p in &scan.unnumbered {
        println!("  skipped (no frame number): {}", file_label(p));
    }
    for c in &scan.collisions {
        println!(
            "  duplicate frame number: keeping {}, leaving {} untouched",
            file_label(&c.kept),
            file_label(&c.dropped)
        );
    }
}

/// Returns false when the user declined.
fn run_rename(plan: &RenamePlan, args: &Args, is_interactive: bool) -> Result<bool> {
    let pending: Vec<_> = plan.pending().collect();
    if pending.is_empty() {
        println!("Sequence already normalized.");
        return Ok(true);
    }

    if args.dry_run {
        println!("Planned renames:");
        for step in &pending {
            println!("  {}", step);
        }
        return Ok(true);
    }

    if is_interactive
        && !args.yes
        && !Confirm::new()
            .with_prompt(format!("Rename {} files to image_N.ext? This cannot be undone.", pending.len()))
            .default(true)
            .interact()?
    {
        return Ok(false);
    }

    let renamed = plan.apply().context("renaming image sequence")?;
    println!("Renamed {} files", renamed);
    Ok(true)
}

fn file_label(p: &Path) -> String {
    p.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| p.display().to_string())
}

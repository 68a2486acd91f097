//! # seqgif - image sequence to GIF front-end for ffmpeg
//!
//! `seqgif` turns a directory of numbered images into an animated GIF by
//! driving an external `ffmpeg`.
//!
//! ## Features
//!
//! - Normalize a numbered sequence (`a1.jpg`, `a5.jpg`, `a12.jpg`) into
//!   `image_001.jpg`, `image_002.jpg`, ... ordered by number, not by name
//! - Validate encode parameters and build the ffmpeg argument vector
//! - Run ffmpeg in the background with smoothed progress scraped from its output
//! - Cancellation, a re-entrancy guard and a consistent shared run state for UIs
//!
//! ## Example
//!
//! ```no_run
//! use seqgif::{plan_renames, CommandRunner, CommandSpec, ProgressStrategy, RunEvent, RunnerOptions};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = Path::new("frames");
//! let (_scan, plan) = plan_renames(dir, "jpg", 3)?;
//! plan.apply()?;
//!
//! let spec = CommandSpec {
//!     framerate: 12,
//!     width: 480,
//!     quality: Some(5),
//!     loop_count: 0,
//!     input_pattern: plan.input_pattern(),
//!     output_path: "out.gif".into(),
//! };
//! let invocation = spec.build()?;
//!
//! let runner = CommandRunner::new(RunnerOptions::default());
//! let handle = runner.start(&invocation, ProgressStrategy::frames(plan.len() as u64))?;
//! for event in handle.events() {
//!     if let RunEvent::Progress(p) = event {
//!         println!("{:.0}%", p * 100.0);
//!     }
//! }
//! let summary = handle.wait();
//! println!("{}", summary.message);
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod progress;
pub mod runner;
pub mod sequence;

pub use command::{CommandSpec, FfmpegInvocation, Field, ValidationErrors, ValidationIssue};
pub use config::{AppConfig, Preset, ProgressMode};
pub use progress::{OutputScanner, ProgressSmoother, ProgressStrategy, DEFAULT_ASSUMED_DURATION_SECS};
pub use runner::{
    CancelToken, CommandRunner, RunError, RunEvent, RunHandle, RunOutcome, RunPhase, RunState, RunSummary,
    RunnerOptions, SharedRunState, SUCCESS_MESSAGE,
};
pub use sequence::{plan_renames, scan_sequence, ImageFile, RenamePlan, RenameStep, SequenceError, SequenceScan};

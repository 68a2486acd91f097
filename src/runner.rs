//! Running ffmpeg in the background and tracking its progress.
//!
//! [`CommandRunner::start`] spawns the process, hands its stdout and stderr to
//! two reader threads and drives a worker thread that logs every line, updates
//! the shared [`RunState`] and streams [`RunEvent`]s to the caller. The caller
//! keeps a [`RunHandle`] to observe, cancel or wait for the run.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;

use crate::command::FfmpegInvocation;
use crate::progress::{OutputScanner, ProgressSmoother, ProgressStrategy, SMOOTH_STEP};

/// Message of a run that finished without errors
pub const SUCCESS_MESSAGE: &str = "Success: GIF generated!";

/// Default log file, relative to the working directory
pub const DEFAULT_LOG_FILE: &str = "ffmpeg.log";

const CANCEL_POLL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum RunError {
    #[error("a run is already in progress")]
    AlreadyRunning,

    #[error("could not start {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("could not create log file {}: {source}", .path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Where to copy every output line; truncated at the start of each run.
    ///
    /// The log holds the lines as the runner sees them, not the raw byte
    /// stream: every `\r` status redraw becomes its own `\n`-terminated line
    /// and empty lines are left out.
    pub log_file: Option<PathBuf>,
    /// Progress increment per refresh
    pub smooth_step: f32,
    /// Pause between two progress increments
    pub step_delay: Duration,
    /// Also fail runs that exit non-zero without printing an error line
    pub fail_on_exit_code: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            log_file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
            smooth_step: SMOOTH_STEP,
            step_delay: Duration::from_millis(10),
            fail_on_exit_code: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunPhase {
    Idle,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// What the UI shows about the current or last run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunState {
    pub phase: RunPhase,
    /// Displayed progress in `[0, 1]`
    pub progress: f32,
    pub running: bool,
    pub result_message: String,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            phase: RunPhase::Idle,
            progress: 0.0,
            running: false,
            result_message: String::new(),
        }
    }
}

/// Run state shared between the worker (sole writer) and any number of readers.
///
/// All fields live behind one lock, so a [`snapshot`](Self::snapshot) is
/// always consistent.
#[derive(Debug, Clone, Default)]
pub struct SharedRunState(Arc<RwLock<RunState>>);

impl SharedRunState {
    pub fn snapshot(&self) -> RunState {
        self.0.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.0.read().running
    }

    /// Reset to a fresh running state unless a run is already live.
    fn try_begin(&self) -> bool {
        let mut state = self.0.write();
        if state.running {
            return false;
        }
        *state = RunState {
            phase: RunPhase::Running,
            progress: 0.0,
            running: true,
            result_message: String::new(),
        };
        true
    }

    fn set_progress(&self, progress: f32) {
        self.0.write().progress = progress;
    }

    fn finish(&self, phase: RunPhase, message: &str) {
        let mut state = self.0.write();
        state.phase = phase;
        state.running = false;
        state.result_message = message.to_string();
    }
}

/// Cooperative cancellation flag; cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

/// Final report of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    /// Process exit code, `None` when killed by a signal or never reaped
    pub exit_code: Option<i32>,
    /// Output lines that looked like errors, verbatim
    pub error_text: String,
    pub message: String,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }

    /// The outcome follows the captured error lines. The exit status only
    /// decides it when `fail_on_exit_code` is set.
    fn from_exit(scanner: &OutputScanner, status: Option<ExitStatus>, fail_on_exit_code: bool) -> Self {
        let exit_code = status.and_then(|s| s.code());
        let exited_cleanly = status.map(|s| s.success()).unwrap_or(false);
        let error_text = scanner.errors().to_string();

        let (outcome, message) = if scanner.has_errors() {
            (RunOutcome::Failed, format!("Failed:\n{}", error_text.trim_end()))
        } else if fail_on_exit_code && !exited_cleanly {
            let how = match exit_code {
                Some(code) => format!("exited with status {}", code),
                None => "was terminated".to_string(),
            };
            (RunOutcome::Failed, format!("Failed: ffmpeg {}", how))
        } else {
            (RunOutcome::Succeeded, SUCCESS_MESSAGE.to_string())
        };

        Self {
            outcome,
            exit_code,
            error_text,
            message,
        }
    }

    fn cancelled(exit_code: Option<i32>) -> Self {
        Self {
            outcome: RunOutcome::Cancelled,
            exit_code,
            error_text: String::new(),
            message: "Cancelled".to_string(),
        }
    }
}

/// Updates streamed while a run is live
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// New displayed progress value
    Progress(f32),
    /// One line of ffmpeg output
    Output(String),
}

/// Live run. Events stop arriving once the process has exited.
pub struct RunHandle {
    worker: JoinHandle<RunSummary>,
    events: Receiver<RunEvent>,
    cancel: CancelToken,
    state: SharedRunState,
}

impl RunHandle {
    pub fn events(&self) -> &Receiver<RunEvent> {
        &self.events
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Kill the process; the run ends as [`RunOutcome::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> RunState {
        self.state.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Block until the run is over.
    pub fn wait(self) -> RunSummary {
        match self.worker.join() {
            Ok(summary) => summary,
            Err(_) => {
                let summary = RunSummary {
                    outcome: RunOutcome::Failed,
                    exit_code: None,
                    error_text: String::new(),
                    message: "Failed: runner thread panicked".to_string(),
                };
                self.state.finish(RunPhase::Failed, &summary.message);
                summary
            }
        }
    }
}

/// Launches at most one ffmpeg run at a time
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    options: RunnerOptions,
    state: SharedRunState,
}

impl CommandRunner {
    pub fn new(options: RunnerOptions) -> Self {
        Self {
            options,
            state: SharedRunState::default(),
        }
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Handle for reading the run state from another thread
    pub fn state(&self) -> SharedRunState {
        self.state.clone()
    }

    /// Start `invocation` in the background.
    ///
    /// Fails with [`RunError::AlreadyRunning`] while a previous run is live.
    /// A process that starts but reports errors is not an `Err`; it ends with
    /// a failed [`RunSummary`].
    pub fn start(&self, invocation: &FfmpegInvocation, strategy: ProgressStrategy) -> Result<RunHandle, RunError> {
        if !self.state.try_begin() {
            return Err(RunError::AlreadyRunning);
        }

        let log = match &self.options.log_file {
            Some(path) => match File::create(path) {
                Ok(file) => Some(BufWriter::new(file)),
                Err(source) => {
                    self.state.finish(RunPhase::Failed, "Error: could not create log file");
                    return Err(RunError::LogFile { path: path.clone(), source });
                }
            },
            None => None,
        };

        let program = invocation.program().to_string_lossy().into_owned();
        let mut child = match invocation
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                self.state.finish(RunPhase::Failed, "Error: could not start ffmpeg");
                return Err(RunError::Launch { program, source });
            }
        };
        log::info!("started {} (pid {})", program, child.id());

        let (line_tx, line_rx) = unbounded();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, line_tx.clone());
        }
        drop(line_tx);

        let (event_tx, event_rx) = unbounded();
        let cancel = CancelToken::new();
        let worker = {
            let worker = Worker {
                child,
                lines: line_rx,
                events: event_tx,
                log,
                scanner: OutputScanner::new(strategy),
                smoother: ProgressSmoother::new(self.options.smooth_step),
                step_delay: self.options.step_delay,
                fail_on_exit_code: self.options.fail_on_exit_code,
                cancel: cancel.clone(),
                state: self.state.clone(),
            };
            thread::spawn(move || worker.run())
        };

        Ok(RunHandle {
            worker,
            events: event_rx,
            cancel,
            state: self.state.clone(),
        })
    }
}

struct Worker {
    child: Child,
    lines: Receiver<String>,
    events: Sender<RunEvent>,
    log: Option<BufWriter<File>>,
    scanner: OutputScanner,
    smoother: ProgressSmoother,
    step_delay: Duration,
    fail_on_exit_code: bool,
    cancel: CancelToken,
    state: SharedRunState,
}

impl Worker {
    fn run(mut self) -> RunSummary {
        loop {
            if self.cancel.is_cancelled() {
                return self.abort();
            }
            match self.lines.recv_timeout(CANCEL_POLL) {
                Ok(line) => self.handle_line(line),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if let Some(file) = self.log.as_mut() {
            if let Err(e) = file.flush() {
                log::warn!("flushing ffmpeg log: {}", e);
            }
        }

        let status = match self.child.wait() {
            Ok(status) => Some(status),
            Err(e) => {
                log::error!("waiting for ffmpeg: {}", e);
                None
            }
        };
        let summary = RunSummary::from_exit(&self.scanner, status, self.fail_on_exit_code);
        log::info!("ffmpeg finished: {:?} (exit code {:?})", summary.outcome, summary.exit_code);

        let phase = if summary.is_success() { RunPhase::Succeeded } else { RunPhase::Failed };
        self.state.finish(phase, &summary.message);
        summary
    }

    fn handle_line(&mut self, line: String) {
        log::trace!("ffmpeg: {}", line);
        if let Some(file) = self.log.as_mut() {
            if let Err(e) = writeln!(file, "{}", line) {
                log::warn!("writing ffmpeg log: {}; further lines are not logged", e);
                self.log = None;
            }
        }

        self.scanner.scan_line(&line);
        let _ = self.events.send(RunEvent::Output(line));

        let target = self.scanner.target();
        while let Some(progress) = self.smoother.next_step(target) {
            if self.cancel.is_cancelled() {
                break;
            }
            self.state.set_progress(progress);
            let _ = self.events.send(RunEvent::Progress(progress));
            if !self.step_delay.is_zero() {
                thread::sleep(self.step_delay);
            }
        }
    }

    fn abort(mut self) -> RunSummary {
        log::info!("cancelling ffmpeg (pid {})", self.child.id());
        if let Err(e) = self.child.kill() {
            log::debug!("kill: {}", e);
        }
        let exit_code = self.child.wait().ok().and_then(|s| s.code());
        let summary = RunSummary::cancelled(exit_code);
        self.state.finish(RunPhase::Cancelled, &summary.message);
        summary
    }
}

fn spawn_reader<R: Read + Send + 'static>(stream: R, tx: Sender<String>) {
    thread::spawn(move || {
        if let Err(e) = forward_lines(stream, &tx) {
            log::debug!("reading ffmpeg output: {}", e);
        }
    });
}

/// Send every non-empty line of `stream`, splitting on `\n` and `\r`.
///
/// ffmpeg redraws its status line with a bare carriage return, so `\r` has to
/// end a line too. Stops quietly when the receiver is gone.
fn forward_lines<R: Read>(stream: R, tx: &Sender<String>) -> io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let chunk = match reader.fill_buf() {
            Ok([]) => break,
            Ok(chunk) => chunk,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let len = chunk.len();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                if !pending.is_empty() {
                    let line = String::from_utf8_lossy(&pending).into_owned();
                    pending.clear();
                    if tx.send(line).is_err() {
                        return Ok(());
                    }
                }
            } else {
                pending.push(byte);
            }
        }
        reader.consume(len);
    }
    if !pending.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn splits_on_carriage_returns_and_newlines() {
        let (tx, rx) = unbounded();
        let output = "Input #0\nframe=    1 fps=0.0\rframe=    5 fps=9.1\r\nConversion failed!";
        forward_lines(Cursor::new(output), &tx).expect("cursor reads");
        drop(tx);
        let lines: Vec<String> = rx.iter().collect();
        assert_eq!(lines, vec!["Input #0", "frame=    1 fps=0.0", "frame=    5 fps=9.1", "Conversion failed!"]);
    }

    #[test]
    fn begin_is_rejected_while_running() {
        let state = SharedRunState::default();
        assert!(state.try_begin());
        assert!(!state.try_begin());
        state.finish(RunPhase::Succeeded, SUCCESS_MESSAGE);
        let snapshot = state.snapshot();
        assert!(!snapshot.running);
        assert_eq!(snapshot.phase, RunPhase::Succeeded);
        assert!(state.try_begin());
        assert_eq!(state.snapshot().result_message, "");
    }

    #[test]
    fn summary_follows_error_lines_unless_exit_code_is_enforced() {
        let mut scanner = OutputScanner::new(ProgressStrategy::frames(1));
        let clean = RunSummary::from_exit(&scanner, None, false);
        assert_eq!(clean.outcome, RunOutcome::Succeeded);
        assert_eq!(clean.message, SUCCESS_MESSAGE);
        assert_eq!(RunSummary::from_exit(&scanner, None, true).outcome, RunOutcome::Failed);

        scanner.scan_line("Conversion failed!");
        let summary = RunSummary::from_exit(&scanner, None, false);
        assert_eq!(summary.outcome, RunOutcome::Failed);
        assert_eq!(summary.message, "Failed:\nConversion failed!");
        assert_eq!(summary.error_text, "Conversion failed!\n");
    }

    #[test]
    fn launch_failure_marks_state_failed() {
        let runner = CommandRunner::new(RunnerOptions {
            log_file: None,
            ..RunnerOptions::default()
        });
        let invocation = FfmpegInvocation::new("seqgif-definitely-missing-binary", ["-version"]);
        let err = runner
            .start(&invocation, ProgressStrategy::frames(1))
            .err()
            .expect("spawn should fail");
        assert!(matches!(err, RunError::Launch { .. }), "{err}");
        let state = runner.state().snapshot();
        assert_eq!(state.phase, RunPhase::Failed);
        assert!(!state.running);
        assert_eq!(state.result_message, "Error: could not start ffmpeg");
    }

    #[test]
    fn unwritable_log_file_prevents_launch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = CommandRunner::new(RunnerOptions {
            log_file: Some(dir.path().join("missing").join("ffmpeg.log")),
            ..RunnerOptions::default()
        });
        let invocation = FfmpegInvocation::new("ffmpeg", ["-version"]);
        let err = runner
            .start(&invocation, ProgressStrategy::frames(1))
            .err()
            .expect("log file should fail");
        assert!(matches!(err, RunError::LogFile { .. }), "{err}");
        assert!(!runner.state().is_running());
    }
}

//! Progress extraction from ffmpeg's textual output.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Duration assumed by the elapsed-time strategy when the real one is unknown
pub const DEFAULT_ASSUMED_DURATION_SECS: f64 = 600.0;

/// Increment used when easing the displayed progress toward a new target
pub const SMOOTH_STEP: f32 = 0.01;

/// How a progress fraction is derived from an output line
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ProgressStrategy {
    /// `frame=<n>` against the number of input images
    FrameCount { total_frames: u64 },
    /// `time=HH:MM:SS.ff` against an expected output duration
    ElapsedTime { total_seconds: f64 },
}

impl ProgressStrategy {
    pub fn frames(total_frames: u64) -> Self {
        ProgressStrategy::FrameCount { total_frames }
    }

    /// Elapsed-time strategy, falling back to [`DEFAULT_ASSUMED_DURATION_SECS`]
    pub fn elapsed(total_seconds: Option<f64>) -> Self {
        let total_seconds = total_seconds
            .filter(|s| s.is_finite() && *s > 0.0)
            .unwrap_or(DEFAULT_ASSUMED_DURATION_SECS);
        ProgressStrategy::ElapsedTime { total_seconds }
    }

    /// Unclamped progress fraction carried by `line`, if it has a marker.
    pub fn fraction(&self, line: &str) -> Option<f64> {
        match *self {
            ProgressStrategy::FrameCount { total_frames } => {
                if total_frames == 0 {
                    return None;
                }
                parse_frame(line).map(|frame| frame as f64 / total_frames as f64)
            }
            ProgressStrategy::ElapsedTime { total_seconds } => {
                if total_seconds <= 0.0 {
                    return None;
                }
                parse_time(line).map(|secs| secs / total_seconds)
            }
        }
    }
}

fn frame_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"frame=\s*(\d+)").expect("frame pattern is valid"))
}

fn time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"time=(\d+):(\d{1,2}):(\d{1,2}(?:\.\d+)?)").expect("time pattern is valid"))
}

/// Frame number of a `frame=  123` marker.
pub fn parse_frame(line: &str) -> Option<u64> {
    frame_regex().captures(line)?.get(1)?.as_str().parse().ok()
}

/// Seconds of a `time=00:01:02.50` marker. `time=N/A` yields `None`.
pub fn parse_time(line: &str) -> Option<f64> {
    let caps = time_regex().captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Lines matching this are collected as error output.
pub fn is_error_line(line: &str) -> bool {
    line.contains("Error") || line.contains("failed")
}

/// Per-run accumulator: monotonic progress target and collected error lines
#[derive(Debug, Clone)]
pub struct OutputScanner {
    strategy: ProgressStrategy,
    target: f32,
    errors: String,
}

impl OutputScanner {
    pub fn new(strategy: ProgressStrategy) -> Self {
        Self {
            strategy,
            target: 0.0,
            errors: String::new(),
        }
    }

    /// Feed one output line. Returns the new target when it moved forward.
    pub fn scan_line(&mut self, line: &str) -> Option<f32> {
        if is_error_line(line) {
            self.errors.push_str(line);
            self.errors.push('\n');
        }
        let target = self.strategy.fraction(line)?.clamp(0.0, 1.0) as f32;
        if target > self.target {
            self.target = target;
            Some(target)
        } else {
            None
        }
    }

    /// Highest target seen so far, in `[0, 1]`
    pub fn target(&self) -> f32 {
        self.target
    }

    /// Collected error lines, newline-terminated, in arrival order
    pub fn errors(&self) -> &str {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Eases a displayed value toward a target in fixed increments.
#[derive(Debug, Clone)]
pub struct ProgressSmoother {
    current: f32,
    step: f32,
}

impl ProgressSmoother {
    pub fn new(step: f32) -> Self {
        let step = if step > 0.0 { step } else { SMOOTH_STEP };
        Self { current: 0.0, step }
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    /// Next displayed value on the way to `target`, never overshooting and
    /// never going back. `None` once the target is reached.
    pub fn next_step(&mut self, target: f32) -> Option<f32> {
        if self.current >= target {
            return None;
        }
        self.current = (self.current + self.step).min(target);
        Some(self.current)
    }
}

impl Default for ProgressSmoother {
    fn default() -> Self {
        Self::new(SMOOTH_STEP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str =
        "frame=   42 fps=0.0 q=-0.0 size=     256kB time=00:00:04.20 bitrate= 499.3kbits/s speed=8.1x";

    #[test]
    fn parses_markers_from_status_line() {
        assert_eq!(parse_frame(STATUS), Some(42));
        assert_eq!(parse_time(STATUS), Some(4.2));
        assert_eq!(parse_time("time=01:02:03.5"), Some(3723.5));
        assert_eq!(parse_time("size=N/A time=N/A bitrate=N/A"), None);
        assert_eq!(parse_frame("Input #0, image2, from 'image_%03d.jpg':"), None);
    }

    #[test]
    fn frame_targets_are_monotonic_and_capped() {
        let mut scanner = OutputScanner::new(ProgressStrategy::frames(100));
        assert_eq!(scanner.scan_line("frame=10"), Some(0.10));
        assert_eq!(scanner.scan_line("frame=50"), Some(0.50));
        assert_eq!(scanner.scan_line("frame=30"), None);
        assert_eq!(scanner.target(), 0.50);
        assert_eq!(scanner.scan_line("frame=250"), Some(1.0));
        assert_eq!(scanner.target(), 1.0);
    }

    #[test]
    fn zero_frame_total_never_reports_progress() {
        let mut scanner = OutputScanner::new(ProgressStrategy::frames(0));
        assert_eq!(scanner.scan_line("frame=10"), None);
        assert_eq!(scanner.target(), 0.0);
    }

    #[test]
    fn elapsed_time_uses_fallback_duration() {
        let strategy = ProgressStrategy::elapsed(None);
        assert_eq!(strategy, ProgressStrategy::ElapsedTime { total_seconds: 600.0 });
        assert_eq!(ProgressStrategy::elapsed(Some(-3.0)), strategy);

        let mut scanner = OutputScanner::new(strategy);
        assert_eq!(scanner.scan_line("time=00:05:00.00"), Some(0.5));

        let mut short = OutputScanner::new(ProgressStrategy::elapsed(Some(8.4)));
        assert_eq!(short.scan_line(STATUS), Some(0.5));
    }

    #[test]
    fn error_lines_are_collected_case_sensitively() {
        let mut scanner = OutputScanner::new(ProgressStrategy::frames(10));
        scanner.scan_line("[image2 @ 0x1] Could not open file : image_%03d.jpg");
        scanner.scan_line("Conversion failed!");
        scanner.scan_line("error while decoding");
        scanner.scan_line("Error opening output file out.gif.");
        assert_eq!(scanner.errors(), "Conversion failed!\nError opening output file out.gif.\n");
    }

    #[test]
    fn smoother_steps_up_without_overshoot() {
        let mut smoother = ProgressSmoother::new(0.25);
        let steps: Vec<f32> = std::iter::from_fn(|| smoother.next_step(0.6)).collect();
        assert_eq!(steps, vec![0.25, 0.5, 0.6]);
        assert_eq!(smoother.next_step(0.3), None);
        assert_eq!(smoother.current(), 0.6);
    }

    #[test]
    fn default_smoother_uses_hundredths() {
        let mut smoother = ProgressSmoother::default();
        let count = std::iter::from_fn(|| smoother.next_step(0.1)).count();
        assert!((9..=11).contains(&count), "{count} steps");
        assert_eq!(smoother.current(), 0.1);
    }
}

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::progress::ProgressStrategy;
use crate::runner::DEFAULT_LOG_FILE;
use crate::sequence::DEFAULT_PADDING;

/// Environment variable overriding the ffmpeg executable
pub const FFMPEG_ENV: &str = "SEQGIF_FFMPEG";

/// Encoding settings selectable by name (`--small`, `--large`, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub framerate: i64,
    pub width: i64,
    #[serde(default)]
    pub quality: Option<i64>,
}

/// Which output marker drives the progress bar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProgressMode {
    /// `frame=` against the number of images
    #[default]
    Frames,
    /// `time=` against the expected GIF duration
    Time,
}

impl ProgressMode {
    /// Strategy for a sequence of `frame_count` images played at `framerate`.
    ///
    /// In time mode an explicit `duration` wins, then the duration implied by
    /// the sequence, then the fixed fallback.
    pub fn strategy(self, frame_count: u64, framerate: i64, duration: Option<f64>) -> ProgressStrategy {
        match self {
            ProgressMode::Frames => ProgressStrategy::frames(frame_count),
            ProgressMode::Time => {
                let implied = (frame_count > 0 && framerate > 0).then(|| frame_count as f64 / framerate as f64);
                ProgressStrategy::elapsed(duration.or(implied))
            }
        }
    }
}

fn default_output() -> PathBuf {
    PathBuf::from("output.gif")
}
fn default_extension() -> String {
    "jpg".to_string()
}
fn default_padding() -> usize {
    DEFAULT_PADDING
}
fn default_log_file() -> Option<PathBuf> {
    Some(PathBuf::from(DEFAULT_LOG_FILE))
}
fn default_preset_name() -> String {
    "default".to_string()
}

fn default_presets() -> HashMap<String, Preset> {
    HashMap::from([
        ("default".to_string(), Preset { framerate: 10, width: 320, quality: None }),
        ("small".to_string(), Preset { framerate: 8, width: 160, quality: Some(10) }),
        ("large".to_string(), Preset { framerate: 15, width: 640, quality: Some(3) }),
    ])
}

/// Application configuration: defaults for every prompt plus named presets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Zero-padding width of renamed frames
    #[serde(default = "default_padding")]
    pub padding: usize,
    #[serde(default)]
    pub loop_count: i64,
    /// `null` disables the ffmpeg log
    #[serde(default = "default_log_file")]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub progress: ProgressMode,
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,
    #[serde(default = "default_presets")]
    pub presets: HashMap<String, Preset>,
    #[serde(default = "default_preset_name")]
    pub default_preset: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            extension: default_extension(),
            padding: default_padding(),
            loop_count: 0,
            log_file: default_log_file(),
            progress: ProgressMode::default(),
            ffmpeg_path: None,
            presets: default_presets(),
            default_preset: default_preset_name(),
        }
    }
}

impl AppConfig {
    /// Parse a `.json` or `.toml` config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        let cfg: AppConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&text).with_context(|| format!("parsing config toml {}", path.display()))?,
            _ => serde_json::from_str(&text).with_context(|| format!("parsing config json {}", path.display()))?,
        };
        cfg.validate().with_context(|| format!("invalid config {}", path.display()))?;
        Ok(cfg)
    }

    /// First config found in the app data directory, then the working
    /// directory, otherwise the built-in defaults.
    pub fn discover() -> Result<Self> {
        for p in config_candidates() {
            if p.exists() {
                log::debug!("loading config {}", p.display());
                return Self::from_file(&p);
            }
        }
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        if normalized_extension_is_empty(&self.extension) {
            return Err(anyhow!("extension cannot be empty"));
        }
        if !(1..=9).contains(&self.padding) {
            return Err(anyhow!("padding must be between 1 and 9, got {}", self.padding));
        }
        if !self.presets.contains_key(&self.default_preset) {
            return Err(anyhow!("default preset '{}' is not defined", self.default_preset));
        }
        Ok(())
    }

    pub fn preset(&self, name: &str) -> Result<&Preset> {
        self.presets.get(name).ok_or_else(|| {
            let mut available: Vec<&str> = self.presets.keys().map(String::as_str).collect();
            available.sort_unstable();
            anyhow!("Missing preset '{}' in config. Available presets: {}", name, available.join(", "))
        })
    }

    /// ffmpeg executable: `$SEQGIF_FFMPEG`, then `ffmpeg_path`, then `ffmpeg` on `PATH`
    pub fn ffmpeg_program(&self) -> PathBuf {
        std::env::var_os(FFMPEG_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| self.ffmpeg_path.clone())
            .unwrap_or_else(|| PathBuf::from("ffmpeg"))
    }
}

fn normalized_extension_is_empty(extension: &str) -> bool {
    crate::sequence::normalize_extension(extension.trim()).is_empty()
}

/// Locations searched by [`AppConfig::discover`], in order
pub fn config_candidates() -> Vec<PathBuf> {
    let mut tried: Vec<PathBuf> = Vec::new();
    if let Some(d) = dirs::data_dir() {
        let d = d.join("seqgif");
        tried.push(d.join("seqgif.json"));
        tried.push(d.join("seqgif.toml"));
    }
    tried.push(PathBuf::from("seqgif.json"));
    tried.push(PathBuf::from("seqgif.toml"));
    tried
}

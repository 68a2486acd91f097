//! Image sequence discovery and renaming.
//!
//! A directory of numbered images (`a1.jpg`, `a5.jpg`, `a12.jpg`, ...) is
//! scanned, ordered by the numeric value of each file's trailing digit run and
//! renamed into the canonical `image_001.jpg`, `image_002.jpg`, ... layout that
//! the generated ffmpeg input pattern expects.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

/// File name prefix of every renamed frame
pub const TARGET_PREFIX: &str = "image_";

/// Default zero-padding width of the frame counter (`image_001`)
pub const DEFAULT_PADDING: usize = 3;

#[derive(Error, Debug)]
pub enum SequenceError {
    #[error("scanning directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("{} cannot be renamed to {}: the target exists and is not part of the sequence", .from.display(), .to.display())]
    TargetOccupied { from: PathBuf, to: PathBuf },

    #[error("renaming {} to {}: {source}", .from.display(), .to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A numbered image found during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub path: PathBuf,
    /// Trailing digit run exactly as written in the file name (`"007"`)
    pub digits: String,
    /// Base-10 value of `digits`
    pub number: u64,
}

/// Two files carrying the same number; only `kept` takes part in the plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub kept: PathBuf,
    pub dropped: PathBuf,
}

/// Result of scanning a directory for a numbered sequence
#[derive(Debug, Clone, Default)]
pub struct SequenceScan {
    /// Numbered files, ascending by number, one per number
    pub files: Vec<ImageFile>,
    /// Files with the right extension but no digits before it
    pub unnumbered: Vec<PathBuf>,
    pub collisions: Vec<Collision>,
}

/// Strip an optional leading dot so `"jpg"` and `".jpg"` mean the same thing.
pub fn normalize_extension(extension: &str) -> &str {
    extension.strip_prefix('.').unwrap_or(extension)
}

/// Return the run of ASCII digits immediately preceding `.extension`.
///
/// The extension match is case-sensitive. `None` when the name does not end
/// in the extension or no digit sits right before it.
///
/// ```
/// use seqgif::sequence::extract_number;
///
/// assert_eq!(extract_number("img007.jpg", "jpg"), Some("007"));
/// assert_eq!(extract_number("cover.jpg", "jpg"), None);
/// ```
pub fn extract_number<'a>(file_name: &'a str, extension: &str) -> Option<&'a str> {
    let ext = normalize_extension(extension);
    let stem = file_name.strip_suffix(ext)?.strip_suffix('.')?;
    let run = stem.bytes().rev().take_while(u8::is_ascii_digit).count();
    if run == 0 {
        return None;
    }
    Some(&stem[stem.len() - run..])
}

/// Target file name for the `counter`-th frame.
pub fn target_name(counter: usize, padding: usize, extension: &str) -> String {
    format!("{}{:0width$}.{}", TARGET_PREFIX, counter, normalize_extension(extension), width = padding)
}

/// Scan `dir` (non-recursively) for regular files ending in `extension`.
///
/// Symlinks count when they point at a regular file; the link itself is what
/// gets renamed.
///
/// Entries are visited in file-name order so that collisions resolve the same
/// way on every platform: when two files carry the same number the one whose
/// name sorts last is kept.
pub fn scan_sequence(dir: &Path, extension: &str) -> Result<SequenceScan, SequenceError> {
    let mut by_number: BTreeMap<u64, ImageFile> = BTreeMap::new();
    let mut scan = SequenceScan::default();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        if !entry.path().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if !name.ends_with(&format!(".{}", normalize_extension(extension))) {
            continue;
        }
        let Some(digits) = extract_number(name, extension) else {
            scan.unnumbered.push(entry.into_path());
            continue;
        };
        let number = match digits.parse::<u64>() {
            Ok(n) => n,
            Err(_) => {
                log::warn!("skipping {}: frame number {} is out of range", name, digits);
                scan.unnumbered.push(entry.into_path());
                continue;
            }
        };
        let file = ImageFile {
            digits: digits.to_string(),
            number,
            path: entry.into_path(),
        };
        if let Some(previous) = by_number.insert(number, file.clone()) {
            log::warn!(
                "{} and {} share frame number {}; keeping {}",
                previous.path.display(),
                file.path.display(),
                number,
                file.path.display()
            );
            scan.collisions.push(Collision {
                kept: file.path,
                dropped: previous.path,
            });
        }
    }

    scan.files = by_number.into_values().collect();
    Ok(scan)
}

/// One rename inside a [`RenamePlan`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameStep {
    pub from: PathBuf,
    pub to: PathBuf,
}

impl RenameStep {
    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}

impl fmt::Display for RenameStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = |p: &Path| p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        write!(f, "{} -> {}", name(&self.from), name(&self.to))
    }
}

/// Ordered renames that turn a scanned sequence into `image_<NNN>.<ext>`
#[derive(Debug, Clone)]
pub struct RenamePlan {
    dir: PathBuf,
    extension: String,
    padding: usize,
    steps: Vec<RenameStep>,
}

impl RenamePlan {
    /// Build a plan from an existing scan. Counter starts at 1.
    pub fn from_scan(dir: &Path, scan: &SequenceScan, extension: &str, padding: usize) -> Self {
        let steps = scan
            .files
            .iter()
            .enumerate()
            .map(|(idx, file)| RenameStep {
                from: file.path.clone(),
                to: dir.join(target_name(idx + 1, padding, extension)),
            })
            .collect();
        Self {
            dir: dir.to_path_buf(),
            extension: normalize_extension(extension).to_string(),
            padding,
            steps,
        }
    }

    pub fn steps(&self) -> &[RenameStep] {
        &self.steps
    }

    /// Steps that actually move a file
    pub fn pending(&self) -> impl Iterator<Item = &RenameStep> {
        self.steps.iter().filter(|s| !s.is_noop())
    }

    /// Number of frames in the sequence
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// printf-style ffmpeg input pattern matching the renamed files
    pub fn input_pattern(&self) -> PathBuf {
        input_pattern(&self.dir, &self.extension, self.padding)
    }

    /// Apply every rename, all or nothing.
    ///
    /// Targets already occupied by files outside the plan abort the batch
    /// before anything is touched. Files are first moved to staging names and
    /// then to their targets, so a plan whose targets overlap its own sources
    /// is safe. On a failed rename the completed moves are undone.
    ///
    /// Returns the number of files that changed name.
    pub fn apply(&self) -> Result<usize, SequenceError> {
        let pending: Vec<&RenameStep> = self.pending().collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let sources: HashSet<&Path> = self.steps.iter().map(|s| s.from.as_path()).collect();
        for step in &pending {
            if step.to.exists() && !sources.contains(step.to.as_path()) {
                return Err(SequenceError::TargetOccupied {
                    from: step.from.clone(),
                    to: step.to.clone(),
                });
            }
        }

        let mut staged: Vec<(PathBuf, &RenameStep)> = Vec::with_capacity(pending.len());
        for (idx, step) in pending.iter().enumerate() {
            let staging = self.staging_path(idx);
            if let Err(source) = fs::rename(&step.from, &staging) {
                restore_sources(&staged);
                return Err(SequenceError::Rename {
                    from: step.from.clone(),
                    to: staging,
                    source,
                });
            }
            staged.push((staging, step));
        }

        for (done, (staging, step)) in staged.iter().enumerate() {
            if let Err(source) = fs::rename(staging, &step.to) {
                for (undo_staging, undo_step) in &staged[..done] {
                    if let Err(e) = fs::rename(&undo_step.to, undo_staging) {
                        log::error!("rollback of {} failed: {}", undo_step.to.display(), e);
                    }
                }
                restore_sources(&staged);
                return Err(SequenceError::Rename {
                    from: step.from.clone(),
                    to: step.to.clone(),
                    source,
                });
            }
            log::debug!("renamed {}", step);
        }

        Ok(staged.len())
    }

    fn staging_path(&self, idx: usize) -> PathBuf {
        self.dir.join(format!(".seqgif-{}-{}.{}.tmp", std::process::id(), idx, self.extension))
    }
}

fn restore_sources(staged: &[(PathBuf, &RenameStep)]) {
    for (staging, step) in staged {
        if let Err(e) = fs::rename(staging, &step.from) {
            log::error!("could not restore {}: {}", step.from.display(), e);
        }
    }
}

/// `dir/image_%03d.ext` for the given padding width.
pub fn input_pattern(dir: &Path, extension: &str, padding: usize) -> PathBuf {
    dir.join(format!("{}%0{}d.{}", TARGET_PREFIX, padding, normalize_extension(extension)))
}

/// Scan `dir` and build the rename plan in one go.
pub fn plan_renames(dir: &Path, extension: &str, padding: usize) -> Result<(SequenceScan, RenamePlan), SequenceError> {
    let scan = scan_sequence(dir, extension)?;
    let plan = RenamePlan::from_scan(dir, &scan, extension, padding);
    Ok((scan, plan))
}

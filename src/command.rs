//! Building the ffmpeg invocation from user parameters.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::PathBuf;
use std::process::Command as ProcCommand;

use serde::{Deserialize, Serialize};

/// Lowest (best) value accepted by `-q:v`
pub const MIN_QUALITY: i64 = 1;
/// Highest (worst) value accepted by `-q:v`
pub const MAX_QUALITY: i64 = 31;

/// Parameters of one encode.
///
/// Numeric fields are signed so that out-of-range input coming from a prompt
/// or the command line can be reported instead of rejected by the parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Input frames per second, must be positive
    pub framerate: i64,
    /// Output width in pixels, must be positive; height follows the aspect ratio
    pub width: i64,
    /// `-q:v` value in `1..=31`, lower is better. Omitted from the command when `None`
    pub quality: Option<i64>,
    /// `-loop` value, `0` loops forever
    pub loop_count: i64,
    /// printf-style input pattern, e.g. `frames/image_%03d.jpg`
    pub input_pattern: PathBuf,
    pub output_path: PathBuf,
}

impl Default for CommandSpec {
    fn default() -> Self {
        Self {
            framerate: 10,
            width: 320,
            quality: None,
            loop_count: 0,
            input_pattern: PathBuf::from("image_%03d.jpg"),
            output_path: PathBuf::from("output.gif"),
        }
    }
}

/// Parameter that failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Framerate,
    Width,
    Quality,
    LoopCount,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Field::Framerate => "framerate",
            Field::Width => "width",
            Field::Quality => "quality",
            Field::LoopCount => "loop count",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: Field,
    pub message: String,
}

/// Every violation found in a [`CommandSpec`], in field order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationErrors {
    issues: Vec<ValidationIssue>,
}

impl ValidationErrors {
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    /// Whether any issue concerns `field`
    pub fn mentions(&self, field: Field) -> bool {
        self.issues.iter().any(|i| i.field == field)
    }

    fn push(&mut self, field: Field, message: String) {
        self.issues.push(ValidationIssue { field, message });
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid parameters:")?;
        for issue in &self.issues {
            write!(f, "\n  • {}", issue.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl CommandSpec {
    /// Check every field, collecting all violations rather than stopping at the first.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();

        if self.framerate <= 0 {
            errors.push(Field::Framerate, format!("framerate must be a positive integer (got {})", self.framerate));
        }
        if self.width <= 0 {
            errors.push(Field::Width, format!("width must be a positive integer (got {})", self.width));
        }
        if let Some(q) = self.quality {
            if !(MIN_QUALITY..=MAX_QUALITY).contains(&q) {
                errors.push(
                    Field::Quality,
                    format!("quality must be within {}-{}, lower is better (got {})", MIN_QUALITY, MAX_QUALITY, q),
                );
            }
        }
        if self.loop_count < 0 {
            errors.push(
                Field::LoopCount,
                format!("loop count must be a non-negative integer, 0 loops forever (got {})", self.loop_count),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate and turn the parameters into an ffmpeg argument vector.
    ///
    /// # Example
    ///
    /// ```
    /// use seqgif::CommandSpec;
    ///
    /// let spec = CommandSpec { quality: Some(15), ..CommandSpec::default() };
    /// let invocation = spec.build().unwrap();
    /// assert!(invocation.to_string().contains("-q:v 15"));
    /// ```
    pub fn build(&self) -> Result<FfmpegInvocation, ValidationErrors> {
        self.validate()?;

        let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "info", "-framerate"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(self.framerate.to_string().into());
        args.push("-i".into());
        args.push(self.input_pattern.clone().into_os_string());
        args.push("-vf".into());
        args.push(format!("scale={}:-1", self.width).into());
        if let Some(q) = self.quality {
            args.push("-q:v".into());
            args.push(q.to_string().into());
        }
        args.push("-loop".into());
        args.push(self.loop_count.to_string().into());
        args.push("-y".into());
        args.push(self.output_path.clone().into_os_string());

        Ok(FfmpegInvocation::new("ffmpeg", args))
    }
}

/// A program plus its arguments, run without a shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegInvocation {
    program: OsString,
    args: Vec<OsString>,
}

impl FfmpegInvocation {
    pub fn new<P, I, A>(program: P, args: I) -> Self
    where
        P: Into<OsString>,
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Replace the program, keeping the arguments
    pub fn with_program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    pub fn command(&self) -> ProcCommand {
        let mut cmd = ProcCommand::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for FfmpegInvocation {
    /// Shell-quoted rendering for display and copy-paste
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&shell_quote(&self.program.to_string_lossy()))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(&arg.to_string_lossy()))?;
        }
        Ok(())
    }
}

fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || "-_./:=%,+@".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

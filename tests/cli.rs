use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::tempdir;

fn run_seqgif(cwd: &Path, args: &[&str]) -> Output {
    run_seqgif_with_env(cwd, args, &[])
}

fn run_seqgif_with_env(cwd: &Path, args: &[&str], env: &[(&str, &str)]) -> Output {
    let config = cwd.join("test-config.json");
    if !config.exists() {
        fs::write(&config, "{}").expect("config should write");
    }
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_seqgif"));
    cmd.current_dir(cwd).arg("--config").arg(&config).args(args).env_remove("SEQGIF_FFMPEG");
    for (k, v) in env {
        cmd.env(k, v);
    }
    cmd.output().expect("seqgif command should run")
}

fn touch(dir: &Path, name: &str) {
    fs::write(dir.join(name), name).expect("fixture should write");
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

#[test]
fn rename_only_normalizes_numeric_order() {
    let dir = tempdir().expect("tempdir should create");
    let frames = dir.path().join("frames");
    fs::create_dir(&frames).expect("frames dir");
    for name in ["a5.jpg", "a12.jpg", "a1.jpg", "cover.jpg"] {
        touch(&frames, name);
    }

    let out = run_seqgif(dir.path(), &["frames", "--default", "--rename-only"]);
    assert!(out.status.success(), "stdout={} stderr={}", stdout(&out), stderr(&out));
    assert!(stdout(&out).contains("Renamed 3 files"));
    assert!(stdout(&out).contains("skipped (no frame number): cover.jpg"));

    assert_eq!(fs::read_to_string(frames.join("image_001.jpg")).unwrap(), "a1.jpg");
    assert_eq!(fs::read_to_string(frames.join("image_002.jpg")).unwrap(), "a5.jpg");
    assert_eq!(fs::read_to_string(frames.join("image_003.jpg")).unwrap(), "a12.jpg");
    assert!(frames.join("cover.jpg").exists());

    let again = run_seqgif(dir.path(), &["frames", "--default", "--rename-only"]);
    assert!(again.status.success());
    assert!(stdout(&again).contains("Sequence already normalized."));
}

#[test]
fn dry_run_changes_nothing() {
    let dir = tempdir().expect("tempdir should create");
    touch(dir.path(), "shot9.png");
    touch(dir.path(), "shot10.png");

    let out = run_seqgif(dir.path(), &[".", "--default", "--ext", "png", "--padding", "5", "--dry-run"]);
    assert!(out.status.success(), "stderr={}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains("shot9.png -> image_00001.png"));
    assert!(text.contains("shot10.png -> image_00002.png"));
    assert!(text.contains("image_%05d.png"));
    assert!(dir.path().join("shot9.png").exists());
    assert!(!dir.path().join("image_00001.png").exists());
}

#[test]
fn print_command_uses_preset_and_flags() {
    let dir = tempdir().expect("tempdir should create");
    let out = run_seqgif(
        dir.path(),
        &[".", "out.gif", "--large", "--print-command", "--framerate", "24", "--loop-count", "2"],
    );
    assert!(out.status.success(), "stderr={}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains("-framerate 24"));
    assert!(text.contains("scale=640:-1"));
    assert!(text.contains("-q:v 3"));
    assert!(text.contains("-loop 2 -y out.gif"));
}

#[test]
fn invalid_parameters_are_all_reported() {
    let dir = tempdir().expect("tempdir should create");
    let out = run_seqgif(
        dir.path(),
        &[".", "--default", "--print-command", "--framerate", "0", "--quality", "32", "--loop-count", "-1"],
    );
    assert!(!out.status.success());
    let err = stderr(&out);
    assert!(err.contains("framerate must be a positive integer"), "{err}");
    assert!(err.contains("1-31"), "{err}");
    assert!(err.contains("loop count must be a non-negative integer"), "{err}");
    assert!(!stdout(&out).contains("FFmpeg command"));
}

#[test]
fn missing_directory_is_an_error() {
    let dir = tempdir().expect("tempdir should create");
    let out = run_seqgif(dir.path(), &["does-not-exist", "--default"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("does not exist"));
}

#[cfg(unix)]
fn fake_ffmpeg(dir: &Path, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-ffmpeg.sh");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("script should write");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod");
    path
}

#[cfg(unix)]
#[test]
fn full_pipeline_with_stand_in_ffmpeg() {
    let dir = tempdir().expect("tempdir should create");
    let frames = dir.path().join("frames");
    fs::create_dir(&frames).expect("frames dir");
    for name in ["b3.jpg", "b1.jpg", "b2.jpg"] {
        touch(&frames, name);
    }
    let ffmpeg = fake_ffmpeg(
        dir.path(),
        "printf 'frame=    1 fps=0.0\\rframe=    3 fps=0.0\\n' >&2\nfor last; do :; done\nprintf GIF > \"$last\"",
    );

    let out = run_seqgif_with_env(
        dir.path(),
        &["frames", "anim.gif", "--default", "--yes"],
        &[("SEQGIF_FFMPEG", ffmpeg.to_str().unwrap())],
    );
    assert!(out.status.success(), "stdout={} stderr={}", stdout(&out), stderr(&out));
    assert!(stdout(&out).contains("Success: GIF generated!"));
    assert_eq!(fs::read_to_string(dir.path().join("anim.gif")).unwrap(), "GIF");
    assert!(frames.join("image_003.jpg").exists());

    let log = fs::read_to_string(dir.path().join("ffmpeg.log")).expect("default log file");
    assert!(log.contains("frame=    3"));
}

#[cfg(unix)]
#[test]
fn failing_ffmpeg_reports_error_lines() {
    let dir = tempdir().expect("tempdir should create");
    touch(dir.path(), "c1.jpg");
    let ffmpeg = fake_ffmpeg(dir.path(), "echo 'Error opening output file anim.gif.' >&2\nexit 1");

    let out = run_seqgif_with_env(
        dir.path(),
        &[".", "anim.gif", "--default", "--yes", "--no-log"],
        &[("SEQGIF_FFMPEG", ffmpeg.to_str().unwrap())],
    );
    assert!(!out.status.success());
    assert!(stderr(&out).contains("Error opening output file anim.gif."));
    assert!(!dir.path().join("ffmpeg.log").exists());
}

#[cfg(unix)]
#[test]
fn exit_status_only_fails_when_requested() {
    let dir = tempdir().expect("tempdir should create");
    touch(dir.path(), "image_001.jpg");
    let ffmpeg = fake_ffmpeg(dir.path(), "echo 'frame=    1' >&2\nexit 2");
    let env = [("SEQGIF_FFMPEG", ffmpeg.to_str().unwrap())];

    let lenient = run_seqgif_with_env(dir.path(), &[".", "anim.gif", "--default", "--no-log"], &env);
    assert!(lenient.status.success(), "stderr={}", stderr(&lenient));
    assert!(stdout(&lenient).contains("Success: GIF generated!"));

    let strict = run_seqgif_with_env(
        dir.path(),
        &[".", "anim.gif", "--default", "--no-log", "--fail-on-exit-code"],
        &env,
    );
    assert!(!strict.status.success());
    assert!(stderr(&strict).contains("exited with status 2"), "{}", stderr(&strict));
}

#![allow(dead_code)]

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Output, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

use filetime::{FileTime, set_file_mtime};

/// Outcome of one binary invocation.
pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    /// Transcript of the run, kept for post-mortem debugging.
    pub log_path: PathBuf,
}

fn transcript_path(case_name: &str) -> PathBuf {
    let root = std::env::temp_dir().join("replsync-test-logs");
    fs::create_dir_all(&root).expect("create transcript dir");
    let slug: String = case_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    root.join(format!("{slug}-{stamp}.log"))
}

fn replsync_command(args: &[&str], envs: &[(&str, &str)]) -> (PathBuf, Command) {
    let bin = option_env!("CARGO_BIN_EXE_replsync")
        .map(PathBuf::from)
        .expect("replsync binary not built (enable the cli feature)");

    let mut command = Command::new(&bin);
    command
        .args(args)
        .env("HOME", std::env::temp_dir())
        .env("RUST_BACKTRACE", "1");
    for (key, _) in std::env::vars_os() {
        if key.to_string_lossy().starts_with("REPLSYNC_") {
            command.env_remove(key);
        }
    }
    command.envs(envs.iter().copied());
    (bin, command)
}

fn record(case_name: &str, bin: &Path, args: &[&str], output: &Output) -> CmdResult {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    let log_path = transcript_path(case_name);
    let mut transcript = String::new();
    let _ = writeln!(transcript, "case={case_name}");
    let _ = writeln!(transcript, "bin={}", bin.display());
    let _ = writeln!(transcript, "args={args:?}");
    let _ = writeln!(transcript, "status={}", output.status);
    let _ = writeln!(transcript, "--- stdout ---\n{stdout}");
    let _ = writeln!(transcript, "--- stderr ---\n{stderr}");
    fs::write(&log_path, transcript).expect("write transcript");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Run the binary with `args` and an isolated environment.
///
/// `HOME` points at the temp dir so no user config file is picked up, and
/// every `REPLSYNC_*` variable from the outer environment is removed.
pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_with_env(case_name, args, &[])
}

/// [`run_cli_case`] with extra environment variables set for the child.
pub fn run_cli_case_with_env(case_name: &str, args: &[&str], envs: &[(&str, &str)]) -> CmdResult {
    let (bin, mut command) = replsync_command(args, envs);
    let output = command.output().expect("spawn replsync");
    record(case_name, &bin, args, &output)
}

/// Run the binary with its stdout reader closed right after spawn, as when
/// piping into `head`.
pub fn run_cli_case_with_closed_stdout(case_name: &str, args: &[&str]) -> CmdResult {
    let (bin, mut command) = replsync_command(args, &[]);
    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn replsync");
    drop(child.stdout.take());
    let output = child.wait_with_output().expect("wait for replsync");
    record(case_name, &bin, args, &output)
}

/// Write `content` at `root/rel`, creating parents, with mtime `secs` since the epoch.
pub fn write_file(root: &Path, rel: &str, content: &str, secs: i64) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dirs");
    }
    fs::write(&path, content).expect("write fixture file");
    set_file_mtime(&path, FileTime::from_unix_time(secs, 0)).expect("set fixture mtime");
    path
}

pub fn mtime_secs(path: &Path) -> i64 {
    FileTime::from_last_modification_time(&fs::metadata(path).expect("stat fixture"))
        .unix_seconds()
}

/// Relative paths of every entry under `root`, sorted, without following links.
pub fn tree_listing(root: &Path) -> Vec<String> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).expect("list fixture dir") {
            let entry = entry.expect("read fixture entry");
            let path = entry.path();
            let rel = path
                .strip_prefix(root)
                .expect("entry under root")
                .to_string_lossy()
                .into_owned();
            if entry.file_type().expect("entry type").is_dir() {
                stack.push(path);
            }
            out.push(rel);
        }
    }
    out.sort();
    out
}

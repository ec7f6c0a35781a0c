/*
 * Copyright (c) 2024 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use wait_timeout::ChildExt;

use crate::fsutil;

/// Patterns on stderr that disable the stderr capture on subsequent
/// retries, so that git can ask for a password on Windows.
const STDERR_DISABLE_PATTERNS: &[&[u8]] = &[b"Permission denied (publickey)."];

/// Poll granularity of the output pump loop.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The outcome of a child process execution.
///
/// Only [`RunStatus::code`] maps the outcome into the numeric return code
/// space used at the process boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Exited(i32),
    NotFound,
    CommandTimeout,
    OutputStall,
    AbortedOnPattern,
}

impl RunStatus {
    pub fn code(self) -> i32 {
        match self {
            RunStatus::Exited(code) => code,
            RunStatus::NotFound => 127,
            RunStatus::CommandTimeout => -1000,
            RunStatus::OutputStall => -2000,
            RunStatus::AbortedOnPattern => -3000,
        }
    }

    pub fn success(self) -> bool {
        self == RunStatus::Exited(0)
    }
}

/// Captured result of a child process execution.
pub struct RunOutput {
    pub status: RunStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl RunOutput {
    fn new(status: RunStatus) -> Self {
        RunOutput {
            status,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    /// Whether the byte pattern occurs in the captured stdout or stderr.
    pub fn contains(&self, pattern: &[u8]) -> bool {
        contains(&self.stdout, pattern) || contains(&self.stderr, pattern)
    }
}

/// Options of a single child process execution.
#[derive(Clone)]
pub struct CallOptions {
    pub cwd: Option<PathBuf>,
    pub command_timeout: Option<Duration>,
    pub output_timeout: Option<Duration>,
    pub stderr_capture: bool,
}

impl Default for CallOptions {
    fn default() -> Self {
        CallOptions {
            cwd: None,
            command_timeout: None,
            output_timeout: None,
            stderr_capture: true,
        }
    }
}

/// Retry behavior of [`call_command_retry`].
#[derive(Default)]
pub struct RetrySpec<'a> {
    pub retries: u32,
    pub remove_dir: Option<&'a Path>,
    pub abort_on_pattern: Option<&'a [u8]>,
}

#[derive(Clone, Copy)]
enum StreamKind {
    Stdout,
    Stderr,
}

/// Execute the given command with optional timeouts.
///
/// The stdout and stderr streams of the child are forwarded to the
/// wrapper's own stdout/stderr in real time, so progress output stays
/// visible, and are captured into the returned buffers at the same time.
pub fn call_command(argv: &[String], options: &CallOptions) -> RunOutput {
    let command_str = argv.join(" ");
    debug!(
        "Execute command '{}' (cwd={:?}) with command timeout of {:?} and output timeout of {:?}. stderr_capture={}",
        command_str, options.cwd, options.command_timeout, options.output_timeout, options.stderr_capture
    );

    let mut command = Command::new(&argv[0]);
    command.args(&argv[1..]);
    if let Some(cwd) = &options.cwd {
        command.current_dir(cwd);
    }
    command.stdout(Stdio::piped());
    command.stderr(if options.stderr_capture {
        Stdio::piped()
    } else {
        Stdio::inherit()
    });

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            return RunOutput::new(RunStatus::NotFound);
        }
        Err(error) => {
            error!("Can't execute command '{}': {}", command_str, error);
            return RunOutput::new(RunStatus::Exited(-1));
        }
    };

    let (sender, receiver) = mpsc::channel();
    let mut handles = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        handles.push(pump(stdout, StreamKind::Stdout, sender.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        handles.push(pump(stderr, StreamKind::Stderr, sender.clone()));
    }
    drop(sender);

    let mut output = RunOutput::new(RunStatus::Exited(-1));
    let command_start = Instant::now();
    let mut output_start = Instant::now();
    let mut timeout_status = None;
    let mut exited_with_open_streams = false;

    loop {
        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok((StreamKind::Stdout, chunk)) => {
                output.stdout.extend_from_slice(&chunk);
                output_start = Instant::now();
            }
            Ok((StreamKind::Stderr, chunk)) => {
                output.stderr.extend_from_slice(&chunk);
                output_start = Instant::now();
            }
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                // The child may have exited while a descendant keeps the
                // pipes open. Probe without blocking.
                if let Ok(Some(_)) = child.wait_timeout(Duration::from_millis(0)) {
                    exited_with_open_streams = true;
                    break;
                }
            }
        }

        if let Some(output_timeout) = options.output_timeout {
            if output_start.elapsed() >= output_timeout {
                debug!(
                    "No stdout/stderr output received within {} seconds!",
                    output_start.elapsed().as_secs()
                );
                timeout_status = Some(RunStatus::OutputStall);
            }
        }
        if timeout_status.is_none() {
            if let Some(command_timeout) = options.command_timeout {
                if command_start.elapsed() >= command_timeout {
                    debug!("Timeout occured after {} seconds!", command_start.elapsed().as_secs());
                    timeout_status = Some(RunStatus::CommandTimeout);
                }
            }
        }
        if timeout_status.is_some() {
            kill_tree(&mut child);
            break;
        }
    }

    if !exited_with_open_streams {
        for handle in handles {
            let _ = handle.join();
        }
    }
    for (kind, chunk) in receiver.try_iter() {
        match kind {
            StreamKind::Stdout => output.stdout.extend_from_slice(&chunk),
            StreamKind::Stderr => output.stderr.extend_from_slice(&chunk),
        }
    }

    let code = match child.wait() {
        Ok(status) => exit_code(status),
        Err(error) => {
            error!("Can't wait for command '{}': {}", command_str, error);
            -1
        }
    };
    output.status = timeout_status.unwrap_or(RunStatus::Exited(code));

    debug!(
        "Command '{}' finished with return code {}.",
        command_str,
        output.status.code()
    );
    output
}

/// Call the given command with automatic retries on error.
pub fn call_command_retry(argv: &[String], options: &CallOptions, retry: &RetrySpec) -> RunOutput {
    let command_str = argv.join(" ");
    let mut options = options.clone();
    debug!(
        "Retry to execute command '{}' up to {} times.",
        command_str, retry.retries
    );

    let mut attempt = 0;
    loop {
        let mut output = call_command(argv, &options);
        if output.status.success() {
            return output;
        }

        if cfg!(windows) && options.stderr_capture {
            for pattern in STDERR_DISABLE_PATTERNS {
                if contains(&output.stderr, pattern) {
                    info!(
                        "Found pattern indicating we should disable stderr forwarding \
                         as a workaround on Windows to enable git asking for a password."
                    );
                    options.stderr_capture = false;
                    break;
                }
            }
        }

        if let Some(dir) = retry.remove_dir {
            let _ = fsutil::rmtree(dir, true);
        }

        if let Some(pattern) = retry.abort_on_pattern {
            if contains(&output.stdout, pattern) || contains(&output.stderr, pattern) {
                debug!("Abort pattern found in stdout/stderr.");
                output.status = RunStatus::AbortedOnPattern;
                return output;
            }
            debug!("Abort pattern not found in stdout/stderr.");
        }

        if attempt == retry.retries {
            return output;
        }
        warn!(
            "Command '{}' failed with return code {}. Starting retry {} of {}.",
            command_str,
            output.status.code(),
            attempt + 1,
            retry.retries
        );
        attempt += 1;
    }
}

/// Call the given command with retries and a user-visible start, success
/// and failure log line including the elapsed seconds.
pub fn pretty_call_command_retry(
    action: &str,
    pattern_cause: &str,
    argv: &[String],
    options: &CallOptions,
    retry: &RetrySpec,
) -> RunOutput {
    info!("Starting {}.", action);
    let started = Instant::now();
    let output = call_command_retry(argv, options, retry);
    let run_time = started.elapsed().as_secs_f64();

    match output.status {
        status if status.success() => {
            info!("{} was successfully completed within {:.1} seconds.", action, run_time);
        }
        RunStatus::CommandTimeout => error!("{} timed out after {:.1} seconds!", action, run_time),
        RunStatus::OutputStall => error!("{} stalled after {:.1} seconds!", action, run_time),
        RunStatus::AbortedOnPattern => {
            error!("{} failed due to {} after {:.1} seconds!", action, pattern_cause, run_time);
        }
        other => error!(
            "{} failed after {:.1} seconds with return code {}!",
            action,
            run_time,
            other.code()
        ),
    }
    output
}

/// Execute the command with inherited stdio and return its exit code.
pub fn simple_call_command(argv: &[String], cwd: Option<&Path>) -> i32 {
    let mut command = Command::new(&argv[0]);
    command.args(&argv[1..]);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    match command.status() {
        Ok(status) => exit_code(status),
        Err(error) if error.kind() == io::ErrorKind::NotFound => 127,
        Err(error) => {
            error!("Can't execute command '{}': {}", argv.join(" "), error);
            -1
        }
    }
}

/// Execute the command and capture its trimmed stdout. Stderr is silenced.
pub fn getstatusoutput(argv: &[String], cwd: Option<&Path>) -> (i32, String) {
    let mut command = Command::new(&argv[0]);
    command.args(&argv[1..]);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    command.stdout(Stdio::piped());
    command.stderr(Stdio::null());
    match command.output() {
        Ok(output) => (
            exit_code(output.status),
            String::from_utf8_lossy(&output.stdout).trim().to_string(),
        ),
        Err(error) if error.kind() == io::ErrorKind::NotFound => (127, String::new()),
        Err(error) => {
            error!("Can't execute command '{}': {}", argv.join(" "), error);
            (-1, String::new())
        }
    }
}

fn pump<R: Read + Send + 'static>(
    mut reader: R,
    kind: StreamKind,
    sender: Sender<(StreamKind, Vec<u8>)>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut buffer = [0u8; 1024];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(read) => {
                    forward(kind, &buffer[..read]);
                    if sender.send((kind, buffer[..read].to_vec())).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

fn forward(kind: StreamKind, bytes: &[u8]) {
    match kind {
        StreamKind::Stdout => {
            let mut stdout = io::stdout();
            let _ = stdout.write_all(bytes);
            let _ = stdout.flush();
        }
        StreamKind::Stderr => {
            let mut stderr = io::stderr();
            let _ = stderr.write_all(bytes);
            let _ = stderr.flush();
        }
    }
}

#[cfg(windows)]
fn kill_tree(child: &mut Child) {
    let _ = Command::new("taskkill")
        .args(["/F", "/T", "/PID", &child.id().to_string()])
        .status();
    let _ = child.kill();
}

#[cfg(not(windows))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| part.to_string()).collect()
    }

    #[test]
    fn byte_pattern_search() {
        assert!(contains(b"error: remove gc.log first", b"remove gc.log"));
        assert!(!contains(b"all fine", b"remove gc.log"));
        assert!(!contains(b"", b"remove gc.log"));
    }

    #[cfg(unix)]
    #[test]
    fn simple_call_return_codes() {
        assert_eq!(simple_call_command(&argv(&["true"]), None), 0);
        assert_eq!(simple_call_command(&argv(&["false"]), None), 1);
        assert_eq!(
            simple_call_command(&argv(&["gitcache-does-not-exist"]), None),
            127
        );
    }

    #[cfg(unix)]
    #[test]
    fn statusoutput_captures_trimmed_stdout() {
        let (code, output) = getstatusoutput(&argv(&["echo", "hello"]), None);
        assert_eq!(code, 0);
        assert_eq!(output, "hello");

        let (code, output) = getstatusoutput(&argv(&["gitcache-does-not-exist"]), None);
        assert_eq!(code, 127);
        assert_eq!(output, "");
    }

    #[cfg(unix)]
    #[test]
    fn call_captures_stdout() {
        let output = call_command(&argv(&["echo", "mirror"]), &CallOptions::default());
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "mirror");
    }

    #[cfg(unix)]
    #[test]
    fn call_reports_missing_executable() {
        let output = call_command(&argv(&["gitcache-does-not-exist"]), &CallOptions::default());
        assert_eq!(output.status, RunStatus::NotFound);
        assert_eq!(output.status.code(), 127);
    }

    #[cfg(unix)]
    #[test]
    fn command_timeout_kills_the_child() {
        let options = CallOptions {
            command_timeout: Some(Duration::from_millis(500)),
            ..CallOptions::default()
        };
        let started = Instant::now();
        let output = call_command(&argv(&["sleep", "10"]), &options);
        assert_eq!(output.status, RunStatus::CommandTimeout);
        assert_eq!(output.status.code(), -1000);
        assert!(started.elapsed() < Duration::from_secs(8));
    }

    #[cfg(unix)]
    #[test]
    fn output_timeout_kills_the_child() {
        let options = CallOptions {
            command_timeout: Some(Duration::from_secs(30)),
            output_timeout: Some(Duration::from_millis(500)),
            ..CallOptions::default()
        };
        let output = call_command(&argv(&["sleep", "10"]), &options);
        assert_eq!(output.status, RunStatus::OutputStall);
        assert_eq!(output.status.code(), -2000);
    }

    #[cfg(unix)]
    #[test]
    fn retry_aborts_on_pattern() {
        let command = argv(&["sh", "-c", "echo fatal: remove gc.log first >&2; exit 2"]);
        let retry = RetrySpec {
            retries: 3,
            abort_on_pattern: Some(b"remove gc.log".as_slice()),
            ..RetrySpec::default()
        };
        let output = call_command_retry(&command, &CallOptions::default(), &retry);
        assert_eq!(output.status, RunStatus::AbortedOnPattern);
        assert_eq!(output.status.code(), -3000);
    }

    #[cfg(unix)]
    #[test]
    fn retry_removes_directory_on_error() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("checkout");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("partial"), b"data").unwrap();

        let retry = RetrySpec {
            retries: 1,
            remove_dir: Some(&target),
            ..RetrySpec::default()
        };
        let output = call_command_retry(&argv(&["false"]), &CallOptions::default(), &retry);
        assert_eq!(output.status, RunStatus::Exited(1));
        assert!(!target.exists());
    }

    #[cfg(unix)]
    #[test]
    fn retry_returns_first_success() {
        let retry = RetrySpec {
            retries: 3,
            ..RetrySpec::default()
        };
        let output = call_command_retry(&argv(&["true"]), &CallOptions::default(), &retry);
        assert!(output.status.success());
    }
}

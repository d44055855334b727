use std::io::{self, Read, Write};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

pub const TIMEOUT_EXIT_CODE: i32 = 124;
pub const NOT_FOUND_EXIT_CODE: i32 = 127;
pub const SIGNAL_EXIT_CODE: i32 = -9;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == 0 && !self.timed_out
    }
}

/// Runs `command` with an optional stdin payload and a hard wall-clock limit.
///
/// A missing program is reported as exit code 127 rather than an error, and a
/// child that outlives `timeout` is killed and reported as exit code 124 with
/// empty stdout, mirroring the `timeout(1)` convention.
pub fn run_with_timeout(
    command: &mut Command,
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<ProcessOutput> {
    let program = command.get_program().to_string_lossy().into_owned();

    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(ProcessOutput {
                code: NOT_FOUND_EXIT_CODE,
                stdout: String::new(),
                stderr: format!("{program} not found"),
                timed_out: false,
            });
        }
        Err(err) => return Err(err).with_context(|| format!("failed to spawn {program}")),
    };

    if let (Some(mut pipe), Some(input)) = (child.stdin.take(), stdin) {
        let input = input.to_owned();
        // EPIPE is expected when the child exits before draining stdin.
        thread::spawn(move || {
            let _ = pipe.write_all(input.as_bytes());
        });
    }
    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child
            .try_wait()
            .with_context(|| format!("failed to wait for {program}"))?
        {
            return Ok(ProcessOutput {
                code: status.code().unwrap_or(SIGNAL_EXIT_CODE),
                stdout: join_reader(stdout_reader),
                stderr: join_reader(stderr_reader),
                timed_out: false,
            });
        }

        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            // Readers are left detached: grandchildren may still hold the pipes open.
            return Ok(ProcessOutput {
                code: TIMEOUT_EXIT_CODE,
                stdout: String::new(),
                stderr: "timeout".to_string(),
                timed_out: true,
            });
        }

        thread::sleep(POLL_INTERVAL);
    }
}

fn spawn_reader<R>(source: Option<R>) -> Option<JoinHandle<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    source.map(|mut source| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = source.read_to_end(&mut buf);
            buf
        })
    })
}

fn join_reader(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

pub fn command_available(program: &str) -> bool {
    Command::new(program).arg("--version").output().is_ok()
}

pub fn command_version(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let source = if stdout.trim().is_empty() {
        stderr.trim()
    } else {
        stdout.trim()
    };

    source
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
}

#[cfg(all(test, unix))]
mod tests {
    use std::process::Command;
    use std::time::Duration;

    use super::{NOT_FOUND_EXIT_CODE, TIMEOUT_EXIT_CODE, run_with_timeout};

    #[test]
    fn pipes_stdin_through_to_stdout() {
        let output = run_with_timeout(
            &mut Command::new("cat"),
            Some("hello model"),
            Duration::from_secs(10),
        )
        .expect("cat should run");

        assert!(output.success());
        assert_eq!(output.stdout, "hello model");
    }

    #[test]
    fn kills_child_after_deadline() {
        let output = run_with_timeout(
            Command::new("sleep").arg("5"),
            None,
            Duration::from_millis(100),
        )
        .expect("sleep should spawn");

        assert!(output.timed_out);
        assert_eq!(output.code, TIMEOUT_EXIT_CODE);
        assert!(!output.success());
    }

    #[test]
    fn missing_program_maps_to_not_found_code() {
        let output = run_with_timeout(
            &mut Command::new("autolearn-no-such-program"),
            None,
            Duration::from_secs(1),
        )
        .expect("missing program is not an error");

        assert_eq!(output.code, NOT_FOUND_EXIT_CODE);
        assert!(output.stderr.contains("not found"));
    }

    #[test]
    fn non_zero_exit_code_is_reported() {
        let output = run_with_timeout(
            Command::new("sh").args(["-c", "echo oops >&2; exit 3"]),
            None,
            Duration::from_secs(10),
        )
        .expect("sh should run");

        assert_eq!(output.code, 3);
        assert_eq!(output.stderr.trim(), "oops");
    }
}

//! Helpers for running child processes with timeouts and bounded output.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
///
/// Only the last `output_limit_bytes` of each stream are kept; earlier bytes
/// are counted in `*_dropped`.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_dropped: usize,
    pub stderr_dropped: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. A child that outlives
/// `timeout` is killed and reported with `timed_out = true`.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_tail(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_tail(stderr, output_limit_bytes));

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        // A child that exits without reading its input is not an error here.
        if let Err(err) = child_stdin.write_all(input) {
            warn!(err = %err, "child closed stdin early");
        }
    }

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_dropped) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_dropped) = join_output(stderr_handle).context("join stderr")?;

    if stdout_dropped > 0 || stderr_dropped > 0 {
        debug!(stdout_dropped, stderr_dropped, "output trimmed to tail");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_dropped,
        stderr_dropped,
        timed_out,
    })
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Drain `reader`, keeping only the last `limit` bytes.
fn read_stream_tail<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        // Trim in batches so long outputs are not shifted on every chunk.
        if buf.len() > limit.saturating_mul(2).max(chunk.len()) {
            let excess = buf.len() - limit;
            buf.drain(..excess);
            dropped += excess;
        }
    }
    if buf.len() > limit {
        let excess = buf.len() - limit;
        buf.drain(..excess);
        dropped += excess;
    }

    Ok((buf, dropped))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_reader_keeps_last_bytes() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let (kept, dropped) = read_stream_tail(&data[..], 100).expect("read");
        assert_eq!(kept, data[data.len() - 100..]);
        assert_eq!(dropped, data.len() - 100);
    }

    #[test]
    fn tail_reader_keeps_short_output() {
        let (kept, dropped) = read_stream_tail(&b"hello"[..], 100).expect("read");
        assert_eq!(kept, b"hello");
        assert_eq!(dropped, 0);
    }

    #[cfg(unix)]
    #[test]
    fn captures_output_and_exit_code() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("cat; echo oops >&2; exit 3");
        let output = run_command_with_timeout(cmd, Some(&b"piped"[..]), Duration::from_secs(10), 1000)
            .expect("run");
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout_text(), "piped");
        assert_eq!(output.stderr_text(), "oops\n");
        assert!(!output.timed_out);
    }

    #[cfg(unix)]
    #[test]
    fn kills_on_timeout() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("exec sleep 5");
        let output =
            run_command_with_timeout(cmd, None, Duration::from_millis(200), 1000).expect("run");
        assert!(output.timed_out);
    }
}

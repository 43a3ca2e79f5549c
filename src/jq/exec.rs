//! Subprocess wrapper around the jq executable.
//!
//! Runs jq with the joined filter expression, streaming its stdout and
//! stderr into caller-supplied sinks while counting bytes, and racing
//! natural completion against a cancellation signal.

use crate::error::JqError;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

/// How a jq invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// jq ran to completion and exited zero.
    Success,
    /// jq ran to completion and exited nonzero.
    NonZero(i32),
    /// The cancel signal fired first and jq was killed.
    Cancelled,
}

/// Byte accounting and completion status for one jq invocation.
#[derive(Debug, Clone, Copy)]
pub struct ExecResult {
    pub bytes_out: u64,
    pub bytes_err: u64,
    pub status: ExecStatus,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.status == ExecStatus::Success
    }
}

/// Grace period between SIGTERM and SIGKILL when cancelling.
const KILL_GRACE: Duration = Duration::from_secs(2);

enum Event {
    Done(io::Result<ExitStatus>),
    Cancel,
}

/// Run jq against `input` with the given filter expression, streaming
/// stdout into `out` and stderr into `err`.
///
/// If `cancel` receives a value before jq exits, the process is killed
/// and the call reports [`ExecStatus::Cancelled`]. Completion is always
/// observed: either the process exits or the kill path reaps it.
pub fn execute(
    out: &mut (dyn Write + Send),
    err: &mut (dyn Write + Send),
    input: Box<dyn Read + Send>,
    cancel: Option<Receiver<()>>,
    bin: &Path,
    color: bool,
    expr: &str,
) -> Result<ExecResult, JqError> {
    let mut command = Command::new(bin);
    if color {
        command.arg("--color-output");
    }
    command
        .arg(expr)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(JqError::Launch)?;
    let pid = child.id() as i32;

    let (Some(stdin), Some(mut child_out), Some(mut child_err)) = (
        child.stdin.take(),
        child.stdout.take(),
        child.stderr.take(),
    ) else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(JqError::Launch(io::Error::other("child pipes unavailable")));
    };

    let (event_tx, event_rx) = mpsc::channel();

    // Detached: forwards the cancel signal into the event stream. Exits
    // on its own when the cancel channel is dropped unfired.
    if let Some(cancel) = cancel {
        let tx = event_tx.clone();
        thread::spawn(move || {
            if cancel.recv().is_ok() {
                let _ = tx.send(Event::Cancel);
            }
        });
    }

    // Detached: feeds input into jq. Ends when the input is exhausted or
    // jq closes its end of the pipe.
    thread::spawn(move || {
        let mut input = input;
        let mut stdin = stdin;
        let _ = io::copy(&mut input, &mut stdin);
    });

    let mut cancelled = false;
    let mut wait_result = None;
    let mut bytes_out = 0;
    let mut bytes_err = 0;

    thread::scope(|s| {
        let out_copier = s.spawn(|| copy_counted(&mut child_out, out));
        let err_copier = s.spawn(|| copy_counted(&mut child_err, err));

        let waiter_tx = event_tx.clone();
        s.spawn(move || {
            let _ = waiter_tx.send(Event::Done(child.wait()));
        });

        match event_rx.recv() {
            Ok(Event::Done(result)) => wait_result = Some(result),
            Ok(Event::Cancel) => {
                cancelled = true;
                unsafe {
                    libc::kill(pid, libc::SIGTERM);
                }
                // The child is unreaped, so the pid cannot be recycled
                // out from under the kill above.
                wait_result = Some(reap(&event_rx, pid));
            }
            Err(_) => {}
        }

        bytes_out = out_copier.join().unwrap_or(0);
        bytes_err = err_copier.join().unwrap_or(0);
    });

    let status = match wait_result {
        Some(Ok(_)) if cancelled => ExecStatus::Cancelled,
        Some(Ok(status)) if status.success() => ExecStatus::Success,
        Some(Ok(status)) => ExecStatus::NonZero(status.code().unwrap_or(-1)),
        Some(Err(e)) => return Err(JqError::Process(e)),
        None => return Err(JqError::Process(io::Error::other("lost child process"))),
    };

    Ok(ExecResult {
        bytes_out,
        bytes_err,
        status,
    })
}

/// Wait for the Done event after a SIGTERM, escalating to SIGKILL when
/// the child lingers past the grace period.
fn reap(events: &Receiver<Event>, pid: i32) -> io::Result<ExitStatus> {
    let deadline = std::time::Instant::now() + KILL_GRACE;
    loop {
        let left = deadline.saturating_duration_since(std::time::Instant::now());
        match events.recv_timeout(left) {
            Ok(Event::Done(result)) => return result,
            Ok(Event::Cancel) => continue,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                unsafe {
                    libc::kill(pid, libc::SIGKILL);
                }
                loop {
                    match events.recv() {
                        Ok(Event::Done(result)) => return result,
                        Ok(Event::Cancel) => continue,
                        Err(_) => return Err(io::Error::other("lost child process")),
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(io::Error::other("lost child process"));
            }
        }
    }
}

/// Copy `reader` into `writer`, returning the number of bytes actually
/// written. A failed write stops the copy but keeps the count accurate.
fn copy_counted<R, W>(reader: &mut R, writer: &mut W) -> u64
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = [0u8; 8192];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        let mut written = 0;
        while written < n {
            match writer.write(&buf[written..n]) {
                Ok(0) => return total,
                Ok(w) => {
                    written += w;
                    total += w as u64;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return total,
            }
        }
    }
    total
}

/// Run the expression against empty input with a deadline, discarding
/// output. Used to reject a bad filter before it lands on the stack.
pub fn validate(bin: &Path, expr: &str, timeout: Duration) -> anyhow::Result<()> {
    let (cancel_tx, cancel_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();
    let bin = bin.to_path_buf();
    let expr = expr.to_string();

    thread::spawn(move || {
        let mut errbuf = Vec::new();
        let result = execute(
            &mut io::sink(),
            &mut errbuf,
            Box::new(io::empty()),
            Some(cancel_rx),
            &bin,
            false,
            &expr,
        );
        let _ = done_tx.send((result, errbuf));
    });

    match done_rx.recv_timeout(timeout) {
        Ok((Ok(result), errbuf)) => match result.status {
            ExecStatus::Success => Ok(()),
            ExecStatus::NonZero(code) => {
                let detail = String::from_utf8_lossy(&errbuf);
                anyhow::bail!("{} (exit status {})", detail.trim(), code)
            }
            ExecStatus::Cancelled => anyhow::bail!("jq was interrupted"),
        },
        Ok((Err(e), _)) => Err(e.into()),
        Err(_) => {
            let _ = cancel_tx.send(());
            anyhow::bail!("jq timed out processing the filter")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Instant;

    fn bin(name: &str) -> PathBuf {
        PathBuf::from(name)
    }

    #[test]
    fn test_execute_counts_bytes() {
        // `cat` stands in for jq; "-" as the filter expression makes it
        // read stdin instead of a file
        let mut out = Vec::new();
        let mut err = Vec::new();
        let result = execute(
            &mut out,
            &mut err,
            Box::new(&b"hello\n"[..]),
            None,
            &bin("cat"),
            false,
            "-",
        )
        .unwrap();
        assert_eq!(result.status, ExecStatus::Success);
        assert_eq!(result.bytes_out, 6);
        assert_eq!(out, b"hello\n");
        assert_eq!(result.bytes_err, 0);
    }

    #[test]
    fn test_execute_nonzero_exit() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let result = execute(
            &mut out,
            &mut err,
            Box::new(io::empty()),
            None,
            &bin("false"),
            false,
            ".",
        )
        .unwrap();
        assert!(matches!(result.status, ExecStatus::NonZero(_)));
    }

    #[test]
    fn test_execute_launch_failure() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let result = execute(
            &mut out,
            &mut err,
            Box::new(io::empty()),
            None,
            &bin("/nonexistent/jqsh-test-binary"),
            false,
            ".",
        );
        assert!(matches!(result, Err(JqError::Launch(_))));
    }

    #[test]
    fn test_execute_cancelled_promptly() {
        let (cancel_tx, cancel_rx) = mpsc::channel();
        cancel_tx.send(()).unwrap();

        let mut out = Vec::new();
        let mut err = Vec::new();
        let start = Instant::now();
        let result = execute(
            &mut out,
            &mut err,
            Box::new(io::empty()),
            Some(cancel_rx),
            &bin("sleep"),
            false,
            "30",
        )
        .unwrap();
        assert_eq!(result.status, ExecStatus::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_execute_ignores_unfired_cancel() {
        let (_cancel_tx, cancel_rx) = mpsc::channel();
        let mut out = Vec::new();
        let mut err = Vec::new();
        let result = execute(
            &mut out,
            &mut err,
            Box::new(&b"data"[..]),
            Some(cancel_rx),
            &bin("cat"),
            false,
            "-",
        )
        .unwrap();
        assert_eq!(result.status, ExecStatus::Success);
        assert_eq!(result.bytes_out, 4);
    }

    #[test]
    fn test_validate_rejects_failing_expression() {
        // `sh -c "exit 3"` would need a shell; `false` exits nonzero
        // regardless of its arguments.
        let err = validate(&bin("false"), ".", Duration::from_secs(5)).unwrap_err();
        assert!(err.to_string().contains("exit status"));
    }

    #[test]
    fn test_validate_accepts_succeeding_expression() {
        validate(&bin("true"), ".", Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_validate_times_out() {
        let start = Instant::now();
        let err = validate(&bin("sleep"), "30", Duration::from_millis(300)).unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}

//! Output sinks for query results and the program-tagged diagnostic log.
//!
//! Two sinks exist: an interactive pager subprocess and a plain file.
//! Both are scoped resources that must be closed on every exit path,
//! including when the producer feeding them fails midway.

use anyhow::{Context, Result};
use std::env;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Diagnostic sink writing program-tagged lines to stderr.
#[derive(Clone)]
pub struct Log {
    color: bool,
}

impl Log {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    /// Whether colored output is enabled for this session.
    pub fn color(&self) -> bool {
        self.color
    }

    /// Print one tagged diagnostic line.
    pub fn report(&self, message: &str) {
        let choice = if self.color {
            ColorChoice::Auto
        } else {
            ColorChoice::Never
        };
        let mut stderr = StandardStream::stderr(choice);
        let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)));
        let _ = write!(stderr, "jqsh:");
        let _ = stderr.reset();
        let _ = writeln!(stderr, " {}", message);
    }

    /// Print an error with its cause chain, tagged.
    pub fn error(&self, err: &anyhow::Error) {
        self.report(&format!("{err:#}"));
    }
}

/// The pager argument vector: `$PAGER` split on whitespace, or a
/// raw-control-code-friendly `less` invocation.
pub fn pager_command() -> Vec<String> {
    if let Ok(pager) = env::var("PAGER")
        && !pager.trim().is_empty()
    {
        return pager.split_whitespace().map(str::to_string).collect();
    }
    vec!["less".to_string(), "-X".to_string(), "-R".to_string()]
}

/// A sink that pipes writes into a pager subprocess's stdin.
///
/// The pager's exit is observed asynchronously; an early exit (the user
/// quit before the producer finished) fires the cancel channel so the
/// producer can stop. Pager failures are reported through
/// [`close`](Self::close) and never escalate past the log.
pub struct PagerSink {
    stdin: Option<ChildStdin>,
    done: Receiver<io::Result<ExitStatus>>,
    cancel: Option<Receiver<()>>,
}

impl PagerSink {
    /// Spawn the pager and hand back the writable sink.
    pub fn spawn(argv: &[String], color: bool) -> Result<Self> {
        let (program, args) = argv.split_first().context("empty pager command")?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("starting pager {program:?}"))?;

        let stdin = child.stdin.take().context("pager stdin unavailable")?;

        let (done_tx, done_rx) = mpsc::channel();
        let (cancel_tx, cancel_rx) = mpsc::channel();
        thread::spawn(move || {
            let result = child.wait();
            if color {
                // the pager can exit mid escape sequence; reset the
                // terminal's color mode before the prompt returns
                print!("\x1b[0m");
                let _ = io::stdout().flush();
            }
            let _ = cancel_tx.send(());
            let _ = done_tx.send(result);
        });

        Ok(Self {
            stdin: Some(stdin),
            done: done_rx,
            cancel: Some(cancel_rx),
        })
    }

    /// A channel that fires when the pager exits. Wire this into the
    /// producer as its cancel signal. Can be taken once.
    pub fn take_cancel(&mut self) -> Option<Receiver<()>> {
        self.cancel.take()
    }

    /// Close the sink: end the input stream, wait for the pager to
    /// exit, and log a nonzero outcome as a secondary failure.
    pub fn close(mut self, log: &Log) {
        drop(self.stdin.take());
        match self.done.recv() {
            Ok(Ok(status)) if status.success() => {}
            Ok(Ok(status)) => log.report(&format!("pager: exit status {status}")),
            Ok(Err(e)) => log.report(&format!("pager: {e}")),
            Err(_) => {}
        }
    }
}

impl Write for PagerSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.write(buf),
            None => Err(io::Error::from(io::ErrorKind::BrokenPipe)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.flush(),
            None => Ok(()),
        }
    }
}

/// A sink writing query output to a file on disk.
pub struct FileSink {
    path: PathBuf,
    file: File,
}

impl FileSink {
    /// Create (or truncate) the target file.
    pub fn create(path: &Path) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("creating {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and release the file handle.
    pub fn close(mut self) -> Result<()> {
        self.file
            .flush()
            .with_context(|| format!("writing {}", self.path.display()))
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_file_sink_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let mut sink = FileSink::create(&path).unwrap();
        sink.write_all(b"{\"ok\":true}\n").unwrap();
        sink.close().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"ok\":true}\n");
    }

    #[test]
    fn test_pager_sink_streams_and_closes() {
        let log = Log::new(false);
        // consumes everything and exits zero once stdin closes
        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            "cat >/dev/null".to_string(),
        ];
        let mut sink = PagerSink::spawn(&argv, false).unwrap();
        let cancel = sink.take_cancel();
        assert!(cancel.is_some());
        sink.write_all(b"paged output\n").unwrap();
        sink.close(&log);
    }

    #[test]
    fn test_pager_sink_cancel_fires_on_exit() {
        let log = Log::new(false);
        // `true` exits immediately without reading stdin
        let argv = vec!["true".to_string()];
        let mut sink = PagerSink::spawn(&argv, false).unwrap();
        let cancel = sink.take_cancel().unwrap();
        assert!(
            cancel
                .recv_timeout(std::time::Duration::from_secs(5))
                .is_ok()
        );
        sink.close(&log);
    }

    #[test]
    fn test_pager_sink_missing_program() {
        assert!(PagerSink::spawn(&["/nonexistent/jqsh-pager".to_string()], false).is_err());
    }

    #[test]
    fn test_pager_command_shape() {
        // only assert shape; the environment may override $PAGER
        let argv = pager_command();
        assert!(!argv.is_empty());
    }
}

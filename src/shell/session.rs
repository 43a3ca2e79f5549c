//! Session state and the interactive loop.
//!
//! The session owns the filter stack and the current input source; both
//! are mutated only from the loop's dispatch step, which runs commands
//! strictly one at a time. Reading the next command happens on its own
//! thread so the loop is a plain receive-dispatch cycle.

use crate::error::ShellError;
use crate::filter::FilterStack;
use crate::output::{Log, pager_command};
use crate::shell::commands;
use crate::shell::reader::{Command, ShellReader};
use crate::shell::registry::Registry;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

/// A deferred input: each call yields a fresh readable byte stream.
pub type InputProducer = Box<dyn FnMut() -> Result<Box<dyn Read + Send>> + Send>;

/// The current input source queries are applied to.
///
/// There is no explicit unset operation; sources are only ever replaced
/// by load, exec, and pipe style commands.
pub enum InputSource {
    None,
    File {
        path: PathBuf,
        /// Delete the file when the source is replaced or the session
        /// ends.
        is_temp: bool,
    },
    Producer(InputProducer),
}

/// One running shell instance: filter stack, input source, logger, and
/// the jq invocation preferences.
pub struct Session {
    pub stack: FilterStack,
    pub log: Log,
    input: InputSource,
    jq_bin: PathBuf,
    color: bool,
    pager: Vec<String>,
}

impl Session {
    pub fn new(jq_bin: PathBuf, color: bool) -> Self {
        Self {
            stack: FilterStack::new(),
            log: Log::new(color),
            input: InputSource::None,
            jq_bin,
            color,
            pager: pager_command(),
        }
    }

    pub fn jq_bin(&self) -> &Path {
        &self.jq_bin
    }

    pub fn color(&self) -> bool {
        self.color
    }

    /// Pager argument vector used by the pager sink.
    pub fn pager(&self) -> &[String] {
        &self.pager
    }

    pub fn set_pager(&mut self, argv: Vec<String>) {
        self.pager = argv;
    }

    pub fn has_input(&self) -> bool {
        !matches!(self.input, InputSource::None)
    }

    /// Path of the current file input, if the input is a file.
    pub fn input_file(&self) -> Option<&Path> {
        match &self.input {
            InputSource::File { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Replace the input with a file, deleting the previous input file
    /// if it was temporary.
    pub fn set_input_file(&mut self, path: PathBuf, is_temp: bool) {
        self.clear_input();
        self.input = InputSource::File { path, is_temp };
    }

    /// Replace the input with a deferred producer.
    pub fn set_input_producer(&mut self, producer: InputProducer) {
        self.clear_input();
        self.input = InputSource::Producer(producer);
    }

    /// Drop the current input, deleting a temporary file exactly once.
    /// Removal failures are logged, never escalated.
    pub fn clear_input(&mut self) {
        if let InputSource::File { path, is_temp: true } =
            std::mem::replace(&mut self.input, InputSource::None)
            && let Err(e) = fs::remove_file(&path)
        {
            self.log.report(&format!(
                "removing temporary file {}: {e}",
                path.display()
            ));
        }
    }

    /// Open the current input as a readable stream.
    pub fn open_input(&mut self) -> Result<Box<dyn Read + Send>> {
        match &mut self.input {
            InputSource::None => Err(ShellError::NoInput.into()),
            InputSource::File { path, .. } => {
                self.log.report(&format!("open {}", path.display()));
                let file = File::open(&path)
                    .with_context(|| format!("opening {}", path.display()))?;
                Ok(Box::new(file))
            }
            InputSource::Producer(producer) => producer(),
        }
    }
}

enum Flow {
    Continue,
    Quit,
}

/// Run the interactive loop until quit, end of input, or a fatal read
/// error. The current temporary input file is released on every exit
/// path.
pub fn run(
    mut session: Session,
    registry: &Registry,
    reader: Box<dyn ShellReader>,
) -> Result<()> {
    let result = serve(&mut session, registry, reader);
    session.clear_input();
    result
}

fn serve(
    session: &mut Session,
    registry: &Registry,
    mut reader: Box<dyn ShellReader>,
) -> Result<()> {
    let (cmd_tx, cmd_rx) = mpsc::channel();
    let (ready_tx, ready_rx) = mpsc::channel::<()>();

    // The reader blocks awaiting interactive input; it only reads after
    // the loop signals readiness so prompts land after command output.
    thread::spawn(move || {
        while ready_rx.recv().is_ok() {
            let outcome = reader.read_command();
            let finished = matches!(&outcome, Ok(o) if o.finished);
            if cmd_tx.send(outcome).is_err() || finished {
                break;
            }
        }
    });

    if ready_tx.send(()).is_err() {
        return Ok(());
    }
    loop {
        let outcome = match cmd_rx.recv() {
            Ok(outcome) => outcome,
            Err(_) => return Ok(()),
        };
        match outcome {
            Err(err @ ShellError::Read(_)) => return Err(err.into()),
            Err(err) => session.log.report(&err.to_string()),
            Ok(read) => {
                if let Some(command) = read.command
                    && let Flow::Quit = dispatch(session, registry, &command)
                {
                    return Ok(());
                }
                if read.finished {
                    return Ok(());
                }
            }
        }
        if ready_tx.send(()).is_err() {
            return Ok(());
        }
    }
}

/// Run one command, then the implicit write where the command calls for
/// it. A push whose implicit write fails is reverted.
fn dispatch(session: &mut Session, registry: &Registry, command: &Command) -> Flow {
    match registry.execute(session, &command.name, &command.args) {
        Err(err) if ShellError::is_quit(&err) => return Flow::Quit,
        Err(err) => {
            session.log.error(&err);
            return Flow::Continue;
        }
        Ok(()) => {}
    }

    let suppressed = command
        .args
        .iter()
        .any(|a| a == "-q" || a == "-h");
    if registry.auto_writes(&command.name)
        && !suppressed
        && let Err(err) = commands::cmd_write(session, &[])
    {
        session.log.error(&err);
        if command.name == "push" {
            revert_push(session, &command.args);
        }
    }
    Flow::Continue
}

fn revert_push(session: &mut Session, args: &[String]) {
    let pushed = args
        .iter()
        .filter(|a| !a.starts_with('-') && !a.is_empty())
        .count()
        .max(1);
    session.log.report("reverting push operation");
    if let Err(err) = session.stack.pop(pushed) {
        session.log.report(&err.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn session() -> Session {
        Session::new(PathBuf::from("true"), false)
    }

    fn temp_input(content: &str) -> PathBuf {
        let file = tempfile::Builder::new()
            .prefix("jqsh-test-")
            .tempfile()
            .unwrap();
        std::fs::write(file.path(), content).unwrap();
        let (_, path) = file.keep().unwrap();
        path
    }

    #[test]
    fn test_no_input_initially() {
        let mut sess = session();
        assert!(!sess.has_input());
        let err = match sess.open_input() {
            Ok(_) => panic!("expected open_input to fail with no input"),
            Err(e) => e,
        };
        assert!(matches!(
            err.downcast_ref::<ShellError>(),
            Some(ShellError::NoInput)
        ));
    }

    #[test]
    fn test_replacing_temp_file_deletes_old() {
        let mut sess = session();
        let old = temp_input("{}");
        let new = temp_input("[]");

        sess.set_input_file(old.clone(), true);
        sess.set_input_file(new.clone(), true);
        assert!(!old.exists());
        assert!(new.exists());

        sess.clear_input();
        assert!(!new.exists());
    }

    #[test]
    fn test_non_temp_file_survives_replacement() {
        let mut sess = session();
        let kept = temp_input("{}");
        sess.set_input_file(kept.clone(), false);
        sess.set_input_file(temp_input("[]"), true);
        assert!(kept.exists());
        sess.clear_input();
        std::fs::remove_file(&kept).unwrap();
    }

    #[test]
    fn test_clear_input_is_idempotent() {
        let mut sess = session();
        let path = temp_input("{}");
        sess.set_input_file(path.clone(), true);
        sess.clear_input();
        sess.clear_input();
        assert!(!path.exists());
        assert!(!sess.has_input());
    }

    #[test]
    fn test_producer_input_reads() {
        let mut sess = session();
        sess.set_input_producer(Box::new(|| {
            Ok(Box::new(Cursor::new(b"produced".to_vec())))
        }));
        assert!(sess.has_input());
        let mut buf = String::new();
        sess.open_input().unwrap().read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "produced");
    }

    #[test]
    fn test_producer_replaced_by_file() {
        let mut sess = session();
        sess.set_input_producer(Box::new(|| {
            Ok(Box::new(Cursor::new(Vec::new())))
        }));
        let path = temp_input("{}");
        sess.set_input_file(path.clone(), true);
        assert_eq!(sess.input_file(), Some(path.as_path()));
        sess.clear_input();
    }

    #[test]
    fn test_file_input_opens() {
        let mut sess = session();
        let path = temp_input("{\"a\":1}");
        sess.set_input_file(path, true);
        let mut buf = String::new();
        sess.open_input().unwrap().read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "{\"a\":1}");
        sess.clear_input();
    }
}

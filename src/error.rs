//! Error types shared across the shell.

use std::io;
use thiserror::Error;

/// Errors produced by the shell layers: line parsing, dispatch, and the
/// filter stack. Recoverable variants are logged by the session loop and
/// the prompt returns; only `Read` is fatal to the session.
#[derive(Debug, Error)]
pub enum ShellError {
    /// A line that cannot be tokenized (e.g. an unterminated quote).
    #[error("malformed command: {0}")]
    Malformed(String),

    /// Command name not present in the registry.
    #[error("{0}: unknown command")]
    Unknown(String),

    /// Pop requested on a stack that is already empty.
    #[error("the stack is empty")]
    StackEmpty,

    /// An operation needed an input source but none has been declared.
    #[error("no input has been declared")]
    NoInput,

    /// Explicit quit request; unwound through the dispatch layer to stop
    /// the session loop.
    #[error("exit")]
    Quit,

    /// The interactive source itself failed (not ordinary end-of-input).
    #[error("reading input")]
    Read(#[source] io::Error),
}

impl ShellError {
    /// True when `err` is, or wraps, a quit request.
    pub fn is_quit(err: &anyhow::Error) -> bool {
        err.chain()
            .any(|cause| matches!(cause.downcast_ref::<ShellError>(), Some(ShellError::Quit)))
    }
}

/// Errors from locating and running the jq executable.
#[derive(Debug, Error)]
pub enum JqError {
    /// No jq executable on PATH and none was supplied.
    #[error("jq executable not found")]
    NotFound,

    /// The executable did not report a recognizable jq version.
    #[error("executable doesn't look like jq: {0:?}")]
    BadVersion(String),

    /// The subprocess could not be started at all. Distinct from a
    /// subprocess that ran and exited nonzero.
    #[error("starting jq")]
    Launch(#[source] io::Error),

    /// The subprocess started but could not be monitored to completion.
    #[error("waiting on jq")]
    Process(#[source] io::Error),
}

//! # jqsh - an interactive shell around jq
//!
//! jqsh wraps the jq command line utility so a JSON structure can be
//! explored without retyping ever-longer filter expressions. The core
//! concept is a stack of jq filters: pushing drills into the structure,
//! popping zooms back out, and the joined stack is applied to the
//! current input on demand.
//!
//! ## Architecture
//!
//! The crate is organized into these main modules:
//!
//! - [`filter`] - The filter stack and fragment joining
//! - [`shell`] - Line reading, command dispatch, and the session loop
//! - [`jq`] - Discovery of and cancellable execution of the jq binary
//! - [`output`] - Pager/file output sinks and the diagnostic log
//! - [`error`] - Typed error kinds shared across the layers
//!
//! ## Quick start
//!
//! ```ignore
//! use jqsh::shell::{self, LineReader, Session, builtin_registry};
//! use std::path::PathBuf;
//!
//! let registry = builtin_registry().unwrap();
//! let session = Session::new(PathBuf::from("jq"), true);
//! let reader = Box::new(LineReader::stdin("> "));
//! shell::run(session, &registry, reader).unwrap();
//! ```

pub mod error;
pub mod filter;
pub mod jq;
pub mod output;
pub mod shell;

//! The interactive shell: line reading, command dispatch, and the
//! session loop that ties them to the jq wrapper.

pub mod commands;
pub mod reader;
pub mod registry;
pub mod session;

pub use commands::{builtin_registry, shell_quote};
pub use reader::{Command, InitReader, LineReader, ReadOutcome, ShellReader};
pub use registry::{CommandSpec, Registry};
pub use session::{InputProducer, InputSource, Session, run};

//! Command dispatch table.
//!
//! Maps command names to handlers plus usage text, and carries static
//! help topics. Registration conflicts are configuration errors caught
//! while the table is assembled at startup, before the session loop
//! runs.

use crate::error::ShellError;
use crate::shell::session::Session;
use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;

/// Handler for one shell command.
pub type CommandFn = fn(&mut Session, &[String]) -> Result<()>;

/// A command registration: name, documentation, and behavior.
pub struct CommandSpec {
    pub name: &'static str,
    /// One-line summary shown in the help listing.
    pub about: &'static str,
    /// Usage block shown by `-h` and `help <name>`.
    pub usage: &'static str,
    /// Whether the session loop runs an implicit `write` after this
    /// command succeeds.
    pub auto_write: bool,
    pub handler: CommandFn,
}

struct Entry {
    about: &'static str,
    usage: &'static str,
    auto_write: bool,
    /// None marks the built-in help command.
    handler: Option<CommandFn>,
}

/// The command registry. `help` is always present and always special.
pub struct Registry {
    commands: BTreeMap<String, Entry>,
    topics: BTreeMap<String, &'static str>,
}

const HELP_ABOUT: &str = "Browse documentation for commands and other topics.";
const HELP_USAGE: &str = "\
usage:
  help [topic]

arguments and flags:
  topic: a command name or other help topic";

impl Registry {
    pub fn new() -> Self {
        let mut commands = BTreeMap::new();
        commands.insert(
            "help".to_string(),
            Entry {
                about: HELP_ABOUT,
                usage: HELP_USAGE,
                auto_write: false,
                handler: None,
            },
        );
        Self {
            commands,
            topics: BTreeMap::new(),
        }
    }

    /// Register a command. A name already taken by a command or a help
    /// topic is a configuration error.
    pub fn register(&mut self, spec: CommandSpec) -> Result<()> {
        self.claim(spec.name)?;
        self.commands.insert(
            spec.name.to_string(),
            Entry {
                about: spec.about,
                usage: spec.usage,
                auto_write: spec.auto_write,
                handler: Some(spec.handler),
            },
        );
        Ok(())
    }

    /// Register a static help topic under `name`.
    pub fn register_topic(&mut self, name: &'static str, text: &'static str) -> Result<()> {
        self.claim(name)?;
        self.topics.insert(name.to_string(), text);
        Ok(())
    }

    fn claim(&self, name: &str) -> Result<()> {
        if self.commands.contains_key(name) {
            bail!("{name:?} command already registered");
        }
        if self.topics.contains_key(name) {
            bail!("{name:?} help topic already registered");
        }
        Ok(())
    }

    /// Whether the loop should auto-write after `name` succeeds.
    pub fn auto_writes(&self, name: &str) -> bool {
        self.commands
            .get(name)
            .map(|entry| entry.auto_write)
            .unwrap_or(false)
    }

    /// Resolve and run a command. Handler errors are wrapped with the
    /// attempted command name so top-level logging is uniform and the
    /// original cause stays matchable.
    pub fn execute(&self, session: &mut Session, name: &str, args: &[String]) -> Result<()> {
        let Some(entry) = self.commands.get(name) else {
            return Err(ShellError::Unknown(name.to_string()).into());
        };
        if args.iter().any(|a| a == "-h") {
            print_usage(entry);
            return Ok(());
        }
        let result = match entry.handler {
            Some(handler) => handler(session, args),
            None => self.help(args),
        };
        result.with_context(|| name.to_string())
    }

    fn help(&self, args: &[String]) -> Result<()> {
        match args.len() {
            0 => {
                self.help_list();
                Ok(())
            }
            1 => self.help_name(&args[0]),
            _ => bail!("at most one help topic is allowed"),
        }
    }

    fn help_name(&self, name: &str) -> Result<()> {
        if let Some(entry) = self.commands.get(name) {
            print_usage(entry);
            return Ok(());
        }
        if let Some(text) = self.topics.get(name) {
            println!("{}", text.trim_end());
            return Ok(());
        }
        bail!("unknown topic")
    }

    fn help_list(&self) {
        let width = self
            .commands
            .keys()
            .chain(self.topics.keys())
            .map(|name| name.len())
            .max()
            .unwrap_or(0);

        println!("commands:");
        for (name, entry) in &self.commands {
            println!("  {name:<width$}  {}", entry.about);
        }
        if !self.topics.is_empty() {
            println!("other topics:");
            for (name, text) in &self.topics {
                println!("  {name:<width$}  {}", synopsis(text));
            }
        }
        println!();
        println!("for information on a topic run `help <topic>`");
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn print_usage(entry: &Entry) {
    println!("{}\n\n{}", entry.about, entry.usage);
}

/// First non-empty line of a topic text, for the help listing.
fn synopsis(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
}

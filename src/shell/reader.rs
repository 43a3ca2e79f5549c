//! Line reader and command grammar.
//!
//! Turns one line of interactive input into a [`Command`], applying the
//! shorthand rules:
//!
//! ```text
//! :<cmd> <arg1> <arg2> ...    execute cmd with the given arguments
//! :<cmd> ... +<argN>          last argument is the rest of the line, verbatim
//! .                           shorthand for ":write"
//! ..                          shorthand for ":pop"
//! ?<filter>                   shorthand for ":peek +<filter>"
//! <filter>                    shorthand for ":push +<filter>"
//! ```
//!
//! Explicit command arguments may be single- or double-quoted, with a
//! backslash escaping the matching quote. No lexer state persists
//! across lines.

use crate::error::ShellError;
use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read, Write};

/// One parsed interactive command: a name and its arguments. Produced
/// fresh per input line, never retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
}

impl Command {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    fn bare(name: &str) -> Self {
        Self::new(name, Vec::new())
    }
}

/// Result of one read: possibly a command, and whether the input source
/// is exhausted. After `finished` the reader must not be asked again.
#[derive(Debug)]
pub struct ReadOutcome {
    pub command: Option<Command>,
    pub finished: bool,
}

/// A source of interactive commands.
pub trait ShellReader: Send {
    fn read_command(&mut self) -> Result<ReadOutcome, ShellError>;
}

/// Reads commands line by line from a byte stream, prompting on stdout.
pub struct LineReader<R: Read> {
    input: BufReader<R>,
    prompt: String,
}

impl LineReader<io::Stdin> {
    /// A reader over the process's standard input.
    pub fn stdin(prompt: &str) -> Self {
        Self::new(io::stdin(), prompt)
    }
}

impl<R: Read> LineReader<R> {
    pub fn new(input: R, prompt: &str) -> Self {
        Self {
            input: BufReader::new(input),
            prompt: prompt.to_string(),
        }
    }

    fn show_prompt(&self) {
        if !self.prompt.is_empty() {
            print!("{}", self.prompt);
            let _ = io::stdout().flush();
        }
    }
}

impl<R: Read + Send> ShellReader for LineReader<R> {
    fn read_command(&mut self) -> Result<ReadOutcome, ShellError> {
        self.show_prompt();

        let mut raw = Vec::new();
        let n = self
            .input
            .read_until(b'\n', &mut raw)
            .map_err(ShellError::Read)?;
        let finished = n == 0 || !raw.ends_with(b"\n");

        if n == 0 {
            // move past the dangling prompt for a clean exit
            if !self.prompt.is_empty() {
                println!();
            }
            return Ok(ReadOutcome {
                command: None,
                finished: true,
            });
        }

        let line = String::from_utf8(raw)
            .map_err(|_| ShellError::Malformed("input is not valid utf-8".to_string()))?;
        Ok(ReadOutcome {
            command: parse_line(line.trim())?,
            finished,
        })
    }
}

/// Plays a fixed list of commands before handing over to an inner
/// reader. Used to turn startup file arguments into initial commands.
pub struct InitReader<R> {
    queue: VecDeque<Command>,
    inner: R,
}

impl<R> InitReader<R> {
    pub fn new(init: Vec<Command>, inner: R) -> Self {
        Self {
            queue: init.into(),
            inner,
        }
    }
}

impl<R: ShellReader> ShellReader for InitReader<R> {
    fn read_command(&mut self) -> Result<ReadOutcome, ShellError> {
        if let Some(command) = self.queue.pop_front() {
            return Ok(ReadOutcome {
                command: Some(command),
                finished: false,
            });
        }
        self.inner.read_command()
    }
}

/// Parse one trimmed line into a command, applying the shorthands.
pub fn parse_line(line: &str) -> Result<Option<Command>, ShellError> {
    if line.is_empty() || line == "." {
        return Ok(Some(Command::bare("write")));
    }
    if line == ".." {
        return Ok(Some(Command::bare("pop")));
    }
    if let Some(rest) = line.strip_prefix('?') {
        let args = if rest.is_empty() {
            Vec::new()
        } else {
            vec![rest.to_string()]
        };
        return Ok(Some(Command::new("peek", args)));
    }
    if let Some(rest) = line.strip_prefix(':') {
        return Ok(Some(tokenize(rest)?));
    }
    Ok(Some(Command::new("push", vec![line.to_string()])))
}

/// Tokenizer for explicit `:command` lines.
struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn run(&mut self) -> Result<Vec<String>, ShellError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let Some(c) = self.peek_char() else {
                break;
            };
            match c {
                '+' => {
                    // slurp: the rest of the line is one verbatim token
                    self.advance();
                    tokens.push(self.remaining().to_string());
                    self.pos = self.input.len();
                    break;
                }
                '\'' | '"' => tokens.push(self.quoted(c)?),
                _ => tokens.push(self.bare()),
            }
        }
        Ok(tokens)
    }

    fn bare(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                break;
            }
            self.advance();
        }
        self.input[start..self.pos].to_string()
    }

    fn quoted(&mut self, quote: char) -> Result<String, ShellError> {
        self.advance();
        let mut token = String::new();
        loop {
            let Some(c) = self.peek_char() else {
                return Err(ShellError::Malformed(format!(
                    "unterminated {quote} quote"
                )));
            };
            self.advance();
            if c == quote {
                // the closing quote must end the token
                if let Some(next) = self.peek_char()
                    && !next.is_whitespace()
                {
                    return Err(ShellError::Malformed(format!(
                        "quoted string followed by {next:?}"
                    )));
                }
                return Ok(token);
            }
            if c == '\\' {
                match self.peek_char() {
                    Some(next) if next == quote || next == '\\' => {
                        token.push(next);
                        self.advance();
                    }
                    Some(_) | None => token.push('\\'),
                }
                continue;
            }
            token.push(c);
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if !c.is_whitespace() {
                break;
            }
            self.advance();
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
        }
    }

    fn remaining(&self) -> &str {
        &self.input[self.pos..]
    }
}

fn tokenize(body: &str) -> Result<Command, ShellError> {
    let mut tokens = Tokenizer::new(body).run()?;
    if tokens.is_empty() {
        return Ok(Command::bare("write"));
    }
    let name = tokens.remove(0);
    Ok(Command::new(name, tokens))
}

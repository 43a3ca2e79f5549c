//! Built-in shell commands and the registry assembly.

use crate::error::ShellError;
use crate::filter::FilterText;
use crate::jq::{self, ExecResult, ExecStatus};
use crate::output::{FileSink, Log, PagerSink};
use crate::shell::registry::{CommandSpec, Registry};
use crate::shell::session::Session;
use anyhow::{Context, Result, bail};
use std::env;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

/// Deadline for validating a filter against empty input.
const VALIDATE_TIMEOUT: Duration = Duration::from_secs(10);

const SYNTAX_TOPIC: &str = "\
The simple shell syntax.

Lines prefixed with a colon ':' are commands, other lines are shorthand
for specific commands:

  :<cmd> <arg1> <arg2> ...    execute cmd with the given arguments
  :<cmd> ... +<argN>          the rest of the line is one argument (argN)
  .                           shorthand for \":write\"
  ..                          shorthand for \":pop\"
  ?<filter>                   shorthand for \":peek +<filter>\"
  <filter>                    shorthand for \":push +<filter>\"

Arguments may be single- or double-quoted; a backslash escapes the
matching quote character. Note that \".\" is a valid jq filter but
pushing it on the filter stack lacks semantic value, so \".\" alone on a
line is a shorthand for \":write\" instead.";

/// Assemble the command registry. A name conflict here is a
/// configuration error and aborts startup.
pub fn builtin_registry() -> Result<Registry> {
    let mut reg = Registry::new();
    reg.register(CommandSpec {
        name: "push",
        about: "Add a filter to the stack.",
        usage: "\
usage:
  push [-q] filter ...

arguments and flags:
  filter: a jq filter (may contain pipes '|')
  -q: quiet, skip the implicit write afterwards",
        auto_write: true,
        handler: cmd_push,
    })?;
    reg.register(CommandSpec {
        name: "pop",
        about: "Remove the most recently pushed filter(s) from the stack.",
        usage: "\
usage:
  pop [-q] [n]

arguments and flags:
  n: the number of filters to pop (default 1)
  -q: quiet, skip the implicit write afterwards",
        auto_write: true,
        handler: cmd_pop,
    })?;
    reg.register(CommandSpec {
        name: "popall",
        about: "Remove all filters from the stack.",
        usage: "\
usage:
  popall [-q]

arguments and flags:
  -q: quiet, skip the implicit write afterwards",
        auto_write: true,
        handler: cmd_popall,
    })?;
    reg.register(CommandSpec {
        name: "peek",
        about: "Apply filters without pushing them on the stack.",
        usage: "\
usage:
  peek filter ...

arguments and flags:
  filter: a jq filter (may contain pipes '|')",
        auto_write: false,
        handler: cmd_peek,
    })?;
    reg.register(CommandSpec {
        name: "filter",
        about: "Print the current filter stack.",
        usage: "\
usage:
  filter [-jq]

arguments and flags:
  -jq: print the stack as a single jq expression",
        auto_write: false,
        handler: cmd_filter,
    })?;
    reg.register(CommandSpec {
        name: "script",
        about: "Generate a shell script from the current filter.",
        usage: "\
usage:
  script",
        auto_write: false,
        handler: cmd_script,
    })?;
    reg.register(CommandSpec {
        name: "load",
        about: "Set the input to the contents of a file.",
        usage: "\
usage:
  load [-q] [-k] filename

arguments and flags:
  filename: a file containing json data
  -q: quiet, skip the implicit write afterwards
  -k: keep the current filter stack",
        auto_write: true,
        handler: cmd_load,
    })?;
    reg.register(CommandSpec {
        name: "exec",
        about: "Set the input to the output of a command.",
        usage: "\
usage:
  exec [-c] [-q] [-k] name [arg ...]

arguments and flags:
  name: the program to run
  arg: arguments passed to the program
  -c: do not cache the output, rerun the program for every query
  -q: quiet, skip the implicit write afterwards
  -k: keep the current filter stack",
        auto_write: true,
        handler: cmd_exec,
    })?;
    reg.register(CommandSpec {
        name: "pipe",
        about: "Run a shell command to produce input or consume output.",
        usage: "\
usage:
  pipe [-in] [-c] [-q] [-k] [-ignore] cmd
  pipe -out [-color] cmd

arguments and flags:
  cmd: a shell script to execute (use + to include spaces)
  -in: set the input to cmd's stdout (the default)
  -out: write filter output to cmd's stdin
  -c: do not cache the input, rerun cmd for every query
  -q: quiet, skip the implicit write after setting input
  -k: keep the current filter stack
  -ignore: ignore cmd's exit status when setting input
  -color: allow escape codes in the output piped to cmd",
        auto_write: false,
        handler: cmd_pipe,
    })?;
    reg.register(CommandSpec {
        name: "write",
        about: "Write filter output to the pager or a file.",
        usage: "\
usage:
  write [filename]

arguments and flags:
  filename: write to a file instead of the pager",
        auto_write: false,
        handler: cmd_write,
    })?;
    reg.register(CommandSpec {
        name: "raw",
        about: "Write the input to the pager or a file without filtering.",
        usage: "\
usage:
  raw [filename]

arguments and flags:
  filename: write to a file instead of the pager",
        auto_write: false,
        handler: cmd_raw,
    })?;
    reg.register(CommandSpec {
        name: "quit",
        about: "Exit the shell.",
        usage: "\
usage:
  quit",
        auto_write: false,
        handler: cmd_quit,
    })?;
    reg.register_topic("syntax", SYNTAX_TOPIC)?;
    Ok(reg)
}

/// Split leading `-flag` tokens off the argument list.
fn split_flags(args: &[String]) -> (Vec<&str>, &[String]) {
    let mut end = 0;
    while end < args.len() && args[end].starts_with('-') && args[end].len() > 1 {
        end += 1;
    }
    (args[..end].iter().map(String::as_str).collect(), &args[end..])
}

fn check_flags(flags: &[&str], allowed: &[&str]) -> Result<()> {
    for flag in flags {
        if !allowed.contains(flag) {
            bail!("unknown flag {flag}");
        }
    }
    Ok(())
}

fn has_flag(flags: &[&str], name: &str) -> bool {
    flags.contains(&name)
}

pub fn cmd_push(session: &mut Session, args: &[String]) -> Result<()> {
    let (flags, filters) = split_flags(args);
    check_flags(&flags, &["-q"])?;

    let mut pushed = 0;
    for filter in filters {
        if filter.is_empty() {
            continue;
        }
        session.stack.push(FilterText(filter.clone()));
        pushed += 1;
    }
    if pushed == 0 {
        return Ok(());
    }

    // reject a filter jq itself cannot parse before it settles on the
    // stack
    if let Err(err) = jq::validate(session.jq_bin(), &session.stack.joined(), VALIDATE_TIMEOUT) {
        let _ = session.stack.pop(pushed);
        return Err(err.context("invalid filter"));
    }
    Ok(())
}

pub fn cmd_pop(session: &mut Session, args: &[String]) -> Result<()> {
    let (flags, rest) = split_flags(args);
    check_flags(&flags, &["-q"])?;

    let n = match rest {
        [] => 1,
        [count] => count
            .parse::<usize>()
            .map_err(|_| anyhow::anyhow!("argument must be a positive integer"))?,
        _ => bail!("too many arguments given"),
    };
    session.stack.pop(n)?;
    Ok(())
}

pub fn cmd_popall(session: &mut Session, args: &[String]) -> Result<()> {
    let (flags, rest) = split_flags(args);
    check_flags(&flags, &["-q"])?;
    if !rest.is_empty() {
        bail!("no arguments expected");
    }
    session.stack.pop_all();
    Ok(())
}

pub fn cmd_peek(session: &mut Session, args: &[String]) -> Result<()> {
    let (flags, filters) = split_flags(args);
    check_flags(&flags, &[])?;

    let mut pushed = 0;
    for filter in filters {
        if filter.is_empty() {
            continue;
        }
        session.stack.push(FilterText(filter.clone()));
        pushed += 1;
    }

    let result = cmd_write(session, &[]);
    if pushed > 0 {
        let _ = session.stack.pop(pushed);
    }
    result.context("invalid filter")
}

pub fn cmd_filter(session: &mut Session, args: &[String]) -> Result<()> {
    let (flags, rest) = split_flags(args);
    check_flags(&flags, &["-jq"])?;
    if !rest.is_empty() {
        bail!("no arguments expected");
    }

    if has_flag(&flags, "-jq") {
        println!("{}", session.stack.joined());
        return Ok(());
    }
    let fragments = session.stack.fragments();
    if fragments.is_empty() {
        session.log.report("no filter");
        return Ok(());
    }
    for (i, piece) in fragments.iter().enumerate() {
        println!("[{i:02}] {piece}");
    }
    Ok(())
}

pub fn cmd_script(session: &mut Session, args: &[String]) -> Result<()> {
    let (flags, rest) = split_flags(args);
    check_flags(&flags, &[])?;
    if !rest.is_empty() {
        bail!("no arguments expected");
    }
    println!("{}", build_script(&session.stack.joined()));
    Ok(())
}

/// A standalone shell script applying the current filter to its
/// argument files.
fn build_script(expr: &str) -> String {
    format!("#!/usr/bin/env sh\n\njq {} \"${{@}}\"", shell_quote(expr))
}

/// Single-quote a string for the shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

pub fn cmd_load(session: &mut Session, args: &[String]) -> Result<()> {
    let (flags, rest) = split_flags(args);
    check_flags(&flags, &["-q", "-k"])?;

    let [filename] = rest else {
        bail!("expects one filename");
    };
    let path = PathBuf::from(filename);
    // verify the file is readable before committing to it as input
    std::fs::File::open(&path).with_context(|| format!("opening {}", path.display()))?;

    session.set_input_file(path, false);
    if !has_flag(&flags, "-k") {
        session.stack.pop_all();
    }
    Ok(())
}

pub fn cmd_exec(session: &mut Session, args: &[String]) -> Result<()> {
    let (flags, rest) = split_flags(args);
    check_flags(&flags, &["-c", "-q", "-k"])?;

    let Some((program, prog_args)) = rest.split_first() else {
        bail!("missing command");
    };
    if has_flag(&flags, "-c") {
        set_producer(session, program.clone(), prog_args.to_vec());
    } else {
        capture_to_temp(session, program, prog_args, false)?;
    }
    if !has_flag(&flags, "-k") {
        session.stack.pop_all();
    }
    Ok(())
}

pub fn cmd_pipe(session: &mut Session, args: &[String]) -> Result<()> {
    let (flags, rest) = split_flags(args);
    check_flags(&flags, &["-in", "-out", "-q", "-k", "-ignore", "-c", "-color"])?;

    let [script] = rest else {
        if rest.is_empty() {
            bail!("missing command");
        }
        bail!("expects exactly one command");
    };
    let pipe_in = has_flag(&flags, "-in");
    let pipe_out = has_flag(&flags, "-out");
    if pipe_in && pipe_out {
        bail!("command cannot be both input and output");
    }

    if pipe_out {
        return pipe_to(session, script, has_flag(&flags, "-color"));
    }

    let shell = login_shell();
    let script_args = vec!["-c".to_string(), script.clone()];
    if has_flag(&flags, "-c") {
        set_producer(session, shell, script_args);
    } else {
        capture_to_temp(session, &shell, &script_args, has_flag(&flags, "-ignore"))?;
    }
    if !has_flag(&flags, "-k") {
        session.stack.pop_all();
    }
    if !has_flag(&flags, "-q") {
        return cmd_write(session, &[]);
    }
    Ok(())
}

fn login_shell() -> String {
    env::var("SHELL")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "sh".to_string())
}

/// Make the input a producer that reruns `program` for every query.
/// Exit statuses are reported asynchronously through the log.
fn set_producer(session: &mut Session, program: String, args: Vec<String>) {
    let log = session.log.clone();
    session.set_input_producer(Box::new(move || {
        spawn_reading(&program, &args, &log)
    }));
}

fn spawn_reading(program: &str, args: &[String], log: &Log) -> Result<Box<dyn Read + Send>> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("starting {program}"))?;
    let stdout = child.stdout.take().context("child stdout unavailable")?;

    let log = log.clone();
    let program = program.to_string();
    thread::spawn(move || match child.wait() {
        Ok(status) if status.success() => log.report(&format!("{program}: exit status 0")),
        Ok(status) => log.report(&format!("{program}: {status}")),
        Err(e) => log.report(&format!("{program}: {e}")),
    });
    Ok(Box::new(stdout))
}

/// Run `program` once, capturing its stdout into a temporary file that
/// becomes the session input. The file is marked temporary so it is
/// deleted when the input is next replaced or the session ends.
fn capture_to_temp(
    session: &mut Session,
    program: &str,
    args: &[String],
    ignore_status: bool,
) -> Result<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix("jqsh-exec-")
        .tempfile()
        .context("creating temp file")?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("starting {program}"))?;
    let mut stdout = child.stdout.take().context("child stdout unavailable")?;

    io::copy(&mut stdout, tmp.as_file_mut())
        .with_context(|| format!("capturing {program} output"))?;
    let status = child.wait().with_context(|| format!("waiting on {program}"))?;
    if !status.success() && !ignore_status {
        bail!("{program}: {status}");
    }

    let (_, path) = tmp.keep().context("keeping temp file")?;
    session.set_input_file(path, true);
    Ok(())
}

/// Feed filter output into a shell command's stdin.
fn pipe_to(session: &mut Session, script: &str, color: bool) -> Result<()> {
    if !session.has_input() {
        session.log.report("no input has been declared");
    }

    let shell = login_shell();
    let mut child = Command::new(&shell)
        .arg("-c")
        .arg(script)
        .stdin(Stdio::piped())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("starting {shell}"))?;
    let mut stdin = child.stdin.take().context("child stdin unavailable")?;

    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = done_tx.send(child.wait());
    });

    let result = write_into(session, &mut stdin, color, None);
    drop(stdin);
    let status = done_rx.recv();
    result?;
    match status {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => bail!("{shell}: {status}"),
        Ok(Err(e)) => Err(e).with_context(|| format!("waiting on {shell}")),
        Err(_) => Ok(()),
    }
}

pub fn cmd_write(session: &mut Session, args: &[String]) -> Result<()> {
    let (flags, rest) = split_flags(args);
    check_flags(&flags, &[])?;

    // warn but continue; paging empty output is harmless and the user
    // learns the session state
    if !session.has_input() {
        session.log.report("no input has been declared");
    }
    match rest {
        [] => write_page(session),
        [filename] => write_file(session, Path::new(filename)),
        _ => bail!("expects at most one filename"),
    }
}

fn write_page(session: &mut Session) -> Result<()> {
    let argv = session.pager().to_vec();
    let mut pager = PagerSink::spawn(&argv, session.color())?;
    let cancel = pager.take_cancel();
    let result = write_into(session, &mut pager, session.color(), cancel);
    pager.close(&session.log);
    result.map(|_| ())
}

fn write_file(session: &mut Session, path: &Path) -> Result<()> {
    let mut sink = FileSink::create(path)?;
    let result = write_into(session, &mut sink, false, None);
    let closed = sink.close();
    let written = result?;
    closed?;
    if let Some(res) = written {
        session.log.report(&format!(
            "{} bytes written to {}",
            res.bytes_out,
            path.display()
        ));
    }
    Ok(())
}

/// Shared write plumbing: run jq over the current input into `sink`.
///
/// Returns Ok(None) when no input is declared (nothing is written), and
/// an error when jq exits nonzero so callers can treat a bad filter as
/// a failure. A cancelled run is not a failure; the sink owner chose to
/// stop consuming.
fn write_into(
    session: &mut Session,
    sink: &mut (dyn Write + Send),
    color: bool,
    cancel: Option<Receiver<()>>,
) -> Result<Option<ExecResult>> {
    let input = match session.open_input() {
        Ok(input) => input,
        Err(err) => {
            return match err.downcast_ref::<ShellError>() {
                Some(ShellError::NoInput) => Ok(None),
                _ => Err(err),
            };
        }
    };
    let result = jq::execute(
        sink,
        &mut io::stderr(),
        input,
        cancel,
        session.jq_bin(),
        color,
        &session.stack.joined(),
    )?;
    match result.status {
        ExecStatus::Success | ExecStatus::Cancelled => Ok(Some(result)),
        ExecStatus::NonZero(code) => bail!("jq: exit status {code}"),
    }
}

pub fn cmd_raw(session: &mut Session, args: &[String]) -> Result<()> {
    let (flags, rest) = split_flags(args);
    check_flags(&flags, &[])?;

    let mut input = session.open_input()?;
    match rest {
        [] => {
            let argv = session.pager().to_vec();
            let mut pager = PagerSink::spawn(&argv, session.color())?;
            let copied = io::copy(&mut input, &mut pager);
            pager.close(&session.log);
            match copied {
                // the pager exited early; not an error
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                Err(e) => Err(e).context("copying input"),
                Ok(_) => Ok(()),
            }
        }
        [filename] => {
            let path = Path::new(filename);
            let mut sink = FileSink::create(path)?;
            let copied = io::copy(&mut input, &mut sink).context("copying input");
            let closed = sink.close();
            let n = copied?;
            closed?;
            session
                .log
                .report(&format!("{n} bytes written to {}", path.display()));
            Ok(())
        }
        _ => bail!("expects at most one filename"),
    }
}

pub fn cmd_quit(_session: &mut Session, args: &[String]) -> Result<()> {
    let (flags, rest) = split_flags(args);
    check_flags(&flags, &[])?;
    if !rest.is_empty() {
        bail!("no arguments expected");
    }
    Err(ShellError::Quit.into())
}

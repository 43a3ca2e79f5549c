//! End-to-end session flows driven through the interactive loop.
//!
//! A stub jq script stands in for the real executable: it records the
//! filter expression it was invoked with and copies stdin through, so
//! the tests can observe exactly which joined expression each write
//! applied without depending on jq being installed.

use jqsh::error::ShellError;
use jqsh::shell::{InitReader, LineReader, Session, ShellReader, builtin_registry, run};
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::PathBuf;

struct Fixture {
    #[allow(dead_code)]
    dir: tempfile::TempDir,
    stub: PathBuf,
    exprs: PathBuf,
    root: PathBuf,
}

/// Create a stub jq that appends its filter argument to `exprs.log`
/// and copies stdin to stdout.
fn fixture() -> Fixture {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let exprs = root.join("exprs.log");
    let stub = root.join("jq-stub");
    fs::write(
        &stub,
        format!("#!/bin/sh\nprintf '%s\\n' \"$1\" >> {}\nexec cat\n", exprs.display()),
    )
    .unwrap();
    fs::set_permissions(&stub, fs::Permissions::from_mode(0o755)).unwrap();

    Fixture {
        dir,
        stub,
        exprs,
        root,
    }
}

impl Fixture {
    fn session(&self) -> Session {
        let mut session = Session::new(self.stub.clone(), false);
        // silence the pager; auto-writes drain into it
        session.set_pager(
            ["sh", "-c", "cat >/dev/null"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        session
    }

    fn data_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.root.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn last_expr(&self) -> String {
        let log = fs::read_to_string(&self.exprs).unwrap();
        log.lines().last().unwrap_or("").to_string()
    }
}

fn script_reader(script: String) -> Box<dyn ShellReader> {
    Box::new(LineReader::new(Cursor::new(script), ""))
}

#[test]
fn test_load_push_pop_write_applies_remaining_filter() {
    let fx = fixture();
    let data = fx.data_file("data.json", "{\"items\":[1,2]}");
    let out = fx.root.join("out.json");

    let script = format!(
        ":load {}\n.items[]\n:push .name\n:pop\n:write {}\n:quit\n",
        data.display(),
        out.display()
    );
    let registry = builtin_registry().unwrap();
    run(fx.session(), &registry, script_reader(script)).unwrap();

    // the stub copies input through; the final write saw the stack
    // after one push was popped off again
    assert_eq!(fs::read_to_string(&out).unwrap(), "{\"items\":[1,2]}");
    assert_eq!(fx.last_expr(), ".items[]");
}

#[test]
fn test_loop_stops_at_end_of_input() {
    let fx = fixture();
    let data = fx.data_file("data.json", "[]");
    let out = fx.root.join("out.json");

    // no quit command and no trailing newline on the final command
    let script = format!(":load -q {}\n:write {}", data.display(), out.display());
    let registry = builtin_registry().unwrap();
    run(fx.session(), &registry, script_reader(script)).unwrap();

    assert_eq!(fs::read_to_string(&out).unwrap(), "[]");
}

#[test]
fn test_failed_write_reverts_push() {
    use std::os::unix::fs::PermissionsExt;

    let fx = fixture();
    // this stub passes the empty-input validation run but fails the
    // write when the expression contains .bad
    fs::write(
        &fx.stub,
        format!(
            "#!/bin/sh\nprintf '%s\\n' \"$1\" >> {}\ndata=$(cat)\ncase \"$1\" in\n  *\".bad\"*) [ -n \"$data\" ] && exit 1 ;;\nesac\nprintf '%s' \"$data\"\n",
            fx.exprs.display()
        ),
    )
    .unwrap();
    fs::set_permissions(&fx.stub, fs::Permissions::from_mode(0o755)).unwrap();

    let data = fx.data_file("data.json", "{\"good\":1}");
    let out = fx.root.join("out.json");
    let script = format!(
        ":load -q {}\n:push -q .good\n:push .bad\n:write {}\n:quit\n",
        data.display(),
        out.display()
    );
    let registry = builtin_registry().unwrap();
    run(fx.session(), &registry, script_reader(script)).unwrap();

    // the failed implicit write popped .bad again, so the final write
    // ran with the surviving stack and succeeded
    assert_eq!(fs::read_to_string(&out).unwrap(), "{\"good\":1}");
    assert_eq!(fx.last_expr(), ".good");
}

#[test]
fn test_errors_do_not_stop_the_loop() {
    let fx = fixture();
    let out = fx.root.join("out.json");

    // an unknown command, a malformed line, and a pop on an empty
    // stack are all logged and skipped
    let script = format!(
        ":bogus\n:load \"unterminated\n:pop 3\n:write {}\n:quit\n",
        out.display()
    );
    let registry = builtin_registry().unwrap();
    run(fx.session(), &registry, script_reader(script)).unwrap();

    // no input was ever declared, so the write produced an empty file
    assert_eq!(fs::read_to_string(&out).unwrap(), "");
}

#[test]
fn test_quit_deletes_temporary_input() {
    let fx = fixture();
    let temp = fx.data_file("captured.json", "{}");

    let mut session = fx.session();
    session.set_input_file(temp.clone(), true);

    let registry = builtin_registry().unwrap();
    run(session, &registry, script_reader(":quit\n".to_string())).unwrap();
    assert!(!temp.exists());
}

#[test]
fn test_eof_deletes_temporary_input() {
    let fx = fixture();
    let temp = fx.data_file("captured.json", "{}");

    let mut session = fx.session();
    session.set_input_file(temp.clone(), true);

    let registry = builtin_registry().unwrap();
    run(session, &registry, script_reader(String::new())).unwrap();
    assert!(!temp.exists());
}

/// A reader whose stream fails outright, as opposed to reaching EOF.
struct BrokenInput;

impl Read for BrokenInput {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::other("tty went away"))
    }
}

#[test]
fn test_fatal_read_error_is_escalated_and_still_cleans_up() {
    let fx = fixture();
    let temp = fx.data_file("captured.json", "{}");

    let mut session = fx.session();
    session.set_input_file(temp.clone(), true);

    let registry = builtin_registry().unwrap();
    let err = run(
        session,
        &registry,
        Box::new(LineReader::new(BrokenInput, "")),
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ShellError>(),
        Some(ShellError::Read(_))
    ));
    assert!(!temp.exists());
}

#[test]
fn test_init_commands_run_before_interactive_input() {
    let fx = fixture();
    let data = fx.data_file("data.json", "{\"a\":1}");
    let out = fx.root.join("out.json");

    let init = vec![jqsh::shell::Command::new(
        "load",
        vec!["-q".to_string(), data.display().to_string()],
    )];
    let script = format!(":write {}\n:quit\n", out.display());
    let reader = Box::new(InitReader::new(
        init,
        LineReader::new(Cursor::new(script), ""),
    ));

    let registry = builtin_registry().unwrap();
    run(fx.session(), &registry, reader).unwrap();
    assert_eq!(fs::read_to_string(&out).unwrap(), "{\"a\":1}");
}

#[test]
fn test_peek_shorthand_leaves_stack_untouched() {
    let fx = fixture();
    let data = fx.data_file("data.json", "{\"items\":[]}");
    let out = fx.root.join("out.json");

    let script = format!(
        ":load -q {}\n?.items\n:write {}\n:quit\n",
        data.display(),
        out.display()
    );
    let registry = builtin_registry().unwrap();
    run(fx.session(), &registry, script_reader(script)).unwrap();

    // after the peek the working filter is back to the identity
    assert_eq!(fx.last_expr(), ".");
    assert_eq!(fs::read_to_string(&out).unwrap(), "{\"items\":[]}");
}

#[test]
fn test_exec_captures_and_quit_cleans_up() {
    let fx = fixture();
    let out = fx.root.join("out.json");

    let script = format!(
        ":exec -q printf [7]\n:write {}\n:quit\n",
        out.display()
    );
    let registry = builtin_registry().unwrap();
    run(fx.session(), &registry, script_reader(script)).unwrap();

    assert_eq!(fs::read_to_string(&out).unwrap(), "[7]");
}

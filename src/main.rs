use anyhow::{Context, Result, bail};
use clap::Parser;
use jqsh::error::JqError;
use jqsh::jq;
use jqsh::output::Log;
use jqsh::shell::{self, Command, InitReader, LineReader, Session, builtin_registry};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "jqsh")]
#[command(version, about = "Interactive wrapper around the jq command line utility")]
struct Cli {
    /// JSON files to load on startup (several are concatenated)
    files: Vec<PathBuf>,

    /// Path to the jq executable (searched on PATH by default)
    #[arg(long)]
    jq: Option<PathBuf>,

    /// Prompt shown before each command
    #[arg(long, default_value = "> ")]
    prompt: String,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let color = !cli.no_color && std::io::stdout().is_terminal();
    let log = Log::new(color);

    match run(cli, color) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log.error(&err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, color: bool) -> Result<()> {
    let bin = match jq::locate_jq(cli.jq.as_deref()) {
        Ok(bin) => bin,
        Err(JqError::NotFound) => {
            print_install_hint();
            bail!("unable to locate the jq executable");
        }
        Err(e) => return Err(e).context("locating jq"),
    };
    jq::check_version(&bin).context("checking jq version")?;

    // startup file arguments become initial commands: a single file is
    // loaded directly, several are concatenated through the login shell
    let mut init = Vec::new();
    match cli.files.as_slice() {
        [] => {}
        [file] => init.push(Command::new(
            "load",
            vec![file.display().to_string()],
        )),
        files => {
            let quoted: Vec<String> = files
                .iter()
                .map(|f| shell::shell_quote(&f.display().to_string()))
                .collect();
            init.push(Command::new(
                "pipe",
                vec!["-c".to_string(), format!("cat {}", quoted.join(" "))],
            ));
        }
    }

    println!("Welcome to jqsh!");
    println!();
    println!("To learn more about the environment type \":help\"");
    println!();

    let registry = builtin_registry()?;
    let session = Session::new(bin, color);
    let reader = Box::new(InitReader::new(init, LineReader::stdin(&cli.prompt)));
    shell::run(session, &registry, reader)
}

fn print_install_hint() {
    eprintln!("Unable to locate the jq executable. Make sure it's installed.");
    eprintln!();
    if cfg!(target_os = "macos") {
        eprintln!("The easiest way to install jq on macOS is with homebrew.");
        eprintln!();
        eprintln!("\tbrew install jq");
    } else {
        eprintln!("See the jq homepage for download and install instructions");
        eprintln!();
        eprintln!("\thttps://jqlang.org/");
    }
}

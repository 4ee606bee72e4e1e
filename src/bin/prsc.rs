//! Parser-program compiler driver.
//!
//! Reads a parser description file (or stdin), compiles every parser it
//! declares and prints the row table, extraction plans and depths.

use clap::{ArgAction, Parser};
use log::LevelFilter;
use prsc::core::Target;
use prsc::text::TextProgram;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "prsc", version, about = "Compile parser state graphs to TCAM rows and extractor plans")]
struct Cli {
    /// Description file; stdin when omitted.
    input: Option<PathBuf>,

    /// Target to compile for, overriding the file's `target` statement.
    #[arg(long, value_name = "NAME")]
    target: Option<Target>,

    /// Output FIFO depth used by padding propagation.
    #[arg(long = "fifo-depth", value_name = "N")]
    fifo_depth: Option<u32>,

    /// Print compilation statistics after each program.
    #[arg(long, action = ArgAction::SetTrue)]
    stats: bool,

    /// Treat unreachable states as errors.
    #[arg(long = "deny-unreachable", action = ArgAction::SetTrue)]
    deny_unreachable: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn read_input(path: Option<&PathBuf>) -> io::Result<String> {
    match path {
        Some(path) => fs::read_to_string(path),
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let text = match read_input(cli.input.as_ref()) {
        Ok(text) => text,
        Err(e) => {
            let name = cli
                .input
                .as_ref()
                .map_or_else(|| "<stdin>".to_string(), |p| p.display().to_string());
            eprintln!("error: cannot read {}: {}", name, e);
            return ExitCode::FAILURE;
        }
    };

    let mut program = match TextProgram::parse(&text) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut options = program.options(Target::Tofino);
    if let Some(target) = cli.target {
        options.target = target;
    }
    options.fifo_depth = cli.fifo_depth;
    options.unreachable_is_error = cli.deny_unreachable;

    let mut failed = false;
    for result in program.compile(options) {
        match result {
            Ok(compiled) => {
                print!("{}", compiled.dump());
                if cli.stats {
                    print!("{}", compiled.stats);
                }
            }
            Err(failure) => {
                eprint!("{}", failure.diagnostics);
                eprintln!("error: {}", failure);
                failed = true;
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

//! # FlowQL CLI - Script Runner and REPL
//!
//! This is the command-line front end for the FlowQL streaming query
//! engine. It reads a `.fql` script (or an interactive stdin loop when no
//! script is given), executes each top-level statement against one shared
//! engine instance, and prints each statement's result as pretty JSON.
//!
//! ## Usage
//!
//! ```bash
//! # Run a script file
//! flowql run.fql
//!
//! # Read statements from stdin interactively
//! flowql --interactive
//!
//! # Enable debug logging
//! RUST_LOG=debug flowql run.fql
//! ```
//!
//! The core engine (`flowql-core`/`flowql-lang`/`flowql-engine`) has no
//! process surface of its own; this binary is the optional external
//! collaborator that gives it one.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use flowql_engine::{CommandResult, Engine};
use flowql_lang::{lower_program, parse_program};
use tracing::{error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for the FlowQL script runner.
#[derive(Parser, Debug)]
#[command(name = "flowql")]
#[command(about = "Script runner and REPL for the FlowQL streaming query engine")]
#[command(long_about = "
flowql executes FlowQL scripts: a sequence of `create stream`/`create flow`
commands and pipelines, run against one shared in-process engine.

Examples:
  flowql pipeline.fql
  flowql --interactive
  RUST_LOG=debug flowql pipeline.fql
")]
struct Args {
    /// Path to a `.fql` script file.
    ///
    /// Omit this and pass `--interactive` to read statements from stdin
    /// instead.
    #[arg(help = "Script file to run")]
    script: Option<PathBuf>,

    /// Read statements from stdin one line at a time instead of (or after)
    /// running a script file. Type `:quit` or send EOF to exit.
    #[arg(short, long)]
    #[arg(help = "Read additional statements from stdin after the script")]
    interactive: bool,

    /// Increase log verbosity; repeat for more (`-v` = info, `-vv` = debug).
    /// `RUST_LOG` takes precedence when set.
    #[arg(short, long, action = clap::ArgAction::Count)]
    #[arg(help = "Increase log verbosity (-v, -vv)")]
    verbose: u8,
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let engine = Engine::new();
    let mut clean = true;

    if let Some(path) = &args.script {
        let source = std::fs::read_to_string(path)?;
        clean = run_source(&engine, &source).await;
    }

    if args.interactive || args.script.is_none() {
        clean &= run_repl(&engine).await?;
    }

    if clean {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

/// Parses and lowers `source` as one program, then runs every statement in
/// order against `engine`, printing each result as pretty JSON. Returns
/// `false` if the source failed to lex/parse (the CLI's own exit-code
/// convention — the core library never surfaces a process exit code).
async fn run_source(engine: &Arc<Engine>, source: &str) -> bool {
    let program = match parse_program(source) {
        Ok(program) => program,
        Err(errors) => {
            for err in &errors {
                error!("{err}");
            }
            return false;
        }
    };
    let items = match lower_program(&program, engine.registry.as_ref()) {
        Ok(items) => items,
        Err(errors) => {
            for err in &errors {
                error!("{err}");
            }
            return false;
        }
    };

    let mut ok = true;
    for item in items {
        let result = engine.execute(item, source).await;
        print_result(&result);
        ok &= result.success;
    }
    ok
}

/// Reads statements line by line from stdin, running each as its own
/// one-statement program so a syntax error on one line doesn't require
/// restarting the session. Exits cleanly on EOF or a `:quit` line.
async fn run_repl(engine: &Arc<Engine>) -> Result<bool> {
    let stdin = io::stdin();
    let mut ok = true;
    loop {
        print!("flowql> ");
        io::stdout().flush()?;
        let mut line = String::new();
        let bytes_read = stdin.lock().read_line(&mut line)?;
        if bytes_read == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == ":quit" || line == ":exit" {
            break;
        }
        let statement = if line.ends_with(';') { line.to_string() } else { format!("{line};") };
        ok &= run_source(engine, &statement).await;
    }
    Ok(ok)
}

fn print_result(result: &CommandResult) {
    match serde_json::to_string_pretty(&result.to_json()) {
        Ok(json) => println!("{json}"),
        Err(err) => warn!("failed to serialize command result: {err}"),
    }
}

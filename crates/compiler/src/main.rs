//! Cool compiler CLI
//!
//! `coolc` compiles a list of `.cool` source files (together with the
//! embedded prelude) into one 32-bit x86 assembly file. Exit codes: 0 on
//! success, 1 for usage errors, 2 for compilation errors.

use clap::{ArgAction, Parser};
use coolc::{CompileError, CompilerConfig};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "coolc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Cool compiler - compile .cool programs to 32-bit x86 assembly")]
struct Cli {
    /// Input .cool source files
    #[arg(required = true, value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Output assembly file (default: first source with .cool replaced by .s)
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Repeat the program this many times by wrapping Main in a counted loop
    #[arg(long, value_name = "N", default_value_t = 1)]
    benchmark: u32,

    /// Include the coroutine prelude and start Main inside a coroutine
    #[arg(long)]
    coroutine: bool,

    /// Disable the unboxed-integer code shape
    #[arg(long = "no-opt-int", action = ArgAction::SetFalse)]
    opt_int: bool,

    /// Disable the compare-and-branch shape for boolean conditions
    #[arg(long = "no-opt-jump", action = ArgAction::SetFalse)]
    opt_jump: bool,

    /// Disable dead-result elimination
    #[arg(long = "no-opt-unused", action = ArgAction::SetFalse)]
    opt_unused: bool,

    /// Disable static dispatch of never-overridden methods
    #[arg(long = "no-opt-dispatch", action = ArgAction::SetFalse)]
    opt_dispatch: bool,

    /// Disable integer constant folding
    #[arg(long = "no-opt-fold", action = ArgAction::SetFalse)]
    opt_fold: bool,

    /// Disable inlining of trivially-constant calls
    #[arg(long = "no-opt-inline", action = ArgAction::SetFalse)]
    opt_inline: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            use clap::error::ErrorKind;
            let _ = e.print();
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            process::exit(code);
        }
    };

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| coolc::default_output_path(&cli.files[0]));

    let config = CompilerConfig {
        benchmark: cli.benchmark.max(1),
        coroutine: cli.coroutine,
        opt_int: cli.opt_int,
        opt_jump: cli.opt_jump,
        opt_unused: cli.opt_unused,
        opt_dispatch: cli.opt_dispatch,
        opt_fold: cli.opt_fold,
        opt_inline: cli.opt_inline,
    };

    match coolc::compile_files(&cli.files, &output, &config) {
        Ok(()) => {}
        Err(CompileError::Source(diags)) => {
            for diag in &diags {
                eprintln!("{}", diag);
            }
            process::exit(2);
        }
        Err(err) => {
            eprintln!("{}", err);
            process::exit(2);
        }
    }
}

use std::io::{stdin, stdout, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pagedb::{DbConfig, Repl};

/// A tiny single-table database with a B-tree on disk
#[derive(Parser, Debug)]
#[command(name = "pagedb", version)]
struct Args {
    /// Database file, created if it does not exist
    filename: Option<PathBuf>,

    /// Maximum number of pages the database may grow to
    #[arg(
        long,
        default_value_t = pagedb::constants::TABLE_MAX_PAGES as u32,
        env = "PAGEDB_MAX_PAGES",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    max_pages: u32,

    /// Log engine activity to stderr
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let filename = match &args.filename {
        Some(filename) => filename.clone(),
        None => {
            println!("Must supply a database filename.");
            return ExitCode::FAILURE;
        }
    };

    match run(filename, DbConfig::with_max_pages(args.max_pages as usize)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "session aborted");
            println!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("pagedb=debug")
        } else {
            EnvFilter::new("pagedb=warn")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn run(filename: PathBuf, config: DbConfig) -> Result<()> {
    info!(path = %filename.display(), max_pages = config.max_pages, "opening database");
    let mut repl = Repl::open(&filename, config)
        .with_context(|| format!("could not open {}", filename.display()))?;

    let mut input_buffer = Vec::new();
    loop {
        input_buffer.clear();
        print!("db > ");
        let input = match read_user_input(&mut input_buffer)? {
            Some(input) => input,
            // end of input is an implicit .exit
            None => break,
        };

        let output = repl.execute_bytes(input)?;
        let mut out = stdout();
        for line in &output.lines {
            writeln!(out, "{}", line)?;
        }
        if output.exit {
            break;
        }
    }

    repl.close()?;
    Ok(())
}

/// Reads one line, without its line ending. `None` at end of input.
fn read_user_input(input_buffer: &mut Vec<u8>) -> Result<Option<&[u8]>> {
    stdout().flush()?;
    let n = stdin().lock().read_until(b'\n', input_buffer)?;
    if n == 0 {
        // nothing follows the prompt, so finish its line
        stdout().write_all(b"\n")?;
        return Ok(None);
    }
    if !input_buffer.ends_with(b"\n") {
        // last line ended at EOF rather than a newline
        stdout().write_all(b"\n")?;
    }
    let mut line = &input_buffer[..];
    while let Some((b'\r' | b'\n', rest)) = line.split_last() {
        line = rest;
    }
    Ok(Some(line))
}

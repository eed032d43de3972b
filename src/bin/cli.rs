//! CaskKV CLI
//!
//! One-shot commands against a data directory, or an interactive shell.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use caskkv::config::DEFAULT_SEGMENT_SIZE_THRESHOLD;
use caskkv::{CaskError, Command, Config, Engine};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// CaskKV CLI
#[derive(Parser, Debug)]
#[command(name = "caskkv")]
#[command(about = "Log-structured key-value store")]
#[command(version)]
struct Args {
    /// Directory holding the segment files
    #[arg(short, long, default_value = "./caskkv_data")]
    data_dir: PathBuf,

    /// Segment size in bytes before rotation
    #[arg(short, long, default_value_t = DEFAULT_SEGMENT_SIZE_THRESHOLD)]
    segment_size: u64,

    /// Runs the interactive shell when omitted
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Delete a key
    #[command(alias = "del")]
    Delete {
        /// The key to delete
        key: String,
    },

    /// Merge sealed segments, dropping overwritten and deleted data
    Compact,

    /// Print key and segment statistics
    Stats,

    /// Interactive shell
    Repl,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_target(true).with_writer(io::stderr).init();

    let args = Args::parse();

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .segment_size_threshold(args.segment_size)
        .build();

    let engine = match Engine::open(config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match args.command {
        Some(Commands::Set { key, value }) => engine
            .put(key.as_bytes(), value.as_bytes())
            .map(|_| println!("OK: set {:?} -> {:?}", key, value)),
        Some(Commands::Get { key }) => engine.get(key.as_bytes()).map(|value| match value {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("NOT FOUND"),
        }),
        Some(Commands::Delete { key }) => engine
            .delete(key.as_bytes())
            .map(|_| println!("OK: deleted {:?}", key)),
        Some(Commands::Compact) => engine.compact().map(|report| {
            println!(
                "OK: compacted {} segments, {} live records, {} -> {} bytes",
                report.segments_merged,
                report.records_written,
                report.bytes_before,
                report.bytes_after
            )
        }),
        Some(Commands::Stats) => {
            let stats = engine.stats();
            println!("keys:           {}", stats.key_count);
            println!("segments:       {}", stats.segment_count);
            if let Some(id) = stats.active_segment_id {
                println!("active segment: {}", id);
            }
            println!("disk bytes:     {}", stats.disk_bytes);
            println!("live bytes:     {}", stats.live_bytes);
            Ok(())
        }
        Some(Commands::Repl) | None => repl(&engine),
    };

    let closed = engine.close();
    match result.and(closed) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Read commands from stdin until EOF or `exit`
fn repl(engine: &Engine) -> caskkv::Result<()> {
    println!("Interactive KV store. Type 'help' for commands, 'exit' to quit.");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();

    loop {
        print!("> ");
        stdout.flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }

        match line.trim() {
            "" => continue,
            "exit" | "quit" => return Ok(()),
            "help" => {
                println!("Commands:");
                println!("  set <key> <value>");
                println!("  get <key>");
                println!("  delete <key>");
                println!("  compact");
                println!("  exit");
                continue;
            }
            _ => {}
        }

        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{}. Type 'help'.", e);
                continue;
            }
        };

        let is_get = matches!(command, Command::Get { .. });
        match engine.execute(command) {
            Ok(Some(value)) => println!("{}", String::from_utf8_lossy(&value)),
            Ok(None) if is_get => println!("NOT FOUND"),
            Ok(None) => println!("OK"),
            Err(e @ CaskError::InvalidKey) => println!("error: {}", e),
            Err(e) => return Err(e),
        }
    }
}

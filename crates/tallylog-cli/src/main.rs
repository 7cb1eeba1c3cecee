//! tallylog - extract metrics from log lines
//!
//! Loads every `*.tl` program from a directory, feeds it lines from a file
//! or stdin, and writes the resulting metrics as JSON on exit.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tallylog_core::bytecode::disassemble;
use tallylog_core::lexer::parse_duration;
use tallylog_core::{Config, Runtime, Store};

mod pipeline;

#[derive(Parser, Debug)]
#[command(name = "tallylog")]
#[command(version = tallylog_core::VERSION)]
#[command(about = "Turn log lines into metrics", long_about = None)]
struct Cli {
    /// TOML configuration file; flags override its values
    #[arg(short, long, env = "TALLYLOG_CONFIG")]
    config: Option<PathBuf>,

    /// Directory of *.tl programs
    #[arg(short, long)]
    progs: Option<PathBuf>,

    /// Log file to read; stdin when omitted
    input: Option<PathBuf>,

    /// Expiry sweep period such as 30s or 5m; 0 disables it
    #[arg(long, value_parser = parse_interval)]
    gc_interval: Option<Duration>,

    /// Number of line-processing workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Write the final metrics here instead of stdout
    #[arg(long)]
    dump: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "tallylog_core=debug"
    #[arg(long)]
    log: Option<String>,

    /// Print the compiled bytecode of every program and exit
    #[arg(long)]
    dump_bytecode: bool,
}

fn parse_interval(text: &str) -> Result<Duration, String> {
    parse_duration(text).ok_or_else(|| format!("invalid duration '{text}'"))
}

impl Cli {
    /// Layer command line flags over the config file (or defaults)
    fn settings(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => Config::default(),
        };
        if let Some(progs) = &self.progs {
            config.progs.clone_from(progs);
        }
        if let Some(interval) = self.gc_interval {
            config.gc_interval = interval;
        }
        if let Some(workers) = self.workers {
            if workers == 0 {
                bail!("--workers must be at least 1");
            }
            config.workers = workers;
        }
        if let Some(dump) = &self.dump {
            config.dump = Some(dump.clone());
        }
        if let Some(log) = &self.log {
            config.log.clone_from(log);
        }
        Ok(config)
    }
}

fn init_tracing(default_filter: &str) {
    // RUST_LOG wins over the configured filter.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_programs(runtime: &Runtime, dir: &Path) -> Result<()> {
    let summary = runtime
        .load_dir(dir)
        .with_context(|| format!("loading programs from {}", dir.display()))?;
    for err in &summary.errors {
        warn!("{err}");
    }
    if summary.loaded.is_empty() {
        bail!("no program in {} could be loaded", dir.display());
    }
    Ok(())
}

fn write_dump(store: &Store, dump: Option<&Path>) -> Result<()> {
    match dump {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("creating dump file {}", path.display()))?;
            store.write_metrics(std::io::BufWriter::new(file))?;
            info!(path = %path.display(), metrics = store.len(), "metrics written");
        }
        None => {
            let stdout = std::io::stdout();
            store.write_metrics(stdout.lock())?;
            println!();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.settings()?;
    init_tracing(&config.log);

    let store = Arc::new(Store::new());
    let runtime = Arc::new(Runtime::new(Arc::clone(&store)));
    load_programs(&runtime, &config.progs)?;

    if cli.dump_bytecode {
        for name in runtime.program_names() {
            if let Some(program) = runtime.program(&name) {
                print!("{}", disassemble(&program));
            }
        }
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let gc = store.start_gc_loop(cancel.child_token(), config.gc_interval);

    let stats = pipeline::run(Arc::clone(&runtime), cli.input.as_deref(), config.workers, cancel.clone())
        .await
        .context("processing input")?;
    info!(
        lines = stats.lines,
        matched = stats.matched,
        errors = stats.errors,
        "input finished"
    );

    cancel.cancel();
    if let Some(gc) = gc {
        gc.await.context("expiry loop panicked")?;
    }

    write_dump(&store, config.dump.as_deref())
}

//! LeakWatch command line
//!
//! Hosts the out-of-process analysis worker (`leakwatch analyze`), validates
//! config files and runs a small demonstration of the watcher.

use clap::{Parser, Subcommand};
use leakwatch_core::{
    error::{LeakWatchError, Result},
    handoff::{run_worker, AnalysisResult, SnapshotMetadata},
    HeapSnapshotAnalyzer, LeakWatcherBuilder, PlatformDefaults, ResultHandlerRegistry,
    WatchConfig,
};
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "leakwatch")]
#[command(about = "Leak watching and snapshot analysis", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze snapshot envelopes (one JSON document per line)
    Analyze {
        /// Read envelopes from this file instead of stdin
        #[arg(long)]
        envelope: Option<PathBuf>,
    },

    /// Load and validate a config file
    CheckConfig {
        /// Path to the TOML config
        path: PathBuf,
    },

    /// Watch one leaked and one released object and report what happens
    Demo {
        /// Delay before the first liveness check
        #[arg(long, default_value = "500")]
        delay_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let level = level.as_str().to_lowercase();
    let filter = EnvFilter::new(format!("leakwatch={},leakwatch_core={}", level, level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("LeakWatch v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Analyze { envelope } => analyze(envelope).await,
        Commands::CheckConfig { path } => check_config(path),
        Commands::Demo { delay_ms } => demo(delay_ms).await,
    }
}

async fn analyze(envelope: Option<PathBuf>) -> Result<()> {
    let delivered = tokio::task::spawn_blocking(move || -> Result<usize> {
        let registry = ResultHandlerRegistry::with_builtins();
        match envelope {
            Some(path) => {
                let file = std::fs::File::open(&path)?;
                run_worker(BufReader::new(file), &registry, &HeapSnapshotAnalyzer)
            }
            None => run_worker(std::io::stdin().lock(), &registry, &HeapSnapshotAnalyzer),
        }
    })
    .await
    .map_err(|e| LeakWatchError::Other(format!("analysis worker failed: {}", e)))??;

    info!(delivered, "Analysis worker finished");
    Ok(())
}

fn check_config(path: PathBuf) -> Result<()> {
    let mut config = WatchConfig::from_file(&path)?;
    config.apply_env_overrides()?;
    config.validate()?;

    println!("✓ {} is valid", path.display());
    println!("  enabled:              {}", config.enabled);
    println!("  watch delay:          {}ms", config.watch_delay.as_millis());
    println!("  snapshot dir:         {}", config.snapshot_dir().display());
    println!("  max stored snapshots: {}", config.max_stored_snapshots);
    println!("  result handler:       {}", config.result_handler);
    println!("  analysis mode:        {:?}", config.analysis_mode);
    println!("  exclusions:           {}", config.exclusions.len());
    Ok(())
}

async fn demo(delay_ms: u64) -> Result<()> {
    let (tx, rx) = mpsc::channel::<(SnapshotMetadata, AnalysisResult)>();
    let tx = Mutex::new(tx);

    let mut registry = ResultHandlerRegistry::with_builtins();
    registry.register(
        "demo",
        move |metadata: &SnapshotMetadata, result: &AnalysisResult| -> anyhow::Result<()> {
            tx.lock()
                .map_err(|_| anyhow::anyhow!("demo channel poisoned"))?
                .send((metadata.clone(), result.clone()))?;
            Ok(())
        },
    );

    let config = WatchConfig {
        watch_delay: Duration::from_millis(delay_ms.max(1)),
        result_handler: "demo".to_string(),
        ..WatchConfig::default()
    };
    let watcher = LeakWatcherBuilder::new()
        .defaults(PlatformDefaults::new(config).result_handlers(registry))
        .build()?;

    let leaked = Arc::new(String::from("kept alive by the demo"));
    let released = Arc::new(vec![0u8; 1024]);
    watcher.watch(&leaked, "leaked")?;
    watcher.watch(&released, "released")?;
    drop(released);

    println!("Watching 2 objects, first check in {}ms...", delay_ms);

    let timeout = Duration::from_millis(delay_ms.saturating_mul(4)) + Duration::from_secs(10);
    let (metadata, result) = tokio::task::spawn_blocking(move || rx.recv_timeout(timeout))
        .await
        .map_err(|e| LeakWatchError::Other(e.to_string()))?
        .map_err(|_| LeakWatchError::Other("no analysis result before timeout".to_string()))?;

    println!();
    println!("Leak reported for '{}':", metadata.reference_name);
    println!("  leak found:   {}", result.leak_found);
    println!(
        "  class:        {}",
        result.class_name.as_deref().unwrap_or("-")
    );
    for line in &result.leak_trace {
        println!("  {}", line);
    }
    println!(
        "  durations:    watch {}ms, gc {}ms, capture {}ms, analysis {}ms",
        metadata.watch_duration_ms,
        metadata.gc_duration_ms,
        metadata.capture_duration_ms,
        result.analysis_duration_ms
    );

    let stats = watcher.stats();
    println!();
    println!(
        "Watched {}, collected {}, dispatched {}",
        stats.watched, stats.collected, stats.dispatched
    );
    watcher.log_statistics();

    drop(leaked);
    Ok(())
}

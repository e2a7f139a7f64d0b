//! corona - command-line host for the Corona Analytics collector
//!
//! Each invocation constructs one collector over the durable store, so events
//! logged by one command are recovered and delivered by a later one.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Store: $XDG_DATA_HOME/corona/store.db (~/.local/share/corona/store.db)
//! - Config: $XDG_CONFIG_HOME/corona/config.toml (~/.config/corona/config.toml)
//! - Logs: $XDG_STATE_HOME/corona/ (~/.local/state/corona/)

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use corona_core::transport::{HttpTransport, UnsupportedBeacon};
use corona_core::{
    watch_visibility, Attributes, Collector, Config, FlushOutcome, LoaderStub, SkipReason,
    SqliteStore, Transports, Visibility,
};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "corona")]
#[command(about = "Buffer and deliver Corona Analytics events")]
#[command(version)]
struct Args {
    /// Write logs to the state directory
    #[arg(short, long)]
    verbose: bool,

    /// Ingestion URL (overrides config.toml)
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show configuration, identity and pending events
    Status,

    /// Buffer one event
    Log {
        /// Event name
        name: String,

        /// Attribute as key=value; values are parsed as JSON when possible
        #[arg(short, long = "attr", value_parser = parse_attribute)]
        attrs: Vec<(String, Value)>,
    },

    /// Deliver pending events
    Flush,

    /// Set and persist the user id
    Identify {
        user_id: String,
    },

    /// Replay a file of recorded loader calls
    Replay {
        /// JSON array of `[method, ...args]` calls, or `{"q": [...]}`
        file: PathBuf,
    },

    /// Log JSON-lines events from stdin, flushing when input ends
    Pipe,
}

fn parse_attribute(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty attribute key in '{}'", raw));
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::from(value));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(url) = args.url {
        config.collector.url = Some(url);
    }

    let _log_guard = if args.verbose {
        Some(corona_core::logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    let collector = open_collector(&config)?;

    match args.command {
        Command::Status => cmd_status(&config, &collector),
        Command::Log { name, attrs } => cmd_log(&collector, &name, attrs),
        Command::Flush => cmd_flush(&collector).await,
        Command::Identify { user_id } => cmd_identify(&collector, &user_id),
        Command::Replay { file } => cmd_replay(collector, &file).await,
        Command::Pipe => cmd_pipe(collector).await,
    }
}

fn open_collector(config: &Config) -> Result<Arc<Collector>> {
    let store_path = config.storage.resolved_path();
    let store = SqliteStore::open(&store_path)
        .with_context(|| format!("failed to open store at {}", store_path.display()))?;

    // The process exits right after flushing, so a detached beacon would be cut off
    let request = HttpTransport::new(&config.collector).context("failed to create HTTP client")?;
    let transports = Transports::new(Arc::new(UnsupportedBeacon), Arc::new(request));

    let collector = Collector::new(Arc::new(store), transports);
    collector.init(config.collector.clone());
    Ok(Arc::new(collector))
}

fn cmd_status(config: &Config, collector: &Collector) -> Result<()> {
    println!("Corona Collector Status");
    println!("=======================");
    println!();
    println!("Enabled:         {}", collector.is_enabled());
    println!(
        "URL:             {}",
        collector.url().as_deref().unwrap_or("<not set>")
    );
    println!("Ready:           {}", config.collector.is_ready());
    println!("Debug:           {}", config.collector.debug);
    println!("Store:           {}", config.storage.resolved_path().display());
    println!("Logs:            {}", corona_core::logging::log_dir().display());
    println!("User ID:         {}", collector.user_id());
    println!("Pending events:  {}", collector.pending_count());

    if collector.url().is_none() {
        println!();
        println!("Events are buffered until a URL is set in config.toml:");
        println!();
        println!("  [collector]");
        println!("  url = \"https://your-ingest-server.example/api/ingest\"");
    }
    Ok(())
}

fn cmd_log(collector: &Collector, name: &str, attrs: Vec<(String, Value)>) -> Result<()> {
    let attributes: Attributes = attrs.into_iter().collect();
    let attributes = (!attributes.is_empty()).then_some(attributes);

    if !collector.log(name, attributes) {
        bail!("collector is disabled; event '{}' was not recorded", name);
    }
    println!(
        "Logged '{}' ({} pending)",
        name,
        collector.pending_count()
    );
    Ok(())
}

async fn cmd_flush(collector: &Collector) -> Result<()> {
    report(collector.flush().await)
}

fn cmd_identify(collector: &Collector, user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        bail!("user id must not be empty");
    }
    collector.identify(user_id);
    println!("User ID set to {}", user_id);
    Ok(())
}

async fn cmd_replay(collector: Arc<Collector>, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;

    let stub = LoaderStub::from_json(value);
    let calls = stub.len();
    let mut slot = corona_core::CollectorSlot::with_stub(stub);
    let collector = slot.install(collector).await;

    println!(
        "Replayed {} call(s); {} event(s) pending",
        calls,
        collector.pending_count()
    );
    Ok(())
}

async fn cmd_pipe(collector: Arc<Collector>) -> Result<()> {
    let (visibility, receiver) = watch::channel(Visibility::Visible);
    let watcher = watch_visibility(collector.clone(), receiver);

    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    let counts = pipe_lines(&collector, BufReader::new(tokio::io::stdin()), interrupted).await?;

    visibility
        .send(Visibility::Hidden)
        .context("visibility watcher stopped early")?;
    drop(visibility);
    watcher.await.context("visibility watcher panicked")?;

    let stats = collector.stats();
    println!(
        "Logged {} event(s), skipped {} line(s), delivered {}, {} still pending",
        counts.logged,
        counts.skipped,
        stats.events_delivered,
        collector.pending_count()
    );
    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct PipeCounts {
    logged: usize,
    skipped: usize,
}

/// Log every JSON-lines event from `reader` until it ends or `shutdown` resolves.
async fn pipe_lines<R>(
    collector: &Collector,
    reader: R,
    shutdown: impl Future<Output = ()>,
) -> Result<PipeCounts>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut counts = PipeCounts::default();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match pipe_event(&line) {
                    Some((name, attributes)) => {
                        if collector.log(&name, attributes) {
                            counts.logged += 1;
                        }
                    }
                    None => {
                        tracing::warn!(line = %line, "Skipping line without an event name");
                        counts.skipped += 1;
                    }
                }
            }
            () = &mut shutdown => {
                tracing::info!("Interrupted, flushing");
                break;
            }
        }
    }
    Ok(counts)
}

/// Split a JSON-lines record into its event name and remaining attributes
fn pipe_event(line: &str) -> Option<(String, Option<Attributes>)> {
    let Ok(Value::Object(mut fields)) = serde_json::from_str::<Value>(line) else {
        return None;
    };
    let Some(Value::String(name)) = fields.remove("event") else {
        return None;
    };
    let attributes = (!fields.is_empty()).then_some(fields);
    Some((name, attributes))
}

fn report(outcome: FlushOutcome) -> Result<()> {
    match outcome {
        FlushOutcome::Skipped(SkipReason::NoEndpoint) => {
            println!("No URL configured; events stay buffered");
        }
        FlushOutcome::Skipped(SkipReason::EmptyQueue) => println!("Nothing to flush"),
        FlushOutcome::Beacon { events } => println!("Handed off {} event(s)", events),
        FlushOutcome::Request { events } => println!("Delivered {} event(s)", events),
        FlushOutcome::Failed { events, error } => {
            bail!("delivery of {} event(s) failed: {}", events, error)
        }
    }
    Ok(())
}

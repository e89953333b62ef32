//! 🚀 ingestd: the front door, the bouncer, the maitre d'.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//!
//! Two jobs:
//! - `ingestd serve` (the default): load config, start the pipeline, drain on SIGINT/SIGTERM.
//! - `ingestd enqueue`: read JSON lines and push them through the proxy, like any other producer.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ingestd::app_config::{AppConfig, ConfigOverrides, load_config};
use ingestd::common::RawRecord;
use ingestd::proxy::RemoteQueueClient;
use ingestd::supervisors::INPUT_QUEUE;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ingestd", version, about = "Drainable two-stage ingestion pipeline")]
struct Cli {
    /// TOML config file. Env vars (INGESTD_*) apply either way, the file wins.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: OverrideArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Args)]
struct OverrideArgs {
    /// Extract workers
    #[arg(long = "workers", alias = "iproc-num", global = true)]
    workers: Option<usize>,
    /// Savers
    #[arg(long = "savers", alias = "oproc-num", global = true)]
    savers: Option<usize>,
    /// Proxy port
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Records per worker before its cache is flushed
    #[arg(long = "cache-size", global = true)]
    cache_size: Option<usize>,
    /// Drain into a noop store instead of the configured one
    #[arg(long = "no-persistence", global = true)]
    no_persistence: bool,
}

impl From<&OverrideArgs> for ConfigOverrides {
    fn from(args: &OverrideArgs) -> Self {
        ConfigOverrides {
            worker_count: args.workers,
            saver_count: args.savers,
            port: args.port,
            cache_threshold: args.cache_size,
            no_persistence: args.no_persistence,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the pipeline until SIGINT/SIGTERM, then drain and report
    Serve,
    /// Push JSON-lines records ({"content": .., "partitionLabel": ..}) into a running pipeline
    Enqueue(EnqueueArgs),
}

#[derive(Debug, Args)]
struct EnqueueArgs {
    /// File to read. Stdin when omitted.
    input: Option<PathBuf>,
    /// Records per round trip
    #[arg(long, default_value_t = 500)]
    batch_size: usize,
}

/// 🔢 What an enqueue run managed.
#[derive(Debug, Default, PartialEq, Eq)]
struct EnqueueStats {
    read: usize,
    accepted: usize,
    skipped: usize,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run(Cli::parse()).await {
        report_error(&err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let app_config = resolve_config(&cli)?;
    match cli.command {
        None | Some(Command::Serve) => ingestd::run(app_config).await,
        Some(Command::Enqueue(args)) => {
            let mut client = RemoteQueueClient::connect(app_config.proxy.clone())
                .await
                .context("💀 Couldn't reach the queue proxy. Is `ingestd serve` running on that port?")?;
            let stats = match args.input {
                Some(path) => {
                    let file = tokio::fs::File::open(&path)
                        .await
                        .with_context(|| format!("💀 Couldn't open '{}'", path.display()))?;
                    enqueue_lines(BufReader::new(file), &mut client, args.batch_size).await?
                }
                None => enqueue_lines(BufReader::new(tokio::io::stdin()), &mut client, args.batch_size).await?,
            };
            info!(
                "📬 enqueue done: {} read, {} accepted, {} skipped",
                stats.read, stats.accepted, stats.skipped
            );
            Ok(())
        }
    }
}

/// 🔧 File (if it exists) + env, then the flags on top.
fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let config_file = match &cli.config {
        Some(path) => {
            let exists = path.try_exists().with_context(|| {
                format!("💀 Couldn't check whether the config file exists: '{}'", path.display())
            })?;
            if !exists {
                anyhow::bail!(
                    "💀 Configuration file not found: '{}'. If it's a relative path, \
                     remember it's relative to where you ran this, not where the binary lives.",
                    path.display()
                );
            }
            Some(path.as_path())
        }
        None => None,
    };
    let app_config = load_config(config_file).context("💀 Couldn't load the configuration")?;
    Ok(app_config.with_overrides(&ConfigOverrides::from(&cli.overrides)))
}

/// 📬 Read JSON lines, push them in batches. Blank lines are ignored, lines that don't
/// parse are skipped with a warning. Records the proxy drops (pipeline shutting down)
/// show up as the gap between `read` and `accepted`.
async fn enqueue_lines<R>(reader: R, client: &mut RemoteQueueClient, batch_size: usize) -> Result<EnqueueStats>
where
    R: AsyncBufRead + Unpin,
{
    let batch_size = batch_size.max(1);
    let mut stats = EnqueueStats::default();
    let mut batch = Vec::with_capacity(batch_size);
    let mut lines = reader.lines();
    let mut line_number = 0;

    while let Some(line) = lines.next_line().await.context("💀 Failed reading input")? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RawRecord>(&line) {
            Ok(record) => {
                stats.read += 1;
                batch.push(record);
            }
            Err(err) => {
                warn!("⚠️ line {line_number} is not a record, skipping: {err}");
                stats.skipped += 1;
            }
        }
        if batch.len() >= batch_size {
            stats.accepted += send_batch(client, &mut batch).await?;
        }
    }
    if !batch.is_empty() {
        stats.accepted += send_batch(client, &mut batch).await?;
    }
    Ok(stats)
}

async fn send_batch(client: &mut RemoteQueueClient, batch: &mut Vec<RawRecord>) -> Result<usize> {
    let records = std::mem::take(batch);
    let sent = records.len();
    let accepted = client
        .queue(INPUT_QUEUE)
        .put_many(records)
        .await
        .context("💀 The proxy didn't take the batch")?;
    if accepted < sent {
        warn!("🚫 {} of {} record(s) dropped, the pipeline is no longer accepting writes", sent - accepted, sent);
    }
    Ok(accepted)
}

/// 💀 Print the error chain, and a hint when it smells like a connection problem.
fn report_error(err: &anyhow::Error) {
    error!("💀 error: {}", err);
    let mut smells_like_connection_trouble = false;
    for cause in err.chain().skip(1) {
        error!("⚠️  cause: {}", cause);
        let cause_str = cause.to_string();
        if cause_str.contains("error sending request")
            || cause_str.contains("connection refused")
            || cause_str.contains("Connection refused")
            || cause_str.contains("tcp connect error")
            || cause_str.contains("dns error")
            || cause_str.contains("Address already in use")
        {
            smells_like_connection_trouble = true;
        }
    }
    if smells_like_connection_trouble {
        error!(
            "🔧 hint: something isn't reachable, or something else got there first. \
             Check that Elasticsearch (or whatever store you configured) is running, \
             that `ingestd serve` is up before you enqueue, and that nothing else owns the proxy port."
        );
    }
}

#[cfg(test)]
mod tests {
    use ingestd::proxy::{ProxyConfig, QueueProxyServer};
    use ingestd::queue::{Delivery, DrainableQueue};

    use super::*;

    #[test]
    fn the_one_where_flags_land_on_the_right_knobs() {
        let cli = Cli::parse_from([
            "ingestd",
            "--iproc-num",
            "4",
            "--savers",
            "2",
            "--port",
            "50001",
            "--cache-size",
            "10",
            "--no-persistence",
        ]);
        assert!(cli.command.is_none());
        let overrides = ConfigOverrides::from(&cli.overrides);
        assert_eq!(
            overrides,
            ConfigOverrides {
                worker_count: Some(4),
                saver_count: Some(2),
                port: Some(50001),
                cache_threshold: Some(10),
                no_persistence: true,
            }
        );
    }

    #[test]
    fn the_one_where_enqueue_takes_a_file_and_a_batch_size() {
        let cli = Cli::parse_from(["ingestd", "enqueue", "records.jsonl", "--batch-size", "7", "--port", "50002"]);
        match cli.command {
            Some(Command::Enqueue(args)) => {
                assert_eq!(args.input, Some(PathBuf::from("records.jsonl")));
                assert_eq!(args.batch_size, 7);
            }
            other => panic!("💀 expected enqueue, got {other:?}"),
        }
        assert_eq!(cli.overrides.port, Some(50002));
    }

    #[test]
    fn the_one_where_a_missing_config_file_is_called_out() {
        let cli = Cli::parse_from(["ingestd", "--config", "/definitely/not/here.toml"]);
        let err = resolve_config(&cli).expect_err("💀 a missing file must not be silently ignored");
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn the_one_where_json_lines_become_queued_records() -> Result<()> {
        let queue = DrainableQueue::unbounded(INPUT_QUEUE);
        let handle = QueueProxyServer::new(ProxyConfig {
            port: 0,
            ..ProxyConfig::default()
        })
        .register(queue.clone())
        .start()
        .await?;
        let mut client = RemoteQueueClient::connect(ProxyConfig {
            port: handle.local_addr().port(),
            ..ProxyConfig::default()
        })
        .await?;

        let input = concat!(
            "{\"content\": \"John has an Android\", \"partitionLabel\": \"Acme Corp\"}\n",
            "\n",
            "this is not json\n",
            "{\"content\": \"Ben too\", \"partition_label\": \"acme corp \"}\n",
            "{\"content\": \"and Milton\", \"partitionLabel\": \"Initech\"}\n",
        );
        let stats = enqueue_lines(BufReader::new(input.as_bytes()), &mut client, 2).await?;
        assert_eq!(stats, EnqueueStats { read: 3, accepted: 3, skipped: 1 });

        assert_eq!(queue.get().await, Delivery::Item(RawRecord::new("John has an Android", "Acme Corp")));
        assert_eq!(queue.get().await, Delivery::Item(RawRecord::new("Ben too", "acme corp ")));
        assert_eq!(queue.get().await, Delivery::Item(RawRecord::new("and Milton", "Initech")));

        handle.shutdown().await?;
        Ok(())
    }
}

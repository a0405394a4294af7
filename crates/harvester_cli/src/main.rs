//! Command-line front end for the harvester engine: harvest a queue into
//! the local cache, send test messages, or purge a queue.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use engine_logging::{engine_info, engine_warn, LogDestination};
use harvester_core::{Credentials, StopConditions};
use harvester_engine::{Harvester, MessageCache, QueueService, SqsQueueService};
use log::LevelFilter;
use rand::Rng;

#[derive(Parser)]
#[command(name = "sqs-harvester", about = "Harvest, send, and purge SQS messages")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Log to the terminal in addition to ./harvester.log.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ConnectionArgs {
    /// AWS region.
    #[arg(long, global = true, default_value = "us-east-1")]
    region: String,

    /// Access key id.
    #[arg(long, global = true, env = "AWS_ACCESS_KEY_ID", default_value = "")]
    access_key: String,

    /// Secret access key.
    #[arg(
        long,
        global = true,
        env = "AWS_SECRET_ACCESS_KEY",
        hide_env_values = true,
        default_value = ""
    )]
    secret_key: String,

    /// Endpoint override for SQS-compatible services (LocalStack, ElasticMQ).
    #[arg(long, global = true)]
    endpoint_url: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Receive unique messages from a queue.
    Harvest {
        queue: String,

        /// Harvest until the queue appears drained instead of stopping at a
        /// message count.
        #[arg(long)]
        all: bool,

        /// Stop after this many unique messages (ignored with --all).
        #[arg(long, default_value_t = 10)]
        count: usize,

        /// Session timeout in seconds; also the per-message visibility hold.
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        /// Worker thread count; defaults to one per available core.
        #[arg(long)]
        workers: Option<usize>,

        /// Skip the on-disk message cache entirely.
        #[arg(long)]
        no_cache: bool,
    },

    /// Send randomized test messages to a queue.
    Send {
        queue: String,

        #[arg(long, default_value_t = 1)]
        count: usize,
    },

    /// Drop every message in a queue.
    Purge { queue: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let destination = if cli.verbose {
        LogDestination::Both
    } else {
        LogDestination::File
    };
    engine_logging::initialize(destination, LevelFilter::Info);

    let credentials = credentials_from(&cli.connection);
    match cli.command {
        Command::Harvest {
            queue,
            all,
            count,
            timeout,
            workers,
            no_cache,
        } => run_harvest(
            &queue,
            &credentials,
            all,
            count,
            Duration::from_secs(timeout),
            workers,
            no_cache,
        ),
        Command::Send { queue, count } => run_send(&queue, &credentials, count),
        Command::Purge { queue } => run_purge(&queue, &credentials),
    }
}

fn credentials_from(connection: &ConnectionArgs) -> Credentials {
    let mut credentials = Credentials::new(
        connection.access_key.clone(),
        connection.secret_key.clone(),
        connection.region.clone(),
    );
    if let Some(endpoint) = &connection.endpoint_url {
        credentials = credentials.with_endpoint(endpoint.clone());
    }
    credentials
}

fn run_harvest(
    queue: &str,
    credentials: &Credentials,
    all: bool,
    count: usize,
    timeout: Duration,
    workers: Option<usize>,
    no_cache: bool,
) -> Result<()> {
    let conditions = if all {
        StopConditions::drain_within(timeout)
    } else {
        StopConditions::first_n(count, timeout)
    };

    let mut cache = if no_cache {
        None
    } else {
        Some(MessageCache::open(queue).context("opening message cache")?)
    };

    let mut harvester = Harvester::new(queue, credentials, conditions, workers)?;
    if let Some(cache) = &cache {
        let cached = cache.load_ids().context("loading cached message ids")?;
        engine_info!("Excluding {} previously cached messages", cached.len());
        harvester = harvester.exclude_ids(cached);
    }
    if let Some(cache) = &mut cache {
        cache.start_writer();
    }

    let mut stream = harvester.into_stream();
    let mut harvested = 0usize;
    for record in &mut stream {
        harvested += 1;
        println!("{}\t{}", record.id, record.body);
        if let Some(cache) = &cache {
            if let Err(err) = cache.save(record) {
                engine_warn!("Failed to queue message for caching: {}", err);
            }
        }
    }

    if let Some(cache) = &mut cache {
        cache.stop_writer().context("flushing message cache")?;
    }

    match stream.take_error() {
        None => {
            eprintln!("Harvested {harvested} unique messages.");
            Ok(())
        }
        Some(err) => {
            eprintln!("Harvested {harvested} unique messages before a worker failed.");
            Err(err.into())
        }
    }
}

fn run_send(queue: &str, credentials: &Credentials, count: usize) -> Result<()> {
    let service = SqsQueueService::connect(credentials)?;
    for i in 0..count {
        let body = format!("message-{}-{}", i, random_string(10));
        service.send_message(queue, &body)?;
    }
    eprintln!("Sent {count} messages to {queue}.");
    Ok(())
}

fn run_purge(queue: &str, credentials: &Credentials) -> Result<()> {
    let service = SqsQueueService::connect(credentials)?;
    service.purge(queue)?;
    eprintln!("Purged {queue}.");
    Ok(())
}

fn random_string(n: usize) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..n)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

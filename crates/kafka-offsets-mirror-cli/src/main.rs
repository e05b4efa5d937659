use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use kafka_offsets_mirror_core::config::{
    DEFAULT_MIRROR_GROUP, DEFAULT_SOURCE_TOPIC, DEFAULT_TARGET_TOPIC,
};
use kafka_offsets_mirror_core::{MirrorOptions, TailOptions};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "kafka-offsets-mirror")]
#[command(about = "Mirror and restore Kafka consumer group offsets", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror the source cluster's committed offsets into a replica topic
    Mirror {
        /// Connection file of the cluster whose offsets are mirrored
        #[arg(long)]
        consumer_config: String,

        /// Connection file of the cluster holding the replica topic
        #[arg(long)]
        producer_config: String,

        /// Internal offsets topic to tail
        #[arg(long, default_value = DEFAULT_SOURCE_TOPIC)]
        source_topic: String,

        /// Replica topic to write to
        #[arg(long, default_value = DEFAULT_TARGET_TOPIC)]
        target_topic: String,

        #[command(flatten)]
        tail: TailArgs,
    },

    /// Replay a replica topic onto live consumer groups
    Restore {
        /// Connection file of the cluster holding the replica topic
        #[arg(long)]
        consumer_config: String,

        /// Connection file of the cluster whose groups are restored
        #[arg(long)]
        restore_config: String,

        /// Replica topic to replay
        #[arg(long, default_value = DEFAULT_TARGET_TOPIC)]
        replica_topic: String,

        #[command(flatten)]
        tail: TailArgs,
    },
}

/// Options shared by both pipelines
#[derive(Args)]
struct TailArgs {
    /// Consumer group used to track progress through the tailed topic
    #[arg(long, default_value = DEFAULT_MIRROR_GROUP)]
    group_id: String,

    /// Number of parallel dispatcher lanes
    #[arg(long, default_value = "10")]
    num_threads: usize,

    /// Longest time a single poll waits for records
    #[arg(long, default_value = "5000")]
    poll_timeout_ms: u64,

    /// Start from the earliest offset instead of the committed position
    #[arg(long)]
    from_beginning: bool,

    /// YAML file with group and topic ignore patterns
    #[arg(long)]
    filter_config: Option<String>,
}

impl TailArgs {
    fn into_options(self, topic: String) -> (TailOptions, Option<String>) {
        let options = TailOptions {
            source_topic: topic,
            group_id: self.group_id,
            num_lanes: self.num_threads,
            poll_timeout_ms: self.poll_timeout_ms,
            from_beginning: self.from_beginning,
            ..TailOptions::default()
        };
        (options, self.filter_config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    // Priority: RUST_LOG env var > verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Mirror {
            consumer_config,
            producer_config,
            source_topic,
            target_topic,
            tail,
        } => {
            let (tail, filter_config) = tail.into_options(source_topic);
            let options = MirrorOptions { tail, target_topic };
            commands::mirror::run(
                &consumer_config,
                &producer_config,
                options,
                filter_config.as_deref(),
            )
            .await?;
        }
        Commands::Restore {
            consumer_config,
            restore_config,
            replica_topic,
            tail,
        } => {
            let (options, filter_config) = tail.into_options(replica_topic);
            commands::restore::run(
                &consumer_config,
                &restore_config,
                options,
                filter_config.as_deref(),
            )
            .await?;
        }
    }

    Ok(())
}

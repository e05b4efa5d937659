use std::time::Duration;

use anyhow::Result;
use kafka_offsets_mirror_core::kafka::KafkaGroupConnector;
use kafka_offsets_mirror_core::{
    CompositeProcessor, KafkaConfig, KafkaOffsetsSource, LoggingProcessor, OffsetsLoop,
    RestoreConverter, RestoreProcessor, RestoreTask, ShardedDispatcher, TailOptions,
};
use tracing::info;

use super::{load_filter, run_until_signal};

/// Replay the replica topic onto the live groups of the restore cluster.
pub async fn run(
    consumer_config: &str,
    restore_config: &str,
    options: TailOptions,
    filter_config: Option<&str>,
) -> Result<()> {
    options.validate()?;

    info!("Loading consumer configuration from: {}", consumer_config);
    let source_config = KafkaConfig::from_file(consumer_config)?;
    info!("Loading restore configuration from: {}", restore_config);
    let group_config = KafkaConfig::from_file(restore_config)?;
    let filter = load_filter(filter_config)?;

    let source = KafkaOffsetsSource::connect(source_config, &options).await?;

    let dispatcher = ShardedDispatcher::<RestoreTask>::new(
        options.num_lanes,
        options.lane_capacity,
        |_| RestoreProcessor::new(Box::new(KafkaGroupConnector::new(group_config.clone()))),
    )?;
    let processor = CompositeProcessor::<RestoreTask>::default()
        .with(LoggingProcessor)
        .with(dispatcher);

    let tail = OffsetsLoop::new(
        Box::new(source),
        RestoreConverter,
        filter,
        Box::new(processor),
        Duration::from_millis(options.poll_timeout_ms),
    );
    let handle = tail.handle();

    info!(
        replica_topic = %options.source_topic,
        group_id = %options.group_id,
        num_lanes = options.num_lanes,
        "Starting offsets restore"
    );

    let stats = run_until_signal(handle, tokio::spawn(tail.run())).await?;

    info!(
        restored = stats.processed,
        filtered = stats.filtered,
        failed = stats.failed,
        "Offsets restore stopped"
    );
    Ok(())
}

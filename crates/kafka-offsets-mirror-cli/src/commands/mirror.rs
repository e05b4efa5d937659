use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use kafka_offsets_mirror_core::kafka::PartitionLeaderRouter;
use kafka_offsets_mirror_core::{
    CompositeProcessor, KafkaConfig, KafkaOffsetsSource, LoggingProcessor, MirrorConverter,
    MirrorOptions, MirrorRecord, OffsetsLoop, OffsetsSinkProcessor, ShardedDispatcher,
};
use tracing::info;

use super::{load_filter, run_until_signal};

/// Mirror the source offsets topic into the replica topic until signalled.
pub async fn run(
    consumer_config: &str,
    producer_config: &str,
    options: MirrorOptions,
    filter_config: Option<&str>,
) -> Result<()> {
    options.validate()?;

    info!("Loading consumer configuration from: {}", consumer_config);
    let source_config = KafkaConfig::from_file(consumer_config)?;
    info!("Loading producer configuration from: {}", producer_config);
    let sink_config = KafkaConfig::from_file(producer_config)?;
    let filter = load_filter(filter_config)?;

    let router = Arc::new(PartitionLeaderRouter::new(sink_config).await?);
    let sink = OffsetsSinkProcessor::connect(Arc::clone(&router), &options.target_topic).await?;
    let source = KafkaOffsetsSource::connect(source_config, &options.tail).await?;

    let dispatcher = ShardedDispatcher::<MirrorRecord>::new(
        options.tail.num_lanes,
        options.tail.lane_capacity,
        |_| sink.clone(),
    )?;
    let processor = CompositeProcessor::<MirrorRecord>::default()
        .with(LoggingProcessor)
        .with(dispatcher);

    let tail = OffsetsLoop::new(
        Box::new(source),
        MirrorConverter,
        filter,
        Box::new(processor),
        Duration::from_millis(options.tail.poll_timeout_ms),
    );
    let handle = tail.handle();

    info!(
        source_topic = %options.tail.source_topic,
        target_topic = %options.target_topic,
        group_id = %options.tail.group_id,
        num_lanes = options.tail.num_lanes,
        "Starting offsets mirror"
    );

    let stats = run_until_signal(handle, tokio::spawn(tail.run())).await;
    router.close().await;
    let stats = stats?;

    info!(
        mirrored = stats.processed,
        filtered = stats.filtered,
        failed = stats.failed,
        "Offsets mirror stopped"
    );
    Ok(())
}

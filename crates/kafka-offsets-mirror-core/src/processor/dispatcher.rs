//! Sharded dispatcher preserving per-key ordering.
//!
//! Records are routed to one of N lanes by hashing a routing key. Each lane is
//! a tokio task with its own bounded queue and its own processor instance, so
//! records sharing a key are handled one at a time and in submission order,
//! and lane-local processor state needs no locking.
//!
//! The key to lane mapping is fixed for the lifetime of a dispatcher.

use std::collections::hash_map::DefaultHasher;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::OffsetsProcessor;
use crate::model::Keyed;
use crate::{Error, Result};

type RouteFn<T> = Arc<dyn Fn(&T) -> u64 + Send + Sync>;

/// Fan-out of records over a fixed set of ordered lanes.
pub struct ShardedDispatcher<T> {
    senders: Vec<mpsc::Sender<T>>,
    lanes: Vec<JoinHandle<()>>,
    num_lanes: usize,
    route: RouteFn<T>,
}

impl<T> ShardedDispatcher<T>
where
    T: Keyed + Debug + Send + Sync + 'static,
{
    /// Dispatcher routing on the record's [`OffsetKey`](crate::model::OffsetKey).
    ///
    /// `factory` is called once per lane with the lane index.
    pub fn new<P, F>(num_lanes: usize, lane_capacity: usize, factory: F) -> Result<Self>
    where
        P: OffsetsProcessor<T> + 'static,
        F: FnMut(usize) -> P,
    {
        Self::with_routing_key(
            num_lanes,
            lane_capacity,
            |record: &T| record.offset_key().clone(),
            factory,
        )
    }
}

impl<T> ShardedDispatcher<T>
where
    T: Debug + Send + Sync + 'static,
{
    /// Dispatcher routing on an arbitrary hashable key extracted from each record.
    pub fn with_routing_key<K, R, P, F>(
        num_lanes: usize,
        lane_capacity: usize,
        routing_key: R,
        mut factory: F,
    ) -> Result<Self>
    where
        K: Hash,
        R: Fn(&T) -> K + Send + Sync + 'static,
        P: OffsetsProcessor<T> + 'static,
        F: FnMut(usize) -> P,
    {
        if num_lanes == 0 {
            return Err(Error::Config("dispatcher needs at least one lane".to_string()));
        }
        if lane_capacity == 0 {
            return Err(Error::Config(
                "dispatcher lane capacity must be positive".to_string(),
            ));
        }

        let mut senders = Vec::with_capacity(num_lanes);
        let mut lanes = Vec::with_capacity(num_lanes);

        for index in 0..num_lanes {
            let (tx, rx) = mpsc::channel(lane_capacity);
            let processor = factory(index);
            senders.push(tx);
            lanes.push(tokio::spawn(run_lane(index, rx, processor)));
        }

        info!(num_lanes, lane_capacity, "Started dispatcher lanes");

        Ok(Self {
            senders,
            lanes,
            num_lanes,
            route: Arc::new(move |record: &T| hash_key(&routing_key(record))),
        })
    }

    pub fn num_lanes(&self) -> usize {
        self.num_lanes
    }

    /// Lane a record is routed to
    pub fn lane_for(&self, record: &T) -> usize {
        ((self.route)(record) % self.num_lanes as u64) as usize
    }

    /// Queue a record on its lane, waiting while the lane is full.
    ///
    /// Returns once the record is queued, not once it is processed.
    pub async fn submit(&self, record: T) -> Result<()> {
        let lane = self.lane_for(&record);
        let sender = self.senders.get(lane).ok_or(Error::DispatcherClosed)?;
        sender
            .send(record)
            .await
            .map_err(|_| Error::DispatcherClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.senders.is_empty()
    }

    /// Stop accepting records, drain every lane and wait for the lanes to
    /// close their processors. Calling it again is a no-op.
    pub async fn close(&mut self) {
        if self.senders.is_empty() && self.lanes.is_empty() {
            return;
        }

        // Dropping the senders ends each lane once its queue is empty.
        drop(std::mem::take(&mut self.senders));

        let lanes = std::mem::take(&mut self.lanes);
        for (index, result) in join_all(lanes).await.into_iter().enumerate() {
            if let Err(e) = result {
                error!(lane = index, error = %e, "Dispatcher lane terminated abnormally");
            }
        }

        info!(num_lanes = self.num_lanes, "Dispatcher closed");
    }
}

fn hash_key<K: Hash>(key: &K) -> u64 {
    // DefaultHasher::new() uses fixed keys, so routing is stable for the process.
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

async fn run_lane<T, P>(index: usize, mut rx: mpsc::Receiver<T>, mut processor: P)
where
    T: Debug + Send + Sync,
    P: OffsetsProcessor<T>,
{
    debug!(lane = index, "Dispatcher lane started");

    while let Some(record) = rx.recv().await {
        match AssertUnwindSafe(processor.process(&record))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(lane = index, error = %e, record = ?record, "Failed to process record");
            }
            Err(_) => {
                error!(lane = index, record = ?record, "Processor panicked on record");
            }
        }
    }

    if let Err(e) = processor.close().await {
        error!(lane = index, error = %e, "Failed to close lane processor");
    }

    debug!(lane = index, "Dispatcher lane stopped");
}

#[async_trait]
impl<T> OffsetsProcessor<T> for ShardedDispatcher<T>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    async fn process(&mut self, record: &T) -> Result<()> {
        self.submit(record.clone()).await
    }

    async fn close(&mut self) -> Result<()> {
        ShardedDispatcher::close(self).await;
        Ok(())
    }
}

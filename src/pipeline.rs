//! Producer/consumer pipeline over a [`Queue`].
//!
//! Used by the `pipeline` command to exercise a queue strategy under load.

use std::convert::Infallible;

use serde::Serialize;

use crate::runtime::fiber::{fork_all, join_all, yield_now};
use crate::runtime::scheduler::StatsSnapshot;
use crate::runtime::sync::{Queue, Strategy};
use crate::runtime::{Cause, Runtime};

/// Shape of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub strategy: Strategy,
    /// Queue capacity; ignored when unbounded. Must be positive.
    pub capacity: usize,
    pub producers: usize,
    /// Must be positive when the strategy is back-pressure.
    pub consumers: usize,
    pub items_per_producer: usize,
}

/// What a pipeline run delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub strategy: Strategy,
    pub capacity: usize,
    pub offered: usize,
    /// Offers reported as fully accepted.
    pub accepted: usize,
    /// Items received by all consumers.
    pub delivered: usize,
    pub per_consumer: Vec<usize>,
    pub stats: StatsSnapshot,
}

/// Run producers and consumers over one queue until every producer is done
/// and the queue is drained, then shut the queue down.
pub fn run_pipeline(
    runtime: &Runtime,
    options: &PipelineOptions,
) -> Result<PipelineReport, Cause<Infallible>> {
    let queue = Queue::new(options.strategy, options.capacity);
    let (producers, consumers, items) = (
        options.producers,
        options.consumers,
        options.items_per_producer,
    );

    let (accepted, per_consumer) = runtime.run(async move {
        let producer_fibers = fork_all((0..producers).map(|p| {
            let queue = queue.clone();
            async move {
                let mut accepted = 0usize;
                for i in 0..items {
                    if queue.offer(p * items + i).await? {
                        accepted += 1;
                    }
                }
                Ok::<_, Cause<Infallible>>(accepted)
            }
        }));
        let consumer_fibers = fork_all((0..consumers).map(|_| {
            let queue = queue.clone();
            async move {
                let mut received = 0usize;
                while queue.take().await.is_ok() {
                    received += 1;
                }
                Ok::<_, Cause<Infallible>>(received)
            }
        }));

        let accepted: usize = join_all(&producer_fibers).await?.into_iter().sum();
        while queue.size()? > 0 {
            yield_now().await?;
        }
        queue.shutdown();
        let per_consumer = join_all(&consumer_fibers).await?;
        Ok::<_, Cause<Infallible>>((accepted, per_consumer))
    })?;

    tracing::debug!(strategy = %options.strategy, accepted, "pipeline finished");

    Ok(PipelineReport {
        strategy: options.strategy,
        capacity: options.capacity,
        offered: producers * items,
        accepted,
        delivered: per_consumer.iter().sum(),
        per_consumer,
        stats: runtime.stats().snapshot(),
    })
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Batch draining of a work queue.
//!
//! The same loop shape as the state-machine runner, over a plain queue: take
//! up to `batch_size` items, handle each, then poll again immediately when the
//! batch was full or wait when the queue ran dry.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::processor::Processor;
use crate::wait::WaitStrategy;

/// Source of work items.
#[async_trait]
pub trait WorkQueue<I>: Send + Sync {
    /// Remove and return up to `max` items.
    async fn take(&self, max: usize) -> anyhow::Result<Vec<I>>;
}

#[async_trait]
impl<I: Send + 'static> WorkQueue<I> for Mutex<VecDeque<I>> {
    async fn take(&self, max: usize) -> anyhow::Result<Vec<I>> {
        let mut queue = self.lock().await;
        let n = max.min(queue.len());
        Ok(queue.drain(..n).collect())
    }
}

/// Handles one work item.
#[async_trait]
pub trait WorkHandler<I>: Send + Sync {
    /// Process `item`.
    async fn handle(&self, item: I) -> anyhow::Result<()>;
}

#[async_trait]
impl<I, F, Fut> WorkHandler<I> for F
where
    I: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, item: I) -> anyhow::Result<()> {
        (self)(item).await
    }
}

/// Result of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Drain {
    /// Items taken from the queue.
    pub taken: usize,
    /// Items whose handler failed or panicked.
    pub failed: usize,
    /// Whether a full batch was available.
    pub full: bool,
}

/// Drains a [`WorkQueue`] in batches.
pub struct QueueProcessor<I> {
    name: String,
    queue: Arc<dyn WorkQueue<I>>,
    handler: Arc<dyn WorkHandler<I>>,
    batch_size: usize,
}

impl<I: Send + 'static> QueueProcessor<I> {
    /// Create a processor taking at most `batch_size` items per pass.
    pub fn new<Q>(
        name: impl Into<String>,
        queue: Arc<Q>,
        handler: impl WorkHandler<I> + 'static,
        batch_size: usize,
    ) -> Self
    where
        Q: WorkQueue<I> + 'static,
    {
        Self {
            name: name.into(),
            queue,
            handler: Arc::new(handler),
            batch_size: batch_size.max(1),
        }
    }

    /// Take one batch and handle every item in it.
    ///
    /// Item failures are logged and counted; they never stop the batch.
    pub async fn drain_once(&self) -> Drain {
        let items = match self.queue.take(self.batch_size).await {
            Ok(items) => items,
            Err(e) => {
                error!(processor = %self.name, error = %e, "Failed to take from queue");
                return Drain::default();
            }
        };

        let mut drain = Drain {
            taken: items.len(),
            failed: 0,
            full: items.len() >= self.batch_size,
        };

        for item in items {
            match AssertUnwindSafe(self.handler.handle(item)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    drain.failed += 1;
                    warn!(processor = %self.name, error = %e, "Work item failed");
                }
                Err(_) => {
                    drain.failed += 1;
                    error!(processor = %self.name, "Work item handler panicked");
                }
            }
        }

        if drain.taken > 0 {
            debug!(
                processor = %self.name,
                taken = drain.taken,
                failed = drain.failed,
                full = drain.full,
                "Drained batch"
            );
        }
        drain
    }

    /// Drain until `shutdown` is notified.
    ///
    /// A full batch is followed by another pass at once; an underfed one by
    /// the strategy's wait.
    pub async fn run(&self, wait: &mut dyn WaitStrategy, shutdown: Arc<Notify>) {
        info!(processor = %self.name, batch_size = self.batch_size, "Queue processor started");

        loop {
            let drain = self.drain_once().await;
            if drain.taken > 0 {
                wait.success();
            }

            if drain.full {
                if shutdown.notified().now_or_never().is_some() {
                    break;
                }
                continue;
            }

            tokio::select! {
                biased;

                _ = shutdown.notified() => break,

                _ = tokio::time::sleep(wait.wait_duration()) => {}
            }
        }

        info!(processor = %self.name, "Queue processor stopped");
    }
}

#[async_trait]
impl<I: Send + 'static> Processor for QueueProcessor<I> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self) -> usize {
        self.drain_once().await.taken
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Polling loop over a set of processors.
//!
//! Each cycle runs every processor once. A cycle that handled nothing waits
//! for the wait strategy's duration (cut short by shutdown); a cycle that did
//! work starts the next one immediately so backlogs drain quickly.

use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use crate::processor::Processor;
use crate::wait::{ExponentialWaitStrategy, WaitStrategy};

/// Drives processors until shut down.
pub struct StateMachineRunner {
    name: String,
    processors: Vec<Arc<dyn Processor>>,
    wait_strategy: Box<dyn WaitStrategy>,
    shutdown: Arc<Notify>,
}

impl StateMachineRunner {
    /// Create a new builder for configuring the runner.
    pub fn builder() -> StateMachineRunnerBuilder {
        StateMachineRunnerBuilder::new()
    }

    /// Runner name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a handle that can be used to signal shutdown.
    ///
    /// Signal with `notify_one` so a signal sent mid-cycle is not lost.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run every processor once and return the total handled.
    pub async fn run_cycle(&self) -> usize {
        let mut total = 0;
        for processor in &self.processors {
            let handled = processor.process().await;
            if handled > 0 {
                debug!(
                    runner = %self.name,
                    processor = %processor.name(),
                    handled = handled,
                    "Processor pass"
                );
            }
            total += handled;
        }
        total
    }

    /// Run cycles until the shutdown handle is notified.
    pub async fn run(mut self) {
        info!(
            runner = %self.name,
            processors = self.processors.len(),
            "State machine runner started"
        );

        let mut cycles = 0u64;
        loop {
            let handled = self.run_cycle().await;
            cycles += 1;

            if handled > 0 {
                self.wait_strategy.success();
                if self.shutdown.notified().now_or_never().is_some() {
                    info!(runner = %self.name, "State machine runner received shutdown signal");
                    break;
                }
                continue;
            }

            let wait = self.wait_strategy.wait_duration();
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!(runner = %self.name, "State machine runner received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!(runner = %self.name, cycles = cycles, "State machine runner stopped");
    }

    /// Spawn the loop onto the runtime.
    pub fn start(self) -> RunnerHandle {
        let shutdown = self.shutdown_handle();
        let handle = tokio::spawn(self.run());
        RunnerHandle { handle, shutdown }
    }
}

/// A runner spawned with [`StateMachineRunner::start`].
pub struct RunnerHandle {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl RunnerHandle {
    /// Signal shutdown and wait for the current cycle to finish.
    pub async fn stop(self) -> Result<()> {
        self.shutdown.notify_one();
        self.handle
            .await
            .map_err(|e| RunnerError::Other(format!("runner task failed: {}", e)))
    }

    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Builder for [`StateMachineRunner`].
pub struct StateMachineRunnerBuilder {
    name: String,
    processors: Vec<Arc<dyn Processor>>,
    wait_strategy: Option<Box<dyn WaitStrategy>>,
}

impl StateMachineRunnerBuilder {
    fn new() -> Self {
        Self {
            name: "state-machine".to_string(),
            processors: Vec::new(),
            wait_strategy: None,
        }
    }

    /// Set the runner name used in logs.
    ///
    /// Default: `state-machine`
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a processor; processors run in insertion order (at least one required).
    pub fn processor(mut self, processor: impl Processor + 'static) -> Self {
        self.processors.push(Arc::new(processor));
        self
    }

    /// Add a shared processor.
    pub fn shared_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processors.push(processor);
        self
    }

    /// Set the idle wait strategy.
    ///
    /// Default: exponential from 100 ms to 5 s
    pub fn wait_strategy(mut self, strategy: impl WaitStrategy + 'static) -> Self {
        self.wait_strategy = Some(Box::new(strategy));
        self
    }

    /// Use an exponential wait strategy bounded by `config`.
    pub fn config(self, config: &RunnerConfig) -> Self {
        self.wait_strategy(ExponentialWaitStrategy::new(config.wait_base, config.wait_max))
    }

    /// Build the runner.
    ///
    /// Returns an error if no processor was added.
    pub fn build(self) -> Result<StateMachineRunner> {
        if self.processors.is_empty() {
            return Err(RunnerError::Missing("processor"));
        }

        let wait_strategy = self.wait_strategy.unwrap_or_else(|| {
            let defaults = RunnerConfig::default();
            Box::new(ExponentialWaitStrategy::new(defaults.wait_base, defaults.wait_max))
        });

        Ok(StateMachineRunner {
            name: self.name,
            processors: self.processors,
            wait_strategy,
            shutdown: Arc::new(Notify::new()),
        })
    }
}

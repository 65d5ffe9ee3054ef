//! Periodic countdown while the controller is blocked.
//!
//! A blocked UI re-checks admission once per second to refresh its
//! countdown and to notice when the block ends. The ticker runs that loop as
//! a tokio task with an explicit shutdown, and aborts the task if its handle
//! is dropped.

use crate::application::controller::AdmissionController;
use crate::application::ports::Store;
use crate::domain::state::AdmissionResult;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Error returned when ticker configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickerConfigError {
    /// Tick interval must be greater than zero
    ZeroInterval,
}

impl std::fmt::Display for TickerConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TickerConfigError::ZeroInterval => write!(f, "tick interval must be greater than 0"),
        }
    }
}

impl std::error::Error for TickerConfigError {}

/// Error returned when a ticker task does not shut down cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
    /// The task panicked while running the tick callback
    TaskPanicked,
    /// The task was cancelled before it could stop on its own
    TaskCancelled,
}

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownError::TaskPanicked => write!(f, "countdown task panicked"),
            ShutdownError::TaskCancelled => write!(f, "countdown task was cancelled"),
        }
    }
}

impl std::error::Error for ShutdownError {}

/// Configuration for a [`CountdownTicker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerConfig {
    /// Time between checks while blocked
    pub interval: Duration,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

impl TickerConfig {
    /// Create a config with the given interval.
    ///
    /// # Errors
    /// Returns `TickerConfigError::ZeroInterval` if `interval` is zero.
    pub fn new(interval: Duration) -> Result<Self, TickerConfigError> {
        if interval.is_zero() {
            return Err(TickerConfigError::ZeroInterval);
        }
        Ok(Self { interval })
    }
}

/// Re-checks admission on every tick while the last verdict was a denial.
///
/// Ticks that find the controller Open are skipped, so the countdown stops
/// once the block ends and resumes by itself when a later check blocks.
#[derive(Debug)]
pub struct CountdownTicker<S> {
    controller: AdmissionController<S>,
    config: TickerConfig,
}

impl<S> CountdownTicker<S>
where
    S: Store + 'static,
{
    /// Create a ticker over a controller handle.
    pub fn new(controller: AdmissionController<S>, config: TickerConfig) -> Self {
        Self { controller, config }
    }

    /// Spawn the ticker task, delivering every fresh verdict to `on_tick`.
    ///
    /// Checks use the controller's clock. Must be called within a tokio
    /// runtime.
    pub fn start<F>(self, mut on_tick: F) -> TickerHandle
    where
        F: FnMut(AdmissionResult) + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let Self { controller, config } = self;

        let task = tokio::spawn(async move {
            let mut ticker = interval(config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;
            tracing::debug!(interval_ms = interval_ms(config.interval), "Countdown started");

            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if controller.last_result().allowed {
                            continue;
                        }
                        on_tick(controller.check_admission_now());
                    }
                }
            }

            tracing::debug!("Countdown stopped");
        });

        TickerHandle {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    /// The ticker configuration.
    pub fn config(&self) -> &TickerConfig {
        &self.config
    }
}

fn interval_ms(interval: Duration) -> u64 {
    u64::try_from(interval.as_millis()).unwrap_or(u64::MAX)
}

/// Handle to a running [`CountdownTicker`] task.
///
/// Dropping the handle aborts the task; call [`shutdown`](Self::shutdown) to
/// stop it and wait for it to finish.
#[derive(Debug)]
pub struct TickerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl TickerHandle {
    /// Signal the task to stop and wait for it.
    ///
    /// # Errors
    /// Returns `ShutdownError` if the task panicked or was cancelled.
    pub async fn shutdown(mut self) -> Result<(), ShutdownError> {
        if let Some(tx) = self.shutdown_tx.take() {
            // The task may already have exited; nothing to signal then
            let _ = tx.send(());
        }
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        match task.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_panic() => Err(ShutdownError::TaskPanicked),
            Err(_) => Err(ShutdownError::TaskCancelled),
        }
    }

    /// Check if the task has finished.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }
}

impl Drop for TickerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

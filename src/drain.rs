//! Cooperative drain loop.
//!
//! Registered with the host scheduler, it takes every queued command on each
//! tick, runs it through the executor on the host thread and hands the
//! response back to the waiting connection. It never waits on anything: an
//! empty queue makes the tick a no-op.

use crate::executor::CommandExecutor;
use crate::handoff::{HandoffQueue, QueueItem};
use crate::host::RecurringTask;
use crate::protocol::{Command, Response};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Commands run through the executor.
    pub executed: usize,
    /// Commands whose response has `error` status.
    pub failed: usize,
    /// Responses whose connection was already gone.
    pub undeliverable: usize,
}

/// Drains the hand-off queue into a command executor.
pub struct DrainLoop<E> {
    queue: Arc<HandoffQueue>,
    executor: E,
    interval: Duration,
}

impl<E: CommandExecutor> DrainLoop<E> {
    pub fn new(queue: Arc<HandoffQueue>, executor: E, interval: Duration) -> Self {
        Self {
            queue,
            executor,
            interval,
        }
    }

    /// Run one tick: execute and answer everything currently queued.
    pub fn tick(&mut self) -> TickReport {
        let items = self.queue.drain_all();
        let mut report = TickReport::default();
        if items.is_empty() {
            return report;
        }

        trace!(pending = items.len(), "Draining command queue");

        for QueueItem { command, reply } in items {
            let response = self.execute_guarded(&command);
            report.executed += 1;
            if !response.is_ok() {
                report.failed += 1;
            }
            if !reply.fulfil(response) {
                report.undeliverable += 1;
                debug!(action = %command.action, "Client disconnected before response");
            }
        }

        debug!(
            executed = report.executed,
            failed = report.failed,
            undeliverable = report.undeliverable,
            "Tick complete"
        );
        report
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Run the executor, turning both reported errors and panics into an
    /// error response so nothing escapes into the host scheduler.
    fn execute_guarded(&mut self, command: &Command) -> Response {
        let executor = &mut self.executor;
        match panic::catch_unwind(AssertUnwindSafe(|| executor.execute(command))) {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                debug!(action = %command.action, error = %e, "Command failed");
                Response::error(e.to_string())
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(action = %command.action, %reason, "Executor panicked");
                Response::error(format!("internal error while executing '{}': {reason}", command.action))
            }
        }
    }
}

impl<E: CommandExecutor> RecurringTask for DrainLoop<E> {
    fn name(&self) -> &str {
        "command-drain"
    }

    fn run(&mut self) -> Option<Duration> {
        self.tick();
        Some(self.interval)
    }
}

impl<E> Drop for DrainLoop<E> {
    fn drop(&mut self) {
        // Dropped slots close their channels; connections report the failure
        let abandoned = self.queue.drain_all().len();
        if abandoned > 0 {
            warn!(abandoned, "Drain loop stopped with commands still queued");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

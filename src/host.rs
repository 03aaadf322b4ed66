//! Host-side cooperative scheduling.
//!
//! The host owns a single thread and runs registered timers on it. A timer
//! callback returns the delay until it wants to run again, or `None` to be
//! unregistered. `MainLoop` is a minimal implementation of that contract for
//! running the bridge as a standalone process and in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Longest the loop sleeps before re-checking its stop flag.
const MAX_IDLE_SLEEP: Duration = Duration::from_millis(50);

/// A callback the host invokes periodically on its own thread.
pub trait RecurringTask {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Do one bounded unit of work. Returns the delay until the next
    /// invocation, or `None` to stop being scheduled.
    fn run(&mut self) -> Option<Duration>;
}

/// Registration side of a host scheduler.
pub trait HostScheduler {
    /// Register a task. Its first run happens on the next turn.
    fn register(&mut self, task: Box<dyn RecurringTask>);
}

struct Timer {
    due: Instant,
    task: Box<dyn RecurringTask>,
}

/// Single-threaded timer loop.
///
/// Tasks are not required to be `Send`: everything registered here stays on
/// the thread that drives the loop.
#[derive(Default)]
pub struct MainLoop {
    timers: Vec<Timer>,
}

impl HostScheduler for MainLoop {
    fn register(&mut self, task: Box<dyn RecurringTask>) {
        debug!(task = task.name(), "Registering timer");
        self.timers.push(Timer {
            due: Instant::now(),
            task,
        });
    }
}

impl MainLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Run every task that is due at `now`, once each.
    ///
    /// Returns the earliest time any remaining task is due.
    pub fn turn(&mut self, now: Instant) -> Option<Instant> {
        self.timers.retain_mut(|timer| {
            if timer.due > now {
                return true;
            }
            match timer.task.run() {
                Some(delay) => {
                    timer.due = now + delay;
                    true
                }
                None => {
                    debug!(task = timer.task.name(), "Timer unregistered");
                    false
                }
            }
        });
        self.timers.iter().map(|t| t.due).min()
    }

    /// Drive timers until `stop` is set or no tasks remain.
    pub fn run_until(&mut self, stop: &AtomicBool) {
        while !stop.load(Ordering::Acquire) {
            let now = Instant::now();
            let Some(next_due) = self.turn(now) else {
                debug!("No timers left, main loop exiting");
                return;
            };
            let sleep = next_due
                .saturating_duration_since(Instant::now())
                .min(MAX_IDLE_SLEEP);
            if !sleep.is_zero() {
                trace!(?sleep, "Main loop idle");
                std::thread::sleep(sleep);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Counter {
        runs: Rc<Cell<usize>>,
        limit: usize,
        delay: Duration,
    }

    impl RecurringTask for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn run(&mut self) -> Option<Duration> {
            self.runs.set(self.runs.get() + 1);
            (self.runs.get() < self.limit).then_some(self.delay)
        }
    }

    fn counter(limit: usize, delay: Duration) -> (Box<Counter>, Rc<Cell<usize>>) {
        let runs = Rc::new(Cell::new(0));
        let task = Box::new(Counter {
            runs: Rc::clone(&runs),
            limit,
            delay,
        });
        (task, runs)
    }

    #[test]
    fn test_first_run_is_immediate() {
        let mut main_loop = MainLoop::new();
        let (task, runs) = counter(10, Duration::from_secs(1));
        main_loop.register(task);

        let now = Instant::now();
        let next = main_loop.turn(now);
        assert_eq!(runs.get(), 1);
        assert_eq!(next, Some(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_task_waits_for_its_delay() {
        let mut main_loop = MainLoop::new();
        let (task, runs) = counter(10, Duration::from_millis(100));
        main_loop.register(task);

        let start = Instant::now();
        main_loop.turn(start);
        main_loop.turn(start + Duration::from_millis(50));
        assert_eq!(runs.get(), 1);

        main_loop.turn(start + Duration::from_millis(100));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_none_unregisters() {
        let mut main_loop = MainLoop::new();
        let (task, runs) = counter(2, Duration::ZERO);
        main_loop.register(task);

        let now = Instant::now();
        main_loop.turn(now);
        assert_eq!(main_loop.len(), 1);
        assert_eq!(main_loop.turn(now), None);
        assert!(main_loop.is_empty());
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_run_until_returns_when_tasks_finish() {
        let mut main_loop = MainLoop::new();
        let (task, runs) = counter(3, Duration::from_millis(1));
        main_loop.register(task);

        main_loop.run_until(&AtomicBool::new(false));
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn test_run_until_honours_stop_flag() {
        let mut main_loop = MainLoop::new();
        let (task, runs) = counter(usize::MAX, Duration::from_millis(1));
        main_loop.register(task);

        main_loop.run_until(&AtomicBool::new(true));
        assert_eq!(runs.get(), 0);
        assert_eq!(main_loop.len(), 1);
    }
}

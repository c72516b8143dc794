//! The simulation tick context.
//!
//! The game world is owned by exactly one thread. Handlers that touch it
//! submit a task here and complete their request from inside that task.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::errors::{OpError, EX};
use crate::module::Completion;

/// Name of the thread a [`TickLoop`] runs on.
pub const TICK_THREAD_NAME: &str = "gamelink-tick";

/// Unit of work scheduled onto the tick thread.
pub type TickTask = Box<dyn FnOnce() + Send + 'static>;

/// Scheduler for the tick context.
pub trait TickExecutor: Send + Sync {
    /// Run `task` on the tick thread after `delay_ticks` ticks (0 = next tick).
    ///
    /// A task submitted after shutdown is dropped.
    fn submit(&self, delay_ticks: u64, task: TickTask);
}

/// Run `work` on the tick thread and complete `done` with its result.
///
/// A panic inside `work` completes the request with `EX`.
pub fn run_on_tick<F>(executor: &dyn TickExecutor, done: Completion, work: F)
where
    F: FnOnce() -> Result<Value, OpError> + Send + 'static,
{
    executor.submit(
        0,
        Box::new(move || match panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(result) => done.complete(result),
            Err(panic) => done.fail(EX, panic_message(panic.as_ref())),
        }),
    );
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}

/// Whether the calling thread is a tick thread.
pub fn on_tick_thread() -> bool {
    thread::current().name() == Some(TICK_THREAD_NAME)
}

struct Scheduled {
    due: u64,
    task: TickTask,
}

struct Shared {
    queue: Mutex<Vec<Scheduled>>,
    tick: AtomicU64,
    running: AtomicBool,
}

/// A fixed-rate tick thread.
pub struct TickLoop {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TickLoop {
    /// Start the tick thread, running one tick every `interval`.
    pub fn spawn(interval: Duration) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Vec::new()),
            tick: AtomicU64::new(0),
            running: AtomicBool::new(true),
        });
        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(TICK_THREAD_NAME.into())
            .spawn(move || run(&worker, interval))?;
        info!(interval_ms = interval.as_millis(), "tick loop started");
        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Number of the next tick to run.
    pub fn current_tick(&self) -> u64 {
        self.shared.tick.load(Ordering::Acquire)
    }

    /// Whether the loop still accepts tasks.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stop the loop and wait for the current tick to finish.
    ///
    /// Pending tasks are dropped, which fails their completions with `EX`.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if on_tick_thread() {
                // Called from a task; the loop exits after this tick.
                return;
            }
            if handle.join().is_err() {
                warn!("tick thread exited with a panic");
            }
        }
        info!("tick loop stopped");
    }
}

impl TickExecutor for TickLoop {
    fn submit(&self, delay_ticks: u64, task: TickTask) {
        // Checked under the queue lock: the loop's final drain takes the same
        // lock after `running` is cleared, so nothing is left behind.
        let mut queue = self.shared.queue.lock();
        if !self.is_running() {
            debug!("tick loop stopped, dropping task");
            return;
        }
        let due = self.current_tick().saturating_add(delay_ticks);
        queue.push(Scheduled { due, task });
    }
}

impl Drop for TickLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: &Shared, interval: Duration) {
    let mut next = Instant::now();
    while shared.running.load(Ordering::Acquire) {
        let tick = shared.tick.fetch_add(1, Ordering::AcqRel);

        let ready: Vec<Scheduled> = {
            let mut queue = shared.queue.lock();
            let (ready, pending) = std::mem::take(&mut *queue)
                .into_iter()
                .partition(|s| s.due <= tick);
            *queue = pending;
            ready
        };

        for scheduled in ready {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(scheduled.task)) {
                warn!(tick, error = %panic_message(panic.as_ref()), "tick task panicked");
            }
        }

        next += interval;
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            next = now;
        }
    }

    let dropped = std::mem::take(&mut *shared.queue.lock());
    if !dropped.is_empty() {
        debug!(count = dropped.len(), "dropping pending tick tasks");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Outcome;
    use serde_json::json;
    use std::sync::mpsc;

    const FAST: Duration = Duration::from_millis(2);
    const WAIT: Duration = Duration::from_secs(5);

    fn completion() -> (Completion, mpsc::Receiver<Outcome>) {
        let (tx, rx) = mpsc::channel();
        let done = Completion::new("Test.tick", move |o| {
            let _ = tx.send(o);
        });
        (done, rx)
    }

    #[test]
    fn work_runs_on_tick_thread() {
        let ticks = TickLoop::spawn(FAST).unwrap();
        let (done, rx) = completion();
        run_on_tick(&ticks, done, || Ok(json!({"tick": on_tick_thread()})));
        assert_eq!(
            rx.recv_timeout(WAIT).unwrap(),
            Outcome::Respond(json!({"tick": true}))
        );
    }

    #[test]
    fn error_result_fails_request() {
        let ticks = TickLoop::spawn(FAST).unwrap();
        let (done, rx) = completion();
        run_on_tick(&ticks, done, || Err(OpError::NotOnline("nobody".into())));
        assert_eq!(
            rx.recv_timeout(WAIT).unwrap(),
            Outcome::Fail {
                code: "NOT_ONLINE".into(),
                message: "nobody".into()
            }
        );
    }

    #[test]
    fn panic_becomes_ex() {
        let ticks = TickLoop::spawn(FAST).unwrap();
        let (done, rx) = completion();
        run_on_tick(&ticks, done, || panic!("world exploded"));
        assert_eq!(
            rx.recv_timeout(WAIT).unwrap(),
            Outcome::Fail {
                code: "EX".into(),
                message: "world exploded".into()
            }
        );
        // The loop survives the panic.
        let (done, rx) = completion();
        run_on_tick(&ticks, done, || Ok(Value::Null));
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), Outcome::Respond(_)));
    }

    #[test]
    fn delayed_task_waits_for_its_tick() {
        let ticks = TickLoop::spawn(FAST).unwrap();
        let (tx, rx) = mpsc::channel();
        let start = ticks.current_tick();
        ticks.submit(
            5,
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        rx.recv_timeout(WAIT).unwrap();
        assert!(ticks.current_tick() >= start + 5);
    }

    #[test]
    fn submit_after_shutdown_fails_completion() {
        let ticks = TickLoop::spawn(FAST).unwrap();
        ticks.shutdown();
        assert!(!ticks.is_running());
        let (done, rx) = completion();
        run_on_tick(&ticks, done, || Ok(Value::Null));
        match rx.recv_timeout(WAIT).unwrap() {
            Outcome::Fail { code, .. } => assert_eq!(code, "EX"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn submits_racing_shutdown_all_complete() {
        let ticks = Arc::new(TickLoop::spawn(FAST).unwrap());
        let (tx, rx) = mpsc::channel();
        let submitters: Vec<_> = (0..4)
            .map(|_| {
                let (ticks, tx) = (Arc::clone(&ticks), tx.clone());
                thread::spawn(move || {
                    for _ in 0..200 {
                        let tx = tx.clone();
                        let done = Completion::new("Test.race", move |o| {
                            let _ = tx.send(o);
                        });
                        run_on_tick(ticks.as_ref(), done, || Ok(Value::Null));
                    }
                })
            })
            .collect();
        thread::sleep(Duration::from_millis(5));
        ticks.shutdown();
        for handle in submitters {
            handle.join().unwrap();
        }
        drop(tx);
        // Every completion resolves while the loop is still alive.
        for _ in 0..800 {
            let _ = rx.recv_timeout(WAIT).unwrap();
        }
        assert!(!ticks.is_running());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let ticks = TickLoop::spawn(FAST).unwrap();
        ticks.shutdown();
        ticks.shutdown();
    }

    #[test]
    fn panic_message_variants() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(s.as_ref()), "static");
        let s: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(s.as_ref()), "owned");
        let s: Box<dyn Any + Send> = Box::new(5_u8);
        assert_eq!(panic_message(s.as_ref()), "handler panicked");
    }
}

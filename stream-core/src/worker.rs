//! Supervised worker: one blocking loop driven by three hooks.
//!
//! ```text
//!   Idle ──► Starting ──► Running ◄──► Pausing
//!                │           │            │
//!                └───────────┴─► Stopping ◄┘ ──► Idle
//! ```
//!
//! Transitions are compare-and-swap on [`WorkerControl`]; the owner of the control
//! (the channel manager) decides when they happen, the hooks only do the work.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Idle = 0,
    Starting = 1,
    Running = 2,
    Pausing = 3,
    Stopping = 4,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerState::Starting,
            2 => WorkerState::Running,
            3 => WorkerState::Pausing,
            4 => WorkerState::Stopping,
            _ => WorkerState::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Pausing => "paused",
            WorkerState::Stopping => "stopping",
        }
    }
}

impl Display for WorkerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct WorkerControl {
    state: AtomicU8,
    cancel: CancellationToken,
}

impl WorkerControl {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(WorkerState::Idle as u8),
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn begin_starting(&self) -> bool {
        self.transition(WorkerState::Idle, WorkerState::Starting)
    }

    pub fn begin_running(&self) -> bool {
        self.transition(WorkerState::Starting, WorkerState::Running)
    }

    pub fn pause(&self) -> bool {
        self.transition(WorkerState::Running, WorkerState::Pausing)
    }

    pub fn resume(&self) -> bool {
        self.transition(WorkerState::Pausing, WorkerState::Running)
    }

    /// Moves any live state to `Stopping` and cancels the loop. Returns the state it left,
    /// or None if the worker was already stopping or idle.
    pub fn begin_stopping(&self) -> Option<WorkerState> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let state = WorkerState::from_u8(current);
            if matches!(state, WorkerState::Idle | WorkerState::Stopping) {
                return None;
            }
            match self.state.compare_exchange(
                current,
                WorkerState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.cancel.cancel();
                    return Some(state);
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn finish(&self) {
        self.state.store(WorkerState::Idle as u8, Ordering::Release);
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Default for WorkerControl {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// Nothing produced; back off before the next step.
    Idle,
    /// The worker is done and should tear down.
    Finished,
}

pub trait WorkerHooks: Send + 'static {
    fn on_init(&mut self) -> anyhow::Result<()>;

    fn on_step(&mut self) -> Step;

    /// Runs exactly once when the loop exits, including after an init failure or a panic.
    fn on_teardown(&mut self);
}

struct TeardownGuard<H: WorkerHooks> {
    hooks: H,
    control: Arc<WorkerControl>,
}

impl<H: WorkerHooks> Drop for TeardownGuard<H> {
    fn drop(&mut self) {
        self.hooks.on_teardown();
        self.control.finish();
    }
}

/// Spawns the worker on a blocking thread. The init result is sent on `init_tx`
/// before the step loop begins; the receiver may already be gone.
pub fn spawn_worker<H: WorkerHooks>(
    name: String,
    hooks: H,
    control: Arc<WorkerControl>,
    init_tx: oneshot::Sender<anyhow::Result<()>>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || run_worker(name, hooks, control, init_tx))
}

fn run_worker<H: WorkerHooks>(
    name: String,
    hooks: H,
    control: Arc<WorkerControl>,
    init_tx: oneshot::Sender<anyhow::Result<()>>,
) {
    let mut guard = TeardownGuard {
        hooks,
        control: Arc::clone(&control),
    };

    log::debug!("worker {}: init", name);
    if let Err(e) = guard.hooks.on_init() {
        log::error!("worker {}: init failed: {:#}", name, e);
        let _ = init_tx.send(Err(e));
        return;
    }
    if !control.begin_running() {
        log::warn!("worker {}: stopped during init", name);
        let _ = init_tx.send(Err(anyhow::anyhow!("worker stopped during init")));
        return;
    }
    let _ = init_tx.send(Ok(()));

    loop {
        if control.is_cancelled() {
            break;
        }
        if control.state() == WorkerState::Pausing {
            std::thread::sleep(Duration::from_millis(10));
            continue;
        }
        match guard.hooks.on_step() {
            Step::Continue => {}
            Step::Idle => std::thread::sleep(Duration::from_millis(10)),
            Step::Finished => break,
        }
    }
    log::debug!("worker {}: exit", name);
}

#[cfg(test)]
#[path = "worker_test.rs"]
mod worker_test;

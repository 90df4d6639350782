//! Throttled batch re-evaluation of pending targets.
//!
//! Targets are registered from anywhere; a single background task invokes
//! one operation on every pending target per pass and drops the ones that
//! report `true`. The task stops itself once nothing is pending and the
//! next registration starts a fresh one.
//!
//! ```text
//! register(target) ──► pending ◄──┐
//!                         │       │ false
//!              [before] ─►op(t) ──┘
//!                         │ true
//!                         ▼
//!                      removed ─► [after] ─► pending empty? stop : repeat
//! ```
//!
//! The pending map and the running flag live under one mutex. The lock is
//! never held across an operation call.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

/// Something a [`PollInterval`] can track. Targets with equal keys are
/// the same pending request.
pub trait PollTarget: Send + Sync + 'static {
    fn poll_key(&self) -> String;
}

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The operation run against each pending target. `true` resolves it.
pub type PollOp<T> = Arc<dyn Fn(Arc<T>) -> BoxFuture<bool> + Send + Sync>;

/// Pauses around each pass over the pending set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollDelays {
    pub before: Duration,
    pub after: Duration,
}

impl PollDelays {
    pub fn new(before: Duration, after: Duration) -> Self {
        Self { before, after }
    }
}

struct Pending<T> {
    target: Arc<T>,
    /// Bumped on re-registration; a result only resolves the generation
    /// it was computed for.
    generation: u64,
}

struct PollState<T> {
    pending: HashMap<String, Pending<T>>,
    running: bool,
    next_generation: u64,
}

struct Shared<T> {
    name: String,
    op: PollOp<T>,
    delays: PollDelays,
    state: Mutex<PollState<T>>,
    idle: watch::Sender<bool>,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, PollState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Single-flight poll loop over a set of pending targets.
pub struct PollInterval<T: PollTarget> {
    shared: Arc<Shared<T>>,
}

impl<T: PollTarget> Clone for PollInterval<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: PollTarget> PollInterval<T> {
    /// Create a coordinator that runs `op` on its targets. `name` labels
    /// the loop in logs.
    pub fn new<F, Fut>(name: impl Into<String>, delays: PollDelays, op: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let op: PollOp<T> = Arc::new(move |target: Arc<T>| -> BoxFuture<bool> { Box::pin(op(target)) });
        let (idle, _) = watch::channel(true);
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                op,
                delays,
                state: Mutex::new(PollState {
                    pending: HashMap::new(),
                    running: false,
                    next_generation: 0,
                }),
                idle,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Add `target` to the pending set and make sure the loop is running.
    ///
    /// A target already pending is not duplicated. Must be called from
    /// within a tokio runtime.
    pub fn register(&self, target: Arc<T>) {
        let key = target.poll_key();
        let start = {
            let mut state = self.shared.lock();
            state.next_generation += 1;
            let generation = state.next_generation;
            match state.pending.entry(key.clone()) {
                Entry::Occupied(mut entry) => entry.get_mut().generation = generation,
                Entry::Vacant(entry) => {
                    entry.insert(Pending { target, generation });
                }
            }

            if state.running {
                false
            } else {
                state.running = true;
                self.shared.idle.send_replace(false);
                true
            }
        };

        if start {
            debug!(poll = %self.shared.name, %key, "poll loop starting");
            tokio::spawn(run_loop(self.shared.clone()));
        }
    }

    /// Drop a pending target without resolving it. Returns true if it was
    /// pending. A pass already in flight may still invoke it once.
    pub fn withdraw(&self, key: &str) -> bool {
        let removed = self.shared.lock().pending.remove(key).is_some();
        if removed {
            debug!(poll = %self.shared.name, %key, "poll target withdrawn");
        }
        removed
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Keys of every pending target, sorted.
    pub fn pending_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.shared.lock().pending.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Resolve once no loop is running.
    pub async fn wait_idle(&self) {
        let mut idle = self.shared.idle.subscribe();
        let _ = idle.wait_for(|idle| *idle).await;
    }
}

/// Clears the running flag if the loop unwinds before stopping cleanly.
struct RunningGuard<T> {
    shared: Arc<Shared<T>>,
    armed: bool,
}

impl<T> Drop for RunningGuard<T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.shared.lock();
        state.running = false;
        self.shared.idle.send_replace(true);
        warn!(poll = %self.shared.name, pending = state.pending.len(), "poll loop terminated abnormally");
    }
}

async fn run_loop<T: PollTarget>(shared: Arc<Shared<T>>) {
    let mut guard = RunningGuard {
        shared: shared.clone(),
        armed: true,
    };

    loop {
        {
            let mut state = shared.lock();
            if state.pending.is_empty() {
                state.running = false;
                shared.idle.send_replace(true);
                guard.armed = false;
                debug!(poll = %shared.name, "poll loop drained");
                return;
            }
        }

        if !shared.delays.before.is_zero() {
            tokio::time::sleep(shared.delays.before).await;
        }

        let batch: Vec<(String, Arc<T>, u64)> = shared
            .lock()
            .pending
            .iter()
            .map(|(key, p)| (key.clone(), p.target.clone(), p.generation))
            .collect();

        let mut resolved = Vec::new();
        for (key, target, generation) in batch {
            if (shared.op)(target).await {
                resolved.push((key, generation));
            }
        }

        {
            let mut state = shared.lock();
            for (key, generation) in resolved {
                if state
                    .pending
                    .get(&key)
                    .is_some_and(|p| p.generation == generation)
                {
                    state.pending.remove(&key);
                    debug!(poll = %shared.name, %key, "poll target resolved");
                }
            }
        }

        if shared.delays.after.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(shared.delays.after).await;
        }
    }
}

//! Fakes shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dynoscale_state::{RedbStateStore, Record, SharedStateStore};

use crate::clock::ManualClock;
use crate::error::{AutoscaleError, PlatformError};
use crate::platform::{Formation, PlatformClient};
use crate::process::{Process, ProcessSettings, ScalingContext};
use crate::queue::QueueSystem;

pub const NOW: u64 = 1_700_000_000;

#[derive(Default)]
pub struct FakePlatform {
    formation: Mutex<Vec<Formation>>,
    updates: Mutex<Vec<u32>>,
    failing: AtomicBool,
}

impl FakePlatform {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_formation(&self, entries: &[(&str, u32)]) {
        *self.formation.lock().unwrap() = entries
            .iter()
            .map(|(process_type, quantity)| Formation {
                process_type: process_type.to_string(),
                quantity: *quantity,
                size: None,
            })
            .collect();
    }

    /// Quantities passed to `update_formation`, in call order.
    pub fn updates(&self) -> Vec<u32> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn list_formation(&self, _app_name: &str) -> Result<Vec<Formation>, PlatformError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PlatformError::Transport("connection refused".into()));
        }
        Ok(self.formation.lock().unwrap().clone())
    }

    async fn update_formation(
        &self,
        _app_name: &str,
        _process_type: &str,
        quantity: u32,
    ) -> Result<u32, PlatformError> {
        self.updates.lock().unwrap().push(quantity);
        if self.failing.load(Ordering::SeqCst) {
            return Err(PlatformError::Api {
                status: 503,
                message: "service unavailable".into(),
            });
        }
        Ok(quantity)
    }
}

#[derive(Default)]
pub struct FakeQueues {
    draining: AtomicBool,
    pending: AtomicBool,
    quietdowns: Mutex<Vec<(String, u32)>>,
}

impl FakeQueues {
    pub fn set_draining(&self, draining: bool) {
        self.draining.store(draining, Ordering::SeqCst);
    }

    pub fn set_pending(&self, pending: bool) {
        self.pending.store(pending, Ordering::SeqCst);
    }

    pub fn quietdowns(&self) -> Vec<(String, u32)> {
        self.quietdowns.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueueSystem for FakeQueues {
    async fn has_pending_work(&self, _queue: &str) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    async fn quietdown(&self, queue: &str, target: u32) -> bool {
        self.quietdowns.lock().unwrap().push((queue.to_string(), target));
        self.draining.load(Ordering::SeqCst)
    }
}

/// One shared store, platform, queue system and clock; every process
/// built from the same harness is a sibling of the others.
pub struct Harness {
    pub store: Arc<RedbStateStore>,
    pub platform: Arc<FakePlatform>,
    pub queues: Arc<FakeQueues>,
    pub clock: Arc<ManualClock>,
    errors: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(RedbStateStore::open_in_memory().unwrap()),
            platform: Arc::new(FakePlatform::default()),
            queues: Arc::new(FakeQueues::default()),
            clock: Arc::new(ManualClock::new(NOW)),
            errors: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn settings(&self) -> ProcessSettings {
        ProcessSettings::new("test-this", "worker").with_queues(["default"])
    }

    pub fn context(&self) -> ScalingContext {
        let errors = self.errors.clone();
        ScalingContext::new(self.store.clone(), self.platform.clone(), self.queues.clone())
            .with_clock(self.clock.clone())
            .with_error_handler(Arc::new(move |_: &AutoscaleError| {
                errors.fetch_add(1, Ordering::SeqCst);
            }))
    }

    pub fn process(&self) -> Process {
        Process::new(self.settings(), self.context())
    }

    /// Number of failures routed to the error handler so far.
    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    pub async fn record(&self, process: &Process) -> Record {
        self.store.read(process.cache_key()).await.unwrap()
    }
}

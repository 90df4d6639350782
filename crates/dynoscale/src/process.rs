//! Per-queue autoscaling state machine.
//!
//! Several runtimes hold their own `Process` for the same logical process
//! type. They never talk to each other directly: every decision starts by
//! pulling the shared record (`sync_attributes`) and every change is
//! pushed back to it (`set_attributes`).
//!
//! # Decision flow
//!
//! ```text
//! update(current, target)
//!   target == current  → record, no API call
//!   target >  current  → set_dyno_count(target)
//!   target <  current  → quietdown(target), then
//!                        set_dyno_count(quieted_to) once the quiet buffer elapsed
//! ```
//!
//! Platform and store failures never escape: they go to the injected
//! [`ErrorHandler`] and the operation falls back per [`FailureFallback`].

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use dynoscale_state::{Record, SharedStateStore};

use crate::clock::{Clock, SystemClock};
use crate::error::AutoscaleError;
use crate::handler::{ErrorHandler, log_errors};
use crate::platform::{PlatformClient, quantity_for};
use crate::poll_interval::PollTarget;
use crate::queue::QueueSystem;

pub const DEFAULT_THROTTLE_WINDOW: Duration = Duration::from_secs(10);
pub const DEFAULT_QUIET_BUFFER: Duration = Duration::from_secs(10);
pub const DEFAULT_ACTIVE_DYNOS: u32 = 1;

const FIELD_DYNOS: &str = "dynos";
const FIELD_QUIETED_TO: &str = "quieted_to";
const FIELD_QUIETED_AT: &str = "quieted_at";
const FIELD_UPDATED_AT: &str = "updated_at";

/// Shared record key for a process type.
pub fn cache_key(app_name: &str, name: &str) -> String {
    format!("dynoscale:{app_name}:{name}")
}

/// Result used when a platform call fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureFallback {
    /// Treat the process as having no dynos.
    #[default]
    Zero,
    /// Keep the last known dyno count.
    Unchanged,
}

/// Static configuration of one autoscaled process type.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSettings {
    pub app_name: String,
    /// Process type on the platform, e.g. `worker`.
    pub name: String,
    /// Queues worked by this process type.
    pub queues: Vec<String>,
    /// Dyno floor while any queue has work.
    pub active_dynos: u32,
    /// Minimum time between API-touching updates.
    pub throttle_window: Duration,
    /// Minimum dwell after a quiet-down before scaling down.
    pub quiet_buffer: Duration,
    pub on_failure: FailureFallback,
}

impl ProcessSettings {
    pub fn new(app_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            name: name.into(),
            queues: Vec::new(),
            active_dynos: DEFAULT_ACTIVE_DYNOS,
            throttle_window: DEFAULT_THROTTLE_WINDOW,
            quiet_buffer: DEFAULT_QUIET_BUFFER,
            on_failure: FailureFallback::default(),
        }
    }

    pub fn with_queues<I, S>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queues = queues.into_iter().map(Into::into).collect();
        self
    }
}

/// Collaborators injected into every [`Process`].
#[derive(Clone)]
pub struct ScalingContext {
    pub store: Arc<dyn SharedStateStore>,
    pub client: Arc<dyn PlatformClient>,
    pub queue_system: Arc<dyn QueueSystem>,
    pub on_error: ErrorHandler,
    pub clock: Arc<dyn Clock>,
}

impl ScalingContext {
    /// Context with the logging error handler and the system clock.
    pub fn new(
        store: Arc<dyn SharedStateStore>,
        client: Arc<dyn PlatformClient>,
        queue_system: Arc<dyn QueueSystem>,
    ) -> Self {
        Self {
            store,
            client,
            queue_system,
            on_error: log_errors(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.on_error = handler;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Local view of a process's scaling state. Timestamps are epoch seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attributes {
    pub dynos: u32,
    pub updated_at: Option<u64>,
    /// Last observed unit of work. Never shared.
    pub active_at: Option<u64>,
    pub quieted_to: Option<u32>,
    pub quieted_at: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Change<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

/// A partial write of shared attributes. Untouched fields stay as they are;
/// cleared fields are removed from the shared record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttributeUpdate {
    dynos: Change<u32>,
    quieted_to: Change<u32>,
    quieted_at: Change<u64>,
    updated_at: Change<u64>,
}

impl AttributeUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dynos(mut self, dynos: u32) -> Self {
        self.dynos = Change::Set(dynos);
        self
    }

    /// Resets local `dynos` to 0 and removes it from the record.
    pub fn clear_dynos(mut self) -> Self {
        self.dynos = Change::Clear;
        self
    }

    pub fn quieted_to(mut self, target: u32) -> Self {
        self.quieted_to = Change::Set(target);
        self
    }

    pub fn clear_quieted_to(mut self) -> Self {
        self.quieted_to = Change::Clear;
        self
    }

    pub fn quieted_at(mut self, at: u64) -> Self {
        self.quieted_at = Change::Set(at);
        self
    }

    pub fn clear_quieted_at(mut self) -> Self {
        self.quieted_at = Change::Clear;
        self
    }

    pub fn updated_at(mut self, at: u64) -> Self {
        self.updated_at = Change::Set(at);
        self
    }

    pub fn clear_updated_at(mut self) -> Self {
        self.updated_at = Change::Clear;
        self
    }

    pub fn clear_quietdown(self) -> Self {
        self.clear_quieted_to().clear_quieted_at()
    }
}

/// Clamp a requested dyno count into the valid range.
pub fn clamp_dynos(target: i64) -> u32 {
    target.clamp(0, i64::from(u32::MAX)) as u32
}

/// Autoscaling state for one process type.
pub struct Process {
    settings: ProcessSettings,
    cache_key: String,
    ctx: ScalingContext,
    attrs: Mutex<Attributes>,
    /// Serializes local `wait_for_*` decisions.
    turn: tokio::sync::Mutex<()>,
}

impl Process {
    pub fn new(settings: ProcessSettings, ctx: ScalingContext) -> Self {
        let cache_key = cache_key(&settings.app_name, &settings.name);
        Self {
            settings,
            cache_key,
            ctx,
            attrs: Mutex::new(Attributes::default()),
            turn: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn app_name(&self) -> &str {
        &self.settings.app_name
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn settings(&self) -> &ProcessSettings {
        &self.settings
    }

    pub fn queues(&self) -> &[String] {
        &self.settings.queues
    }

    /// Snapshot of the local attributes.
    pub fn attributes(&self) -> Attributes {
        *self.lock_attrs()
    }

    pub fn dynos(&self) -> u32 {
        self.lock_attrs().dynos
    }

    pub fn updated_at(&self) -> Option<u64> {
        self.lock_attrs().updated_at
    }

    pub fn active_at(&self) -> Option<u64> {
        self.lock_attrs().active_at
    }

    pub fn quieted_to(&self) -> Option<u32> {
        self.lock_attrs().quieted_to
    }

    pub fn quieted_at(&self) -> Option<u64> {
        self.lock_attrs().quieted_at
    }

    /// Record that a unit of work just happened on one of our queues.
    pub fn ping(&self) {
        let now = self.now();
        self.lock_attrs().active_at = Some(now);
    }

    // ── Shared attributes ──────────────────────────────────────────

    /// Apply `update` locally and push it to the shared record.
    pub async fn set_attributes(&self, update: AttributeUpdate) {
        let mut fields = Record::new();
        let mut deletions = Vec::new();
        {
            let mut attrs = self.lock_attrs();
            match update.dynos {
                Change::Keep => {}
                Change::Set(dynos) => {
                    attrs.dynos = dynos;
                    fields.insert(FIELD_DYNOS.to_string(), dynos.to_string());
                }
                Change::Clear => {
                    attrs.dynos = 0;
                    deletions.push(FIELD_DYNOS);
                }
            }
            stage(update.quieted_to, &mut attrs.quieted_to, FIELD_QUIETED_TO, &mut fields, &mut deletions);
            stage(update.quieted_at, &mut attrs.quieted_at, FIELD_QUIETED_AT, &mut fields, &mut deletions);
            stage(update.updated_at, &mut attrs.updated_at, FIELD_UPDATED_AT, &mut fields, &mut deletions);
        }

        if fields.is_empty() && deletions.is_empty() {
            return;
        }
        if let Err(e) = self.ctx.store.write(&self.cache_key, &fields, &deletions).await {
            self.report(e.into());
        }
    }

    /// Overwrite local attributes with the shared record.
    ///
    /// Fields missing from the record reset to their defaults. A failed
    /// read leaves the local view untouched.
    pub async fn sync_attributes(&self) {
        let record = match self.ctx.store.read(&self.cache_key).await {
            Ok(record) => record,
            Err(e) => {
                self.report(e.into());
                return;
            }
        };

        let mut attrs = self.lock_attrs();
        attrs.dynos = field(&record, FIELD_DYNOS).unwrap_or(0);
        attrs.quieted_to = field(&record, FIELD_QUIETED_TO);
        attrs.quieted_at = field(&record, FIELD_QUIETED_AT);
        attrs.updated_at = field(&record, FIELD_UPDATED_AT);
    }

    // ── Predicates ─────────────────────────────────────────────────

    /// True while the last update is younger than the throttle window.
    pub fn throttled(&self) -> bool {
        let now = self.now();
        let window = self.settings.throttle_window;
        self.lock_attrs()
            .updated_at
            .is_some_and(|at| elapsed(now, at) < window)
    }

    pub fn updated_since_last_activity(&self) -> bool {
        let attrs = self.lock_attrs();
        matches!(
            (attrs.updated_at, attrs.active_at),
            (Some(updated), Some(active)) if updated > active
        )
    }

    pub fn quieting(&self) -> bool {
        let attrs = self.lock_attrs();
        attrs.quieted_to.is_some() && attrs.quieted_at.is_some()
    }

    pub fn shutting_down(&self) -> bool {
        let attrs = self.lock_attrs();
        attrs.quieted_at.is_some() && attrs.quieted_to == Some(0)
    }

    /// True once the quiet buffer has fully elapsed since `quieted_at`.
    pub fn fulfills_quietdown(&self) -> bool {
        let now = self.now();
        let buffer = self.settings.quiet_buffer;
        self.lock_attrs()
            .quieted_at
            .is_some_and(|at| elapsed(now, at) > buffer)
    }

    // ── Scaling ────────────────────────────────────────────────────

    /// Dyno count wanted right now: the active floor if any queue has work.
    pub async fn desired_dynos(&self) -> u32 {
        for queue in &self.settings.queues {
            if self.ctx.queue_system.has_pending_work(queue).await {
                return self.settings.active_dynos;
            }
        }
        0
    }

    /// Begin draining toward `target` dynos.
    ///
    /// When nothing was in flight the buffer is waived by backdating
    /// `quieted_at` past it.
    pub async fn quietdown(&self, target: i64) {
        let target = clamp_dynos(target);
        let now = self.now();

        let mut draining = false;
        for queue in &self.settings.queues {
            draining |= self.ctx.queue_system.quietdown(queue, target).await;
        }

        let quieted_at = if draining {
            now
        } else {
            now.saturating_sub(self.settings.quiet_buffer.as_secs() + 1)
        };
        self.set_attributes(AttributeUpdate::new().quieted_to(target).quieted_at(quieted_at))
            .await;

        info!(
            process = %self.settings.name,
            app = %self.settings.app_name,
            to = target,
            draining,
            "quietdown started"
        );
    }

    /// Move toward `target` dynos from the caller's view of `current`.
    /// Returns the resulting dyno count.
    pub async fn update(&self, current: u32, target: i64) -> u32 {
        let target = clamp_dynos(target);
        let now = self.now();

        if target == current {
            self.set_attributes(
                AttributeUpdate::new()
                    .dynos(target)
                    .updated_at(now)
                    .clear_quietdown(),
            )
            .await;
            return target;
        }

        if target > current {
            info!(
                process = %self.settings.name,
                from = current,
                to = target,
                "scaling up"
            );
            return self
                .scale_to(target, AttributeUpdate::new().clear_quietdown())
                .await;
        }

        if !self.quieting() {
            self.quietdown(i64::from(target)).await;
        }

        if self.fulfills_quietdown() {
            let to = self.quieted_to().unwrap_or(target);
            info!(
                process = %self.settings.name,
                from = current,
                to,
                "scaling down"
            );
            return self
                .scale_to(to, AttributeUpdate::new().clear_quietdown())
                .await;
        }

        debug!(
            process = %self.settings.name,
            current,
            target,
            "downscale deferred until quietdown completes"
        );
        self.set_attributes(AttributeUpdate::new().updated_at(now)).await;
        current
    }

    /// Reconcile with any sibling, then make sure capacity exists for new
    /// work. Returns false only when throttled and not yet updated since
    /// the last activity.
    pub async fn wait_for_update(&self) -> bool {
        let _turn = self.turn.lock().await;
        self.sync_attributes().await;

        if self.updated_since_last_activity() {
            return true;
        }
        if self.throttled() {
            debug!(process = %self.settings.name, "update throttled");
            return false;
        }

        let current = self.dynos();
        let target = current.max(self.settings.active_dynos);
        self.update(current, i64::from(target)).await;
        self.ping();
        true
    }

    /// Reconcile with any sibling, then drive toward zero dynos. Returns
    /// true once the process is fully shut down.
    pub async fn wait_for_shutdown(&self) -> bool {
        let _turn = self.turn.lock().await;
        self.sync_attributes().await;

        if self.throttled() {
            debug!(process = %self.settings.name, "shutdown throttled");
            return false;
        }

        let current = self.dynos();
        self.update(current, 0).await == 0
    }

    // ── Platform ───────────────────────────────────────────────────

    /// Running dynos for this process type according to the platform.
    pub async fn fetch_dyno_count(&self) -> u32 {
        match self.ctx.client.list_formation(&self.settings.app_name).await {
            Ok(formation) => quantity_for(&formation, &self.settings.name),
            Err(source) => {
                self.report(self.platform_error(source));
                self.fallback_dynos()
            }
        }
    }

    /// Ask the platform for `dynos` and record the outcome.
    pub async fn set_dyno_count(&self, dynos: u32) -> u32 {
        self.scale_to(dynos, AttributeUpdate::new()).await
    }

    async fn scale_to(&self, dynos: u32, extra: AttributeUpdate) -> u32 {
        let result = match self
            .ctx
            .client
            .update_formation(&self.settings.app_name, &self.settings.name, dynos)
            .await
        {
            Ok(count) => count,
            Err(source) => {
                self.report(self.platform_error(source));
                self.fallback_dynos()
            }
        };

        let now = self.now();
        self.set_attributes(extra.dynos(result).updated_at(now)).await;
        result
    }

    fn fallback_dynos(&self) -> u32 {
        match self.settings.on_failure {
            FailureFallback::Zero => 0,
            FailureFallback::Unchanged => self.dynos(),
        }
    }

    fn platform_error(&self, source: crate::error::PlatformError) -> AutoscaleError {
        AutoscaleError::Platform {
            process: self.settings.name.clone(),
            source,
        }
    }

    fn report(&self, err: AutoscaleError) {
        debug!(process = %self.settings.name, error = %err, "routing failure to error handler");
        (self.ctx.on_error)(&err);
    }

    fn now(&self) -> u64 {
        self.ctx.clock.now_secs()
    }

    fn lock_attrs(&self) -> MutexGuard<'_, Attributes> {
        self.attrs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PollTarget for Process {
    fn poll_key(&self) -> String {
        self.cache_key.clone()
    }
}

fn stage<T: Copy + ToString>(
    change: Change<T>,
    slot: &mut Option<T>,
    name: &'static str,
    fields: &mut Record,
    deletions: &mut Vec<&'static str>,
) {
    match change {
        Change::Keep => {}
        Change::Set(value) => {
            *slot = Some(value);
            fields.insert(name.to_string(), value.to_string());
        }
        Change::Clear => {
            *slot = None;
            deletions.push(name);
        }
    }
}

/// Time between two epoch-second stamps, zero if `at` is in the future.
fn elapsed(now: u64, at: u64) -> Duration {
    Duration::from_secs(now.saturating_sub(at))
}

fn field<T: FromStr>(record: &Record, name: &str) -> Option<T> {
    record.get(name).and_then(|raw| raw.parse().ok())
}

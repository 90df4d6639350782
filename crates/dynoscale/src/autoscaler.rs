//! The registry tying queues, processes and poll loops together.
//!
//! Owns one [`Process`] per configured process type, a queue → process
//! map for activity lookups, and two coordinators:
//!
//! - `update_poll` runs [`Process::wait_for_update`] until capacity is
//!   confirmed (enqueue side).
//! - `shutdown_poll` runs [`Process::wait_for_shutdown`] until the process
//!   reaches zero dynos (processing side).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::AutoscaleConfig;
use crate::error::{AutoscaleError, AutoscaleResult};
use crate::poll_interval::{PollDelays, PollInterval, PollTarget};
use crate::process::{Process, ProcessSettings, ScalingContext};

pub struct Autoscaler {
    processes: Vec<Arc<Process>>,
    by_queue: HashMap<String, Arc<Process>>,
    update_poll: PollInterval<Process>,
    shutdown_poll: PollInterval<Process>,
}

impl Autoscaler {
    /// Build processes for `settings`, all sharing `ctx`.
    ///
    /// A queue listed by two processes is a configuration error.
    pub fn new(
        settings: Vec<ProcessSettings>,
        ctx: ScalingContext,
        update_delays: PollDelays,
        shutdown_delays: PollDelays,
    ) -> AutoscaleResult<Self> {
        let mut processes = Vec::with_capacity(settings.len());
        let mut by_queue = HashMap::new();

        for entry in settings {
            let process = Arc::new(Process::new(entry, ctx.clone()));
            for queue in process.queues() {
                if by_queue.insert(queue.clone(), process.clone()).is_some() {
                    return Err(AutoscaleError::Config(format!(
                        "queue {queue} is mapped to more than one process"
                    )));
                }
            }
            processes.push(process);
        }

        let update_poll = PollInterval::new("wait_for_update", update_delays, |p: Arc<Process>| async move {
            p.wait_for_update().await
        });
        let shutdown_poll =
            PollInterval::new("wait_for_shutdown", shutdown_delays, |p: Arc<Process>| async move {
                p.wait_for_shutdown().await
            });

        info!(processes = processes.len(), queues = by_queue.len(), "autoscaler initialized");

        Ok(Self {
            processes,
            by_queue,
            update_poll,
            shutdown_poll,
        })
    }

    pub fn from_config(config: &AutoscaleConfig, ctx: ScalingContext) -> AutoscaleResult<Self> {
        let (update_delays, shutdown_delays) = config.poll_delays()?;
        Self::new(config.process_settings()?, ctx, update_delays, shutdown_delays)
    }

    pub fn processes(&self) -> &[Arc<Process>] {
        &self.processes
    }

    pub fn process_for_queue(&self, queue: &str) -> Option<Arc<Process>> {
        self.by_queue.get(queue).cloned()
    }

    pub fn process_named(&self, name: &str) -> Option<Arc<Process>> {
        self.processes.iter().find(|p| p.name() == name).cloned()
    }

    pub fn update_poll(&self) -> &PollInterval<Process> {
        &self.update_poll
    }

    pub fn shutdown_poll(&self) -> &PollInterval<Process> {
        &self.shutdown_poll
    }

    /// Queue a capacity check for the process working `queue`. Returns
    /// false for an unknown queue.
    pub fn request_update(&self, queue: &str) -> bool {
        match self.process_for_queue(queue) {
            Some(process) => {
                self.update_poll.register(process);
                true
            }
            None => false,
        }
    }

    /// Queue a drain toward zero for the process working `queue`.
    pub fn request_shutdown(&self, queue: &str) -> bool {
        match self.process_for_queue(queue) {
            Some(process) => {
                self.shutdown_poll.register(process);
                true
            }
            None => false,
        }
    }

    /// Route `process` to the poll loop matching its current demand.
    pub async fn monitor(&self, process: &Arc<Process>) {
        let desired = process.desired_dynos().await;
        if desired > 0 {
            self.shutdown_poll.withdraw(&process.poll_key());
            self.update_poll.register(process.clone());
        } else {
            self.update_poll.withdraw(&process.poll_key());
            self.shutdown_poll.register(process.clone());
        }
        debug!(process = %process.name(), desired, "process monitored");
    }

    pub async fn monitor_all(&self) {
        for process in &self.processes {
            self.monitor(process).await;
        }
    }

    /// Run the monitoring loop until `shutdown` flips.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "autoscaler started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.monitor_all().await;
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Harness, NOW};

    fn autoscaler(h: &Harness) -> Autoscaler {
        let reports = ProcessSettings::new("test-this", "reports").with_queues(["reports"]);
        Autoscaler::new(
            vec![h.settings(), reports],
            h.context(),
            PollDelays::default(),
            PollDelays::default(),
        )
        .unwrap()
    }

    #[test]
    fn maps_queues_to_processes() {
        let h = Harness::new();
        let scaler = autoscaler(&h);

        assert_eq!(scaler.processes().len(), 2);
        assert_eq!(scaler.process_for_queue("default").unwrap().name(), "worker");
        assert_eq!(scaler.process_for_queue("reports").unwrap().name(), "reports");
        assert!(scaler.process_for_queue("unknown").is_none());
        assert!(scaler.process_named("reports").is_some());
    }

    #[test]
    fn rejects_shared_queue() {
        let h = Harness::new();
        let clash = ProcessSettings::new("test-this", "other").with_queues(["default"]);
        let result = Autoscaler::new(
            vec![h.settings(), clash],
            h.context(),
            PollDelays::default(),
            PollDelays::default(),
        );
        assert!(matches!(result, Err(AutoscaleError::Config(_))));
    }

    #[tokio::test]
    async fn request_update_scales_up() {
        let h = Harness::new();
        let scaler = autoscaler(&h);

        assert!(scaler.request_update("default"));
        assert!(!scaler.request_update("unknown"));
        scaler.update_poll().wait_idle().await;

        assert_eq!(h.platform.updates(), vec![1]);
        assert_eq!(scaler.process_for_queue("default").unwrap().dynos(), 1);
    }

    #[tokio::test]
    async fn request_shutdown_drains_to_zero() {
        let h = Harness::new();
        let scaler = autoscaler(&h);
        let worker = scaler.process_for_queue("default").unwrap();
        worker
            .set_attributes(crate::process::AttributeUpdate::new().dynos(2).updated_at(NOW - 60))
            .await;

        assert!(scaler.request_shutdown("default"));
        scaler.shutdown_poll().wait_idle().await;

        assert_eq!(h.platform.updates(), vec![0]);
        assert_eq!(worker.dynos(), 0);
    }

    #[tokio::test]
    async fn monitor_routes_by_demand() {
        let h = Harness::new();
        let scaler = autoscaler(&h);
        let worker = scaler.process_for_queue("default").unwrap();

        h.queues.set_pending(true);
        scaler.monitor(&worker).await;
        scaler.update_poll().wait_idle().await;
        assert_eq!(worker.dynos(), 1);

        h.queues.set_pending(false);
        h.clock.advance(11);
        scaler.monitor(&worker).await;
        scaler.shutdown_poll().wait_idle().await;
        assert_eq!(worker.dynos(), 0);
        assert_eq!(h.platform.updates(), vec![1, 0]);
    }

    #[tokio::test]
    async fn monitor_keeps_a_process_in_one_loop() {
        let h = Harness::new();
        let parked = PollDelays::new(Duration::from_secs(60), Duration::ZERO);
        let scaler = Autoscaler::new(vec![h.settings()], h.context(), parked, parked).unwrap();
        let worker = scaler.process_for_queue("default").unwrap();
        let key = worker.poll_key();

        h.queues.set_pending(true);
        scaler.monitor(&worker).await;
        assert_eq!(scaler.update_poll().pending_keys(), vec![key.clone()]);
        assert!(scaler.shutdown_poll().pending_keys().is_empty());

        h.queues.set_pending(false);
        scaler.monitor(&worker).await;
        assert!(scaler.update_poll().pending_keys().is_empty());
        assert_eq!(scaler.shutdown_poll().pending_keys(), vec![key.clone()]);

        h.queues.set_pending(true);
        scaler.monitor(&worker).await;
        assert_eq!(scaler.update_poll().pending_keys(), vec![key]);
        assert!(scaler.shutdown_poll().pending_keys().is_empty());
        assert!(h.platform.updates().is_empty());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let h = Harness::new();
        let scaler = Arc::new(autoscaler(&h));
        let (tx, rx) = watch::channel(false);

        let runner = {
            let scaler = scaler.clone();
            tokio::spawn(async move { scaler.run(Duration::from_millis(5), rx).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        runner.await.unwrap();
    }
}

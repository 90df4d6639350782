//! The hook a job pipeline calls after each unit of work.

use std::future::Future;
use std::sync::Arc;

use tracing::trace;

use crate::autoscaler::Autoscaler;

/// Marks the process behind a queue as active.
#[derive(Clone)]
pub struct ActivityNotifier {
    autoscaler: Arc<Autoscaler>,
}

impl ActivityNotifier {
    pub fn new(autoscaler: Arc<Autoscaler>) -> Self {
        Self { autoscaler }
    }

    /// Ping the process working `queue`. Returns false if no process
    /// claims the queue.
    pub fn notify(&self, queue: &str) -> bool {
        match self.autoscaler.process_for_queue(queue) {
            Some(process) => {
                process.ping();
                trace!(%queue, process = %process.name(), "activity recorded");
                true
            }
            None => false,
        }
    }

    /// Run `work`, then record activity on `queue`, then hand back the
    /// work's output untouched.
    pub async fn observe<F>(&self, queue: &str, work: F) -> F::Output
    where
        F: Future,
    {
        let output = work.await;
        self.notify(queue);
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll_interval::PollDelays;
    use crate::test_support::{Harness, NOW};

    fn notifier(h: &Harness) -> (ActivityNotifier, Arc<Autoscaler>) {
        let scaler = Arc::new(
            Autoscaler::new(
                vec![h.settings()],
                h.context(),
                PollDelays::default(),
                PollDelays::default(),
            )
            .unwrap(),
        );
        (ActivityNotifier::new(scaler.clone()), scaler)
    }

    #[test]
    fn notify_pings_matching_process() {
        let h = Harness::new();
        let (notifier, scaler) = notifier(&h);

        assert!(notifier.notify("default"));
        assert_eq!(scaler.process_for_queue("default").unwrap().active_at(), Some(NOW));
    }

    #[test]
    fn notify_ignores_unknown_queue() {
        let h = Harness::new();
        let (notifier, _) = notifier(&h);
        assert!(!notifier.notify("elsewhere"));
    }

    #[tokio::test]
    async fn observe_returns_work_output() {
        let h = Harness::new();
        let (notifier, scaler) = notifier(&h);

        let result: Result<u32, String> = notifier.observe("default", async { Ok(7) }).await;

        assert_eq!(result, Ok(7));
        assert!(scaler.process_for_queue("default").unwrap().active_at().is_some());
    }
}

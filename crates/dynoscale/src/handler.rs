//! The error hook invoked in place of propagating runtime failures.

use std::sync::Arc;

use tracing::error;

use crate::error::AutoscaleError;

/// Callback receiving every platform or shared-store failure a
/// [`Process`](crate::process::Process) absorbs.
///
/// Must not mutate process state; the process has already chosen its
/// fallback by the time the handler runs.
pub type ErrorHandler = Arc<dyn Fn(&AutoscaleError) + Send + Sync>;

/// Handler that logs the failure and lets the control loop continue.
pub fn log_errors() -> ErrorHandler {
    Arc::new(|err: &AutoscaleError| {
        error!(error = %err, "autoscale operation failed");
    })
}

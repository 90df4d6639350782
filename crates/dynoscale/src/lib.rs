//! dynoscale — queue-driven dyno autoscaling.
//!
//! Scales a platform process type up when its queues have work and back
//! down to zero when they are idle, without thrashing and without
//! hammering the platform API.
//!
//! # Architecture
//!
//! ```text
//! job finished ──► ActivityNotifier ──► Process::ping
//!
//! Autoscaler
//!   ├── Process (per process type)
//!   │     ├── SharedStateStore  (sync/set attributes across runtimes)
//!   │     ├── PlatformClient    (list / update formation)
//!   │     └── QueueSystem       (pending work, quietdown)
//!   ├── update_poll   : PollInterval → wait_for_update
//!   └── shutdown_poll : PollInterval → wait_for_shutdown
//! ```
//!
//! # Anti-thrashing
//!
//! - A throttle window (default 10s) spaces out API-touching updates.
//! - Downscaling first quiets the queues, then waits out a quiet buffer
//!   (default 10s) before the formation shrinks. The buffer is waived when
//!   nothing was in flight.

pub mod activity;
pub mod autoscaler;
pub mod clock;
pub mod config;
pub mod error;
pub mod handler;
pub mod platform;
pub mod poll_interval;
pub mod process;
pub mod queue;

#[cfg(test)]
mod test_support;

pub use activity::ActivityNotifier;
pub use autoscaler::Autoscaler;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AutoscaleConfig, StoreConfig};
pub use error::{AutoscaleError, AutoscaleResult, PlatformError};
pub use handler::ErrorHandler;
pub use platform::{Formation, PlatformClient};
pub use poll_interval::{PollDelays, PollInterval, PollTarget};
pub use process::{
    AttributeUpdate, Attributes, FailureFallback, Process, ProcessSettings, ScalingContext,
};
pub use queue::QueueSystem;

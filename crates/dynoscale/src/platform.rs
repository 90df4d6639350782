//! The platform scaling API, consumed through a narrow trait.
//!
//! Constructing a concrete client (HTTP transport, credentials, retries)
//! is the host application's job. The autoscaler only lists formations
//! and sets a quantity.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PlatformError;

/// One process type's slice of an app's formation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Formation {
    /// Process type, e.g. `web` or `worker`.
    #[serde(rename = "type")]
    pub process_type: String,
    /// Number of running dynos.
    pub quantity: u32,
    /// Dyno size, when the platform reports it.
    #[serde(default)]
    pub size: Option<String>,
}

/// Lists and updates running dyno counts.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Formation of every process type in `app_name`.
    async fn list_formation(&self, app_name: &str) -> Result<Vec<Formation>, PlatformError>;

    /// Set `process_type` to `quantity` dynos. Returns the resulting count.
    async fn update_formation(
        &self,
        app_name: &str,
        process_type: &str,
        quantity: u32,
    ) -> Result<u32, PlatformError>;
}

/// Quantity for `process_type` in a formation list, 0 when absent.
pub fn quantity_for(formation: &[Formation], process_type: &str) -> u32 {
    formation
        .iter()
        .find(|f| f.process_type == process_type)
        .map(|f| f.quantity)
        .unwrap_or(0)
}

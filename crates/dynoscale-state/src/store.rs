//! The shared-record repository contract.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::StateResult;

/// One shared record: field name → scalar value rendered as text.
///
/// Absence of a field is meaningful. Backends never store placeholders
/// for cleared values; a cleared field is removed from the record.
pub type Record = BTreeMap<String, String>;

/// Key-value store of hash-like records shared by every runtime that
/// scales the same process type.
#[async_trait]
pub trait SharedStateStore: Send + Sync {
    /// Read the full record at `key`. A missing key reads as empty.
    async fn read(&self, key: &str) -> StateResult<Record>;

    /// Upsert `fields` and remove every field named in `deletions`.
    ///
    /// Both halves are applied to the record as one operation.
    async fn write(&self, key: &str, fields: &Record, deletions: &[&str]) -> StateResult<()>;

    /// Drop the record entirely. Returns true if it existed.
    async fn clear(&self, key: &str) -> StateResult<bool>;
}

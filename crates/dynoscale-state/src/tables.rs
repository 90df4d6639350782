//! redb table definitions for the Dynoscale state store.

use redb::TableDefinition;

/// Process records keyed by cache key (`dynoscale:{app}:{process}`).
///
/// Values are the JSON-encoded field map of the record.
pub const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

//! redb table definitions for the decision log.

use redb::TableDefinition;

/// Decision records keyed by cycle sequence number (starting at 1).
pub const DECISIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("decisions");

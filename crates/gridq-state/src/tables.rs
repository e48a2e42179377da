//! redb table definitions for the gridq state store.
//!
//! Record tables use `u64` keys (ids handed out by the `SEQUENCES` table)
//! and `&[u8]` values holding JSON-serialized domain types. Because redb
//! orders `u64` keys numerically, iterating a record table yields rows in
//! insertion order.

use redb::TableDefinition;

/// Clusters keyed by cluster id.
pub const CLUSTERS: TableDefinition<u64, &[u8]> = TableDefinition::new("clusters");

/// Deployments keyed by deployment id.
pub const DEPLOYMENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("deployments");

/// Pending scheduling triggers keyed by enqueue sequence.
pub const TRIGGERS: TableDefinition<u64, &[u8]> = TableDefinition::new("triggers");

/// Last id handed out, keyed by sequence name.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

pub const CLUSTER_SEQ: &str = "clusters";
pub const DEPLOYMENT_SEQ: &str = "deployments";
pub const TRIGGER_SEQ: &str = "triggers";

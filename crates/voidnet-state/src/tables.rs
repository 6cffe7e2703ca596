//! redb table definitions for the VoidNet registry store.
//!
//! Entity tables use `u64` keys and `&[u8]` values (JSON-serialized domain
//! types). Name indexes map a unique name to its row identifier.

use redb::TableDefinition;

/// Satellite rows keyed by satellite id.
pub const SATELLITES: TableDefinition<u64, &[u8]> = TableDefinition::new("satellites");

/// Unique satellite names → satellite id.
pub const SATELLITE_NAMES: TableDefinition<&str, u64> = TableDefinition::new("satellite_names");

/// Capsule rows keyed by capsule id.
pub const CAPSULES: TableDefinition<u64, &[u8]> = TableDefinition::new("capsules");

/// Unique capsule names → capsule id.
pub const CAPSULE_NAMES: TableDefinition<&str, u64> = TableDefinition::new("capsule_names");

/// Deployment records keyed by `(capsule_id, deployment_id)`.
pub const DEPLOYMENTS: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("deployments");

/// Admin credentials keyed by username.
pub const CREDENTIALS: TableDefinition<&str, &[u8]> = TableDefinition::new("credentials");

/// Monotonic id sequences keyed by entity name. Ids are never reused.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

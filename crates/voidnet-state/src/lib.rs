//! voidnet-state — registry store for the VoidNet overseer.
//!
//! Backed by [redb](https://docs.rs/redb), holds the four entities the
//! control plane owns: satellites, capsules, deployments, and the admin
//! credential.
//!
//! # Architecture
//!
//! Rows are JSON-serialized into redb's `&[u8]` value columns and keyed by
//! store-assigned `u64` identifiers. Unique names live in separate index
//! tables, and deployments are keyed by `(capsule_id, deployment_id)` so a
//! capsule's history is a single range scan.
//!
//! Every mutation runs inside one redb write transaction. redb admits a single
//! writer at a time, so name checks, cascading deletes, and the
//! deployment-plus-status update are atomic with respect to concurrent
//! callers.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod credentials;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
pub use voidnet_guard::{DEFAULT_MAX_MANIFEST_BYTES, Validator, Verdict};

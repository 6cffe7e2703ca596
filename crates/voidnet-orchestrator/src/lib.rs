//! voidnet-orchestrator — the overseer's dispatch core.
//!
//! Takes a capsule from "defined" to "running" on its satellite and back:
//!
//! 1. Load the capsule with its satellite's address and key.
//! 2. Fetch the manifest from the capsule's repository ([`ManifestSource`]).
//! 3. Re-validate the fetched manifest.
//! 4. Dispatch to the satellite's agent ([`voidnet_uplink::SatelliteAgent`]).
//! 5. Record the outcome and the capsule status it implies in one store
//!    transaction.
//!
//! At most one deploy or stop runs per capsule at a time ([`CapsuleLocks`]).
//! Failed fetches, rejected manifests and agent errors each leave a `failed`
//! deployment record behind.

pub mod dispatch;
pub mod error;
pub mod locks;
pub mod source;

pub use dispatch::{DispatchReport, DispatchSettings, Orchestrator};
pub use error::{OrchestratorError, OrchestratorResult};
pub use locks::{CapsuleLocks, InFlight};
pub use source::{
    DEFAULT_MANIFEST_CANDIDATES, FetchError, FetchFuture, FetchSettings, GitManifestSource, ManifestSource,
};

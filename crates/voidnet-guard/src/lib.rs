//! voidnet-guard — security gate for compose manifests.
//!
//! Every manifest passes through [`Validator::validate`] twice: once when a
//! capsule is registered and again on every deploy, against the freshly
//! fetched copy. The validator never errors; a rejected manifest is reported
//! as a [`Verdict`] carrying human-readable violations in discovery order.
//!
//! # Checks
//!
//! ```text
//! Validator
//!   ├── size bound (oversized input is rejected unread)
//!   ├── textual scan for forbidden directives
//!   ├── YAML parse (failure is a single violation)
//!   ├── host bind mounts outside /tmp or ./
//!   └── strict mode only: structural service checks + path canonicalization
//! ```
//!
//! The textual scan is a first-pass filter and can be bypassed by alternate
//! YAML formatting. Strict mode closes the obvious gaps by inspecting the
//! parsed document.

pub mod paths;
pub mod validator;

pub use validator::{DEFAULT_MAX_MANIFEST_BYTES, FORBIDDEN_PATTERNS, Validator, Verdict};

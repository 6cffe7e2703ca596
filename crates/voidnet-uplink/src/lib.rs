//! voidnet-uplink — controller-side client for the satellite agent.
//!
//! Every satellite runs an agent that executes container operations on the
//! controller's behalf. This crate speaks that agent's HTTP/1.1 JSON protocol:
//!
//! | Call | Request |
//! |---|---|
//! | deploy | `POST /deploy {capsule_id, compose_file}` |
//! | stop | `POST /stop {capsule_id}` |
//! | logs | `GET /logs?capsule_id=&tail=` |
//! | containers | `GET /containers` |
//! | health | `GET /health` |
//!
//! Each request carries the satellite's own key in the `X-API-Key` header and
//! runs under a bounded timeout. Any transport failure, timeout, or non-2xx
//! status surfaces as a single [`AgentError`].
//!
//! The orchestrator depends on the [`SatelliteAgent`] trait rather than the
//! concrete [`UplinkClient`] so tests can substitute an in-process agent.

pub mod client;
pub mod endpoint;
pub mod error;

pub use client::{
    API_KEY_HEADER, AgentFuture, DEFAULT_MAX_RESPONSE_BYTES, SatelliteAgent, UplinkClient,
    UplinkTimeouts,
};
pub use endpoint::{AgentEndpoint, DEFAULT_AGENT_PORT};
pub use error::{AgentError, AgentResult};

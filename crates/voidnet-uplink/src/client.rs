//! HTTP/1.1 client for the satellite agent.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http::Method;
use http::header::{CONTENT_TYPE, HOST, USER_AGENT};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper_util::rt::TokioIo;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::endpoint::{AgentEndpoint, DEFAULT_AGENT_PORT};
use crate::error::{AgentError, AgentResult};

/// Header carrying the satellite key on every agent call.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Error bodies longer than this are cut before being surfaced.
const MAX_ERROR_BODY_CHARS: usize = 2048;

/// Default cap on a response body read from an agent.
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 1024 * 1024;

const CLIENT_NAME: &str = concat!("voidnet-uplink/", env!("CARGO_PKG_VERSION"));

/// Boxed future alias for agent calls.
pub type AgentFuture<'a> = Pin<Box<dyn Future<Output = AgentResult<Value>> + Send + 'a>>;

/// Operations the controller performs against a satellite's agent.
///
/// Implemented over HTTP by [`UplinkClient`]; injected for testability.
pub trait SatelliteAgent: Send + Sync {
    /// Bring a capsule up from the given manifest.
    fn deploy<'a>(
        &'a self,
        endpoint: &'a AgentEndpoint,
        capsule_id: u64,
        manifest: &'a str,
    ) -> AgentFuture<'a>;

    /// Bring a capsule down.
    fn stop<'a>(&'a self, endpoint: &'a AgentEndpoint, capsule_id: u64) -> AgentFuture<'a>;

    /// Fetch the last `tail` log lines of a capsule.
    fn logs<'a>(
        &'a self,
        endpoint: &'a AgentEndpoint,
        capsule_id: u64,
        tail: u32,
    ) -> AgentFuture<'a>;

    /// List containers known to the agent.
    fn containers<'a>(&'a self, endpoint: &'a AgentEndpoint) -> AgentFuture<'a>;

    /// Agent self-report.
    fn health<'a>(&'a self, endpoint: &'a AgentEndpoint) -> AgentFuture<'a>;
}

/// Per-call time bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UplinkTimeouts {
    /// Deploy and stop.
    pub dispatch: Duration,
    /// Log retrieval.
    pub logs: Duration,
    /// Containers listing and health.
    pub probe: Duration,
}

impl Default for UplinkTimeouts {
    fn default() -> Self {
        Self {
            dispatch: Duration::from_secs(60),
            logs: Duration::from_secs(30),
            probe: Duration::from_secs(10),
        }
    }
}

/// Agent client that opens one HTTP/1.1 connection per call.
#[derive(Debug, Clone)]
pub struct UplinkClient {
    default_port: u16,
    timeouts: UplinkTimeouts,
    max_response_bytes: usize,
}

impl Default for UplinkClient {
    fn default() -> Self {
        Self::new(DEFAULT_AGENT_PORT, UplinkTimeouts::default())
    }
}

impl UplinkClient {
    pub fn new(default_port: u16, timeouts: UplinkTimeouts) -> Self {
        Self {
            default_port,
            timeouts,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }

    /// Refuse agent responses whose body is larger than `limit` bytes.
    pub fn with_max_response_bytes(mut self, limit: usize) -> Self {
        self.max_response_bytes = limit;
        self
    }

    pub fn timeouts(&self) -> UplinkTimeouts {
        self.timeouts
    }

    pub fn max_response_bytes(&self) -> usize {
        self.max_response_bytes
    }

    /// Perform one call, bounded by `timeout` end to end.
    async fn call(
        &self,
        endpoint: &AgentEndpoint,
        method: Method,
        path: String,
        body: Option<Value>,
        timeout: Duration,
    ) -> AgentResult<Value> {
        let address = endpoint.authority(self.default_port);
        debug!(%address, %method, %path, "agent call");

        let request = exchange(&address, endpoint, method, &path, body, self.max_response_bytes);
        match tokio::time::timeout(timeout, request).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%address, %path, ?timeout, "agent call timed out");
                Err(AgentError::Timeout { address, timeout })
            }
        }
    }
}

impl SatelliteAgent for UplinkClient {
    fn deploy<'a>(
        &'a self,
        endpoint: &'a AgentEndpoint,
        capsule_id: u64,
        manifest: &'a str,
    ) -> AgentFuture<'a> {
        let body = json!({ "capsule_id": capsule_id, "compose_file": manifest });
        Box::pin(self.call(
            endpoint,
            Method::POST,
            "/deploy".to_string(),
            Some(body),
            self.timeouts.dispatch,
        ))
    }

    fn stop<'a>(&'a self, endpoint: &'a AgentEndpoint, capsule_id: u64) -> AgentFuture<'a> {
        let body = json!({ "capsule_id": capsule_id });
        Box::pin(self.call(
            endpoint,
            Method::POST,
            "/stop".to_string(),
            Some(body),
            self.timeouts.dispatch,
        ))
    }

    fn logs<'a>(
        &'a self,
        endpoint: &'a AgentEndpoint,
        capsule_id: u64,
        tail: u32,
    ) -> AgentFuture<'a> {
        let path = format!("/logs?capsule_id={capsule_id}&tail={tail}");
        Box::pin(self.call(endpoint, Method::GET, path, None, self.timeouts.logs))
    }

    fn containers<'a>(&'a self, endpoint: &'a AgentEndpoint) -> AgentFuture<'a> {
        Box::pin(self.call(
            endpoint,
            Method::GET,
            "/containers".to_string(),
            None,
            self.timeouts.probe,
        ))
    }

    fn health<'a>(&'a self, endpoint: &'a AgentEndpoint) -> AgentFuture<'a> {
        Box::pin(self.call(
            endpoint,
            Method::GET,
            "/health".to_string(),
            None,
            self.timeouts.probe,
        ))
    }
}

/// Connect, send one request, and read the response body up to `max_bytes`.
async fn exchange(
    address: &str,
    endpoint: &AgentEndpoint,
    method: Method,
    path: &str,
    body: Option<Value>,
    max_bytes: usize,
) -> AgentResult<Value> {
    let stream = tokio::net::TcpStream::connect(address)
        .await
        .map_err(|e| AgentError::Connect {
            address: address.to_string(),
            message: e.to_string(),
        })?;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake::<_, Full<Bytes>>(io)
        .await
        .map_err(|e| transport(address, e))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "agent connection closed with error");
        }
    });

    let mut builder = http::Request::builder()
        .method(method)
        .uri(path)
        .header(HOST, address)
        .header(USER_AGENT, CLIENT_NAME)
        .header(API_KEY_HEADER, endpoint.api_key());
    let payload = match body {
        Some(value) => {
            builder = builder.header(CONTENT_TYPE, "application/json");
            let encoded =
                serde_json::to_vec(&value).map_err(|e| AgentError::Request(e.to_string()))?;
            Bytes::from(encoded)
        }
        None => Bytes::new(),
    };
    let req = builder
        .body(Full::new(payload))
        .map_err(|e| AgentError::Request(e.to_string()))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| transport(address, e))?;
    let status = resp.status();
    let bytes = match Limited::new(resp.into_body(), max_bytes).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            warn!(%address, %path, max_bytes, "agent response too large");
            return Err(transport(address, format!("response body exceeds {max_bytes} bytes")));
        }
        Err(e) => return Err(transport(address, e)),
    };

    if !status.is_success() {
        let body: String = String::from_utf8_lossy(&bytes)
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect();
        debug!(%address, %path, %status, "agent returned non-2xx");
        return Err(AgentError::Status {
            address: address.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    Ok(decode_payload(&bytes))
}

fn transport(address: &str, e: impl std::fmt::Display) -> AgentError {
    AgentError::Transport {
        address: address.to_string(),
        message: e.to_string(),
    }
}

/// JSON bodies are passed through; anything else is wrapped as a string.
fn decode_payload(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

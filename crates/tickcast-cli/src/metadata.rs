use std::fmt::{Display, Formatter};

use serde::Serialize;
use uuid::Uuid;

/// Request identifier (UUID v4) stamped on every command's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Command metadata printed next to the payload.
///
/// Field order is fixed to keep JSON output stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub request_id: RequestId,
    pub command: &'static str,
    pub provider: &'static str,
    pub latency_ms: u64,
}

impl Metadata {
    pub fn new(command: &'static str, provider: &'static str, latency_ms: u64) -> Self {
        Self {
            request_id: RequestId::new_v4(),
            command,
            provider,
            latency_ms,
        }
    }
}

/// Output document: metadata plus the command's data.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub meta: Metadata,
    pub data: T,
}

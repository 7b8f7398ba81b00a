//! Per-socket access resolution.
//!
//! Authorization itself lives upstream. The gateway only turns what the
//! upgrade request carries into an [`Access`] flag.
//!
//! Token comparison uses constant-time comparison to prevent timing attacks.

use loom_types::Access;
use subtle::ConstantTimeEq;

/// What the gateway knows about a connecting socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    pub workspace_id: String,
    /// Bearer token from the `Authorization` header or the `token` query
    /// parameter (browsers cannot set headers on websocket upgrades).
    pub token: Option<String>,
}

/// Maps an upgrade request to the socket's permission.
pub trait AccessResolver: Send + Sync {
    fn resolve(&self, request: &AccessRequest) -> Access;
}

/// Grants `Write` to holders of one shared token and `Read` to everyone
/// else. With no token configured every socket gets `Write`.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenResolver {
    token: Option<String>,
}

impl StaticTokenResolver {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }
}

impl AccessResolver for StaticTokenResolver {
    fn resolve(&self, request: &AccessRequest) -> Access {
        let Some(expected) = &self.token else {
            return Access::Write;
        };
        match &request.token {
            Some(presented) if constant_time_eq(presented, expected) => Access::Write,
            _ => Access::Read,
        }
    }
}

/// Everyone gets the same flag.
#[derive(Debug, Clone, Copy)]
pub struct FixedAccess(pub Access);

impl AccessResolver for FixedAccess {
    fn resolve(&self, _request: &AccessRequest) -> Access {
        self.0
    }
}

/// Compare two strings in constant time.
///
/// Lengths that differ still run a comparison so timing does not depend on
/// where the strings diverge.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();

    if a_bytes.len() == b_bytes.len() {
        a_bytes.ct_eq(b_bytes).into()
    } else {
        let _ = a_bytes.ct_eq(a_bytes);
        false
    }
}

/// Pull a bearer token out of an `Authorization` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}

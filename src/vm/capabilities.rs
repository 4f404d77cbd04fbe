//! Capability-gated host access
//!
//! Bytecode never talks to the filesystem, network or log sink directly;
//! it invokes a `Capability` the embedding host has granted to the
//! VmContext via the `CallCapability` opcode. This keeps every external
//! effect auditable and revocable per context.

use std::fmt;
use std::sync::Arc;

/// Errors raised while invoking or looking up a capability
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    /// No capability registered under this name
    #[error("capability '{0}' is not granted")]
    NotGranted(String),

    /// The capability rejected the call (bad arguments, I/O failure, etc.)
    #[error("capability '{0}' call failed: {1}")]
    CallFailed(String, String),
}

/// A host-provided effect that bytecode may invoke through `CallCapability`
///
/// Implementors decide what a single opaque call means for the resource
/// they guard; the VM only knows the capability's name and that it accepts
/// a string payload and returns a string result.
pub trait Capability: Send + Sync {
    /// The name bytecode uses to look this capability up
    fn name(&self) -> &str;

    /// Invoke the capability with an opaque payload
    fn call(&self, payload: &str) -> Result<String, CapabilityError>;
}

/// Per-context table of granted capabilities
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    capabilities: std::collections::HashMap<String, Arc<dyn Capability>>,
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("granted", &self.capabilities.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CapabilityRegistry {
    /// Create a registry with nothing granted
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a capability, keyed by its own name
    pub fn grant(&mut self, capability: Arc<dyn Capability>) {
        self.capabilities
            .insert(capability.name().to_string(), capability);
    }

    /// Revoke a previously granted capability
    pub fn revoke(&mut self, name: &str) -> bool {
        self.capabilities.remove(name).is_some()
    }

    /// Whether a capability with this name is currently granted
    pub fn is_granted(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Invoke a granted capability by name
    pub fn call(&self, name: &str, payload: &str) -> Result<String, CapabilityError> {
        let capability = self
            .capabilities
            .get(name)
            .ok_or_else(|| CapabilityError::NotGranted(name.to_string()))?;
        capability.call(payload)
    }
}

/// Grants read access to files under the host's sandboxed root
pub struct ReadCapability {
    root: std::path::PathBuf,
}

impl ReadCapability {
    /// Create a capability rooted at the given directory
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Capability for ReadCapability {
    fn name(&self) -> &str {
        "read"
    }

    fn call(&self, payload: &str) -> Result<String, CapabilityError> {
        let path = self.root.join(payload);
        if !path.starts_with(&self.root) {
            return Err(CapabilityError::CallFailed(
                self.name().to_string(),
                "path escapes sandbox root".to_string(),
            ));
        }
        std::fs::read_to_string(&path)
            .map_err(|e| CapabilityError::CallFailed(self.name().to_string(), e.to_string()))
    }
}

/// Grants a log sink bytecode can write diagnostic lines to
pub struct LogCapability {
    prefix: String,
}

impl LogCapability {
    /// Create a capability that prefixes every line it emits
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Capability for LogCapability {
    fn name(&self) -> &str {
        "log"
    }

    fn call(&self, payload: &str) -> Result<String, CapabilityError> {
        println!("[{}] {}", self.prefix, payload);
        Ok(String::new())
    }
}

/// Grants outbound HTTP access restricted to an allow-listed host set
pub struct HttpCapability {
    allowed_hosts: Vec<String>,
}

impl HttpCapability {
    /// Create a capability that only permits requests to the given hosts
    pub fn new(allowed_hosts: Vec<String>) -> Self {
        Self { allowed_hosts }
    }

    fn host_allowed(&self, url: &str) -> bool {
        self.allowed_hosts.iter().any(|h| url.contains(h))
    }
}

impl Capability for HttpCapability {
    fn name(&self) -> &str {
        "http"
    }

    fn call(&self, payload: &str) -> Result<String, CapabilityError> {
        if !self.host_allowed(payload) {
            return Err(CapabilityError::CallFailed(
                self.name().to_string(),
                format!("host not in allow-list: {}", payload),
            ));
        }
        // Actual network transport is supplied by the embedding host; the
        // VM only enforces the allow-list before delegating out.
        Err(CapabilityError::CallFailed(
            self.name().to_string(),
            "no transport configured".to_string(),
        ))
    }
}

//! Error taxonomy shared by every core crate.
//!
//! Variants group by *kind*, not by call site, matching the taxonomy of
//! the design spec's error handling section. Packet handlers and resource
//! loaders match on the outer variant when they need to decide whether a
//! failure is recoverable; the inner string/context is for logging only.

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("network: {0}")]
    Network(NetworkError),

    #[error("protocol: {0}")]
    Protocol(ProtocolError),

    #[error("integrity: {0}")]
    Integrity(IntegrityError),

    #[error("resource: {0}")]
    Resource(ResourceError),

    #[error("security: {0}")]
    Security(SecurityError),

    #[error("script: {0}")]
    Script(ScriptError),

    #[error("config: {0}")]
    Config(ConfigError),
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("peer not found: {0:?}")]
    PeerNotFound(u32),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed packet: {0}")]
    MalformedPacket(String),
    #[error("unknown opcode: {0}")]
    UnknownOpcode(u8),
    #[error("truncated field: expected {expected} bytes, had {remaining}")]
    Truncated { expected: usize, remaining: usize },
    #[error("opcode {opcode} received in wrong lifecycle state ({state})")]
    WrongState { opcode: u8, state: &'static str },
}

#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
    #[error("hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("size mismatch for {path}: expected {expected}, got {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("manifest parse error: {0}")]
    ManifestParse(String),
    #[error("build failed: {0}")]
    Build(String),
    #[error("missing entrypoint: {0}")]
    MissingEntrypoint(String),
    #[error("path traversal attempt: {0}")]
    PathTraversal(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unsupported manifest format: {0}")]
    UnsupportedFormat(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("CRC gate failure for {who}")]
    CrcGateFailure { who: String },
    #[error("banned: {ip}")]
    Banned { ip: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("event payload type mismatch for {event}")]
    PayloadTypeMismatch { event: String },
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("call into unloaded resource: {0}")]
    UnloadedResource(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed TOML: {0}")]
    MalformedToml(String),
    #[error("out of range value for {field}, using default")]
    OutOfRange { field: &'static str },
}

macro_rules! from_impl {
    ($variant:ident, $inner:ty) => {
        impl From<$inner> for CoreError {
            fn from(e: $inner) -> Self {
                CoreError::$variant(e)
            }
        }
    };
}

from_impl!(Network, NetworkError);
from_impl!(Protocol, ProtocolError);
from_impl!(Integrity, IntegrityError);
from_impl!(Resource, ResourceError);
from_impl!(Security, SecurityError);
from_impl!(Script, ScriptError);
from_impl!(Config, ConfigError);

pub type CoreResult<T> = Result<T, CoreError>;

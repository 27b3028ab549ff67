use thiserror::Error;

/// Errors surfaced by sessions, publishers, consumers and the RPC layer.
///
/// Transient connectivity loss is not an error: components report it through
/// their status stream and keep reconnecting in the background. Only
/// operations invoked while the session is unready fail eagerly.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The session has no live, topology-verified channel right now.
    #[error("session is not connected")]
    NotConnected,

    /// `close` was called on a session that is not ready (including a
    /// session that was already closed).
    #[error("session already closed")]
    AlreadyClosed,

    /// The operation was abandoned because the owning component or its
    /// session is shutting down.
    #[error("component is shutting down")]
    Shutdown,

    /// An RPC operation was attempted on a component built without
    /// `ClientOptions::rpc(true)`.
    #[error("rpc is not enabled on this component")]
    RpcNotEnabled,

    /// The dedicated RPC connection has not reached readiness yet.
    #[error("rpc channel is not ready")]
    RpcNotReady,

    /// The broker nacked a confirmed publish.
    #[error("broker rejected the publish")]
    PublishRejected,

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Declaring an exchange, queue or binding failed on the broker.
    #[error("topology declaration failed: {0}")]
    Topology(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] lapin::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;

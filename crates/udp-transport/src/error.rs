use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot bind {role} socket to {addr}: {reason}")]
    Bind {
        role: &'static str,
        addr: String,
        reason: String,
    },
    #[error("sockets are not set up")]
    NotReady,
    #[error("setup cancelled by a concurrent stop")]
    SetupCancelled,
    #[error("I/O error: {0}")]
    Io(String),
    #[error("cannot spawn receive thread: {0}")]
    Spawn(String),
}

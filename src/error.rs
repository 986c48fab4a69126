use thiserror::Error as ThisError;

pub type OpaqueError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(ThisError, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("target must not be empty")]
    EmptyTarget,
    #[error("unsupported protocol `{0}`, expected `icmp` or `http`")]
    InvalidProtocol(String),
    #[error("target `{0}` is not an IP address")]
    InvalidTarget(String),
    #[error("transport already stopped")]
    TransportStopped,
    #[error("{0}")]
    Opaque(#[from] OpaqueError),
}
pub type Result<T> = std::result::Result<T, Error>;

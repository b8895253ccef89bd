use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Failed to resolve address: {0}")]
    Resolve(String),

    #[error("Socket error: {0}")]
    Socket(#[from] std::io::Error),

    #[error("Line exceeds {max} bytes")]
    OversizeLine { max: usize },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("Database task is gone")]
    DbClosed,
}

impl BrokerError {
    /// Exit code for process-level failures: 1 for init problems, 2 for I/O.
    pub fn exit_code(&self) -> i32 {
        match self {
            BrokerError::Config(_) | BrokerError::Bind { .. } | BrokerError::Resolve(_) => 1,
            _ => 2,
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;

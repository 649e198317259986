use thiserror::Error;

/// Errors surfaced by the catalog, producer, and consumer APIs.
///
/// Named after the error kinds in the design: `ConfigError`, `NotFound`,
/// `AlreadyClaimed`, `InvalidPosition`, `IoError`.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    #[error("queue '{0}' does not exist")]
    QueueNotFound(String),

    #[error("partition {partition} is out of range for queue '{queue}' ({partitions} partitions)")]
    InvalidPartition {
        queue: String,
        partition: u32,
        partitions: u32,
    },

    #[error("(queue: {queue}, group: {group}, partition: {partition}) is already claimed by a live consumer")]
    AlreadyClaimed {
        queue: String,
        group: String,
        partition: u32,
    },

    #[error("invalid seek position: {0}")]
    InvalidPosition(String),

    #[error("I/O failure. Reason: {0:#}")]
    IoError(#[source] anyhow::Error),
}

impl From<std::io::Error> for QueueError {
    fn from(err: std::io::Error) -> Self {
        QueueError::IoError(err.into())
    }
}

impl From<sled::Error> for QueueError {
    fn from(err: sled::Error) -> Self {
        QueueError::IoError(anyhow::Error::new(err))
    }
}

impl From<rmp_serde::encode::Error> for QueueError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        QueueError::IoError(anyhow::Error::new(err))
    }
}

impl From<rmp_serde::decode::Error> for QueueError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        QueueError::IoError(anyhow::Error::new(err))
    }
}

pub type QueueResult<T> = Result<T, QueueError>;

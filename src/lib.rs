//! A file-backed, partitioned, durable message queue for single-host
//! inter-process communication. See `DESIGN.md` for how each module below
//! is grounded, and spec.md/SPEC_FULL.md for the full design.

pub mod catalog;
pub mod config;
pub mod consumer;
pub mod error;
pub mod fanin;
pub mod hash;
pub mod lockfile;
pub mod pid;
pub mod producer;
pub mod record;
pub mod segment;
pub mod timestamp;

pub use catalog::Catalog;
pub use config::RootConfig;
pub use consumer::{Message, PartitionConsumer, Position};
pub use error::{QueueError, QueueResult};
pub use fanin::FanInConsumer;
pub use producer::Producer;
pub use record::{BinaryCodec, Record, RecordCodec, RecordKey};
pub use timestamp::Timestamp;

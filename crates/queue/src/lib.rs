pub mod azure;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod parser;

pub use azure::AzureQueueConsumer;
pub use consumer::{QueueConsumer, QueueHealth, QueueMessage};
pub use error::QueueError;
pub use memory::MemoryQueue;
pub use parser::{parse_ack, parse_batch, IngestionAck};

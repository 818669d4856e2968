// Job Store Infrastructure - I/O Adapters
// Implements: MessageSender (in-process broker), PartitionerFactory (file system)

pub mod broker;
pub mod partitioner;

pub use broker::{ChannelBroker, Mailboxes};
pub use partitioner::{FileSystemPartitionerFactory, JsonLinesPartitioner, LinePartitioner};

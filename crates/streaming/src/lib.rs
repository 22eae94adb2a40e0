//! Partition streaming: row-group reads with retry, the partition cache, and
//! the pub/sub protocol shared with other map components.

pub mod broadcast;
pub mod cache;
pub mod client;
pub mod filter;
pub mod partition;
pub mod protocol;
pub mod source;

pub use broadcast::*;
pub use cache::*;
pub use client::*;
pub use filter::*;
pub use partition::*;
pub use protocol::*;
pub use source::*;

//! Viewport tables, multi-resolution aggregates and generation-tagged queries
//! over the partitions streamed for the current map view.

pub mod aggregate;
pub mod builder;
pub mod config;
pub mod context;
pub mod executor;
pub mod predicate;
pub mod session;
pub mod sql;
pub mod table;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregate::*;
pub use builder::*;
pub use config::*;
pub use context::*;
pub use executor::*;
pub use predicate::*;
pub use session::*;
pub use sql::*;
pub use table::*;

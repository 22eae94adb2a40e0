//! Hierarchical cell addressing and the coarse-cell -> partition index.

pub mod cell;
pub mod codec;
pub mod column;
pub mod cover;
pub mod index;

pub use cell::*;
pub use codec::*;
pub use column::*;
pub use cover::*;
pub use index::*;

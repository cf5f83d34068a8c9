mod allocator;
mod config;
mod dialect;
mod error;
mod mutex;
mod registry;
pub mod store;

pub use crate::allocator::*;
pub use crate::config::*;
pub use crate::dialect::*;
pub use crate::error::*;
pub use crate::registry::*;
pub use crate::store::*;

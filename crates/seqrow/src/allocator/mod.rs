mod batch;
mod interface;
mod range;
#[cfg(test)]
mod tests;

pub use batch::*;
pub use interface::*;
pub use range::IdRange;
pub use range::IdRangeIter;
pub(crate) use range::BatchWindow;

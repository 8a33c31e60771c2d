#![doc = include_str!("../README.md")]

mod allocator;
mod codec;
mod content;
mod error;
mod expiry;
mod lock;
mod pool;
mod posts;
mod refill;
mod retry;
mod sequence;
mod supervisor;

pub use crate::allocator::*;
pub use crate::codec::*;
pub use crate::content::*;
pub use crate::error::*;
pub use crate::expiry::*;
pub use crate::lock::*;
pub use crate::pool::*;
pub use crate::posts::*;
pub use crate::refill::*;
pub use crate::retry::*;
pub use crate::sequence::*;
pub use crate::supervisor::*;

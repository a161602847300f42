//! Store readers
//!
//! Two implementations of [`SequenceStore`](crate::SequenceStore) are provided:
//!
//! * [`DefaultReader`] streams records from disk with bounded memory.
//! * [`MemoryReader`] loads a region into packed in-memory arrays.
//!
//! Both can be restricted to a [`Region`](crate::Region) of the store; record ids are
//! then relative to the region start.

mod default;
mod layout;
mod memory;
mod names;
mod stream;

pub use default::DefaultReader;
pub use memory::{MemoryOptions, MemoryReader};
pub use names::PrereadNames;

//! swiftlog transit library
//! byte-level transport between producer threads and the backend worker

// crate-specific lint exceptions:
#![allow(unsafe_code, clippy::missing_errors_doc, clippy::inline_always)]

mod bounded_queue;
mod serialize;
mod unbounded_queue;
mod value;

pub use bounded_queue::*;
pub use serialize::*;
pub use unbounded_queue::*;
pub use value::*;

pub mod prelude {
    pub use crate::{
        decode_args, encode_args, encoded_args_size, AllocationInfo, ArgStore, BoundedSpscQueue,
        ReadCursor, ReadResult, UnboundedSpscQueue, Value, WriteCursor,
    };
}

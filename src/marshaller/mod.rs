//! Translates between concrete argument values and the wire-safe
//! `(ArgumentTree, MemoryList)` pair, in both directions.
//!
//! This is the component the specification calls out as dominant: forward
//! pack (caller side), forward unpack (far side), return pack (far side)
//! and return unpack (caller side), plus the pointer-reached memory
//! synchronization that ties a declared pointer argument to the bytes it
//! reaches.

mod codec;
mod pack;
mod unpack;

pub use codec::{decode_value, encode_value};
pub use pack::{pack_arguments, pack_return, CallArgument, ForwardPack};
pub use unpack::{scatter_response, unpack_arguments, ReconstructedArgs};

// Author: Lukas Bower
// Purpose: Provide 9P2000 wire types and codec primitives for the nine-gate adapter.
#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![no_std]

//! 9P2000 wire types and codec primitives used by the nine-gate storage
//! adapter. The crate only knows about bytes on the wire; fid bookkeeping and
//! storage semantics live in the `nine-gate` crate.

extern crate alloc;

#[cfg(test)]
extern crate std;

mod codec;
mod types;

pub use codec::{
    decode_request, decode_response, decode_stat, encode_request, encode_response, encode_stat,
    validate_component, Codec,
};
pub use types::*;

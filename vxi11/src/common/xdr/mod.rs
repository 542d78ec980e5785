//! XDR implementation and types for various protocols

pub mod basic;
pub(crate) mod onc_rpc;

pub mod prelude {
    pub use super::basic::*;
    pub use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};
}

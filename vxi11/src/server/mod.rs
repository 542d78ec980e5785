//! Servers
//!
//! See [vxi11::VxiServerBuilder] for how to create a VXI-11 server.

pub mod vxi11;

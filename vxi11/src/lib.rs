//! VXI-11 protocol engine
//!
//! Implements the core, abort and interrupt channels of VXI-11 on top of ONC-RPC, see
//! [VXI-11 specification](https://www.vxibus.org/specifications.html).
//!
//! * [server::vxi11] - Core and abort channel services working against [lxi_device::Device]s.
//! * [client] - Typed core/abort channel clients.

pub mod common;

pub mod client;
pub mod server;

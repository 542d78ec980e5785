//! Clients
//!
//! See [vxi11::Vxi11CoreClient] and [vxi11::Vxi11AsyncClient].

pub mod vxi11;

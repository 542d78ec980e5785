pub mod onc_rpc;
pub mod vxi11;
pub mod xdr;

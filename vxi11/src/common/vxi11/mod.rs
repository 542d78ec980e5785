#![allow(non_upper_case_globals)]

pub mod xdr;

/// VXI-11 async channel program number
pub const DEVICE_ASYNC: u32 = 0x0607B0;
/// VXI-11 async channel program version
pub const DEVICE_ASYNC_VERSION: u32 = 1;
// Async channel procedures
pub const device_abort: u32 = 1;

/// VXI-11 core channel program number
pub const DEVICE_CORE: u32 = 0x0607AF;
/// VXI-11 core channel program version
pub const DEVICE_CORE_VERSION: u32 = 1;
// Core channel procedures
pub const create_link: u32 = 10;
pub const device_write: u32 = 11;
pub const device_read: u32 = 12;
pub const device_readstb: u32 = 13;
pub const device_trigger: u32 = 14;
pub const device_clear: u32 = 15;
pub const device_remote: u32 = 16;
pub const device_local: u32 = 17;
pub const device_lock: u32 = 18;
pub const device_unlock: u32 = 19;
pub const device_enable_srq: u32 = 20;
pub const device_docmd: u32 = 22;
pub const destroy_link: u32 = 23;
pub const create_intr_chan: u32 = 25;
pub const destroy_intr_chan: u32 = 26;

/// VXI-11 interrupt channel program number
pub const DEVICE_INTR: u32 = 0x0607B1;
/// VXI-11 interrupt channel program version
pub const DEVICE_INTR_VERSION: u32 = 1;
// Interrupt channel procedures
pub const device_intr_srq: u32 = 30;

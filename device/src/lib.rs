#![cfg_attr(not(any(feature = "std", test)), no_std)]

extern crate alloc;

use alloc::vec::Vec;

pub mod lock;
pub mod status;
pub mod util;

/// Request service (RQS) bit of the status byte
pub const STB_RQS: u8 = 0x40;
/// Message available (MAV) bit of the status byte
pub const STB_MAV: u8 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeviceError {
    NotSupported,
    IoTimeout,
    IoError,
}

/// Data returned by [Device::read]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReadData {
    pub data: Vec<u8>,
    /// Device signalled END with the last byte of `data`
    pub end: bool,
}

impl ReadData {
    pub fn new(data: Vec<u8>, end: bool) -> Self {
        Self { data, end }
    }

    /// Nothing available yet
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.data.is_empty() && !self.end
    }
}

/// Instrument capability used by a protocol server.
///
/// I/O methods must not block. A device that cannot accept or produce data right now returns
/// `Ok(0)` from [Device::write] or [ReadData::pending] from [Device::read] and the caller polls
/// again until its own timeout expires.
pub trait Device {
    /// Write a chunk of a message. `end` is set on the last chunk of a message.
    ///
    /// Returns the number of bytes accepted.
    fn write(&mut self, data: &[u8], end: bool) -> Result<usize, DeviceError>;

    /// Read up to `max_len` bytes of response data.
    fn read(&mut self, max_len: usize) -> Result<ReadData, DeviceError>;

    /// Return a current device status (STB) byte
    /// Some flags (such as MAV) will be ignored.
    fn get_status(&mut self) -> Result<u8, DeviceError>;

    /// Send a trigger signal to device
    fn trigger(&mut self) -> Result<(), DeviceError> {
        Err(DeviceError::NotSupported)
    }

    /// Clear device input/output and reset any pending operation
    fn clear(&mut self) -> Result<(), DeviceError> {
        Err(DeviceError::NotSupported)
    }

    /// Set remote/RMT state
    ///
    /// When in remote, frontpanel or any other local controls (except for 'local' button if any)
    /// should be ignored.
    fn set_remote(&mut self, _remote: bool) -> Result<(), DeviceError> {
        Err(DeviceError::NotSupported)
    }

    /// Enable/disable lockout for 'local' button
    fn set_local_lockout(&mut self, _enable: bool) {
        // Do nothing
    }

    /// Hand bus control to the device at `addr` (GPIB take control)
    fn pass_control(&mut self, _addr: u8) -> Result<(), DeviceError> {
        Err(DeviceError::NotSupported)
    }

    /// State of the NDAC handshake line
    fn ndac(&mut self) -> Result<bool, DeviceError> {
        Ok(false)
    }
}

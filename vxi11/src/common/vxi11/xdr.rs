//! Parameter and result structures of the VXI-11 core, abort and interrupt channels.

use std::{
    fmt,
    io::{Read, Result, Write},
};

use crate::common::xdr::prelude::*;

/// Link identifier
pub type DeviceLink = i32;

// Operation flags
pub const OP_FLAG_WAIT_BLOCK: i32 = 0x01;
pub const OP_FLAG_END: i32 = 0x08;
pub const OP_FLAG_TERMCHAR_SET: i32 = 0x80;

// Read termination reasons
pub const RX_REQCNT: i32 = 0x01;
pub const RX_CHR: i32 = 0x02;
pub const RX_END: i32 = 0x04;

/// Maximum length of a SRQ handle
pub const MAX_SRQ_HANDLE: usize = 40;

/// Declare a struct whose XDR encoding is its fields in order
macro_rules! xdr_struct {
    ($(#[$meta:meta])* pub struct $name:ident { $(pub $field:ident: $ty:ty,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Default, Clone, PartialEq, Eq)]
        pub struct $name {
            $(pub $field: $ty,)*
        }

        impl XdrEncode for $name {
            fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
            where
                WR: Write,
            {
                $(self.$field.write_xdr(writer)?;)*
                Ok(())
            }
        }

        impl XdrDecode for $name {
            fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
            where
                RD: Read,
            {
                $(self.$field.read_xdr(reader)?;)*
                Ok(())
            }
        }
    };
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAddrFamily {
    #[default]
    Tcp,
    Udp,
    Other(i32),
}

impl XdrEncode for DeviceAddrFamily {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        let family: i32 = match self {
            DeviceAddrFamily::Tcp => 0,
            DeviceAddrFamily::Udp => 1,
            DeviceAddrFamily::Other(x) => *x,
        };
        family.write_xdr(writer)
    }
}

impl XdrDecode for DeviceAddrFamily {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        *self = match reader.read_i32::<NetworkEndian>()? {
            0 => DeviceAddrFamily::Tcp,
            1 => DeviceAddrFamily::Udp,
            x => DeviceAddrFamily::Other(x),
        };
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFlags(pub i32);

impl DeviceFlags {
    pub fn is_waitlock(&self) -> bool {
        (self.0 & OP_FLAG_WAIT_BLOCK) != 0
    }

    pub fn is_end(&self) -> bool {
        (self.0 & OP_FLAG_END) != 0
    }

    pub fn is_termcharset(&self) -> bool {
        (self.0 & OP_FLAG_TERMCHAR_SET) != 0
    }
}

impl fmt::Display for DeviceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let w = if self.is_waitlock() { 'w' } else { '-' };
        let e = if self.is_end() { 'e' } else { '-' };
        let t = if self.is_termcharset() { 't' } else { '-' };
        write!(f, "{}{}{}", w, e, t)
    }
}

impl XdrEncode for DeviceFlags {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.0.write_xdr(writer)
    }
}

impl XdrDecode for DeviceFlags {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.0.read_xdr(reader)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeviceErrorCode {
    #[default]
    NoError,
    SyntaxError,
    DeviceNotAccessible,
    InvalidLinkIdentifier,
    ParameterError,
    ChannelNotEstablished,
    OperationNotSupported,
    OutOfResources,
    DeviceLockedByAnotherLink,
    NoLockHeldByThisLink,
    IoTimeout,
    IoError,
    InvalidAddress,
    Abort,
    ChannelAlreadyEstablished,

    /// Used for reserved/unknown error codes
    Reserved(u32),
}

impl DeviceErrorCode {
    pub fn is_ok(&self) -> bool {
        *self == DeviceErrorCode::NoError
    }
}

impl From<u32> for DeviceErrorCode {
    fn from(code: u32) -> Self {
        match code {
            0 => DeviceErrorCode::NoError,
            1 => DeviceErrorCode::SyntaxError,
            3 => DeviceErrorCode::DeviceNotAccessible,
            4 => DeviceErrorCode::InvalidLinkIdentifier,
            5 => DeviceErrorCode::ParameterError,
            6 => DeviceErrorCode::ChannelNotEstablished,
            8 => DeviceErrorCode::OperationNotSupported,
            9 => DeviceErrorCode::OutOfResources,
            11 => DeviceErrorCode::DeviceLockedByAnotherLink,
            12 => DeviceErrorCode::NoLockHeldByThisLink,
            15 => DeviceErrorCode::IoTimeout,
            17 => DeviceErrorCode::IoError,
            21 => DeviceErrorCode::InvalidAddress,
            23 => DeviceErrorCode::Abort,
            29 => DeviceErrorCode::ChannelAlreadyEstablished,
            x => DeviceErrorCode::Reserved(x),
        }
    }
}

impl From<DeviceErrorCode> for u32 {
    fn from(code: DeviceErrorCode) -> Self {
        match code {
            DeviceErrorCode::NoError => 0,
            DeviceErrorCode::SyntaxError => 1,
            DeviceErrorCode::DeviceNotAccessible => 3,
            DeviceErrorCode::InvalidLinkIdentifier => 4,
            DeviceErrorCode::ParameterError => 5,
            DeviceErrorCode::ChannelNotEstablished => 6,
            DeviceErrorCode::OperationNotSupported => 8,
            DeviceErrorCode::OutOfResources => 9,
            DeviceErrorCode::DeviceLockedByAnotherLink => 11,
            DeviceErrorCode::NoLockHeldByThisLink => 12,
            DeviceErrorCode::IoTimeout => 15,
            DeviceErrorCode::IoError => 17,
            DeviceErrorCode::InvalidAddress => 21,
            DeviceErrorCode::Abort => 23,
            DeviceErrorCode::ChannelAlreadyEstablished => 29,
            DeviceErrorCode::Reserved(x) => x,
        }
    }
}

impl fmt::Display for DeviceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, u32::from(*self))
    }
}

impl XdrEncode for DeviceErrorCode {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        u32::from(*self).write_xdr(writer)
    }
}

impl XdrDecode for DeviceErrorCode {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        *self = reader.read_u32::<NetworkEndian>()?.into();
        Ok(())
    }
}

xdr_struct! {
    /// Result of calls which only return an error
    pub struct DeviceError {
        pub error: DeviceErrorCode,
    }
}

impl From<DeviceErrorCode> for DeviceError {
    fn from(error: DeviceErrorCode) -> Self {
        DeviceError { error }
    }
}

xdr_struct! {
    pub struct CreateLinkParms {
        pub client_id: i32,
        pub lock_device: bool,
        pub lock_timeout: u32,
        pub device: String,
    }
}

xdr_struct! {
    pub struct CreateLinkResp {
        pub error: DeviceErrorCode,
        pub lid: DeviceLink,
        pub abort_port: u32,
        pub max_recv_size: u32,
    }
}

xdr_struct! {
    pub struct DeviceWriteParms {
        pub lid: DeviceLink,
        pub io_timeout: u32,
        pub lock_timeout: u32,
        pub flags: DeviceFlags,
        pub data: Opaque,
    }
}

xdr_struct! {
    pub struct DeviceWriteResp {
        pub error: DeviceErrorCode,
        pub size: u32,
    }
}

xdr_struct! {
    pub struct DeviceReadParms {
        pub lid: DeviceLink,
        pub request_size: u32,
        pub io_timeout: u32,
        pub lock_timeout: u32,
        pub flags: DeviceFlags,
        pub term_char: u8,
    }
}

xdr_struct! {
    pub struct DeviceReadResp {
        pub error: DeviceErrorCode,
        pub reason: i32,
        pub data: Opaque,
    }
}

xdr_struct! {
    pub struct DeviceReadStbResp {
        pub error: DeviceErrorCode,
        pub stb: u8,
    }
}

xdr_struct! {
    /// Parameters of readstb, trigger, clear, remote and local
    pub struct DeviceGenericParms {
        pub lid: DeviceLink,
        pub flags: DeviceFlags,
        pub lock_timeout: u32,
        pub io_timeout: u32,
    }
}

xdr_struct! {
    /// Interrupt channel the server connects back to
    pub struct DeviceRemoteFunc {
        pub host_addr: u32,
        pub host_port: u32,
        pub prog_num: u32,
        pub prog_vers: u32,
        pub prog_family: DeviceAddrFamily,
    }
}

xdr_struct! {
    pub struct DeviceEnableSrqParms {
        pub lid: DeviceLink,
        pub enable: bool,
        pub handle: Opaque,
    }
}

xdr_struct! {
    pub struct DeviceLockParms {
        pub lid: DeviceLink,
        pub flags: DeviceFlags,
        pub lock_timeout: u32,
    }
}

xdr_struct! {
    pub struct DeviceDocmdParms {
        pub lid: DeviceLink,
        pub flags: DeviceFlags,
        pub io_timeout: u32,
        pub lock_timeout: u32,
        pub cmd: i32,
        pub network_order: bool,
        pub datasize: i32,
        pub data_in: Opaque,
    }
}

xdr_struct! {
    pub struct DeviceDocmdResp {
        pub error: DeviceErrorCode,
        pub data_out: Opaque,
    }
}

xdr_struct! {
    /// Argument of `device_intr_srq` on the interrupt channel
    pub struct DeviceSrqParms {
        pub handle: Opaque,
    }
}

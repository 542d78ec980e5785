//! Basic types for XDR, see [RFC4506](https://datatracker.ietf.org/doc/html/rfc4506).
//!
//! | XDR Type         | Rust type |
//! |------------------|-----------|
//! | integer          | i32       |
//! | unsigned integer | u32       |
//! | Boolean          | bool      |
//! | opaque<>         | [Opaque]  |
//! | string<>         | String    |
//!
//! Narrower integers (`u16`, `u8`) are carried in a full 32-bit word.
//! Structures are implemented by hand in terms of these.

use std::{
    io::{Error, ErrorKind, Read, Result, Write},
    ops::{Deref, DerefMut},
};

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};

fn padding(len: usize) -> usize {
    (4 - (len & 3)) & 3
}

fn read_padding<RD: Read>(reader: &mut RD, len: usize) -> Result<()> {
    let mut pad = [0u8; 3];
    reader.read_exact(&mut pad[..padding(len)])
}

fn write_padding<WR: Write>(writer: &mut WR, len: usize) -> Result<()> {
    writer.write_all(&[0u8; 3][..padding(len)])
}

/// Read a length prefixed byte string.
/// Never allocates more than what is actually available from `reader`.
fn read_bytes<RD: Read>(reader: &mut RD) -> Result<Vec<u8>> {
    let len = reader.read_u32::<NetworkEndian>()? as usize;
    let mut buf = Vec::new();
    reader.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(ErrorKind::UnexpectedEof.into());
    }
    read_padding(reader, len)?;
    Ok(buf)
}

fn write_bytes<WR: Write>(writer: &mut WR, bytes: &[u8]) -> Result<()> {
    let len = u32::try_from(bytes.len()).map_err(|_| Error::from(ErrorKind::InvalidInput))?;
    writer.write_u32::<NetworkEndian>(len)?;
    writer.write_all(bytes)?;
    write_padding(writer, bytes.len())
}

pub trait XdrDecode {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read;
}

pub trait XdrEncode {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write;
}

impl XdrDecode for () {
    fn read_xdr<RD>(&mut self, _reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        Ok(())
    }
}

impl XdrEncode for () {
    fn write_xdr<WR>(&self, _writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        Ok(())
    }
}

// 4.1 Integer
impl XdrDecode for i32 {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        *self = reader.read_i32::<NetworkEndian>()?;
        Ok(())
    }
}

impl XdrEncode for i32 {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        writer.write_i32::<NetworkEndian>(*self)
    }
}

// 4.2 Unsigned Integer
impl XdrDecode for u32 {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        *self = reader.read_u32::<NetworkEndian>()?;
        Ok(())
    }
}

impl XdrEncode for u32 {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        writer.write_u32::<NetworkEndian>(*self)
    }
}

impl XdrDecode for u16 {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        *self = reader.read_u32::<NetworkEndian>()? as Self;
        Ok(())
    }
}

impl XdrEncode for u16 {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        writer.write_u32::<NetworkEndian>(*self as u32)
    }
}

impl XdrDecode for u8 {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        *self = reader.read_u32::<NetworkEndian>()? as Self;
        Ok(())
    }
}

impl XdrEncode for u8 {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        writer.write_u32::<NetworkEndian>(*self as u32)
    }
}

// 4.4 Booleans
impl XdrDecode for bool {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        *self = reader.read_i32::<NetworkEndian>()? != 0;
        Ok(())
    }
}

impl XdrEncode for bool {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        writer.write_i32::<NetworkEndian>(*self as i32)
    }
}

// 4.10 Variable-Length Opaque Data
/// Variable length opaque data, `opaque<>`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Opaque(pub Vec<u8>);

impl Deref for Opaque {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Opaque {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Vec<u8>> for Opaque {
    fn from(v: Vec<u8>) -> Self {
        Opaque(v)
    }
}

impl From<&[u8]> for Opaque {
    fn from(v: &[u8]) -> Self {
        Opaque(v.to_vec())
    }
}

impl XdrDecode for Opaque {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.0 = read_bytes(reader)?;
        Ok(())
    }
}

impl XdrEncode for Opaque {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        write_bytes(writer, &self.0)
    }
}

// 4.11 String
impl XdrDecode for String {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        let bytes = read_bytes(reader)?;
        *self = String::from_utf8(bytes).map_err(|err| Error::new(ErrorKind::InvalidData, err))?;
        Ok(())
    }
}

impl XdrEncode for String {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        write_bytes(writer, self.as_bytes())
    }
}

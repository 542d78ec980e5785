//! Record marking standard, see [RFC5531 section 11](https://datatracker.ietf.org/doc/html/rfc5531#section-11)

use std::io::{Error, ErrorKind, Result};

use byteorder::{ByteOrder, NetworkEndian};
use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const LAST_FRAGMENT: u32 = 0x8000_0000;

/// Largest record accepted by default
pub(crate) const DEFAULT_MAX_RECORD: usize = 1024 * 1024;

/// Read and reassemble one record.
///
/// Fails with [ErrorKind::InvalidData] if the record is larger than `maxlen` and with
/// [ErrorKind::UnexpectedEof] if the stream ends in the middle of a record.
pub(crate) async fn read_record<RD>(reader: &mut RD, maxlen: usize) -> Result<Vec<u8>>
where
    RD: AsyncRead + Unpin,
{
    let mut buf = Vec::new();

    loop {
        let mut header = [0u8; 4];
        reader.read_exact(&mut header).await?;
        let header = NetworkEndian::read_u32(&header);

        let len = (header & !LAST_FRAGMENT) as usize;
        if buf.len() + len > maxlen {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("record exceeds {} bytes", maxlen),
            ));
        }
        let expected = buf.len() + len;
        reader.take(len as u64).read_to_end(&mut buf).await?;
        if buf.len() != expected {
            return Err(ErrorKind::UnexpectedEof.into());
        }

        if header & LAST_FRAGMENT != 0 {
            break Ok(buf);
        }
    }
}

/// Write `record` as a single fragment
pub(crate) async fn write_record<WR>(writer: &mut WR, record: &[u8]) -> Result<()>
where
    WR: AsyncWrite + Unpin,
{
    let len = u32::try_from(record.len())
        .ok()
        .filter(|len| len & LAST_FRAGMENT == 0)
        .ok_or_else(|| Error::from(ErrorKind::InvalidInput))?;

    let mut frame = vec![0; 4];
    NetworkEndian::write_u32(&mut frame, LAST_FRAGMENT | len);
    frame.extend_from_slice(record);
    writer.write_all(&frame).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use futures::io::Cursor;

    #[async_std::test]
    async fn reassemble_single_fragment() {
        let mut cursor = Cursor::new(b"\x80\x00\x00\x04\x01\x02\x03\x04");
        let rec = super::read_record(&mut cursor, 10).await.unwrap();

        assert_eq!(rec[..], [1, 2, 3, 4])
    }

    #[async_std::test]
    async fn reassemble_multiple_fragment() {
        let mut cursor = Cursor::new(b"\x00\x00\x00\x02\x01\x02\x80\x00\x00\x02\x03\x04");
        let rec = super::read_record(&mut cursor, 10).await.unwrap();

        assert_eq!(rec[..], [1, 2, 3, 4])
    }

    #[async_std::test]
    async fn record_too_large() {
        let mut cursor = Cursor::new(b"\x00\x00\x00\x08\x01\x02\x03\x04\x05\x06\x07\x08\x80\x00\x00\x04");
        let err = super::read_record(&mut cursor, 10).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[async_std::test]
    async fn truncated_record() {
        let mut cursor = Cursor::new(b"\x80\x00\x00\x08\x01\x02");
        let err = super::read_record(&mut cursor, 10).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[async_std::test]
    async fn write_single_fragment() {
        let mut cursor = Cursor::new(Vec::new());
        super::write_record(&mut cursor, &[1, 2, 3]).await.unwrap();
        assert_eq!(cursor.into_inner(), b"\x80\x00\x00\x03\x01\x02\x03");
    }
}

//! `"CSH" + u64le(length) + payload` wire framing, shared by requests
//! and responses.

use std::io::{Read, Write};

use byteorder::{ByteOrder, LittleEndian};

use crate::error::CodecError;

pub const MAGIC: &[u8; 3] = b"CSH";

/// Chunk size used for reading/writing frame payloads. 1 MiB, per the
/// wire format's recommendation.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Read one frame from `r`: validate the magic, read the length, then
/// read exactly that many payload bytes.
pub fn read_frame<R: Read>(r: &mut R) -> Result<Vec<u8>, CodecError> {
    let mut magic = [0u8; 3];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(CodecError::BadMagic);
    }

    let mut len_buf = [0u8; 8];
    r.read_exact(&mut len_buf)?;
    let len = LittleEndian::read_u64(&len_buf) as usize;

    let mut payload = vec![0u8; len];
    let mut read_so_far = 0;
    while read_so_far < len {
        let end = (read_so_far + CHUNK_SIZE).min(len);
        r.read_exact(&mut payload[read_so_far..end])?;
        read_so_far = end;
    }
    Ok(payload)
}

/// Write one frame to `w`: magic, little-endian length, then the
/// payload in chunks.
pub fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> Result<(), CodecError> {
    w.write_all(MAGIC)?;
    let mut len_buf = [0u8; 8];
    LittleEndian::write_u64(&mut len_buf, payload.len() as u64);
    w.write_all(&len_buf)?;

    for chunk in payload.chunks(CHUNK_SIZE) {
        w.write_all(chunk)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let payload = b"some encoded mapping bytes".to_vec();
        let mut buf = Vec::new();
        write_frame(&mut buf, &payload).unwrap();

        let mut cursor = std::io::Cursor::new(buf.clone());
        let decoded = read_frame(&mut cursor).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(cursor.position() as usize, buf.len());
    }

    #[test]
    fn bad_magic_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"XXX");
        buf.extend_from_slice(&[0u8; 8]);
        let mut cursor = std::io::Cursor::new(buf);
        assert!(matches!(read_frame(&mut cursor), Err(CodecError::BadMagic)));
    }

    #[test]
    fn empty_payload_round_trips() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &[]).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor).unwrap(), Vec::<u8>::new());
    }
}

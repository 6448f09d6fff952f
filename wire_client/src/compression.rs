//! Compressed block frames.
//!
//! When compression is negotiated every block body travels inside a frame:
//!
//! ```text
//! checksum: 16 bytes CityHash128 (v1.0.2) over everything after this field
//! method:   u8       0x82 = lz4, 0x02 = none
//! size:     u32 LE   header (9 bytes) + payload
//! raw_size: u32 LE   length of the decompressed block
//! payload
//! ```

use crate::codec::{read_exact_vec, MAX_FIELD_LEN};
use std::io::{self, Read, Write};

pub const METHOD_NONE: u8 = 0x02;
pub const METHOD_LZ4: u8 = 0x82;
const CHECKSUM_LEN: usize = 16;
const HEADER_LEN: usize = 9;

/// The frame checksum as it appears on the wire: the two 64-bit halves of
/// the hash, low half first, each little-endian.
fn checksum(body: &[u8]) -> [u8; CHECKSUM_LEN] {
    cityhash_rs::cityhash_102_128(body).rotate_right(64).to_le_bytes()
}

/// Builds one frame around `raw`, lz4-compressed.
pub fn compress_frame(raw: &[u8]) -> Vec<u8> {
    let payload = lz4_flex::block::compress(raw);
    let mut body = Vec::with_capacity(HEADER_LEN + payload.len());
    body.push(METHOD_LZ4);
    body.extend_from_slice(&((HEADER_LEN + payload.len()) as u32).to_le_bytes());
    body.extend_from_slice(&(raw.len() as u32).to_le_bytes());
    body.extend_from_slice(&payload);

    let mut frame = Vec::with_capacity(CHECKSUM_LEN + body.len());
    frame.extend_from_slice(&checksum(&body));
    frame.extend_from_slice(&body);
    frame
}

pub fn write_frame<W: Write>(w: &mut W, raw: &[u8]) -> io::Result<()> {
    w.write_all(&compress_frame(raw))
}

/// Reads one frame and returns the decompressed block bytes.
pub fn read_frame<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let mut expected = [0u8; CHECKSUM_LEN];
    r.read_exact(&mut expected)?;
    let mut header = [0u8; HEADER_LEN];
    r.read_exact(&mut header)?;
    let method = header[0];
    let size = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
    let raw_size = u32::from_le_bytes([header[5], header[6], header[7], header[8]]) as usize;
    if size < HEADER_LEN || size as u64 > MAX_FIELD_LEN || raw_size as u64 > MAX_FIELD_LEN {
        return Err(invalid(format!("bad compressed frame size {}", size)));
    }

    let mut body = Vec::with_capacity(size.min(64 * 1024));
    body.extend_from_slice(&header);
    body.extend_from_slice(&read_exact_vec(r, size - HEADER_LEN)?);
    // A damaged frame is a transport fault, not a malformed exchange.
    if checksum(&body) != expected {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            "compressed frame checksum mismatch",
        ));
    }

    let payload = &body[HEADER_LEN..];
    match method {
        METHOD_LZ4 => {
            let raw = lz4_flex::block::decompress(payload, raw_size)
                .map_err(|e| invalid(format!("lz4 decompression failed: {}", e)))?;
            if raw.len() != raw_size {
                return Err(invalid("decompressed size mismatch".to_string()));
            }
            Ok(raw)
        }
        METHOD_NONE => Ok(payload.to_vec()),
        other => Err(invalid(format!("unknown compression method 0x{:02x}", other))),
    }
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_restores_block_bytes() {
        let raw: Vec<u8> = b"abcabcabcabc".iter().cycle().take(4096).copied().collect();
        let frame = compress_frame(&raw);
        assert!(frame.len() < raw.len());
        assert_eq!(frame[CHECKSUM_LEN], METHOD_LZ4);
        assert_eq!(read_frame(&mut Cursor::new(frame)).unwrap(), raw);
    }

    // A one-row String block framed by a ClickHouse server.
    #[test]
    fn test_reads_server_frame() {
        let frame = vec![
            245_u8, 5, 222, 235, 225, 158, 59, 108, 225, 31, 65, 215, 66, 66, 36, 92, 130, 34, 0,
            0, 0, 23, 0, 0, 0, 240, 8, 1, 0, 2, 255, 255, 255, 255, 0, 1, 1, 1, 115, 6, 83, 116,
            114, 105, 110, 103, 3, 97, 98, 99,
        ];
        let expected = vec![
            1_u8, 0, 2, 255, 255, 255, 255, 0, 1, 1, 1, 115, 6, 83, 116, 114, 105, 110, 103, 3, 97,
            98, 99,
        ];
        assert_eq!(checksum(&frame[CHECKSUM_LEN..]).to_vec(), frame[..CHECKSUM_LEN].to_vec());
        assert_eq!(read_frame(&mut Cursor::new(frame)).unwrap(), expected);
    }

    #[test]
    fn test_corrupt_payload_fails_checksum() {
        let mut frame = compress_frame(b"some block bytes");
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        let err = read_frame(&mut Cursor::new(frame)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }

    #[test]
    fn test_uncompressed_method_passes_through() {
        let payload = b"plain".to_vec();
        let mut body = vec![METHOD_NONE];
        body.extend_from_slice(&((HEADER_LEN + payload.len()) as u32).to_le_bytes());
        body.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        body.extend_from_slice(&payload);
        let mut frame = checksum(&body).to_vec();
        frame.extend_from_slice(&body);
        assert_eq!(read_frame(&mut Cursor::new(frame)).unwrap(), payload);
    }

    #[test]
    fn test_oversized_frame_is_invalid_data() {
        let mut frame = vec![0u8; CHECKSUM_LEN];
        frame.push(METHOD_LZ4);
        frame.extend_from_slice(&u32::MAX.to_le_bytes());
        frame.extend_from_slice(&4u32.to_le_bytes());
        let err = read_frame(&mut Cursor::new(frame)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}

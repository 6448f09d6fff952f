//! Primitive encodings of the native protocol: LEB128 varints,
//! length-prefixed strings and little-endian fixed-width numbers.

use std::io::{self, Read, Write};

/// Upper bound on any single length-prefixed field. Anything larger is treated
/// as a corrupt stream rather than an allocation request.
pub const MAX_FIELD_LEN: u64 = 1 << 30;

const PREALLOC_LIMIT: usize = 64 * 1024;

pub fn write_varint<W: Write>(w: &mut W, mut value: u64) -> io::Result<()> {
    let mut buf = [0u8; 10];
    let mut i = 0;
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf[i] = byte;
            i += 1;
            break;
        }
        buf[i] = byte | 0x80;
        i += 1;
    }
    w.write_all(&buf[..i])
}

pub fn read_varint<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut value = 0u64;
    for i in 0..10 {
        let byte = read_u8(r)?;
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(io::Error::new(io::ErrorKind::InvalidData, "varint is longer than 10 bytes"))
}

pub fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    write_varint(w, bytes.len() as u64)?;
    w.write_all(bytes)
}

pub fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    write_bytes(w, s.as_bytes())
}

pub fn read_bytes<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let len = read_varint(r)?;
    if len > MAX_FIELD_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("field length {} exceeds limit", len),
        ));
    }
    read_exact_vec(r, len as usize)
}

pub fn read_string<R: Read>(r: &mut R) -> io::Result<String> {
    let bytes = read_bytes(r)?;
    String::from_utf8(bytes)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "string field is not UTF-8"))
}

/// Reads exactly `len` bytes. The buffer grows as bytes arrive, so a length
/// taken from a corrupt header fails at end of stream instead of allocating
/// the whole amount up front.
pub fn read_exact_vec<R: Read>(r: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(len.min(PREALLOC_LIMIT));
    r.by_ref().take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("stream ended after {} of {} bytes", buf.len(), len),
        ));
    }
    Ok(buf)
}

pub fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

macro_rules! fixed_width {
    ($read:ident, $write:ident, $ty:ty) => {
        pub fn $read<R: Read>(r: &mut R) -> io::Result<$ty> {
            let mut buf = [0u8; std::mem::size_of::<$ty>()];
            r.read_exact(&mut buf)?;
            Ok(<$ty>::from_le_bytes(buf))
        }

        pub fn $write<W: Write>(w: &mut W, value: $ty) -> io::Result<()> {
            w.write_all(&value.to_le_bytes())
        }
    };
}

fixed_width!(read_u16, write_u16, u16);
fixed_width!(read_u32, write_u32, u32);
fixed_width!(read_u64, write_u64, u64);
fixed_width!(read_i8, write_i8, i8);
fixed_width!(read_i16, write_i16, i16);
fixed_width!(read_i32, write_i32, i32);
fixed_width!(read_i64, write_i64, i64);
fixed_width!(read_f32, write_f32, f32);
fixed_width!(read_f64, write_f64, f64);

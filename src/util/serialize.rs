//! Big-endian byte-order helpers and zlib framing
//!
//! Writers append to a `Vec<u8>`; `Reader` is a bounds-checked cursor that
//! reports short reads as `Error::Serialization`.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::bufread::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::core::error::Error;
use crate::core::types::{IVec3, Result, Vec3};

/// Scale factor applied to floats stored as fixed-point i32
pub const FIXED_POINT_FACTOR: f32 = 10000.0;

pub fn write_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

pub fn write_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn write_i16(out: &mut Vec<u8>, v: i16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn write_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn write_f32(out: &mut Vec<u8>, v: f32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn write_v3i16(out: &mut Vec<u8>, v: IVec3) {
    write_i16(out, v.x as i16);
    write_i16(out, v.y as i16);
    write_i16(out, v.z as i16);
}

pub fn write_v3f32(out: &mut Vec<u8>, v: Vec3) {
    write_f32(out, v.x);
    write_f32(out, v.y);
    write_f32(out, v.z);
}

/// Float vector as three fixed-point i32 (value * 10000)
pub fn write_v3f_fixed(out: &mut Vec<u8>, v: Vec3) {
    write_i32(out, (v.x * FIXED_POINT_FACTOR) as i32);
    write_i32(out, (v.y * FIXED_POINT_FACTOR) as i32);
    write_i32(out, (v.z * FIXED_POINT_FACTOR) as i32);
}

/// String with u16 length prefix; longer strings are truncated
pub fn serialize_string16(out: &mut Vec<u8>, s: &[u8]) {
    let len = s.len().min(u16::MAX as usize);
    if len < s.len() {
        log::warn!("serialize_string16: truncating {} bytes", s.len());
    }
    write_u16(out, len as u16);
    out.extend_from_slice(&s[..len]);
}

/// String with u32 length prefix
pub fn serialize_string32(out: &mut Vec<u8>, s: &[u8]) {
    write_u32(out, s.len() as u32);
    out.extend_from_slice(s);
}

/// Bounds-checked big-endian reader over a byte slice
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read offset
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.data.len() - self.pos < n {
            return Err(Error::Serialization(format!(
                "unexpected end of data: wanted {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.data.len() - self.pos
            )));
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut a = [0u8; N];
        a.copy_from_slice(self.take(N)?);
        Ok(a)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.array()?))
    }

    pub fn read_v3i16(&mut self) -> Result<IVec3> {
        Ok(IVec3::new(
            self.read_i16()? as i32,
            self.read_i16()? as i32,
            self.read_i16()? as i32,
        ))
    }

    pub fn read_v3f32(&mut self) -> Result<Vec3> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_v3f_fixed(&mut self) -> Result<Vec3> {
        Ok(Vec3::new(
            self.read_i32()? as f32 / FIXED_POINT_FACTOR,
            self.read_i32()? as f32 / FIXED_POINT_FACTOR,
            self.read_i32()? as f32 / FIXED_POINT_FACTOR,
        ))
    }

    pub fn read_string16(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u16()? as usize;
        self.take(len)
    }

    pub fn read_string32(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    /// Decompress one zlib stream starting at the cursor, advancing past
    /// exactly the compressed bytes it used
    pub fn read_zlib(&mut self) -> Result<Vec<u8>> {
        let input = self.remaining();
        let mut decoder = ZlibDecoder::new(input);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| Error::Serialization(format!("zlib: {}", e)))?;
        let used = decoder.total_in() as usize;
        self.pos += used;
        Ok(out)
    }
}

/// Map a configured level (-1 = library default) to a flate2 level
pub fn compression_from_level(level: i32) -> Compression {
    if (0..=9).contains(&level) {
        Compression::new(level as u32)
    } else {
        Compression::default()
    }
}

/// Append a zlib stream of `data` to `out`
pub fn compress_zlib(out: &mut Vec<u8>, data: &[u8], level: i32) -> Result<()> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), compression_from_level(level));
    encoder.write_all(data)?;
    out.extend_from_slice(&encoder.finish()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_round_trip() {
        let mut buf = Vec::new();
        write_u8(&mut buf, 7);
        write_u16(&mut buf, 0xBEEF);
        write_i32(&mut buf, -123456);
        write_f32(&mut buf, 1.5);
        write_v3i16(&mut buf, IVec3::new(-1, 2, -3));
        serialize_string16(&mut buf, b"hello");

        let mut r = Reader::new(&buf);
        assert_eq!(r.read_u8().unwrap(), 7);
        assert_eq!(r.read_u16().unwrap(), 0xBEEF);
        assert_eq!(r.read_i32().unwrap(), -123456);
        assert_eq!(r.read_f32().unwrap(), 1.5);
        assert_eq!(r.read_v3i16().unwrap(), IVec3::new(-1, 2, -3));
        assert_eq!(r.read_string16().unwrap(), b"hello");
        assert!(r.is_empty());
    }

    #[test]
    fn test_big_endian_layout() {
        let mut buf = Vec::new();
        write_u16(&mut buf, 0x0102);
        assert_eq!(buf, vec![1, 2]);
    }

    #[test]
    fn test_short_read_is_error() {
        let buf = [0u8; 3];
        let mut r = Reader::new(&buf);
        assert!(r.read_u32().is_err());
    }

    #[test]
    fn test_consecutive_zlib_streams() {
        let mut buf = Vec::new();
        compress_zlib(&mut buf, b"first stream", 6).unwrap();
        compress_zlib(&mut buf, b"second", -1).unwrap();
        write_u8(&mut buf, 0xAA);

        let mut r = Reader::new(&buf);
        assert_eq!(r.read_zlib().unwrap(), b"first stream");
        assert_eq!(r.read_zlib().unwrap(), b"second");
        assert_eq!(r.read_u8().unwrap(), 0xAA);
    }

    #[test]
    fn test_fixed_point_vector() {
        let mut buf = Vec::new();
        write_v3f_fixed(&mut buf, Vec3::new(1.25, -2.5, 0.0001));
        let v = Reader::new(&buf).read_v3f_fixed().unwrap();
        assert!((v - Vec3::new(1.25, -2.5, 0.0001)).length() < 1e-4);
    }
}

//! Length-delimited, little-endian wire codec — §4.2.
//!
//! `Encode`/`Decode` mirror the contract of derive-macro protocol crates
//! (encode/decode fields in declaration order) but are hand-implemented
//! here since the opcode catalogue is small enough that a proc-macro crate
//! would be pure overhead. Decode failures never panic: every read that can
//! run past the end of the buffer returns `ProtocolError::Truncated` or
//! `MalformedPacket` instead.

use aeon_common::error::ProtocolError;
use aeon_common::ids::PlayerId;
use aeon_common::vec3::Vec3;

pub type DecodeResult<T> = Result<T, ProtocolError>;

/// A cursor over an immutable byte slice, shrinking from the front as bytes
/// are consumed — the same borrowing discipline as `valence_protocol`'s
/// `Decode` trait, without the lifetime-parameterized trait object.
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn need(&self, n: usize) -> DecodeResult<()> {
        if self.buf.len() < n {
            Err(ProtocolError::Truncated {
                expected: n,
                remaining: self.buf.len(),
            })
        } else {
            Ok(())
        }
    }

    pub fn read_u8(&mut self) -> DecodeResult<u8> {
        self.need(1)?;
        let v = self.buf[0];
        self.buf = &self.buf[1..];
        Ok(v)
    }

    pub fn read_i8(&mut self) -> DecodeResult<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_bool(&mut self) -> DecodeResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> DecodeResult<u16> {
        self.need(2)?;
        let v = u16::from_le_bytes([self.buf[0], self.buf[1]]);
        self.buf = &self.buf[2..];
        Ok(v)
    }

    pub fn read_i16(&mut self) -> DecodeResult<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> DecodeResult<u32> {
        self.need(4)?;
        let v = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        self.buf = &self.buf[4..];
        Ok(v)
    }

    pub fn read_i32(&mut self) -> DecodeResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_f32(&mut self) -> DecodeResult<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_vec3(&mut self) -> DecodeResult<Vec3> {
        let x = self.read_f32()?;
        let y = self.read_f32()?;
        let z = self.read_f32()?;
        Ok(Vec3::new(x, y, z))
    }

    pub fn read_bytes(&mut self, n: usize) -> DecodeResult<Vec<u8>> {
        self.need(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head.to_vec())
    }

    /// u32 length prefix + raw bytes, rejecting lengths that exceed the
    /// remaining buffer (the underflow case named in §4.2).
    pub fn read_blob(&mut self) -> DecodeResult<Vec<u8>> {
        let len = self.read_u32()? as usize;
        if len > self.buf.len() {
            return Err(ProtocolError::MalformedPacket(format!(
                "blob length {len} exceeds remaining {}",
                self.buf.len()
            )));
        }
        self.read_bytes(len)
    }

    pub fn read_string(&mut self) -> DecodeResult<String> {
        let bytes = self.read_blob()?;
        String::from_utf8(bytes)
            .map_err(|e| ProtocolError::MalformedPacket(format!("invalid utf-8 string: {e}")))
    }

    pub fn read_player_id(&mut self) -> DecodeResult<PlayerId> {
        Ok(PlayerId(self.read_u32()?))
    }

    pub fn read_optional_player_id(&mut self) -> DecodeResult<Option<PlayerId>> {
        if self.read_bool()? {
            Ok(Some(self.read_player_id()?))
        } else {
            Ok(None)
        }
    }
}

/// Growable little-endian byte sink.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.write_u8(v as u8);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.write_u8(v as u8);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i16(&mut self, v: i16) {
        self.write_u16(v as u16);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write_u32(v as u32);
    }

    pub fn write_f32(&mut self, v: f32) {
        self.write_u32(v.to_bits());
    }

    pub fn write_vec3(&mut self, v: Vec3) {
        self.write_f32(v.x);
        self.write_f32(v.y);
        self.write_f32(v.z);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_blob(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.write_bytes(bytes);
    }

    pub fn write_string(&mut self, s: &str) {
        self.write_blob(s.as_bytes());
    }

    pub fn write_player_id(&mut self, id: PlayerId) {
        self.write_u32(id.0);
    }

    pub fn write_optional_player_id(&mut self, id: Option<PlayerId>) {
        match id {
            Some(id) => {
                self.write_bool(true);
                self.write_player_id(id);
            }
            None => self.write_bool(false),
        }
    }
}

/// Types that know how to serialize themselves onto a [`Writer`] and
/// deserialize from a [`Reader`]. Field order is encode order == decode
/// order, exactly as declared in each packet struct.
pub trait Encode {
    fn encode(&self, w: &mut Writer);
}

pub trait Decode: Sized {
    fn decode(r: &mut Reader) -> DecodeResult<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_primitives() {
        let mut w = Writer::new();
        w.write_u8(0xAB);
        w.write_u16(0x1234);
        w.write_u32(0xDEADBEEF);
        w.write_i16(-5);
        w.write_bool(true);
        w.write_f32(3.5);
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_u8().unwrap(), 0xAB);
        assert_eq!(r.read_u16().unwrap(), 0x1234);
        assert_eq!(r.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(r.read_i16().unwrap(), -5);
        assert_eq!(r.read_bool().unwrap(), true);
        assert_eq!(r.read_f32().unwrap(), 3.5);
    }

    #[test]
    fn roundtrip_string_and_optional_player_id() {
        let mut w = Writer::new();
        w.write_string("hello");
        w.write_optional_player_id(Some(PlayerId(42)));
        w.write_optional_player_id(None);
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_string().unwrap(), "hello");
        assert_eq!(r.read_optional_player_id().unwrap(), Some(PlayerId(42)));
        assert_eq!(r.read_optional_player_id().unwrap(), None);
    }

    #[test]
    fn truncated_read_is_an_error_not_a_panic() {
        let bytes = [0x01u8];
        let mut r = Reader::new(&bytes);
        assert!(r.read_u32().is_err());
    }

    #[test]
    fn blob_length_exceeding_buffer_is_malformed_not_panic() {
        let mut w = Writer::new();
        w.write_u32(1000);
        w.write_bytes(&[1, 2, 3]);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert!(matches!(
            r.read_blob(),
            Err(ProtocolError::MalformedPacket(_))
        ));
    }

    #[test]
    fn vec3_roundtrip() {
        let mut w = Writer::new();
        w.write_vec3(Vec3::new(1.0, -2.5, 3.25));
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_vec3().unwrap(), Vec3::new(1.0, -2.5, 3.25));
    }

    #[test]
    fn invalid_utf8_string_is_malformed() {
        let mut w = Writer::new();
        w.write_blob(&[0xFF, 0xFE]);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert!(r.read_string().is_err());
    }
}

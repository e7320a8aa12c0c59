//! Bit-addressed scripting packet builder — §4.9.7, grounded directly in
//! `gmp-server/lib/packet.cpp`'s `Packet` (`write_bit_pos_`/`read_bit_pos_`,
//! `AlignWriteToByte`/`AlignReadToByte` called before every multi-byte op,
//! `writeBool`/`readBool` addressing individual bits).

use aeon_protocol::{Opcode, Reliability};
use aeon_common::error::ProtocolError;

/// Where a script-built [`Packet`] can be sent. Implemented by the server
/// (player id → connection via the registry) and the client (always "the
/// server") so this crate never depends on either directly.
pub trait PacketDestination: Send + Sync {
    fn send_to_player(&self, player_id: u32, bytes: &[u8], reliability: Reliability);
    fn send_to_all(&self, bytes: &[u8], reliability: Reliability);
}

/// A growable, bit-addressed buffer. Single-bit writes (`write_bool`) do not
/// force byte alignment; every other write aligns first, matching the
/// original's `AlignWriteToByte` calls ahead of `WriteIntegral`/`WriteBytes`.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    buffer: Vec<u8>,
    write_bit_pos: usize,
    read_bit_pos: usize,
}

impl Packet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let write_bit_pos = bytes.len() * 8;
        Self {
            buffer: bytes,
            write_bit_pos,
            read_bit_pos: 0,
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.write_bit_pos = 0;
        self.read_bit_pos = 0;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    fn align_write(&mut self) {
        if self.write_bit_pos % 8 != 0 {
            self.write_bit_pos += 8 - (self.write_bit_pos % 8);
        }
    }

    fn align_read(&mut self) {
        if self.read_bit_pos % 8 != 0 {
            self.read_bit_pos += 8 - (self.read_bit_pos % 8);
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        let byte_pos = self.write_bit_pos / 8;
        let needed = byte_pos + bytes.len();
        if self.buffer.len() < needed {
            self.buffer.resize(needed, 0);
        }
        self.buffer[byte_pos..byte_pos + bytes.len()].copy_from_slice(bytes);
        self.write_bit_pos += bytes.len() * 8;
    }

    fn read_bytes(&mut self, count: usize) -> Result<&[u8], ProtocolError> {
        let byte_pos = self.read_bit_pos / 8;
        if byte_pos + count > self.buffer.len() {
            return Err(ProtocolError::Truncated {
                expected: count,
                remaining: self.buffer.len().saturating_sub(byte_pos),
            });
        }
        self.read_bit_pos += count * 8;
        Ok(&self.buffer[byte_pos..byte_pos + count])
    }

    pub fn write_bool(&mut self, value: bool) {
        let byte_index = self.write_bit_pos / 8;
        if byte_index >= self.buffer.len() {
            self.buffer.push(0);
        }
        let bit_offset = self.write_bit_pos % 8;
        if value {
            self.buffer[byte_index] |= 1 << bit_offset;
        }
        self.write_bit_pos += 1;
    }

    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        if self.read_bit_pos >= self.buffer.len() * 8 {
            return Err(ProtocolError::Truncated {
                expected: 1,
                remaining: 0,
            });
        }
        let byte_index = self.read_bit_pos / 8;
        let bit_offset = self.read_bit_pos % 8;
        let value = (self.buffer[byte_index] >> bit_offset) & 0x1 != 0;
        self.read_bit_pos += 1;
        Ok(value)
    }

    pub fn write_i8(&mut self, value: i8) {
        self.align_write();
        self.write_bytes(&value.to_le_bytes());
    }
    pub fn write_u8(&mut self, value: u8) {
        self.align_write();
        self.write_bytes(&value.to_le_bytes());
    }
    pub fn write_i16(&mut self, value: i16) {
        self.align_write();
        self.write_bytes(&value.to_le_bytes());
    }
    pub fn write_u16(&mut self, value: u16) {
        self.align_write();
        self.write_bytes(&value.to_le_bytes());
    }
    pub fn write_i32(&mut self, value: i32) {
        self.align_write();
        self.write_bytes(&value.to_le_bytes());
    }
    pub fn write_u32(&mut self, value: u32) {
        self.align_write();
        self.write_bytes(&value.to_le_bytes());
    }
    pub fn write_f32(&mut self, value: f32) {
        self.align_write();
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_string(&mut self, value: &str) {
        self.align_write();
        self.write_u32(value.len() as u32);
        self.write_bytes(value.as_bytes());
    }

    pub fn write_blob(&mut self, value: &[u8]) {
        self.align_write();
        self.write_u32(value.len() as u32);
        self.write_bytes(value);
    }

    pub fn read_i8(&mut self) -> Result<i8, ProtocolError> {
        self.align_read();
        Ok(i8::from_le_bytes(self.read_bytes(1)?.try_into().unwrap()))
    }
    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        self.align_read();
        Ok(u8::from_le_bytes(self.read_bytes(1)?.try_into().unwrap()))
    }
    pub fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        self.align_read();
        Ok(i16::from_le_bytes(self.read_bytes(2)?.try_into().unwrap()))
    }
    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        self.align_read();
        Ok(u16::from_le_bytes(self.read_bytes(2)?.try_into().unwrap()))
    }
    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        self.align_read();
        Ok(i32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }
    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        self.align_read();
        Ok(u32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }
    pub fn read_f32(&mut self) -> Result<f32, ProtocolError> {
        self.align_read();
        Ok(f32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        self.align_read();
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?.to_vec();
        String::from_utf8(bytes).map_err(|e| ProtocolError::MalformedPacket(e.to_string()))
    }

    pub fn read_blob(&mut self) -> Result<Vec<u8>, ProtocolError> {
        self.align_read();
        let len = self.read_u32()? as usize;
        Ok(self.read_bytes(len)?.to_vec())
    }

    /// Prepends the scripting-envelope opcode if the buffer does not already
    /// start with one, aligns to a byte boundary, and forwards to `dest` for
    /// a single peer.
    pub fn send(&mut self, dest: &dyn PacketDestination, player_id: u32, reliability: Reliability) {
        self.ensure_envelope();
        dest.send_to_player(player_id, &self.buffer, reliability);
    }

    /// As [`Self::send`] but fans out to every in-game peer.
    pub fn send_to_all(&mut self, dest: &dyn PacketDestination, reliability: Reliability) {
        self.ensure_envelope();
        dest.send_to_all(&self.buffer, reliability);
    }

    fn ensure_envelope(&mut self) {
        self.align_write();
        if self.buffer.first() != Some(&(Opcode::ScriptingEnvelope as u8)) {
            self.buffer.insert(0, Opcode::ScriptingEnvelope as u8);
            self.write_bit_pos += 8;
            self.read_bit_pos += 8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDestination {
        last_player: AtomicU32,
        sent: Mutex<Vec<Vec<u8>>>,
        broadcasts: Mutex<Vec<Vec<u8>>>,
    }

    impl PacketDestination for RecordingDestination {
        fn send_to_player(&self, player_id: u32, bytes: &[u8], _reliability: Reliability) {
            self.last_player.store(player_id, Ordering::SeqCst);
            self.sent.lock().unwrap().push(bytes.to_vec());
        }
        fn send_to_all(&self, bytes: &[u8], _reliability: Reliability) {
            self.broadcasts.lock().unwrap().push(bytes.to_vec());
        }
    }

    #[test]
    fn multibyte_writes_align_after_a_single_bit() {
        let mut p = Packet::new();
        p.write_bool(true);
        p.write_u16(0xABCD);
        assert_eq!(p.as_bytes(), &[0x01, 0xCD, 0xAB]);
    }

    #[test]
    fn string_roundtrip() {
        let mut p = Packet::new();
        p.write_string("hello");
        let mut reader = Packet::from_bytes(p.as_bytes().to_vec());
        assert_eq!(reader.read_string().unwrap(), "hello");
    }

    #[test]
    fn bool_bits_pack_into_one_byte() {
        let mut p = Packet::new();
        for i in 0..8 {
            p.write_bool(i % 2 == 0);
        }
        assert_eq!(p.as_bytes().len(), 1);
        let mut reader = Packet::from_bytes(p.as_bytes().to_vec());
        for i in 0..8 {
            assert_eq!(reader.read_bool().unwrap(), i % 2 == 0);
        }
    }

    #[test]
    fn send_prepends_envelope_opcode_once() {
        let mut p = Packet::new();
        p.write_u8(42);
        let dest = RecordingDestination::default();
        p.send(&dest, 7, Reliability::Reliable);
        let sent = dest.sent.lock().unwrap();
        assert_eq!(sent[0][0], Opcode::ScriptingEnvelope as u8);
        assert_eq!(sent[0][1], 42);

        // Sending again must not prepend a second envelope byte.
        drop(sent);
        p.send(&dest, 7, Reliability::Reliable);
        let sent = dest.sent.lock().unwrap();
        assert_eq!(sent[1].iter().filter(|&&b| b == Opcode::ScriptingEnvelope as u8).count(), 1);
    }

    #[test]
    fn send_to_all_reaches_the_broadcast_path() {
        let mut p = Packet::new();
        p.write_bool(true);
        let dest = RecordingDestination::default();
        p.send_to_all(&dest, Reliability::Unreliable);
        assert_eq!(dest.broadcasts.lock().unwrap().len(), 1);
    }

    #[test]
    fn read_past_end_is_an_error() {
        let mut p = Packet::from_bytes(vec![1]);
        assert!(p.read_u32().is_err());
    }
}

//! The boolean stream: a length-prefixed packed-bit array prepended to a
//! tight-marshalled frame, recording per-field nullness and
//! primitive-present flags. Bits are packed LSB-first within each byte,
//! in write order.

use crate::error::{CoreError, CoreResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

#[derive(Debug, Clone, Default)]
pub struct BooleanStreamWriter {
    bytes: Vec<u8>,
    current: u8,
    bit: u8,
}

impl BooleanStreamWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bool(&mut self, value: bool) {
        if value {
            self.current |= 1 << self.bit;
        }
        self.bit += 1;
        if self.bit == 8 {
            self.bytes.push(self.current);
            self.current = 0;
            self.bit = 0;
        }
    }

    /// Number of bytes the packed stream will occupy once [`finish`] is
    /// called; used by the codec's size pre-computation pass.
    pub fn byte_len(&self) -> usize {
        self.bytes.len() + usize::from(self.bit > 0)
    }

    fn finish(mut self) -> Vec<u8> {
        if self.bit > 0 {
            self.bytes.push(self.current);
        }
        self.bytes
    }

    /// Writes the u16 length prefix followed by the packed bytes.
    pub fn write_to(self, w: &mut dyn Write) -> CoreResult<()> {
        let bytes = self.finish();
        w.write_u16::<BigEndian>(bytes.len() as u16)?;
        w.write_all(&bytes)?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct BooleanStreamReader {
    bytes: Vec<u8>,
    byte_index: usize,
    bit: u8,
}

impl BooleanStreamReader {
    pub fn read_from(r: &mut dyn Read) -> CoreResult<Self> {
        let len = r.read_u16::<BigEndian>()? as usize;
        let mut bytes = vec![0_u8; len];
        r.read_exact(&mut bytes)?;
        Ok(BooleanStreamReader {
            bytes,
            byte_index: 0,
            bit: 0,
        })
    }

    pub fn read_bool(&mut self) -> CoreResult<bool> {
        let byte = *self.bytes.get(self.byte_index).ok_or_else(|| {
            CoreError::protocol("boolean stream exhausted before all fields were read")
        })?;
        let value = (byte >> self.bit) & 1 != 0;
        self.bit += 1;
        if self.bit == 8 {
            self.bit = 0;
            self.byte_index += 1;
        }
        Ok(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_arbitrary_bit_pattern() {
        let pattern = [
            true, false, true, true, false, false, false, true, true, true, false,
        ];
        let mut w = BooleanStreamWriter::new();
        for &b in &pattern {
            w.write_bool(b);
        }
        let mut buf = Vec::new();
        w.write_to(&mut buf).unwrap();

        let mut reader = BooleanStreamReader::read_from(&mut &buf[..]).unwrap();
        for &expected in &pattern {
            assert_eq!(reader.read_bool().unwrap(), expected);
        }
    }

    #[test]
    fn exhausted_stream_is_a_protocol_error() {
        let w = BooleanStreamWriter::new();
        let mut buf = Vec::new();
        w.write_to(&mut buf).unwrap();
        let mut reader = BooleanStreamReader::read_from(&mut &buf[..]).unwrap();
        assert!(reader.read_bool().is_err());
    }
}

//! The wire codec: frames a [`Command`] into bytes and back, under a
//! negotiated [`WireFormatInfo`]. Sits on top of [`boolean_stream`] (tight
//! mode's presence bitset) and [`wire`] (primitive encodings); the actual
//! per-command field layouts live in [`marshal`].

pub mod boolean_stream;
pub mod marshal;
pub mod wire;

use crate::codec::boolean_stream::{BooleanStreamReader, BooleanStreamWriter};
use crate::command::{Command, CommandType, WireFormatInfo};
use crate::error::{CoreError, CoreResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

/// Binds a [`WireFormatInfo`] to the marshal functions in [`marshal`].
/// Rebuilt (never mutated) whenever a new handshake renegotiates the
/// wire format; changing it mid-session without rebuilding is a logic
/// error in the caller, not something this type can prevent by itself.
#[derive(Debug, Clone)]
pub struct Codec {
    wire_format: WireFormatInfo,
}

impl Codec {
    pub fn new(wire_format: WireFormatInfo) -> Self {
        Codec { wire_format }
    }

    pub fn wire_format(&self) -> &WireFormatInfo {
        &self.wire_format
    }

    /// Encodes one command into a complete frame: optional size prefix,
    /// type byte, then tight or loose body.
    pub fn encode(&self, cmd: &Command) -> CoreResult<Vec<u8>> {
        let ctype = cmd.body.command_type();
        let mut body_and_header = Vec::new();
        body_and_header.write_u8(ctype as u8)?;

        if self.wire_format.tight_encoding_enabled {
            let mut bs = BooleanStreamWriter::new();
            let mut payload = Vec::new();
            // commandId/responseRequired ride in the boolean stream and
            // payload exactly like any other field, ahead of the body.
            bs.write_bool(cmd.response_required);
            crate::codec::marshal::encode_tight(
                &cmd.body,
                &mut bs,
                &mut payload,
                self.wire_format.version,
            )?;
            payload.write_u32::<BigEndian>(cmd.command_id)?;
            bs.write_to(&mut body_and_header)?;
            body_and_header.write_all(&payload)?;
        } else {
            body_and_header.write_u8(u8::from(cmd.response_required))?;
            crate::codec::marshal::encode_loose(&cmd.body, &mut body_and_header, self.wire_format.version)?;
            body_and_header.write_u32::<BigEndian>(cmd.command_id)?;
        }

        let mut framed = Vec::with_capacity(body_and_header.len() + 4);
        if !self.wire_format.size_prefix_disabled {
            framed.write_u32::<BigEndian>(body_and_header.len() as u32)?;
        }
        framed.write_all(&body_and_header)?;
        Ok(framed)
    }

    /// Decodes exactly one frame from `r`. When a size prefix is present
    /// the frame is buffered and decoding verifies every byte of it was
    /// consumed (testable property 7); without a prefix the format is
    /// self-delimiting and decoding reads directly off `r`.
    pub fn decode(&self, r: &mut dyn Read) -> CoreResult<Command> {
        if self.wire_format.size_prefix_disabled {
            self.decode_body(r)
        } else {
            let size = r.read_u32::<BigEndian>()? as usize;
            let mut buf = vec![0_u8; size];
            r.read_exact(&mut buf)?;
            let mut cursor = Cursor::new(&buf[..]);
            let cmd = self.decode_body(&mut cursor)?;
            if cursor.position() != size as u64 {
                return Err(CoreError::protocol(format!(
                    "frame declared {size} bytes but decoder consumed {}",
                    cursor.position()
                )));
            }
            Ok(cmd)
        }
    }

    /// Buffer-oriented decode for the async I/O pump: `Ok(None)` means
    /// `buf` does not yet hold a complete frame (the pump should read
    /// more bytes and retry); `Ok(Some((cmd, consumed)))` means `cmd` was
    /// decoded from the first `consumed` bytes of `buf`.
    pub fn try_decode_from_buffer(&self, buf: &[u8]) -> CoreResult<Option<(Command, usize)>> {
        if self.wire_format.size_prefix_disabled {
            let mut cursor = Cursor::new(buf);
            match self.decode_body(&mut cursor) {
                Ok(cmd) => Ok(Some((cmd, cursor.position() as usize))),
                Err(CoreError::Io { source }) if source.kind() == std::io::ErrorKind::UnexpectedEof => {
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        } else {
            if buf.len() < 4 {
                return Ok(None);
            }
            let size = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
            if buf.len() < 4 + size {
                return Ok(None);
            }
            let mut cursor = Cursor::new(&buf[4..4 + size]);
            let cmd = self.decode_body(&mut cursor)?;
            if cursor.position() != size as u64 {
                return Err(CoreError::protocol(format!(
                    "frame declared {size} bytes but decoder consumed {}",
                    cursor.position()
                )));
            }
            Ok(Some((cmd, 4 + size)))
        }
    }

    fn decode_body(&self, r: &mut dyn Read) -> CoreResult<Command> {
        let type_byte = r.read_u8()?;
        let ctype = CommandType::from_byte(type_byte)
            .ok_or_else(|| CoreError::protocol(format!("unknown command type byte {type_byte}")))?;

        if self.wire_format.tight_encoding_enabled {
            let mut bs = BooleanStreamReader::read_from(r)?;
            let response_required = bs.read_bool()?;
            let body = crate::codec::marshal::decode_tight(ctype, &mut bs, r, self.wire_format.version)?;
            let command_id = r.read_u32::<BigEndian>()?;
            Ok(Command {
                command_id,
                response_required,
                body,
            })
        } else {
            let response_required = r.read_u8()? != 0;
            let body = crate::codec::marshal::decode_loose(ctype, r, self.wire_format.version)?;
            let command_id = r.read_u32::<BigEndian>()?;
            Ok(Command {
                command_id,
                response_required,
                body,
            })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::command::{CommandBody, Message, MessageId, ProducerId};

    fn sample_message() -> Command {
        Command {
            command_id: 7,
            response_required: true,
            body: CommandBody::Message(Message {
                message_id: MessageId {
                    producer_id: ProducerId {
                        connection_id: crate::command::ConnectionId("C:1".into()),
                        session_value: 1,
                        value: 1,
                    },
                    producer_sequence: 42,
                },
                destination: "queue:Q".into(),
                body: vec![0xDE, 0xAD, 0xBE, 0xEF],
                priority: 4,
                persistent: true,
                redelivered: false,
            }),
        }
    }

    #[test]
    fn tight_round_trip() {
        let wf = WireFormatInfo {
            tight_encoding_enabled: true,
            ..WireFormatInfo::default()
        };
        let codec = Codec::new(wf);
        let cmd = sample_message();
        let bytes = codec.encode(&cmd).unwrap();
        let decoded = codec.decode(&mut &bytes[..]).unwrap();
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn loose_round_trip() {
        let wf = WireFormatInfo {
            tight_encoding_enabled: false,
            ..WireFormatInfo::default()
        };
        let codec = Codec::new(wf);
        let cmd = sample_message();
        let bytes = codec.encode(&cmd).unwrap();
        let decoded = codec.decode(&mut &bytes[..]).unwrap();
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn tight_encoding_is_no_larger_than_loose() {
        let cmd = sample_message();
        let tight = Codec::new(WireFormatInfo {
            tight_encoding_enabled: true,
            ..WireFormatInfo::default()
        })
        .encode(&cmd)
        .unwrap();
        let loose = Codec::new(WireFormatInfo {
            tight_encoding_enabled: false,
            ..WireFormatInfo::default()
        })
        .encode(&cmd)
        .unwrap();
        assert!(tight.len() <= loose.len());
    }

    #[test]
    fn unknown_type_byte_is_a_protocol_error() {
        let codec = Codec::new(WireFormatInfo::default());
        let mut framed = Vec::new();
        framed.write_u32::<BigEndian>(1).unwrap();
        framed.write_u8(250).unwrap();
        assert!(codec.decode(&mut &framed[..]).is_err());
    }

    #[test]
    fn try_decode_from_buffer_waits_for_a_complete_frame() {
        let codec = Codec::new(WireFormatInfo::default());
        let cmd = sample_message();
        let bytes = codec.encode(&cmd).unwrap();

        assert!(codec
            .try_decode_from_buffer(&bytes[..bytes.len() - 1])
            .unwrap()
            .is_none());

        let (decoded, consumed) = codec.try_decode_from_buffer(&bytes).unwrap().unwrap();
        assert_eq!(decoded, cmd);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn size_prefix_mismatch_is_rejected() {
        let codec = Codec::new(WireFormatInfo::default());
        let cmd = sample_message();
        let mut bytes = codec.encode(&cmd).unwrap();
        // Corrupt the size prefix to claim one byte more than is present.
        let claimed = (&bytes[0..4]).read_u32::<BigEndian>().unwrap() + 1;
        bytes[0..4].copy_from_slice(&claimed.to_be_bytes());
        bytes.push(0);
        assert!(codec.decode(&mut &bytes[..]).is_err());
    }
}

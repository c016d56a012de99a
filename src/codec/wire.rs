//! Primitive wire encoding: big-endian integers (via `byteorder`), length-
//! prefixed UTF-8 strings, and the ASCII↔modified-UTF-8 transform used for
//! payload-neutral interop.

use crate::error::{CoreError, CoreResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Type-tag byte written ahead of every nullable string: `0` is the null
/// sentinel, `1` selects the 16-bit length form, `2` the 32-bit form.
const STRING_NULL: u8 = 0;
const STRING_16: u8 = 1;
const STRING_32: u8 = 2;

pub fn write_string16(w: &mut dyn Write, s: &str) -> CoreResult<()> {
    if s.len() > u16::MAX as usize {
        return Err(CoreError::protocol(
            "string too long for a 16-bit length prefix",
        ));
    }
    w.write_u8(STRING_16)?;
    w.write_u16::<BigEndian>(s.len() as u16)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

pub fn write_string32(w: &mut dyn Write, s: &str) -> CoreResult<()> {
    if s.len() as u64 > u32::MAX as u64 {
        return Err(CoreError::protocol(
            "string longer than MAX_I32, cannot be framed",
        ));
    }
    w.write_u8(STRING_32)?;
    w.write_u32::<BigEndian>(s.len() as u32)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

/// Writes a nullable string, choosing the 16- or 32-bit length form based
/// on length, or the null sentinel for `None`.
pub fn write_nullable_string(w: &mut dyn Write, s: Option<&str>) -> CoreResult<()> {
    match s {
        None => {
            w.write_u8(STRING_NULL)?;
            Ok(())
        }
        Some(s) if s.len() <= u16::MAX as usize => write_string16(w, s),
        Some(s) => write_string32(w, s),
    }
}

pub fn read_nullable_string(r: &mut dyn Read) -> CoreResult<Option<String>> {
    match r.read_u8()? {
        STRING_NULL => Ok(None),
        STRING_16 => {
            let len = r.read_u16::<BigEndian>()? as usize;
            Ok(Some(read_utf8(r, len)?))
        }
        STRING_32 => {
            let len = r.read_u32::<BigEndian>()? as usize;
            Ok(Some(read_utf8(r, len)?))
        }
        other => Err(CoreError::protocol(format!(
            "unknown string type tag {other}"
        ))),
    }
}

pub fn read_required_string(r: &mut dyn Read) -> CoreResult<String> {
    read_nullable_string(r)?.ok_or_else(|| CoreError::protocol("expected non-null string"))
}

fn read_utf8(r: &mut dyn Read, len: usize) -> CoreResult<String> {
    let mut buf = vec![0_u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| CoreError::protocol("invalid UTF-8 in string field"))
}

/// Expands ASCII bytes above 127 into their two-byte UTF-8 representation
/// while leaving everything else, including an embedded NUL, untouched.
pub fn ascii_to_modified_utf8(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        if b <= 0x7F {
            out.push(b);
        } else {
            out.push(0xC0 | (b >> 6));
            out.push(0x80 | (b & 0x3F));
        }
    }
    out
}

/// Reverses [`ascii_to_modified_utf8`]. Any encoded code point above
/// `0xFF` cannot have come from that transform and is rejected with a
/// format error.
pub fn modified_utf8_to_ascii(bytes: &[u8]) -> CoreResult<Vec<u8>> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i];
        if b0 <= 0x7F {
            out.push(b0);
            i += 1;
        } else if (0xC0..=0xDF).contains(&b0) {
            let b1 = *bytes
                .get(i + 1)
                .ok_or_else(|| CoreError::protocol("truncated two-byte UTF-8 sequence"))?;
            if b1 & 0xC0 != 0x80 {
                return Err(CoreError::protocol("malformed UTF-8 continuation byte"));
            }
            let codepoint = (u32::from(b0 & 0x1F) << 6) | u32::from(b1 & 0x3F);
            if codepoint > 0xFF {
                return Err(CoreError::protocol(
                    "encoded code point above 0xFF cannot be represented in this ASCII transform",
                ));
            }
            out.push(codepoint as u8);
            i += 2;
        } else {
            return Err(CoreError::protocol(
                "byte sequence outside the supported ASCII/modified-UTF-8 range",
            ));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_nullable_string() {
        for s in [None, Some(""), Some("hello"), Some("p:1")] {
            let mut buf = Vec::new();
            write_nullable_string(&mut buf, s).unwrap();
            let decoded = read_nullable_string(&mut &buf[..]).unwrap();
            assert_eq!(decoded.as_deref(), s);
        }
    }

    #[test]
    fn ascii_transform_round_trips_and_preserves_nul() {
        let original: Vec<u8> = vec![0, 1, 65, 127, 128, 200, 255];
        let expanded = ascii_to_modified_utf8(&original);
        assert!(expanded.contains(&0u8));
        let restored = modified_utf8_to_ascii(&expanded).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn rejects_code_points_above_0xff() {
        // 0xE2 0x82 0xAC encodes U+20AC (the euro sign), a three-byte
        // sequence our two-byte-only transform never produces.
        let bogus = [0xE2, 0x82, 0xAC];
        assert!(modified_utf8_to_ascii(&bogus).is_err());
    }
}

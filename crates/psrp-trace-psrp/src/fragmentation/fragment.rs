use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::PsrpError;

/// Header size in bytes: `object_id(8) | fragment_id(8) | flags(1) | length(4)`.
pub const HEADER_LEN: usize = 21;

/// A single PSRP fragment, as carried inside a WinRM receive stream or a
/// `Microsoft-Windows-PowerShell` ETW fragment event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub object_id: i64,
    pub fragment_id: i64,
    pub start: bool,
    pub end: bool,
    pub data: Vec<u8>,
}

impl Fragment {
    pub fn new(object_id: i64, fragment_id: i64, start: bool, end: bool, data: Vec<u8>) -> Self {
        Self {
            object_id,
            fragment_id,
            start,
            end,
            data,
        }
    }

    /// Pack the fragment into its 21-byte-header wire form.
    pub fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(HEADER_LEN + self.data.len());
        buffer.write_i64::<BigEndian>(self.object_id).unwrap();
        buffer.write_i64::<BigEndian>(self.fragment_id).unwrap();
        let mut flags = 0u8;
        if self.start {
            flags |= 0x01;
        }
        if self.end {
            flags |= 0x02;
        }
        buffer.push(flags);
        buffer
            .write_u32::<BigEndian>(self.data.len() as u32)
            .unwrap();
        buffer.extend_from_slice(&self.data);
        buffer
    }

    /// Parse one fragment off the front of `data`, returning the fragment and
    /// the unconsumed remainder.
    pub fn unpack(data: &[u8]) -> Result<(Self, &[u8]), PsrpError> {
        if data.len() < HEADER_LEN {
            return Err(PsrpError::FragmentHeaderTruncated(data.len()));
        }

        let mut cursor = Cursor::new(data);
        let object_id = cursor.read_i64::<BigEndian>()?;
        let fragment_id = cursor.read_i64::<BigEndian>()?;
        let flags = cursor.read_u8()?;
        let start = flags & 0x01 != 0;
        let end = flags & 0x02 != 0;
        let length = cursor.read_u32::<BigEndian>()? as usize;

        let body_start = cursor.position() as usize;
        let body_end = body_start + length;
        if data.len() < body_end {
            return Err(PsrpError::FragmentPayloadTruncated {
                expected: length,
                got: data.len() - body_start,
            });
        }

        let fragment = Fragment::new(object_id, fragment_id, start, end, data[body_start..body_end].to_vec());
        Ok((fragment, &data[body_end..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_pack_unpack() {
        let fragment = Fragment::new(7, 0, true, false, vec![1, 2, 3]);
        let packed = fragment.pack();
        let (parsed, rest) = Fragment::unpack(&packed).unwrap();
        assert_eq!(parsed, fragment);
        assert!(rest.is_empty());
    }

    #[test]
    fn unpack_rejects_short_header() {
        let err = Fragment::unpack(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, PsrpError::FragmentHeaderTruncated(10)));
    }

    #[test]
    fn unpack_rejects_truncated_payload() {
        let fragment = Fragment::new(1, 0, true, true, vec![9, 9, 9]);
        let mut packed = fragment.pack();
        packed.truncate(packed.len() - 1);
        let err = Fragment::unpack(&packed).unwrap_err();
        assert!(matches!(err, PsrpError::FragmentPayloadTruncated { .. }));
    }

    #[test]
    fn unpack_leaves_trailing_fragments_for_caller() {
        let a = Fragment::new(1, 0, true, false, vec![1]);
        let b = Fragment::new(1, 1, false, true, vec![2]);
        let mut data = a.pack();
        data.extend_from_slice(&b.pack());

        let (first, rest) = Fragment::unpack(&data).unwrap();
        assert_eq!(first, a);
        let (second, rest) = Fragment::unpack(rest).unwrap();
        assert_eq!(second, b);
        assert!(rest.is_empty());
    }
}

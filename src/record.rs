//! Decoding of raw change-journal buffers.
//!
//! Every field read goes through an explicit bounds check against the byte
//! slice handed in; nothing here reinterprets memory in place.
//!
//! https://learn.microsoft.com/en-us/windows/win32/api/winioctl/ns-winioctl-usn_record_v2

use crate::{UsnResult, errors::UsnError, usn_entry::UsnEntry};
use byteorder::{ByteOrder, LittleEndian};

/// Size of the continuation cursor at the head of every native response buffer.
pub const CURSOR_SIZE: usize = size_of::<u64>();

/// Size of the fixed part of a `USN_RECORD_V2`, up to where `FileName` starts.
pub const RECORD_V2_HEADER_SIZE: usize = 60;

pub const RECORD_V2_MAJOR_VERSION: u16 = 2;

// USN_RECORD_V2 field offsets.
const RECORD_LENGTH: usize = 0;
const MAJOR_VERSION: usize = 4;
const MINOR_VERSION: usize = 6;
const FILE_REFERENCE_NUMBER: usize = 8;
const PARENT_FILE_REFERENCE_NUMBER: usize = 16;
const USN: usize = 24;
const TIME_STAMP: usize = 32;
const REASON: usize = 40;
const SOURCE_INFO: usize = 44;
const SECURITY_ID: usize = 48;
const FILE_ATTRIBUTES: usize = 52;
const FILE_NAME_LENGTH: usize = 56;
const FILE_NAME_OFFSET: usize = 58;

/// Size of the `FileNameLength` field that precedes the name in `FILE_NAME_INFO`.
pub const NAME_INFO_HEADER_SIZE: usize = size_of::<u32>();

fn field(buffer: &[u8], at: usize, len: usize) -> UsnResult<&[u8]> {
    at.checked_add(len)
        .and_then(|end| buffer.get(at..end))
        .ok_or(UsnError::MalformedRecord {
            offset: at,
            reason: "field extends past the end of the buffer",
        })
}

fn read_u16(buffer: &[u8], at: usize) -> UsnResult<u16> {
    field(buffer, at, 2).map(LittleEndian::read_u16)
}

fn read_u32(buffer: &[u8], at: usize) -> UsnResult<u32> {
    field(buffer, at, 4).map(LittleEndian::read_u32)
}

fn read_u64(buffer: &[u8], at: usize) -> UsnResult<u64> {
    field(buffer, at, 8).map(LittleEndian::read_u64)
}

fn read_i64(buffer: &[u8], at: usize) -> UsnResult<i64> {
    field(buffer, at, 8).map(LittleEndian::read_i64)
}

fn utf16_to_string(bytes: &[u8]) -> String {
    let units = bytes.chunks_exact(2).map(LittleEndian::read_u16);
    char::decode_utf16(units)
        .map(|unit| unit.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Reads the continuation cursor from the head of a response buffer.
///
/// `bytes_read` is the count reported by the native call; a response shorter
/// than the cursor itself is malformed.
pub fn read_cursor(buffer: &[u8], bytes_read: usize) -> UsnResult<u64> {
    if bytes_read < CURSOR_SIZE || bytes_read > buffer.len() {
        return Err(UsnError::MalformedRecord {
            offset: 0,
            reason: "response is too short to hold a continuation cursor",
        });
    }
    read_u64(buffer, 0)
}

/// Decodes the V2 record that starts at `offset`.
///
/// Returns the entry together with the record's own `RecordLength`, which is
/// the only distance a caller may use to reach the next record.
pub fn decode_record(buffer: &[u8], offset: usize) -> UsnResult<(UsnEntry, usize)> {
    let header = field(buffer, offset, RECORD_V2_HEADER_SIZE).map_err(|_| {
        UsnError::MalformedRecord {
            offset,
            reason: "buffer is too short for a record header",
        }
    })?;

    let major = read_u16(header, MAJOR_VERSION)?;
    let minor = read_u16(header, MINOR_VERSION)?;
    if major != RECORD_V2_MAJOR_VERSION {
        return Err(UsnError::UnsupportedRecordVersion { major, minor });
    }

    let record_length = read_u32(header, RECORD_LENGTH)? as usize;
    if record_length < RECORD_V2_HEADER_SIZE {
        return Err(UsnError::MalformedRecord {
            offset,
            reason: "record length is smaller than the record header",
        });
    }
    let record = field(buffer, offset, record_length).map_err(|_| UsnError::MalformedRecord {
        offset,
        reason: "record length runs past the end of the buffer",
    })?;

    // Do not count on a trailing '\0' and do not assume FileName sits right
    // after the fixed header; FileNameLength and FileNameOffset are authoritative.
    let name_length = read_u16(record, FILE_NAME_LENGTH)? as usize;
    let name_offset = read_u16(record, FILE_NAME_OFFSET)? as usize;
    if name_length % 2 != 0 {
        return Err(UsnError::MalformedRecord {
            offset,
            reason: "file name length is not a whole number of UTF-16 units",
        });
    }
    if name_length > 0 && name_offset < RECORD_V2_HEADER_SIZE {
        return Err(UsnError::MalformedRecord {
            offset,
            reason: "file name overlaps the record header",
        });
    }
    let name_bytes =
        field(record, name_offset, name_length).map_err(|_| UsnError::MalformedRecord {
            offset,
            reason: "file name runs past the end of the record",
        })?;

    let entry = UsnEntry {
        record_length: record_length as u32,
        usn: read_i64(record, USN)?,
        timestamp: read_i64(record, TIME_STAMP)?,
        fid: read_u64(record, FILE_REFERENCE_NUMBER)?,
        parent_fid: read_u64(record, PARENT_FILE_REFERENCE_NUMBER)?,
        reason: read_u32(record, REASON)?,
        source_info: read_u32(record, SOURCE_INFO)?,
        security_id: read_u32(record, SECURITY_ID)?,
        file_attributes: read_u32(record, FILE_ATTRIBUTES)?,
        file_name: utf16_to_string(name_bytes),
    };

    Ok((entry, record_length))
}

/// Outcome of decoding a `FILE_NAME_INFO` buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameInfo {
    /// The complete name, relative to the volume root.
    Name(String),
    /// The name did not fit; holds the buffer size the name needs.
    Truncated { required: usize },
}

/// Decodes a `FILE_NAME_INFO` buffer: `{FileNameLength: u32}[FileName: UTF-16]`.
pub fn decode_name_info(buffer: &[u8]) -> UsnResult<NameInfo> {
    let name_length = read_u32(buffer, 0)? as usize;
    if name_length % 2 != 0 {
        return Err(UsnError::MalformedRecord {
            offset: 0,
            reason: "name length is not a whole number of UTF-16 units",
        });
    }

    match buffer.get(NAME_INFO_HEADER_SIZE..NAME_INFO_HEADER_SIZE + name_length) {
        Some(name) => Ok(NameInfo::Name(utf16_to_string(name))),
        None => Ok(NameInfo::Truncated {
            required: NAME_INFO_HEADER_SIZE + name_length,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{RecordSpec, encode_record, page};

    fn specs() -> Vec<RecordSpec> {
        vec![
            RecordSpec::file(0x0001_0000_0000_0010, 0x0005_0000_0000_0005, "a.txt").usn(100),
            RecordSpec::dir(0x0002_0000_0000_0011, 0x0005_0000_0000_0005, "").usn(101),
            RecordSpec::file(0x0003_0000_0000_0012, 0x0002_0000_0000_0011, "b").usn(102),
            // FileNameLength is a u16 byte count: 32767 UTF-16 units at most.
            RecordSpec::file(
                0x0004_0000_0000_0013,
                0x0002_0000_0000_0011,
                &"x".repeat(u16::MAX as usize / 2),
            )
            .usn(103),
            RecordSpec::file(0x0005_0000_0000_0014, 0x0002_0000_0000_0011, "日本語.doc").usn(104),
        ]
    }

    #[test]
    fn decodes_every_record_and_walks_record_lengths() {
        let specs = specs();
        let buffer = page(42, &specs);

        let mut offset = CURSOR_SIZE;
        let mut decoded = Vec::new();
        while offset < buffer.len() {
            let (entry, record_length) = decode_record(&buffer, offset).unwrap();
            assert_eq!(record_length, entry.record_length as usize);
            offset += record_length;
            decoded.push(entry);
        }

        assert_eq!(offset, buffer.len(), "records must tile the buffer exactly");
        assert_eq!(decoded.len(), specs.len());
        for (entry, spec) in decoded.iter().zip(&specs) {
            assert_eq!(entry.usn, spec.usn);
            assert_eq!(entry.fid, spec.fid);
            assert_eq!(entry.parent_fid, spec.parent_fid);
            assert_eq!(entry.reason, spec.reason);
            assert_eq!(entry.source_info, spec.source_info);
            assert_eq!(entry.security_id, spec.security_id);
            assert_eq!(entry.file_attributes, spec.attributes);
            assert_eq!(entry.timestamp, spec.timestamp);
            assert_eq!(entry.file_name, spec.name);
        }
    }

    #[test]
    fn name_is_located_by_name_offset() {
        // A future minor version may place extra fields between the header and the name.
        let spec = RecordSpec::file(7, 5, "moved.bin").name_gap(16);
        let bytes = encode_record(&spec);

        let (entry, record_length) = decode_record(&bytes, 0).unwrap();
        assert_eq!(entry.file_name, "moved.bin");
        assert_eq!(record_length, bytes.len());
    }

    #[test]
    fn rejects_other_major_versions() {
        let bytes = encode_record(&RecordSpec::file(7, 5, "v3").major_version(3));
        match decode_record(&bytes, 0) {
            Err(UsnError::UnsupportedRecordVersion { major: 3, .. }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn rejects_short_or_inconsistent_records() {
        let bytes = encode_record(&RecordSpec::file(7, 5, "name.txt"));

        assert!(matches!(
            decode_record(&bytes[..RECORD_V2_HEADER_SIZE - 1], 0),
            Err(UsnError::MalformedRecord { .. })
        ));
        assert!(matches!(
            decode_record(&bytes[..bytes.len() - 8], 0),
            Err(UsnError::MalformedRecord { .. })
        ));

        let mut zero_length = bytes.clone();
        zero_length[..4].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            decode_record(&zero_length, 0),
            Err(UsnError::MalformedRecord { .. })
        ));

        let mut long_name = bytes;
        long_name[56..58].copy_from_slice(&u16::MAX.to_le_bytes());
        assert!(matches!(
            decode_record(&long_name, 0),
            Err(UsnError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn cursor_requires_eight_bytes() {
        let buffer = page(0x1234, &[]);
        assert_eq!(read_cursor(&buffer, buffer.len()).unwrap(), 0x1234);
        assert!(read_cursor(&buffer, 4).is_err());
    }

    #[test]
    fn name_info_reports_truncation() {
        let name: Vec<u8> = "\\dir\\file.txt"
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect();
        let mut buffer = (name.len() as u32).to_le_bytes().to_vec();
        buffer.extend_from_slice(&name);

        assert_eq!(
            decode_name_info(&buffer).unwrap(),
            NameInfo::Name("\\dir\\file.txt".to_string())
        );
        assert_eq!(
            decode_name_info(&buffer[..10]).unwrap(),
            NameInfo::Truncated {
                required: buffer.len()
            }
        );
    }
}

use chrono::{DateTime, Utc};
use std::time::SystemTime;

use crate::{
    Usn,
    flags::{
        self, FILE_ATTRIBUTE_DIRECTORY, FILE_ATTRIBUTE_HIDDEN, USN_REASON_FILE_DELETE,
    },
    time,
};

const FILE_REF_INDEX_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// Returns the MFT table index held in the low 48 bits of a file reference number.
pub fn file_ref_index(file_ref: u64) -> u64 {
    file_ref & FILE_REF_INDEX_MASK
}

/// Returns the reuse-sequence guard held in the high 16 bits of a file reference number.
pub fn file_ref_sequence(file_ref: u64) -> u16 {
    (file_ref >> 48) as u16
}

/// A decoded change-journal or MFT record.
///
/// Entries are value snapshots: the name is copied out of the native buffer
/// while decoding, so an entry never refers back to the page it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsnEntry {
    /// Total byte span of the serialized record, padding included.
    pub record_length: u32,
    /// Journal position. Only meaningful for entries read from the journal.
    pub usn: Usn,
    /// Raw FILETIME ticks (100 ns since 1601-01-01 UTC), see [`UsnEntry::time`].
    pub timestamp: i64,
    pub fid: u64,
    pub parent_fid: u64,
    pub reason: u32,
    pub source_info: u32,
    pub security_id: u32,
    pub file_attributes: u32,
    pub file_name: String,
}

impl UsnEntry {
    /// Returns true if this entry represents a directory.
    pub fn is_dir(&self) -> bool {
        self.file_attributes & FILE_ATTRIBUTE_DIRECTORY != 0
    }

    /// Returns true if this entry represents a hidden file or directory.
    pub fn is_hidden(&self) -> bool {
        self.file_attributes & FILE_ATTRIBUTE_HIDDEN != 0
    }

    pub fn is_delete(&self) -> bool {
        self.reason & USN_REASON_FILE_DELETE != 0
    }

    pub fn time(&self) -> SystemTime {
        time::filetime_to_systemtime(self.timestamp)
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        time::filetime_to_datetime(self.timestamp)
    }

    /// Converts the reason bitfield to a human-readable string.
    pub fn reason_to_string(&self) -> String {
        flags::reason_to_string(self.reason)
    }

    pub fn source_info_to_string(&self) -> String {
        flags::source_info_to_string(self.source_info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{USN_REASON_CLOSE, USN_REASON_RENAME_NEW_NAME};
    use crate::tests::RecordSpec;

    #[test]
    fn file_ref_splits_into_index_and_sequence() {
        let file_ref = 0x0007_0000_0001_2345;
        assert_eq!(file_ref_index(file_ref), 0x1_2345);
        assert_eq!(file_ref_sequence(file_ref), 7);
    }

    #[test]
    fn attribute_and_reason_helpers() {
        let entry = RecordSpec::dir(10, 5, "docs")
            .attributes(FILE_ATTRIBUTE_DIRECTORY | FILE_ATTRIBUTE_HIDDEN)
            .reason(USN_REASON_RENAME_NEW_NAME | USN_REASON_CLOSE)
            .entry();

        assert!(entry.is_dir());
        assert!(entry.is_hidden());
        assert!(!entry.is_delete());
        assert_eq!(entry.reason_to_string(), "RENAME_NEW_NAME | CLOSE");

        let file = RecordSpec::file(11, 5, "a.txt").entry();
        assert!(!file.is_dir());
        assert!(!file.is_hidden());
    }
}

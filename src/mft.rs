//! Enumeration of the Master File Table (MFT) through `FSCTL_ENUM_USN_DATA`.
//!
//! Table mode yields one synthesized record per file system object, in file
//! reference order. The cursor of every page is the next start file reference.

use crate::{
    DEFAULT_BUFFER_SIZE, Usn, UsnResult,
    enumerator::{RecordSource, UsnEnumerator},
    native::{EnumTableRequest, VolumeIo},
};

/// Options for enumerating the Master File Table (MFT).
///
/// Allows customization of the USN range and buffer size for enumeration.
#[derive(Debug, Clone)]
pub struct MftEnumOptions {
    pub low_usn: Usn,
    /// Also the end bound of the scan: a continuation cursor at or beyond it
    /// stops enumeration.
    ///
    /// The cursor is a file reference number, not a USN. A bound taken from a
    /// young journal's `next_usn` can be smaller than the file references of a
    /// populated volume and end the scan early; keep the default `i64::MAX`
    /// for a full sweep.
    pub high_usn: Usn,
    pub buffer_size: usize,
}

impl Default for MftEnumOptions {
    fn default() -> Self {
        MftEnumOptions {
            low_usn: 0,
            high_usn: i64::MAX,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Table-mode fetch strategy.
pub struct TableSource<'v, V: VolumeIo> {
    volume: &'v V,
    low_usn: Usn,
    high_usn: Usn,
}

impl<V: VolumeIo> RecordSource for TableSource<'_, V> {
    fn fetch(&mut self, cursor: u64, buffer: &mut [u8]) -> UsnResult<Option<usize>> {
        // On the first call, the starting point StartFileReferenceNumber is 0.
        let request = EnumTableRequest {
            start_file_ref: cursor,
            low_usn: self.low_usn,
            high_usn: self.high_usn,
        };
        self.volume.enum_table(&request, buffer)
    }

    fn is_terminal_cursor(&self, cursor: u64) -> bool {
        i64::try_from(cursor).map_or(true, |cursor| cursor >= self.high_usn)
    }
}

/// Iterator over MFT entries.
pub type MftIter<'v, 'f, V> = UsnEnumerator<'f, TableSource<'v, V>>;

/// The Master File Table of one open volume.
#[derive(Debug)]
pub struct Mft<'v, V: VolumeIo> {
    volume: &'v V,
}

impl<'v, V: VolumeIo> Mft<'v, V> {
    pub fn new(volume: &'v V) -> Self {
        Mft { volume }
    }

    /// Returns an iterator over every record of the table.
    pub fn iter(&self) -> MftIter<'v, 'static, V> {
        self.iter_with_options(MftEnumOptions::default())
    }

    pub fn iter_with_options<'f>(&self, options: MftEnumOptions) -> MftIter<'v, 'f, V> {
        let source = TableSource {
            volume: self.volume,
            low_usn: options.low_usn,
            high_usn: options.high_usn,
        };
        UsnEnumerator::new(source, 0, options.buffer_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        enumerator::EnumState,
        tests::{FakeVolume, RecordSpec, page},
    };

    #[test]
    fn walks_pages_by_next_file_reference() -> UsnResult<()> {
        let volume = FakeVolume::new("C:\\")
            .with_table_page(page(
                0x40,
                &[
                    RecordSpec::dir(0x20, 5, "Windows"),
                    RecordSpec::file(0x21, 0x20, "notepad.exe"),
                ],
            ))
            .with_table_page(page(0x80, &[RecordSpec::file(0x41, 5, "pagefile.sys")]));

        let mft = Mft::new(&volume);
        let names: Vec<String> = mft
            .iter()
            .map(|entry| entry.map(|entry| entry.file_name))
            .collect::<UsnResult<_>>()?;

        assert_eq!(names, vec!["Windows", "notepad.exe", "pagefile.sys"]);
        let starts: Vec<u64> = volume
            .table_requests()
            .iter()
            .map(|r| r.start_file_ref)
            .collect();
        assert_eq!(starts, vec![0, 0x40, 0x80]);
        Ok(())
    }

    #[test]
    fn request_carries_usn_range() {
        let volume = FakeVolume::new("C:\\");
        let mft = Mft::new(&volume);
        let mut iter = mft.iter_with_options(MftEnumOptions {
            low_usn: 10,
            high_usn: 5000,
            buffer_size: 4096,
        });
        assert!(iter.next().is_none());

        assert_eq!(
            volume.table_requests(),
            vec![EnumTableRequest {
                start_file_ref: 0,
                low_usn: 10,
                high_usn: 5000,
            }]
        );
    }

    #[test]
    fn cursor_at_high_usn_ends_the_scan() -> UsnResult<()> {
        // Under churn the table keeps producing pages; the bound stops it.
        let volume = FakeVolume::new("C:\\")
            .with_table_page(page(0x30, &[RecordSpec::file(0x10, 5, "a")]))
            .with_table_page(page(0x60, &[RecordSpec::file(0x31, 5, "b")]))
            .with_table_page(page(0x90, &[RecordSpec::file(0x61, 5, "c")]));

        let mft = Mft::new(&volume);
        let mut iter = mft.iter_with_options(MftEnumOptions {
            high_usn: 0x60,
            ..Default::default()
        });
        let count = iter.by_ref().collect::<UsnResult<Vec<_>>>()?.len();

        assert_eq!(count, 2);
        assert_eq!(iter.state(), EnumState::Exhausted);
        assert_eq!(volume.table_requests().len(), 2);
        Ok(())
    }

    #[test]
    fn failure_mid_scan_is_reported() {
        let volume = FakeVolume::new("C:\\")
            .with_table_page(page(0x30, &[RecordSpec::file(0x10, 5, "a")]))
            .with_table_failure(0x8007_0015_u32 as i32);

        let mft = Mft::new(&volume);
        let results: Vec<_> = mft.iter().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert_eq!(
            results[1].as_ref().unwrap_err().native_code(),
            Some(0x8007_0015_u32 as i32)
        );
    }
}

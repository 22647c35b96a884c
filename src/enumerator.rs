//! The buffer-paging engine shared by journal reads and MFT scans.
//!
//! Both native sources answer a fetch with `[next cursor: 8 bytes][record]*`.
//! [`UsnEnumerator`] owns one fixed-size buffer, walks the records of a page
//! by their `RecordLength`, and hands the cursor read from the page header
//! back verbatim as the start point of the next fetch.

use log::{debug, warn};

use crate::{
    UsnResult,
    errors::UsnError,
    record::{self, CURSOR_SIZE},
    usn_entry::UsnEntry,
};

/// A native data source that fills a buffer with one page of records.
pub trait RecordSource {
    /// Fetches the page starting at `cursor` into `buffer`.
    ///
    /// Returns `Ok(Some(bytes_read))` on success and `Ok(None)` once the
    /// source reports end-of-data.
    fn fetch(&mut self, cursor: u64, buffer: &mut [u8]) -> UsnResult<Option<usize>>;

    /// Whether a cursor read from a page header means there is nothing left
    /// to fetch. Checked after the page it came with has been drained.
    fn is_terminal_cursor(&self, _cursor: u64) -> bool {
        false
    }

    /// Whether enumeration must stop before yielding `entry`.
    fn is_past_end(&self, _entry: &UsnEntry) -> bool {
        false
    }

    /// Whether a fetch may block until new data exists. A non-blocking source
    /// that returns an empty page without moving the cursor is drained.
    fn waits_for_data(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumState {
    /// No record is materialized, or the current page is used up.
    NeedFetch,
    /// The record pointer is on a valid record inside the buffer.
    HasRecord,
    /// Terminal: end-of-data, a stop condition, cancellation or an error.
    Exhausted,
}

type IncludePredicate<'f> = Box<dyn FnMut(&UsnEntry) -> bool + 'f>;

/// Iterates the records of a [`RecordSource`], one page at a time.
///
/// Yields `Err` at most once: any failure moves the enumerator to
/// [`EnumState::Exhausted`] before it is returned.
pub struct UsnEnumerator<'f, S: RecordSource> {
    source: S,
    buffer: Vec<u8>,
    bytes_read: usize,
    offset: usize,
    record_length: usize,
    cursor: u64,
    fetched: bool,
    state: EnumState,
    should_include: Option<IncludePredicate<'f>>,
}

impl<'f, S: RecordSource> UsnEnumerator<'f, S> {
    /// Creates an enumerator that starts fetching at `start_cursor`.
    pub fn new(source: S, start_cursor: u64, buffer_size: usize) -> Self {
        UsnEnumerator {
            source,
            buffer: vec![0u8; buffer_size.max(CURSOR_SIZE)],
            bytes_read: 0,
            offset: 0,
            record_length: 0,
            cursor: start_cursor,
            fetched: false,
            state: EnumState::NeedFetch,
            should_include: None,
        }
    }

    /// Only yield entries accepted by `predicate`.
    ///
    /// Rejected entries still count for the source's stop conditions.
    pub fn with_filter<F>(mut self, predicate: F) -> Self
    where
        F: FnMut(&UsnEntry) -> bool + 'f,
    {
        self.should_include = Some(Box::new(predicate));
        self
    }

    pub fn state(&self) -> EnumState {
        self.state
    }

    /// The start point the next fetch will use.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn fail(&mut self, err: UsnError) -> UsnResult<Option<UsnEntry>> {
        self.state = EnumState::Exhausted;
        Err(err)
    }

    fn finish(&mut self) -> UsnResult<Option<UsnEntry>> {
        self.state = EnumState::Exhausted;
        Ok(None)
    }

    /// Decodes the record at `offset` and makes it the current record.
    fn decode_at(&mut self, offset: usize) -> UsnResult<UsnEntry> {
        let page = self.buffer.get(..self.bytes_read).unwrap_or_default();
        let (entry, record_length) = record::decode_record(page, offset)?;
        self.offset = offset;
        self.record_length = record_length;
        self.state = EnumState::HasRecord;
        Ok(entry)
    }

    /// Performs one native fetch and positions on the first record of the page.
    ///
    /// Returns `Ok(None)` when the page was empty and the enumerator is back in
    /// [`EnumState::NeedFetch`] (or finished, if the source is drained).
    fn fetch_page(&mut self) -> UsnResult<Option<UsnEntry>> {
        if self.fetched && self.source.is_terminal_cursor(self.cursor) {
            debug!("Cursor {:#x} reached the end bound", self.cursor);
            self.state = EnumState::Exhausted;
            return Ok(None);
        }

        let previous_cursor = self.cursor;
        let bytes_read = match self.source.fetch(self.cursor, &mut self.buffer) {
            Ok(Some(bytes_read)) => bytes_read,
            Ok(None) => {
                debug!("End of data at cursor {:#x}", self.cursor);
                self.state = EnumState::Exhausted;
                return Ok(None);
            }
            Err(UsnError::Cancelled) => {
                debug!("Fetch cancelled at cursor {:#x}", self.cursor);
                self.state = EnumState::Exhausted;
                return Ok(None);
            }
            Err(err) => {
                warn!("Error fetching records at cursor {:#x}: {}", self.cursor, err);
                self.state = EnumState::Exhausted;
                return Err(err);
            }
        };

        // https://learn.microsoft.com/en-us/windows/win32/fileio/walking-a-buffer-of-change-journal-records
        // The first item in the output buffer is where the next call has to start.
        self.cursor = match record::read_cursor(&self.buffer, bytes_read) {
            Ok(cursor) => cursor,
            Err(err) => {
                self.state = EnumState::Exhausted;
                return Err(err);
            }
        };
        self.bytes_read = bytes_read;
        self.fetched = true;
        debug!(
            "Fetched {} bytes, next cursor {:#x}",
            bytes_read, self.cursor
        );

        if bytes_read > CURSOR_SIZE {
            return self.decode_at(CURSOR_SIZE).map(Some);
        }

        self.state = EnumState::NeedFetch;
        if self.cursor == previous_cursor && !self.source.waits_for_data() {
            debug!("Empty page without progress, source is drained");
            self.state = EnumState::Exhausted;
        }
        Ok(None)
    }

    /// Moves to the next record, fetching pages as needed.
    ///
    /// Returns `Ok(None)` once enumeration is over.
    pub fn advance(&mut self) -> UsnResult<Option<UsnEntry>> {
        loop {
            let next = match self.state {
                EnumState::Exhausted => return Ok(None),
                EnumState::HasRecord => {
                    let next_offset = self.offset + self.record_length;
                    if next_offset < self.bytes_read {
                        self.decode_at(next_offset).map(Some)
                    } else {
                        self.state = EnumState::NeedFetch;
                        continue;
                    }
                }
                EnumState::NeedFetch => self.fetch_page(),
            };

            let entry = match next {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(err) => return self.fail(err),
            };

            if self.source.is_past_end(&entry) {
                debug!("Entry usn={} is past the end bound", entry.usn);
                return self.finish();
            }

            let include = match self.should_include.as_mut() {
                Some(should_include) => should_include(&entry),
                None => true,
            };
            if include {
                return Ok(Some(entry));
            }
        }
    }
}

impl<S: RecordSource> Iterator for UsnEnumerator<'_, S> {
    type Item = UsnResult<UsnEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance().transpose()
    }
}

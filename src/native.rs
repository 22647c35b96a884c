//! The native control-code contracts the journal and MFT readers are built on.
//!
//! [`VolumeIo`] is implemented over `DeviceIoControl` by
//! [`Volume`](crate::volume::Volume) on Windows. Everything above this trait
//! is plain safe Rust and only sees byte buffers.

use std::path::Path;

use crate::{Usn, UsnResult, journal::JournalInfo};

/// Input of `FSCTL_READ_USN_JOURNAL` (`READ_USN_JOURNAL_DATA_V0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadJournalRequest {
    pub start_usn: Usn,
    pub reason_mask: u32,
    pub return_only_on_close: bool,
    pub timeout: u64,
    /// `0` returns immediately with whatever is available, `1` blocks until
    /// new records exist.
    pub bytes_to_wait_for: u64,
    pub journal_id: u64,
}

/// Input of `FSCTL_ENUM_USN_DATA` (`MFT_ENUM_DATA_V0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumTableRequest {
    pub start_file_ref: u64,
    pub low_usn: Usn,
    pub high_usn: Usn,
}

/// Result of querying a file's name into a caller-supplied buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameQuery {
    /// The buffer holds a complete `FILE_NAME_INFO`.
    Complete,
    /// The name did not fit. The buffer header may carry the required length.
    BufferTooSmall,
}

/// One open volume, seen through the control codes the core depends on.
///
/// Page reads return `Ok(Some(bytes_read))` on success and `Ok(None)` when the
/// native call reports end-of-data (`ERROR_HANDLE_EOF`). Every other failure
/// is an error.
pub trait VolumeIo {
    /// The path prefix resolved names are joined onto, e.g. `C:\`.
    fn display_name(&self) -> &Path;

    fn query_journal(&self) -> UsnResult<JournalInfo>;

    /// Creates the journal, or adjusts the size policy of an active one.
    fn create_journal(&self, max_size: u64, allocation_delta: u64) -> UsnResult<()>;

    fn delete_journal(&self, journal_id: u64) -> UsnResult<()>;

    fn read_journal(&self, request: &ReadJournalRequest, buffer: &mut [u8])
    -> UsnResult<Option<usize>>;

    fn enum_table(&self, request: &EnumTableRequest, buffer: &mut [u8]) -> UsnResult<Option<usize>>;

    /// Opens the file by its reference number (attribute access only) and
    /// writes its volume-relative `FILE_NAME_INFO` into `buffer`.
    fn query_file_name(&self, file_ref: u64, buffer: &mut [u8]) -> UsnResult<NameQuery>;
}

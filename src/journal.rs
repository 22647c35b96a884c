//! Provides access to the NTFS/ReFS USN change journal.
//!
//! This module enables querying, creating, deleting, and iterating over the USN change journal.
//! [`UsnJournal`] tracks the identity of the journal it last observed so that a
//! recreated journal is reported instead of silently read with stale cursors.

use log::{debug, warn};

use crate::{
    DEFAULT_BUFFER_SIZE, DEFAULT_JOURNAL_ALLOCATION_DELTA, DEFAULT_JOURNAL_MAX_SIZE,
    USN_REASON_MASK_ALL, Usn, UsnResult,
    enumerator::{RecordSource, UsnEnumerator},
    errors::UsnError,
    native::{ReadJournalRequest, VolumeIo},
    usn_entry::UsnEntry,
};

/// Identity and bounds of the current change journal (`USN_JOURNAL_DATA_V0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JournalInfo {
    pub journal_id: u64,
    pub first_usn: Usn,
    pub next_usn: Usn,
    pub lowest_valid_usn: Usn,
    pub max_usn: Usn,
    pub maximum_size: u64,
    pub allocation_delta: u64,
}

impl JournalInfo {
    /// Whether cursors observed under `previous` are still valid against `self`.
    ///
    /// False when the journal was recreated (different id) or when `next_usn`
    /// went backwards, which no healthy journal does.
    pub fn is_continuation_of(&self, previous: &JournalInfo) -> bool {
        previous.journal_id == self.journal_id && previous.next_usn <= self.next_usn
    }
}

/// Lifecycle of the journal as observed by one [`UsnJournal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalState {
    Uninitialized,
    NotActive,
    Active(JournalInfo),
    /// The journal id changed under an active session. Terminal.
    Invalidated,
}

#[derive(Debug, Clone)]
/// Options for enumerating the USN journal.
///
/// Allows customization of the starting USN, reason mask, buffer size, and other parameters.
pub struct EnumOptions {
    pub start_usn: Usn,
    pub reason_mask: u32,
    pub only_on_close: bool,
    pub timeout: u64,
    /// Block until new records exist instead of returning at the tail.
    pub wait_for_more: bool,
    pub buffer_size: usize,
    /// Stop before the first entry (or cursor) at or beyond this USN.
    pub stop_at_usn: Option<Usn>,
}

impl Default for EnumOptions {
    fn default() -> Self {
        EnumOptions {
            start_usn: 0,
            reason_mask: USN_REASON_MASK_ALL,
            only_on_close: false,
            timeout: 0,
            wait_for_more: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            stop_at_usn: None,
        }
    }
}

/// Journal-mode fetch strategy: `FSCTL_READ_USN_JOURNAL`, cursor = next USN.
pub struct JournalSource<'v, V: VolumeIo> {
    volume: &'v V,
    journal_id: u64,
    reason_mask: u32,
    return_only_on_close: bool,
    timeout: u64,
    bytes_to_wait_for: u64,
    stop_at_usn: Option<Usn>,
}

impl<V: VolumeIo> RecordSource for JournalSource<'_, V> {
    fn fetch(&mut self, cursor: u64, buffer: &mut [u8]) -> UsnResult<Option<usize>> {
        let request = ReadJournalRequest {
            start_usn: cursor as Usn,
            reason_mask: self.reason_mask,
            return_only_on_close: self.return_only_on_close,
            timeout: self.timeout,
            bytes_to_wait_for: self.bytes_to_wait_for,
            journal_id: self.journal_id,
        };
        self.volume.read_journal(&request, buffer)
    }

    fn is_terminal_cursor(&self, cursor: u64) -> bool {
        self.stop_at_usn
            .is_some_and(|stop_at| cursor as Usn >= stop_at)
    }

    fn is_past_end(&self, entry: &UsnEntry) -> bool {
        self.stop_at_usn.is_some_and(|stop_at| entry.usn >= stop_at)
    }

    fn waits_for_data(&self) -> bool {
        self.bytes_to_wait_for > 0
    }
}

/// Iterator over journal entries.
pub type UsnJournalIter<'v, 'f, V> = UsnEnumerator<'f, JournalSource<'v, V>>;

/// The change journal of one open volume.
#[derive(Debug)]
pub struct UsnJournal<'v, V: VolumeIo> {
    volume: &'v V,
    state: JournalState,
}

impl<'v, V: VolumeIo> UsnJournal<'v, V> {
    /// Creates an uninitialized journal handle; nothing is queried yet.
    pub fn new(volume: &'v V) -> Self {
        UsnJournal {
            volume,
            state: JournalState::Uninitialized,
        }
    }

    /// Creates a journal handle and queries the journal, optionally creating
    /// it with the default size policy when it is not active.
    pub fn open(volume: &'v V, create_if_not_active: bool) -> UsnResult<Self> {
        let mut journal = UsnJournal::new(volume);
        journal.query_or_create(create_if_not_active)?;
        Ok(journal)
    }

    pub fn volume(&self) -> &'v V {
        self.volume
    }

    pub fn state(&self) -> JournalState {
        self.state
    }

    /// The journal observed by the last successful query.
    pub fn info(&self) -> Option<&JournalInfo> {
        match &self.state {
            JournalState::Active(info) => Some(info),
            _ => None,
        }
    }

    fn active_info(&self) -> UsnResult<JournalInfo> {
        match self.state {
            JournalState::Active(info) => Ok(info),
            JournalState::Invalidated => Err(UsnError::JournalInvalidated),
            JournalState::NotActive | JournalState::Uninitialized => {
                Err(UsnError::JournalNotActive)
            }
        }
    }

    /// Queries the journal and updates the tracked state.
    ///
    /// Fails with [`UsnError::JournalNotActive`] when there is no journal and
    /// with [`UsnError::JournalInvalidated`] when the journal id changed since
    /// the previous query; the latter is terminal for this handle.
    pub fn query(&mut self) -> UsnResult<JournalInfo> {
        if self.state == JournalState::Invalidated {
            return Err(UsnError::JournalInvalidated);
        }

        match self.volume.query_journal() {
            Ok(info) => {
                if let JournalState::Active(previous) = self.state {
                    if previous.journal_id != info.journal_id {
                        warn!(
                            "USN journal id changed from {:#x} to {:#x}",
                            previous.journal_id, info.journal_id
                        );
                        self.state = JournalState::Invalidated;
                        return Err(UsnError::JournalInvalidated);
                    }
                }
                debug!("USN journal data: {:#?}", info);
                self.state = JournalState::Active(info);
                Ok(info)
            }
            Err(UsnError::JournalNotActive) => {
                debug!("USN journal is not active");
                if self.state == JournalState::Uninitialized {
                    self.state = JournalState::NotActive;
                }
                Err(UsnError::JournalNotActive)
            }
            Err(err) => {
                warn!("Error querying USN journal: {}", err);
                Err(err)
            }
        }
    }

    /// Create or update the USN journal on the volume, then re-query it.
    ///
    /// Creating an already active journal only adjusts its size policy.
    pub fn create(&mut self, max_size: u64, allocation_delta: u64) -> UsnResult<JournalInfo> {
        if self.state == JournalState::Invalidated {
            return Err(UsnError::JournalInvalidated);
        }

        // https://learn.microsoft.com/en-us/windows/win32/api/winioctl/ni-winioctl-fsctl_create_usn_journal
        // Creates an update sequence number (USN) change journal stream on a target volume,
        // or modifies an existing change journal stream.
        self.volume.create_journal(max_size, allocation_delta)?;
        debug!(
            "Created USN journal, max_size={}, allocation_delta={}",
            max_size, allocation_delta
        );

        self.query()
    }

    /// Query the journal, creating it with the default size policy if it is
    /// not active and `create_if_not_active` is set.
    pub fn query_or_create(&mut self, create_if_not_active: bool) -> UsnResult<JournalInfo> {
        match self.query() {
            Err(UsnError::JournalNotActive) if create_if_not_active => {
                self.create(DEFAULT_JOURNAL_MAX_SIZE, DEFAULT_JOURNAL_ALLOCATION_DELTA)
            }
            result => result,
        }
    }

    /// Delete the USN journal from the volume.
    ///
    /// The journal id observed so far stops being valid: this handle moves to
    /// [`JournalState::Invalidated`].
    pub fn delete(&mut self, journal_id: u64) -> UsnResult<()> {
        self.volume.delete_journal(journal_id)?;
        debug!("Deleted USN journal {:#x}", journal_id);
        self.state = JournalState::Invalidated;
        Ok(())
    }

    /// Re-queries the journal and checks that `previous` is still a valid
    /// starting point: same journal id and no regression of `next_usn`.
    ///
    /// A journal that is no longer active is reported as invalid.
    pub fn is_valid(&self, previous: &JournalInfo) -> UsnResult<bool> {
        match self.volume.query_journal() {
            Ok(current) => Ok(current.is_continuation_of(previous)),
            Err(UsnError::JournalNotActive) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Returns an iterator over the journal history, from USN 0 up to the
    /// `next_usn` observed by the last query.
    pub fn iter(&self) -> UsnResult<UsnJournalIter<'v, 'static, V>> {
        let info = self.active_info()?;
        self.iter_with_options(EnumOptions {
            start_usn: 0,
            stop_at_usn: Some(info.next_usn),
            ..Default::default()
        })
    }

    /// Returns a live iterator that starts at `start_usn` and blocks for new
    /// records once it reaches the tail of the journal.
    pub fn monitor(&self, start_usn: Usn) -> UsnResult<UsnJournalIter<'v, 'static, V>> {
        self.iter_with_options(EnumOptions {
            start_usn,
            wait_for_more: true,
            ..Default::default()
        })
    }

    pub fn iter_with_options<'f>(
        &self,
        options: EnumOptions,
    ) -> UsnResult<UsnJournalIter<'v, 'f, V>> {
        let info = self.active_info()?;
        let source = JournalSource {
            volume: self.volume,
            journal_id: info.journal_id,
            reason_mask: options.reason_mask,
            return_only_on_close: options.only_on_close,
            timeout: options.timeout,
            bytes_to_wait_for: options.wait_for_more as u64,
            stop_at_usn: options.stop_at_usn,
        };
        Ok(UsnEnumerator::new(
            source,
            options.start_usn as u64,
            options.buffer_size,
        ))
    }
}

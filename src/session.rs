//! The `search`, `read` and `monitor` entry points over one open volume.
//!
//! A [`Session`] owns the journal state and the path resolver of a volume.
//! Entries are pushed into a caller-supplied sink together with their
//! resolved path; cancellation is cooperative and checked between entries.

use log::{debug, info};
use std::{
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::{
    DEFAULT_BUFFER_SIZE, DEFAULT_PATH_CACHE_CAPACITY, Usn, UsnResult,
    enumerator::{RecordSource, UsnEnumerator},
    errors::UsnError,
    filter::EntryFilter,
    journal::{EnumOptions, JournalInfo, UsnJournal},
    mft::{Mft, MftEnumOptions},
    native::VolumeIo,
    path::PathResolver,
    usn_entry::UsnEntry,
};

/// How a session run ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Create the journal with the default size policy if it is not active.
    pub create_if_not_active: bool,
    pub buffer_size: usize,
    pub path_cache_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            create_if_not_active: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            path_cache_capacity: DEFAULT_PATH_CACHE_CAPACITY,
        }
    }
}

pub struct Session<'v, V: VolumeIo> {
    journal: UsnJournal<'v, V>,
    resolver: PathResolver<'v, V>,
    buffer_size: usize,
}

impl<'v, V: VolumeIo> Session<'v, V> {
    /// Queries (and optionally creates) the journal of `volume`.
    pub fn open(volume: &'v V, options: SessionOptions) -> UsnResult<Self> {
        let journal = UsnJournal::open(volume, options.create_if_not_active)?;
        Ok(Session {
            journal,
            resolver: PathResolver::with_capacity(volume, options.path_cache_capacity),
            buffer_size: options.buffer_size,
        })
    }

    pub fn journal(&self) -> &UsnJournal<'v, V> {
        &self.journal
    }

    /// The journal as observed when the session was opened or last re-validated.
    pub fn journal_info(&self) -> UsnResult<JournalInfo> {
        self.journal
            .info()
            .copied()
            .ok_or(UsnError::JournalNotActive)
    }

    pub fn resolver_mut(&mut self) -> &mut PathResolver<'v, V> {
        &mut self.resolver
    }

    /// Scans the whole file table, bounded by the journal's `next_usn`.
    pub fn search<F>(
        &mut self,
        filter: &EntryFilter,
        cancel: &AtomicBool,
        mut sink: F,
    ) -> UsnResult<SessionOutcome>
    where
        F: FnMut(&UsnEntry, Option<&Path>) -> UsnResult<()>,
    {
        let info = self.journal_info()?;
        let mft = Mft::new(self.journal.volume());
        let mut entries = mft
            .iter_with_options(MftEnumOptions {
                high_usn: info.next_usn,
                buffer_size: self.buffer_size,
                ..Default::default()
            })
            .with_filter(|entry| filter.matches(entry));

        self.drain(&mut entries, cancel, &mut sink)
    }

    /// Replays the journal from its oldest record up to the `next_usn`
    /// observed when the session was opened.
    pub fn read<F>(
        &mut self,
        filter: &EntryFilter,
        cancel: &AtomicBool,
        mut sink: F,
    ) -> UsnResult<SessionOutcome>
    where
        F: FnMut(&UsnEntry, Option<&Path>) -> UsnResult<()>,
    {
        let info = self.journal_info()?;
        let mut entries = self
            .journal
            .iter_with_options(EnumOptions {
                start_usn: 0,
                stop_at_usn: Some(info.next_usn),
                buffer_size: self.buffer_size,
                ..Default::default()
            })?
            .with_filter(|entry| filter.matches(entry));

        self.drain(&mut entries, cancel, &mut sink)
    }

    /// Follows the journal from its current tail until cancelled.
    ///
    /// Whenever a read cycle ends on its own, the journal is re-queried; the
    /// session fails with [`UsnError::JournalInvalidated`] if it is no longer
    /// the journal (or a continuation of the state) observed before.
    pub fn monitor<F>(
        &mut self,
        filter: &EntryFilter,
        cancel: &AtomicBool,
        mut sink: F,
    ) -> UsnResult<SessionOutcome>
    where
        F: FnMut(&UsnEntry, Option<&Path>) -> UsnResult<()>,
    {
        let mut observed = self.journal_info()?;
        let mut start_usn: Usn = observed.next_usn;
        info!("Monitoring journal {:#x} from usn {}", observed.journal_id, start_usn);

        loop {
            let mut entries = self
                .journal
                .iter_with_options(EnumOptions {
                    start_usn,
                    wait_for_more: true,
                    buffer_size: self.buffer_size,
                    ..Default::default()
                })?
                .with_filter(|entry| filter.matches(entry));

            if self.drain(&mut entries, cancel, &mut sink)? == SessionOutcome::Cancelled {
                return Ok(SessionOutcome::Cancelled);
            }
            start_usn = entries.cursor() as Usn;

            let current = self.journal.query()?;
            if !current.is_continuation_of(&observed) {
                return Err(UsnError::JournalInvalidated);
            }
            debug!("Read cycle ended, resuming at usn {}", start_usn);
            observed = current;
        }
    }

    fn drain<S, F>(
        &mut self,
        entries: &mut UsnEnumerator<'_, S>,
        cancel: &AtomicBool,
        sink: &mut F,
    ) -> UsnResult<SessionOutcome>
    where
        S: RecordSource,
        F: FnMut(&UsnEntry, Option<&Path>) -> UsnResult<()>,
    {
        for entry in entries {
            let entry = entry?;
            let path = self.resolver.resolve_entry(&entry);
            sink(&entry, path.as_deref())?;
            // Checked before the next fetch, which may block in live mode.
            if cancel.load(Ordering::Relaxed) {
                return Ok(SessionOutcome::Cancelled);
            }
        }

        if cancel.load(Ordering::Relaxed) {
            Ok(SessionOutcome::Cancelled)
        } else {
            Ok(SessionOutcome::Completed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        filter::FilterOptions,
        tests::{FakeVolume, RecordSpec, journal_info, page},
    };
    use std::path::PathBuf;

    fn root() -> PathBuf {
        PathBuf::from("C:\\")
    }

    fn collect_into(
        seen: &mut Vec<(UsnEntry, Option<PathBuf>)>,
    ) -> impl FnMut(&UsnEntry, Option<&Path>) -> UsnResult<()> + '_ {
        move |entry: &UsnEntry, path: Option<&Path>| {
            seen.push((entry.clone(), path.map(Path::to_path_buf)));
            Ok(())
        }
    }

    #[test]
    fn search_file_only_joins_paths_onto_parents() -> UsnResult<()> {
        let volume = FakeVolume::new("C:\\")
            .with_journal(journal_info(1, 0x1000))
            .with_name(0x20, "\\Users")
            .with_name(0x21, "\\Users\\Public")
            .with_name(0x40, "\\Logs")
            .with_table_page(page(
                0x200,
                &[
                    RecordSpec::dir(0x20, 5, "Users"),
                    RecordSpec::dir(0x21, 0x20, "Public"),
                    RecordSpec::file(0x30, 0x20, "a.txt"),
                    RecordSpec::file(0x31, 0x21, "b.txt"),
                    RecordSpec::file(0x32, 0x40, "c.txt"),
                ],
            ));

        let mut session = Session::open(&volume, SessionOptions::default())?;
        let logs = session.resolver_mut().resolve(0x40);
        assert_eq!(logs, Some(root().join("Logs")));

        let filter = EntryFilter::new(&FilterOptions::new(None, true, false, false)?)?;
        let mut seen = Vec::new();
        let outcome = session.search(&filter, &AtomicBool::new(false), collect_into(&mut seen))?;

        assert_eq!(outcome, SessionOutcome::Completed);
        let found: Vec<(u64, Option<PathBuf>)> = seen
            .into_iter()
            .map(|(entry, path)| (entry.fid, path))
            .collect();
        assert_eq!(
            found,
            vec![
                (0x30, Some(root().join("Users").join("a.txt"))),
                (0x31, Some(root().join("Users\\Public").join("b.txt"))),
                (0x32, Some(root().join("Logs").join("c.txt"))),
            ]
        );
        // The cached parent of c.txt needed no second lookup.
        assert_eq!(volume.name_queries(), vec![0x40, 0x20, 0x21]);
        assert_eq!(volume.table_requests()[0].high_usn, 0x1000);
        Ok(())
    }

    #[test]
    fn read_stops_before_next_usn_observed_at_open() -> UsnResult<()> {
        let records = |usns: &[i64]| -> Vec<RecordSpec> {
            usns.iter()
                .map(|&usn| RecordSpec::file(0x100 + usn as u64, 5, "x.tmp").usn(usn))
                .collect()
        };
        let volume = FakeVolume::new("C:\\")
            .with_journal(journal_info(7, 12))
            .with_journal_page(page(12, &records(&[10, 11])))
            .with_journal_page(page(13, &records(&[12])));

        let mut session = Session::open(&volume, SessionOptions::default())?;
        let mut seen = Vec::new();
        let outcome =
            session.read(&EntryFilter::all(), &AtomicBool::new(false), collect_into(&mut seen))?;

        assert_eq!(outcome, SessionOutcome::Completed);
        let usns: Vec<i64> = seen.iter().map(|(entry, _)| entry.usn).collect();
        assert_eq!(usns, vec![10, 11]);
        Ok(())
    }

    #[test]
    fn read_stops_when_a_page_starts_at_next_usn() -> UsnResult<()> {
        let records = |usns: &[i64]| -> Vec<RecordSpec> {
            usns.iter()
                .map(|&usn| RecordSpec::file(0x100 + usn as u64, 5, "x.tmp").usn(usn))
                .collect()
        };
        let volume = FakeVolume::new("C:\\")
            .with_journal(journal_info(7, 12))
            .with_journal_page(page(11, &records(&[10])))
            .with_journal_page(page(13, &records(&[12, 11])));

        let mut session = Session::open(&volume, SessionOptions::default())?;
        let mut seen = Vec::new();
        session.read(&EntryFilter::all(), &AtomicBool::new(false), collect_into(&mut seen))?;

        let usns: Vec<i64> = seen.iter().map(|(entry, _)| entry.usn).collect();
        assert_eq!(usns, vec![10]);
        Ok(())
    }

    #[test]
    fn cancellation_is_checked_between_entries() -> UsnResult<()> {
        let volume = FakeVolume::new("C:\\")
            .with_journal(journal_info(7, 100))
            .with_journal_page(page(
                103,
                &[
                    RecordSpec::file(0x10, 5, "a").usn(100),
                    RecordSpec::file(0x11, 5, "b").usn(101),
                    RecordSpec::file(0x12, 5, "c").usn(102),
                ],
            ));

        let mut session = Session::open(&volume, SessionOptions::default())?;
        let cancel = AtomicBool::new(false);
        let mut seen = Vec::new();
        let outcome = session.monitor(&EntryFilter::all(), &cancel, |entry, _| {
            seen.push(entry.usn);
            cancel.store(true, Ordering::Relaxed);
            Ok(())
        })?;

        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert_eq!(seen, vec![100]);
        Ok(())
    }

    #[test]
    fn monitor_resumes_from_the_last_cursor() -> UsnResult<()> {
        let volume = FakeVolume::new("C:\\")
            .with_journal(journal_info(7, 100))
            .with_journal_page(page(
                120,
                &[
                    RecordSpec::file(0x10, 5, "a").usn(100),
                    RecordSpec::file(0x11, 5, "b").usn(110),
                ],
            ))
            // The blocking read gives up; the first cycle ends here.
            .with_journal_eof()
            .with_journal_page(page(130, &[RecordSpec::file(0x12, 5, "c").usn(120)]));

        let mut session = Session::open(&volume, SessionOptions::default())?;
        let cancel = AtomicBool::new(false);
        let mut seen = Vec::new();
        let outcome = session.monitor(&EntryFilter::all(), &cancel, |entry, _| {
            seen.push(entry.usn);
            match entry.usn {
                100 => {}
                // The journal grows while the first cycle runs.
                110 => volume.set_journal(journal_info(7, 130)),
                _ => cancel.store(true, Ordering::Relaxed),
            }
            Ok(())
        })?;

        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert_eq!(seen, vec![100, 110, 120]);
        let starts: Vec<i64> = volume.read_requests().iter().map(|r| r.start_usn).collect();
        assert_eq!(starts, vec![100, 120, 120]);
        assert!(volume.read_requests().iter().all(|r| r.bytes_to_wait_for == 1));
        Ok(())
    }

    #[test]
    fn monitor_fails_when_the_journal_is_recreated() -> UsnResult<()> {
        let volume = FakeVolume::new("C:\\")
            .with_journal(journal_info(7, 100))
            .with_journal_page(page(101, &[RecordSpec::file(0x10, 5, "a").usn(100)]));

        let mut session = Session::open(&volume, SessionOptions::default())?;
        let result = session.monitor(&EntryFilter::all(), &AtomicBool::new(false), |_, _| {
            volume.set_journal(journal_info(8, 0));
            Ok(())
        });

        assert!(matches!(result, Err(UsnError::JournalInvalidated)));
        Ok(())
    }

    #[test]
    fn monitor_treats_an_aborted_fetch_as_cancellation() -> UsnResult<()> {
        let volume = FakeVolume::new("C:\\")
            .with_journal(journal_info(7, 100))
            .with_journal_error(UsnError::Cancelled);

        let mut session = Session::open(&volume, SessionOptions::default())?;
        // The Ctrl-C handler sets the flag before cancelling the pending I/O.
        let cancel = AtomicBool::new(true);
        let outcome = session.monitor(&EntryFilter::all(), &cancel, |_, _| Ok(()))?;
        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert_eq!(volume.read_requests().len(), 1);
        Ok(())
    }

    #[test]
    fn sink_errors_stop_the_run() -> UsnResult<()> {
        let volume = FakeVolume::new("C:\\")
            .with_journal(journal_info(7, 100))
            .with_table_page(page(0x20, &[RecordSpec::file(0x10, 5, "a")]));

        let mut session = Session::open(&volume, SessionOptions::default())?;
        let result = session.search(&EntryFilter::all(), &AtomicBool::new(false), |_, _| {
            Err(UsnError::IoError(std::io::Error::from(
                std::io::ErrorKind::BrokenPipe,
            )))
        });
        assert!(matches!(result, Err(UsnError::IoError(_))));
        Ok(())
    }

    #[test]
    fn open_without_journal_reports_not_active() {
        let volume = FakeVolume::new("C:\\");
        assert!(matches!(
            Session::open(&volume, SessionOptions::default()),
            Err(UsnError::JournalNotActive)
        ));

        let session = Session::open(
            &volume,
            SessionOptions {
                create_if_not_active: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(session.journal_info().is_ok());
    }
}

//! Plain-text rendering of journal data and entries to any [`Write`] sink.

use chrono::Local;
use std::{io::Write, path::Path};

use crate::{journal::JournalInfo, usn_entry::UsnEntry};

const LABEL_WIDTH: usize = 20;

pub struct Printer<W: Write> {
    writer: W,
}

impl<W: Write> Printer<W> {
    pub fn new(writer: W) -> Self {
        Printer { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn field(&mut self, label: &str, value: impl std::fmt::Display) -> std::io::Result<()> {
        writeln!(self.writer, "{:<LABEL_WIDTH$}: {}", label, value)
    }

    pub fn print_journal_info(&mut self, info: &JournalInfo) -> std::io::Result<()> {
        self.field("Journal ID", format_args!("{:#018x}", info.journal_id))?;
        self.field("First USN", info.first_usn)?;
        self.field("Next USN", info.next_usn)?;
        self.field("Lowest Valid USN", info.lowest_valid_usn)?;
        self.field("Max USN", info.max_usn)?;
        self.field("Max Size", info.maximum_size)?;
        self.field("Allocation Delta", info.allocation_delta)
    }

    /// Every field of a journal entry, preceded by a blank line.
    pub fn print_entry(&mut self, entry: &UsnEntry, path: Option<&Path>) -> std::io::Result<()> {
        writeln!(self.writer)?;
        self.field("USN", entry.usn)?;
        self.field("Type", if entry.is_dir() { "Directory" } else { "File" })?;
        if let Some(path) = path {
            self.field("Path", path.display())?;
        }
        match entry.datetime() {
            Some(datetime) => self.field(
                "Timestamp",
                datetime.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S%.3f"),
            )?,
            None => self.field("Timestamp", entry.timestamp)?,
        }
        self.field("File ID", format_args!("{:#x}", entry.fid))?;
        self.field("Parent ID", format_args!("{:#x}", entry.parent_fid))?;
        self.field("Reason", entry.reason_to_string())?;
        self.field("Source Info", entry.source_info_to_string())
    }

    /// The entry's path alone, or its bare name when the path is unknown.
    pub fn print_entry_path(&mut self, entry: &UsnEntry, path: Option<&Path>) -> std::io::Result<()> {
        match path {
            Some(path) => writeln!(self.writer, "{}", path.display()),
            None => writeln!(self.writer, "{}", entry.file_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        flags::{USN_REASON_CLOSE, USN_REASON_FILE_CREATE},
        tests::{RecordSpec, journal_info},
    };
    use std::path::PathBuf;

    fn render(print: impl FnOnce(&mut Printer<Vec<u8>>) -> std::io::Result<()>) -> String {
        let mut printer = Printer::new(Vec::new());
        print(&mut printer).unwrap();
        String::from_utf8(printer.into_inner()).unwrap()
    }

    #[test]
    fn journal_info_is_aligned() {
        let output = render(|p| p.print_journal_info(&journal_info(0x1d5a, 4096)));
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines.len(), 7);
        assert_eq!(lines[0], "Journal ID          : 0x0000000000001d5a");
        assert_eq!(lines[2], "Next USN            : 4096");
        assert_eq!(lines[6], "Allocation Delta    : 8388608");
    }

    #[test]
    fn full_entry() {
        let entry = RecordSpec::dir(0x0005_0000_0000_0042, 0x0005_0000_0000_0005, "src")
            .usn(777)
            .reason(USN_REASON_FILE_CREATE | USN_REASON_CLOSE)
            .entry();
        let path = PathBuf::from("C:\\src");
        let output = render(|p| p.print_entry(&entry, Some(&path)));
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines[0], "");
        assert_eq!(lines[1], "USN                 : 777");
        assert_eq!(lines[2], "Type                : Directory");
        assert_eq!(lines[3], format!("Path                : {}", path.display()));
        assert!(lines[4].starts_with("Timestamp           : 2023-07-1"));
        assert_eq!(lines[5], "File ID             : 0x5000000000042");
        assert_eq!(lines[6], "Parent ID           : 0x5000000000005");
        assert_eq!(lines[7], "Reason              : FILE_CREATE | CLOSE");
        assert_eq!(lines[8], "Source Info         : NORMAL");
    }

    #[test]
    fn path_only_falls_back_to_the_name() {
        let entry = RecordSpec::file(0x10, 5, "a.txt").entry();
        assert_eq!(render(|p| p.print_entry_path(&entry, None)), "a.txt\n");

        let path = PathBuf::from("D:\\a.txt");
        assert_eq!(
            render(|p| p.print_entry_path(&entry, Some(&path))),
            format!("{}\n", path.display())
        );
    }
}

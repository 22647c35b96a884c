//! # usn-parser
//!
//! A Rust library for reading the NTFS/ReFS USN change journal and enumerating the NTFS Master File Table (MFT).
//!
//! Both native sources answer with pages of `USN_RECORD_V2` records behind a
//! continuation cursor. This crate decodes those pages with bounds-checked
//! reads, tracks the identity of the journal across reads, and resolves file
//! reference numbers to paths through an LRU cache.
//!
//! ## Features
//! - Enumerate USN journal records or MFT entries as Rust iterators
//! - Detect a deleted or recreated journal instead of reading with stale cursors
//! - Resolve file IDs to full paths
//! - Filter entries by kind and by a glob on the file name
//!
//! ## Example: Enumerate USN Journal
//! ```no_run
//! # #[cfg(windows)]
//! # fn main() -> usn_parser::UsnResult<()> {
//! use usn_parser::{journal::UsnJournal, volume::Volume};
//!
//! let volume = Volume::from_drive_letter('C')?;
//! let journal = UsnJournal::open(&volume, false)?;
//! for result in journal.iter()?.take(10) {
//!     match result {
//!         Ok(entry) => println!("USN entry: {:?}", entry),
//!         Err(e) => eprintln!("Error reading entry: {}", e),
//!     }
//! }
//! # Ok(())
//! # }
//! # #[cfg(not(windows))]
//! # fn main() {}
//! ```
//!
//! ## Example: Enumerating MFT Entries
//! ```no_run
//! # #[cfg(windows)]
//! # fn main() -> usn_parser::UsnResult<()> {
//! use usn_parser::{mft::Mft, path::PathResolver, volume::Volume};
//!
//! let volume = Volume::from_drive_letter('C')?;
//! let mut resolver = PathResolver::new(&volume);
//! for entry in Mft::new(&volume).iter().take(10) {
//!     let entry = entry?;
//!     println!("{:?}", resolver.resolve_entry(&entry));
//! }
//! # Ok(())
//! # }
//! # #[cfg(not(windows))]
//! # fn main() {}
//! ```
//!
//! ## Platform
//! - Windows NTFS/ReFS volumes
//! - Requires appropriate privileges to access the USN journal
//!
//! Everything above [`native::VolumeIo`] is platform independent.

pub mod enumerator;
pub mod errors;
pub mod filter;
pub mod flags;
pub mod journal;
pub mod mft;
pub mod native;
pub mod output;
pub mod path;
pub mod record;
pub mod session;
pub mod time;
pub mod usn_entry;
pub mod volume;

#[cfg(windows)]
pub mod privilege;

// Re-export commonly used types
pub use errors::UsnError;
pub use usn_entry::UsnEntry;

/// A convenient type alias for Results with UsnError.
pub type UsnResult<T> = std::result::Result<T, UsnError>;


pub type Usn = i64;

pub const DEFAULT_BUFFER_SIZE: usize = 256 * 1024; // 256KB

pub const DEFAULT_JOURNAL_MAX_SIZE: u64 = 32 * 1024 * 1024; // 32MB
pub const DEFAULT_JOURNAL_ALLOCATION_DELTA: u64 = 8 * 1024 * 1024; // 8MB
pub const USN_REASON_MASK_ALL: u32 = 0xFFFFFFFF;

pub const DEFAULT_PATH_CACHE_CAPACITY: usize = 4 * 1024; // 4K

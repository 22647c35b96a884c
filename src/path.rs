//! Path resolution utilities for NTFS/ReFS volumes.
//!
//! Provides types and logic to resolve full file paths from file IDs, using
//! an LRU cache of directory paths so consecutive entries from the same
//! directory are resolved without a native round trip.

use log::debug;
use lru::LruCache;
use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use crate::{
    DEFAULT_PATH_CACHE_CAPACITY,
    native::{NameQuery, VolumeIo},
    record::{self, NAME_INFO_HEADER_SIZE, NameInfo},
    usn_entry::UsnEntry,
};

const MAX_PATH: usize = 260;

/// `FILE_NAME_INFO` buffer for a name of up to `MAX_PATH` UTF-16 units.
const INITIAL_NAME_BUFFER_SIZE: usize = NAME_INFO_HEADER_SIZE + MAX_PATH * size_of::<u16>();

/// Resolves file paths from file IDs on an NTFS/ReFS volume, using an LRU cache for efficiency.
///
/// Resolved paths are point-in-time snapshots: the cache has no TTL and a
/// hit is returned as is, even if the directory was renamed since.
#[derive(Debug)]
pub struct PathResolver<'v, V: VolumeIo> {
    volume: &'v V,
    cache: LruCache<u64, PathBuf>,
}

impl<'v, V: VolumeIo> PathResolver<'v, V> {
    /// Create a new `PathResolver` with the default cache capacity.
    pub fn new(volume: &'v V) -> Self {
        PathResolver::with_capacity(volume, DEFAULT_PATH_CACHE_CAPACITY)
    }

    /// Create a new `PathResolver` holding at most `capacity` cached paths.
    ///
    /// A capacity of zero is treated as one.
    pub fn with_capacity(volume: &'v V, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        PathResolver {
            volume,
            cache: LruCache::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Resolves a file reference number to its full path.
    ///
    /// Returns `None` for the root sentinel `0` (without a native call) and
    /// whenever the file cannot be opened or named. Misses are not cached.
    pub fn resolve(&mut self, file_ref: u64) -> Option<PathBuf> {
        if file_ref == 0 {
            return None;
        }

        if let Some(path) = self.cache.get(&file_ref) {
            return Some(path.clone());
        }

        let name = self.query_name(file_ref)?;
        let path = join_volume_path(self.volume.display_name(), &name);
        self.cache.put(file_ref, path.clone());
        Some(path)
    }

    /// Resolves the full path of a changed entry.
    ///
    /// The entry's name is joined onto its parent's path, which is taken from
    /// the cache when possible. Directory paths are cached under their own
    /// file reference; a deleted directory is evicted instead. The root
    /// directory resolves to its parent's path unchanged.
    pub fn resolve_entry(&mut self, entry: &UsnEntry) -> Option<PathBuf> {
        let parent_path = match self.cache.get(&entry.parent_fid).cloned() {
            Some(parent_path) => Some(parent_path),
            None => self.resolve(entry.parent_fid),
        };

        // The root directory is its own parent and is named ".".
        if entry.fid == entry.parent_fid || entry.file_name == "." {
            return parent_path;
        }

        let path = match parent_path {
            Some(parent_path) => parent_path.join(&entry.file_name),
            // The parent may be gone already; the entry itself might still be there.
            None => self.resolve(entry.fid)?,
        };

        if entry.is_dir() {
            if entry.is_delete() {
                self.cache.pop(&entry.fid);
            } else {
                self.cache.put(entry.fid, path.clone());
            }
        }

        Some(path)
    }

    /// Queries the volume-relative name of `file_ref`, retrying once with a
    /// larger buffer when the name does not fit.
    fn query_name(&self, file_ref: u64) -> Option<String> {
        let mut buffer = vec![0u8; INITIAL_NAME_BUFFER_SIZE];
        let mut retried = false;

        loop {
            let required = match self.volume.query_file_name(file_ref, &mut buffer) {
                Ok(NameQuery::Complete) => match record::decode_name_info(&buffer) {
                    Ok(NameInfo::Name(name)) => return Some(name),
                    Ok(NameInfo::Truncated { required }) => required,
                    Err(err) => {
                        debug!("Malformed name information for {:#x}: {}", file_ref, err);
                        return None;
                    }
                },
                Ok(NameQuery::BufferTooSmall) => match record::decode_name_info(&buffer) {
                    Ok(NameInfo::Truncated { required }) => required,
                    _ => 0,
                },
                Err(err) => {
                    debug!("Failed to resolve file id {:#x}: {}", file_ref, err);
                    return None;
                }
            };

            if retried {
                debug!("Name of {:#x} still does not fit after one retry", file_ref);
                return None;
            }
            retried = true;
            // Long paths, extend the buffer to hold them.
            let new_len = (buffer.len() * 2).max(required);
            buffer.resize(new_len, 0);
        }
    }

    #[cfg(test)]
    fn cached_file_refs(&self) -> Vec<u64> {
        self.cache.iter().map(|(file_ref, _)| *file_ref).collect()
    }
}

/// Joins a volume-relative name such as `\dir\file.txt` onto the volume's display name.
fn join_volume_path(display_name: &Path, name: &str) -> PathBuf {
    match name.trim_start_matches(['\\', '/']) {
        "" => display_name.to_path_buf(),
        relative => display_name.join(relative),
    }
}

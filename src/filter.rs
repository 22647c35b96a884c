//! Entry filtering for the CLI entry points: kind (file/directory) and a
//! glob keyword matched against the entry's file name.

use globset::GlobBuilder;

use crate::{UsnResult, errors::UsnError, usn_entry::UsnEntry};

/// User-facing filter settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOptions {
    /// Glob matched against the whole file name; `None` or blank matches everything.
    pub keyword: Option<String>,
    pub file_only: bool,
    pub directory_only: bool,
    pub case_sensitive: bool,
}

impl FilterOptions {
    pub fn new(
        keyword: Option<String>,
        file_only: bool,
        directory_only: bool,
        case_sensitive: bool,
    ) -> UsnResult<Self> {
        if file_only && directory_only {
            return Err(UsnError::InvalidFilter(
                "FileOnly and DirectoryOnly can't both be set".to_string(),
            ));
        }

        Ok(FilterOptions {
            keyword,
            file_only,
            directory_only,
            case_sensitive,
        })
    }
}

/// A compiled glob matched against a whole file name: `*` matches any run of
/// characters, `?` exactly one, `[abc]`/`[a-z]` one character of a set and
/// `[!abc]` one character outside it.
#[derive(Debug, Clone)]
pub struct GlobMatcher {
    matcher: globset::GlobMatcher,
}

impl GlobMatcher {
    pub fn new(pattern: &str, case_sensitive: bool) -> UsnResult<Self> {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .literal_separator(false)
            .backslash_escape(false)
            .build()
            .map_err(|err| UsnError::InvalidFilter(format!("{pattern}: {err}")))?;
        Ok(GlobMatcher {
            matcher: glob.compile_matcher(),
        })
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.matcher.is_match(name)
    }
}

/// The compiled form of [`FilterOptions`].
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    glob: Option<GlobMatcher>,
    file_only: bool,
    directory_only: bool,
}

impl EntryFilter {
    pub fn new(options: &FilterOptions) -> UsnResult<Self> {
        let glob = match options.keyword.as_deref().map(str::trim) {
            Some(keyword) if !keyword.is_empty() => {
                Some(GlobMatcher::new(keyword, options.case_sensitive)?)
            }
            _ => None,
        };

        Ok(EntryFilter {
            glob,
            file_only: options.file_only,
            directory_only: options.directory_only,
        })
    }

    /// A filter that accepts every entry.
    pub fn all() -> Self {
        EntryFilter::default()
    }

    pub fn matches(&self, entry: &UsnEntry) -> bool {
        if self.file_only && entry.is_dir() {
            return false;
        }
        if self.directory_only && !entry.is_dir() {
            return false;
        }

        match &self.glob {
            Some(glob) => glob.is_match(&entry.file_name),
            None => true,
        }
    }
}

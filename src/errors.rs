use thiserror::Error;

#[derive(Debug, Error)]
pub enum UsnError {
    #[error(
        "Access denied: Administrator privileges required. Please run the application as Administrator to access the USN journal."
    )]
    PermissionError,

    #[error("Invalid mount point: {0}")]
    InvalidMountPointError(String),

    #[error("The change journal is not active on this volume")]
    JournalNotActive,

    #[error(
        "The change journal was deleted or recreated; previous cursors are no longer valid, start over with a full scan"
    )]
    JournalInvalidated,

    #[error("The requested USN is older than the lowest valid USN of the change journal")]
    JournalEntryDeleted,

    #[error("The volume does not support change journals")]
    UnsupportedVolume,

    #[error("Unsupported USN record version {major}.{minor}, only V2 records can be decoded")]
    UnsupportedRecordVersion { major: u16, minor: u16 },

    #[error("Malformed USN record at offset {offset}: {reason}")]
    MalformedRecord { offset: usize, reason: &'static str },

    #[error("Native error 0x{code:08X}: {message}")]
    Native { code: i32, message: String },

    #[error("The pending I/O operation was cancelled")]
    Cancelled,

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Other error: {0}")]
    OtherError(String),
}

impl UsnError {
    /// Returns the native status code carried by this error, if any.
    pub fn native_code(&self) -> Option<i32> {
        match self {
            UsnError::Native { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for UsnError {
    fn from(err: windows::core::Error) -> Self {
        use windows::Win32::Foundation::{
            ERROR_ACCESS_DENIED, ERROR_INVALID_FUNCTION, ERROR_JOURNAL_DELETE_IN_PROGRESS,
            ERROR_JOURNAL_ENTRY_DELETED, ERROR_JOURNAL_NOT_ACTIVE, ERROR_OPERATION_ABORTED,
        };

        let code = err.code();
        if code == ERROR_ACCESS_DENIED.to_hresult() {
            UsnError::PermissionError
        } else if code == ERROR_JOURNAL_NOT_ACTIVE.to_hresult() {
            UsnError::JournalNotActive
        } else if code == ERROR_JOURNAL_DELETE_IN_PROGRESS.to_hresult() {
            UsnError::JournalInvalidated
        } else if code == ERROR_JOURNAL_ENTRY_DELETED.to_hresult() {
            UsnError::JournalEntryDeleted
        } else if code == ERROR_OPERATION_ABORTED.to_hresult() {
            UsnError::Cancelled
        } else if code == ERROR_INVALID_FUNCTION.to_hresult() {
            UsnError::UnsupportedVolume
        } else {
            UsnError::Native {
                code: code.0,
                message: err.message(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_code_only_for_native_errors() {
        let err = UsnError::Native {
            code: 0x8007_0002_u32 as i32,
            message: "The system cannot find the file specified.".to_string(),
        };
        assert_eq!(err.native_code(), Some(0x8007_0002_u32 as i32));
        assert_eq!(
            err.to_string(),
            "Native error 0x80070002: The system cannot find the file specified."
        );
        assert_eq!(UsnError::JournalNotActive.native_code(), None);
    }

    #[test]
    fn io_errors_convert() {
        let err: UsnError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(matches!(err, UsnError::IoError(_)));
    }
}

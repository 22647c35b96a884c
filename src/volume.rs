//! Volume handle management for NTFS/ReFS
//!
//! [`Volume`] owns the handle every change-journal control code goes through
//! and implements [`VolumeIo`](crate::native::VolumeIo) on top of it.

use std::{
    path::PathBuf,
    sync::{Mutex, MutexGuard},
};

use crate::{UsnResult, errors::UsnError};

/// How the user named a volume on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeSpec {
    DriveLetter(char),
    MountPoint(PathBuf),
}

impl VolumeSpec {
    /// Accepts `C`, `C:`, `C:\` (any case) as a drive letter; anything else
    /// is taken as a mount point path.
    pub fn parse(argument: &str) -> UsnResult<Self> {
        let argument = argument.trim();
        if argument.is_empty() {
            return Err(UsnError::InvalidMountPointError(
                "volume argument is empty".to_string(),
            ));
        }

        let mut chars = argument.chars();
        if let Some(letter) = chars.next().filter(char::is_ascii_alphabetic) {
            if matches!(chars.as_str(), "" | ":" | ":\\" | ":/") {
                return Ok(VolumeSpec::DriveLetter(letter.to_ascii_uppercase()));
            }
        }

        Ok(VolumeSpec::MountPoint(PathBuf::from(argument)))
    }
}

/// A raw handle value shared with another thread, e.g. a signal handler.
///
/// The owner disarms the slot before closing the handle; users run their
/// native call through [`HandleSlot::with`] so a close cannot slip in between.
#[derive(Debug, Default)]
pub struct HandleSlot {
    raw: Mutex<Option<isize>>,
}

impl HandleSlot {
    pub fn new(raw: isize) -> Self {
        HandleSlot {
            raw: Mutex::new(Some(raw)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<isize>> {
        self.raw.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `f` on the handle while it is still open; `None` once disarmed.
    pub fn with<R>(&self, f: impl FnOnce(isize) -> R) -> Option<R> {
        let raw = self.lock();
        (*raw).map(f)
    }

    pub fn disarm(&self) {
        *self.lock() = None;
    }

    pub fn is_armed(&self) -> bool {
        self.lock().is_some()
    }
}

#[cfg(windows)]
pub use self::windows_volume::{IoCanceller, Volume};

#[cfg(windows)]
mod windows_volume {
    use std::{
        ffi::c_void,
        path::{Path, PathBuf},
        sync::Arc,
    };

    use log::{debug, warn};
    use windows::{
        Win32::{
            Foundation::{
                CloseHandle, ERROR_HANDLE_EOF, ERROR_MORE_DATA, ERROR_NOT_FOUND, HANDLE,
            },
            Storage::FileSystem::{
                CreateFileW, FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAGS_AND_ATTRIBUTES,
                FILE_GENERIC_READ, FILE_ID_DESCRIPTOR, FILE_ID_DESCRIPTOR_0, FILE_READ_ATTRIBUTES,
                FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE, FileIdType, FileNameInfo,
                GetFileInformationByHandleEx, GetVolumeNameForVolumeMountPointW, OPEN_EXISTING,
                OpenFileById,
            },
            System::{
                IO::{CancelIoEx, DeviceIoControl},
                Ioctl::{
                    CREATE_USN_JOURNAL_DATA, DELETE_USN_JOURNAL_DATA, FSCTL_CREATE_USN_JOURNAL,
                    FSCTL_DELETE_USN_JOURNAL, FSCTL_ENUM_USN_DATA, FSCTL_QUERY_USN_JOURNAL,
                    FSCTL_READ_USN_JOURNAL, MFT_ENUM_DATA_V0, READ_USN_JOURNAL_DATA_V0,
                    USN_DELETE_FLAG_DELETE, USN_DELETE_FLAG_NOTIFY, USN_JOURNAL_DATA_V0,
                },
            },
        },
        core::HSTRING,
    };

    use super::{HandleSlot, VolumeSpec};
    use crate::{
        UsnResult,
        errors::UsnError,
        journal::JournalInfo,
        native::{EnumTableRequest, NameQuery, ReadJournalRequest, VolumeIo},
        privilege,
    };

    /// A handle closed on drop.
    #[derive(Debug)]
    struct OwnedHandle(HANDLE);

    impl Drop for OwnedHandle {
        fn drop(&mut self) {
            if let Err(err) = unsafe { CloseHandle(self.0) } {
                warn!("CloseHandle failed: {}", err);
            }
        }
    }

    #[derive(Debug)]
    /// Represents an NTFS/ReFS volume handle and its associated drive letter or mount point.
    pub struct Volume {
        handle: OwnedHandle,
        pub drive_letter: Option<char>,
        pub mount_point: Option<PathBuf>,
        display_name: PathBuf,
        cancel_slot: Arc<HandleSlot>,
    }

    impl Drop for Volume {
        fn drop(&mut self) {
            // Runs before `handle` is closed.
            self.cancel_slot.disarm();
        }
    }

    impl Volume {
        /// Opens the volume named by a command line argument, see [`VolumeSpec::parse`].
        pub fn from_argument(argument: &str) -> UsnResult<Self> {
            match VolumeSpec::parse(argument)? {
                VolumeSpec::DriveLetter(letter) => Volume::from_drive_letter(letter),
                VolumeSpec::MountPoint(mount_point) => Volume::from_mount_point(&mount_point),
            }
        }

        /// Creates a new `Volume` instance with the given drive letter.
        pub fn from_drive_letter(drive_letter: char) -> UsnResult<Self> {
            let drive_letter = drive_letter.to_ascii_uppercase();
            let handle = get_volume_handle_from_drive_letter(drive_letter)?;
            Ok(Volume {
                cancel_slot: Arc::new(HandleSlot::new(handle.0.0 as isize)),
                handle,
                drive_letter: Some(drive_letter),
                mount_point: None,
                display_name: PathBuf::from(format!("{}:\\", drive_letter)),
            })
        }

        /// Creates a new `Volume` instance with the given mount point.
        pub fn from_mount_point(mount_point: &Path) -> UsnResult<Self> {
            let handle = get_volume_handle_from_mount_point(mount_point)?;
            Ok(Volume {
                cancel_slot: Arc::new(HandleSlot::new(handle.0.0 as isize)),
                handle,
                drive_letter: None,
                mount_point: Some(mount_point.to_path_buf()),
                display_name: mount_point.to_path_buf(),
            })
        }

        /// A token that interrupts pending I/O on this volume from another
        /// thread. It turns into a no-op once the volume is dropped.
        pub fn canceller(&self) -> IoCanceller {
            IoCanceller {
                slot: Arc::clone(&self.cancel_slot),
            }
        }

        fn control<I>(&self, code: u32, input: Option<&I>, output: &mut [u8]) -> windows::core::Result<u32> {
            let mut bytes_returned = 0u32;
            unsafe {
                DeviceIoControl(
                    self.handle.0,
                    code,
                    input.map(|input| input as *const I as *const c_void),
                    input.map_or(0, |_| size_of::<I>() as u32),
                    (!output.is_empty()).then(|| output.as_mut_ptr() as *mut c_void),
                    output.len() as u32,
                    Some(&mut bytes_returned),
                    None,
                )
            }?;
            Ok(bytes_returned)
        }

        /// Runs a page-returning control code, mapping `ERROR_HANDLE_EOF` to `None`.
        fn read_page<I>(&self, code: u32, input: &I, buffer: &mut [u8]) -> UsnResult<Option<usize>> {
            match self.control(code, Some(input), buffer) {
                Ok(bytes_read) => Ok(Some(bytes_read as usize)),
                Err(err) if err.code() == ERROR_HANDLE_EOF.to_hresult() => Ok(None),
                Err(err) => {
                    warn!("Error reading USN data: {}", err);
                    Err(err.into())
                }
            }
        }
    }

    impl VolumeIo for Volume {
        fn display_name(&self) -> &Path {
            &self.display_name
        }

        fn query_journal(&self) -> UsnResult<JournalInfo> {
            let mut journal_data = USN_JOURNAL_DATA_V0::default();
            // https://learn.microsoft.com/en-us/windows/win32/fileio/using-the-change-journal-identifier
            // To obtain the identifier of the current change journal on a specified volume,
            // use the FSCTL_QUERY_USN_JOURNAL control code.
            let output = unsafe {
                std::slice::from_raw_parts_mut(
                    &mut journal_data as *mut USN_JOURNAL_DATA_V0 as *mut u8,
                    size_of::<USN_JOURNAL_DATA_V0>(),
                )
            };
            self.control::<()>(FSCTL_QUERY_USN_JOURNAL, None, output)?;

            Ok(JournalInfo {
                journal_id: journal_data.UsnJournalID,
                first_usn: journal_data.FirstUsn,
                next_usn: journal_data.NextUsn,
                lowest_valid_usn: journal_data.LowestValidUsn,
                max_usn: journal_data.MaxUsn,
                maximum_size: journal_data.MaximumSize,
                allocation_delta: journal_data.AllocationDelta,
            })
        }

        fn create_journal(&self, max_size: u64, allocation_delta: u64) -> UsnResult<()> {
            let create_data = CREATE_USN_JOURNAL_DATA {
                MaximumSize: max_size,
                AllocationDelta: allocation_delta,
            };
            self.control(FSCTL_CREATE_USN_JOURNAL, Some(&create_data), &mut [])?;
            Ok(())
        }

        fn delete_journal(&self, journal_id: u64) -> UsnResult<()> {
            let delete_data = DELETE_USN_JOURNAL_DATA {
                UsnJournalID: journal_id,
                DeleteFlags: USN_DELETE_FLAG_DELETE | USN_DELETE_FLAG_NOTIFY,
            };
            self.control(FSCTL_DELETE_USN_JOURNAL, Some(&delete_data), &mut [])?;
            Ok(())
        }

        fn read_journal(
            &self,
            request: &ReadJournalRequest,
            buffer: &mut [u8],
        ) -> UsnResult<Option<usize>> {
            let read_data = READ_USN_JOURNAL_DATA_V0 {
                StartUsn: request.start_usn,
                ReasonMask: request.reason_mask,
                ReturnOnlyOnClose: request.return_only_on_close as u32,
                Timeout: request.timeout,
                BytesToWaitFor: request.bytes_to_wait_for,
                UsnJournalID: request.journal_id,
            };
            self.read_page(FSCTL_READ_USN_JOURNAL, &read_data, buffer)
        }

        fn enum_table(&self, request: &EnumTableRequest, buffer: &mut [u8]) -> UsnResult<Option<usize>> {
            let enum_data = MFT_ENUM_DATA_V0 {
                StartFileReferenceNumber: request.start_file_ref,
                LowUsn: request.low_usn,
                HighUsn: request.high_usn,
            };
            self.read_page(FSCTL_ENUM_USN_DATA, &enum_data, buffer)
        }

        fn query_file_name(&self, file_ref: u64, buffer: &mut [u8]) -> UsnResult<NameQuery> {
            let file_id_desc = FILE_ID_DESCRIPTOR {
                dwSize: size_of::<FILE_ID_DESCRIPTOR>() as u32,
                Type: FileIdType,
                Anonymous: FILE_ID_DESCRIPTOR_0 {
                    FileId: file_ref as i64,
                },
            };

            // Attribute access only, so opening never recalls or decompresses file content.
            let file_handle = OwnedHandle(unsafe {
                OpenFileById(
                    self.handle.0,
                    &file_id_desc,
                    FILE_READ_ATTRIBUTES.0,
                    FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                    None,
                    FILE_FLAG_BACKUP_SEMANTICS,
                )?
            });

            match unsafe {
                GetFileInformationByHandleEx(
                    file_handle.0,
                    FileNameInfo,
                    buffer.as_mut_ptr() as *mut c_void,
                    buffer.len() as u32,
                )
            } {
                Ok(()) => Ok(NameQuery::Complete),
                Err(err) if err.code() == ERROR_MORE_DATA.to_hresult() => {
                    Ok(NameQuery::BufferTooSmall)
                }
                Err(err) => Err(err.into()),
            }
        }
    }

    /// Cancels pending I/O on a volume handle, e.g. a live journal read
    /// blocked waiting for new records.
    ///
    /// Can be moved into a signal handler that outlives the [`Volume`]; after
    /// the volume is dropped, [`IoCanceller::cancel`] does nothing.
    #[derive(Debug, Clone)]
    pub struct IoCanceller {
        slot: Arc<HandleSlot>,
    }

    impl IoCanceller {
        pub fn cancel(&self) {
            let result = self
                .slot
                .with(|raw| unsafe { CancelIoEx(HANDLE(raw as *mut c_void), None) });
            match result {
                None => debug!("Volume already closed, nothing to cancel"),
                Some(Ok(())) => debug!("Cancelled pending volume I/O"),
                Some(Err(err)) if err.code() == ERROR_NOT_FOUND.to_hresult() => {
                    debug!("No pending volume I/O to cancel")
                }
                Some(Err(err)) => warn!("CancelIoEx failed: {}", err),
            }
        }
    }

    fn open_volume_path(volume_path: &str) -> UsnResult<OwnedHandle> {
        let handle = unsafe {
            CreateFileW(
                &HSTRING::from(volume_path),
                FILE_GENERIC_READ.0,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                None,
                OPEN_EXISTING,
                FILE_FLAGS_AND_ATTRIBUTES::default(),
                None,
            )?
        };
        Ok(OwnedHandle(handle))
    }

    /// Opens a handle to an NTFS/ReFS volume using a drive letter.
    fn get_volume_handle_from_drive_letter(drive_letter: char) -> UsnResult<OwnedHandle> {
        if !privilege::is_elevated()? {
            return Err(UsnError::PermissionError);
        }

        // https://learn.microsoft.com/en-us/windows/win32/fileio/obtaining-a-volume-handle-for-change-journal-operations
        // To obtain a handle to a volume for use with update sequence number (USN) change journal operations,
        // call the CreateFile function with the lpFileName parameter set to a string of the following form: \\.\X:
        open_volume_path(&format!(r"\\.\{}:", drive_letter))
    }

    /// Opens a handle to an NTFS/ReFS volume using a mount point path.
    fn get_volume_handle_from_mount_point(mount_point: &Path) -> UsnResult<OwnedHandle> {
        if !privilege::is_elevated()? {
            return Err(UsnError::PermissionError);
        }

        // GetVolumeNameForVolumeMountPointW requires trailing backslash
        let mount_path = format!(
            "{}\\",
            mount_point.to_string_lossy().trim_end_matches(['\\', '/'])
        );

        let mut volume_name = [0u16; 64]; // Enough space for volume GUID path
        if let Err(err) = unsafe {
            GetVolumeNameForVolumeMountPointW(&HSTRING::from(&mount_path), &mut volume_name)
        } {
            warn!(
                "GetVolumeNameForVolumeMountPointW failed, mount_point={}, error={:?}",
                mount_path, err
            );
            return Err(UsnError::InvalidMountPointError(format!(
                "{}: {}",
                mount_point.display(),
                err.message()
            )));
        }

        let end = volume_name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(volume_name.len());
        let volume_guid = String::from_utf16_lossy(&volume_name[..end]);
        debug!("Volume GUID: {}", volume_guid);

        // CreateFileW opens the volume itself only without the trailing backslash.
        open_volume_path(volume_guid.trim_end_matches('\\'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_letter_forms() {
        for argument in ["c", "C", "c:", "C:", "C:\\", " d:/ "] {
            let expected = argument.trim().chars().next().unwrap().to_ascii_uppercase();
            assert_eq!(
                VolumeSpec::parse(argument).unwrap(),
                VolumeSpec::DriveLetter(expected),
                "{argument:?}"
            );
        }
    }

    #[test]
    fn disarmed_slot_skips_the_call() {
        let slot = HandleSlot::new(0x1F4);
        assert_eq!(slot.with(|raw| raw + 1), Some(0x1F5));

        slot.disarm();
        assert!(!slot.is_armed());
        let mut called = false;
        assert_eq!(slot.with(|_| called = true), None);
        assert!(!called);
    }

    #[test]
    fn everything_else_is_a_mount_point() {
        assert_eq!(
            VolumeSpec::parse("D:\\mnt\\data").unwrap(),
            VolumeSpec::MountPoint(PathBuf::from("D:\\mnt\\data"))
        );
        assert_eq!(
            VolumeSpec::parse("CD").unwrap(),
            VolumeSpec::MountPoint(PathBuf::from("CD"))
        );
        assert!(matches!(
            VolumeSpec::parse("  "),
            Err(UsnError::InvalidMountPointError(_))
        ));
    }
}

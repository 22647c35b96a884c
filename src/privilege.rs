//! Process elevation probe. Change journal control codes require an
//! administrator token.

use std::mem::size_of;

use windows::Win32::{
    Foundation::{CloseHandle, HANDLE},
    Security::{GetTokenInformation, TOKEN_ELEVATION, TOKEN_QUERY, TokenElevation},
    System::Threading::{GetCurrentProcess, OpenProcessToken},
};

/// Returns whether the current process runs with an elevated token.
pub fn is_elevated() -> windows::core::Result<bool> {
    let mut token: HANDLE = HANDLE::default();
    unsafe { OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token)? };

    let mut elevation = TOKEN_ELEVATION::default();
    let mut returned_length = 0;

    let result = unsafe {
        GetTokenInformation(
            token,
            TokenElevation,
            Some(&mut elevation as *mut _ as *mut _),
            size_of::<TOKEN_ELEVATION>() as u32,
            &mut returned_length,
        )
    };
    unsafe { CloseHandle(token) }?;
    result?;

    Ok(elevation.TokenIsElevated != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elevation_probe_succeeds() {
        // Either answer is fine; the token query itself must not fail.
        assert!(is_elevated().is_ok());
    }
}

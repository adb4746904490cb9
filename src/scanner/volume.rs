//! Raw NTFS volume access: opening a volume handle and querying its USN
//! journal metadata. Windows-only; the fallback scanner never touches this.

#![cfg(windows)]

use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_FLAG_BACKUP_SEMANTICS, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows::Win32::System::IO::DeviceIoControl;
use windows::Win32::System::Ioctl::FSCTL_QUERY_USN_JOURNAL;
use windows::core::PCWSTR;

use crate::error::CoreError;

#[derive(Debug)]
pub struct VolumeHandle {
    handle: HANDLE,
}

// SAFETY: NTFS volume handles are safe to use across threads; the underlying
// kernel object is thread-safe.
unsafe impl Send for VolumeHandle {}

impl Drop for VolumeHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}

impl VolumeHandle {
    pub fn raw(&self) -> HANDLE {
        self.handle
    }
}

#[derive(Debug, Clone)]
pub struct UsnJournalData {
    pub journal_id: u64,
    pub first_usn: i64,
    pub next_usn: i64,
    pub max_usn: i64,
}

/// Open a raw volume handle for the given drive letter (e.g. 'C').
pub fn open_volume(drive_letter: char) -> Result<VolumeHandle, CoreError> {
    let path: Vec<u16> = format!("\\\\.\\{}:", drive_letter)
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect();

    let handle = unsafe {
        CreateFileW(
            PCWSTR(path.as_ptr()),
            0x80000000, // GENERIC_READ
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            None,
            OPEN_EXISTING,
            FILE_FLAG_BACKUP_SEMANTICS,
            None,
        )
        .map_err(|e| CoreError::VolumeOpen { drive: drive_letter, source: e.to_string() })?
    };

    Ok(VolumeHandle { handle })
}

/// Query the USN journal metadata for the given volume.
pub fn query_usn_journal(vol: &VolumeHandle, drive_letter: char) -> Result<UsnJournalData, CoreError> {
    // USN_JOURNAL_DATA_V0: UsnJournalID, FirstUsn, NextUsn, LowestValidUsn,
    // MaxUsn, MaximumSize, AllocationDelta — 56 bytes total.
    let mut buffer = [0u8; 56];
    let mut bytes_returned: u32 = 0;

    let ok = unsafe {
        DeviceIoControl(
            vol.raw(),
            FSCTL_QUERY_USN_JOURNAL,
            None,
            0,
            Some(buffer.as_mut_ptr() as *mut _),
            buffer.len() as u32,
            Some(&mut bytes_returned),
            None,
        )
    };

    if let Err(e) = ok {
        return Err(CoreError::JournalQuery { drive: drive_letter, source: e.to_string() });
    }
    if (bytes_returned as usize) < 56 {
        return Err(CoreError::JournalQuery {
            drive: drive_letter,
            source: format!("short read: {bytes_returned} bytes, expected 56"),
        });
    }

    let journal_id = u64::from_le_bytes(buffer[0..8].try_into().unwrap());
    let first_usn = i64::from_le_bytes(buffer[8..16].try_into().unwrap());
    let next_usn = i64::from_le_bytes(buffer[16..24].try_into().unwrap());
    let max_usn = i64::from_le_bytes(buffer[32..40].try_into().unwrap());

    Ok(UsnJournalData { journal_id, first_usn, next_usn, max_usn })
}

#[cfg(windows)]
pub mod volume;
#[cfg(windows)]
pub mod mft;
pub mod path_resolver;
pub mod fallback;
pub mod metadata;

use crate::config::{Capabilities, ScanConfig};
use crate::dircache::DirCache;
use crate::model::FileRecord;

/// Result of scanning one drive, including whatever the USN watcher needs to
/// resume cheaply afterward.
pub struct DriveScanResult {
    pub drive: char,
    pub records: Vec<FileRecord>,
    pub used_mft: bool,
    /// Present only when the MFT path ran; the fallback walk has no FRNs to
    /// build one from. Callers persist this via [`crate::dircache::save`] so
    /// the next startup can try [`scan_drive_cached`] instead of a full scan.
    pub dir_cache: Option<DirCache>,
}

/// Scan a single drive, preferring the MFT path and falling back to a
/// portable directory walk when the volume can't be opened raw (no
/// privileges, non-NTFS, or the journal query fails).
pub fn scan_drive(drive: char, config: &ScanConfig, caps: Capabilities) -> DriveScanResult {
    scan_drive_cached(drive, config, caps, None)
}

/// Like [`scan_drive`], but given a previously persisted [`DirCache`], tries
/// to reconstruct the drive's tree from it instead of re-enumerating the
/// MFT. Falls back to a full MFT scan if the cache is stale (journal
/// wrapped, volume signature mismatch), and to the portable walk below that
/// if the MFT path isn't usable at all.
pub fn scan_drive_cached(drive: char, config: &ScanConfig, caps: Capabilities, cached: Option<&DirCache>) -> DriveScanResult {
    #[cfg(windows)]
    {
        if caps.mft_available {
            if let Some(cache) = cached {
                if let Ok(output) = mft::scan_drive_from_cache(drive, config, cache) {
                    return DriveScanResult { drive, records: output.records, used_mft: true, dir_cache: Some(output.dir_cache) };
                }
            }
            match mft::scan_drive(drive, config) {
                Ok(output) => {
                    return DriveScanResult { drive, records: output.records, used_mft: true, dir_cache: Some(output.dir_cache) };
                }
                Err(_) => {
                    // fall through to portable walk below
                }
            }
        }
    }
    let _ = caps;
    let _ = cached;

    let root = format!("{}:\\", drive);
    let records = fallback::scan_root(&root, config, drive);
    DriveScanResult { drive, records, used_mft: false, dir_cache: None }
}

/// Probe which optional subsystems are usable in the current process. Run
/// once at startup; the result is a plain value, never a mutable global.
pub fn probe_capabilities() -> Capabilities {
    #[cfg(windows)]
    let mft_available = volume::open_volume('C')
        .and_then(|v| volume::query_usn_journal(&v, 'C'))
        .is_ok();
    #[cfg(not(windows))]
    let mft_available = false;

    Capabilities { mft_available, fts_available: true }
}

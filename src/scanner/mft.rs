//! NTFS Master File Table enumeration via `FSCTL_ENUM_USN_DATA`, and the
//! two-pass scan that turns raw MFT records into filtered `FileRecord`s.

#![cfg(windows)]

use std::collections::{HashMap, HashSet};
use std::mem;

use windows::Win32::Foundation::HANDLE;
use windows::Win32::System::IO::DeviceIoControl;
use windows::Win32::System::Ioctl::FSCTL_ENUM_USN_DATA;

use super::path_resolver::PathResolver;
use super::volume;
use crate::config::ScanConfig;
use crate::dircache::DirCache;
use crate::error::CoreError;
use crate::filter;
use crate::model::{FileRecord, MftRawRecord};

const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x10;

#[repr(C)]
struct MftEnumDataV0 {
    start_file_reference_number: u64,
    low_usn: i64,
    high_usn: i64,
}

/// Enumerate every MFT record on the open volume, invoking `callback` for
/// each one that parses. Terminates when the volume reports no more records.
fn enumerate_mft(handle: HANDLE, mut callback: impl FnMut(MftRawRecord)) {
    let mut med = MftEnumDataV0 { start_file_reference_number: 0, low_usn: 0, high_usn: i64::MAX };
    let mut buffer: Vec<u8> = vec![0u8; 1024 * 1024];

    loop {
        let mut bytes_returned: u32 = 0;
        let result = unsafe {
            DeviceIoControl(
                handle,
                FSCTL_ENUM_USN_DATA,
                Some(&med as *const _ as *const _),
                mem::size_of::<MftEnumDataV0>() as u32,
                Some(buffer.as_mut_ptr() as *mut _),
                buffer.len() as u32,
                Some(&mut bytes_returned),
                None,
            )
        };

        if result.is_err() || bytes_returned < 8 {
            break;
        }

        let next_frn = u64::from_le_bytes(buffer[0..8].try_into().unwrap());
        let mut offset = 8usize;
        while offset + 4 <= bytes_returned as usize {
            let record_len = u32::from_le_bytes(buffer[offset..offset + 4].try_into().unwrap()) as usize;
            if record_len < 64 || offset + record_len > bytes_returned as usize {
                break;
            }
            if let Some(record) = parse_usn_record_v2(&buffer[offset..offset + record_len]) {
                callback(record);
            }
            offset += record_len;
        }

        med.start_file_reference_number = next_frn;
    }
}

fn parse_usn_record_v2(data: &[u8]) -> Option<MftRawRecord> {
    if data.len() < 64 {
        return None;
    }

    let major = u16::from_le_bytes(data[4..6].try_into().ok()?);
    if major != 2 {
        return None;
    }

    let frn = u64::from_le_bytes(data[8..16].try_into().ok()?) & 0x0000_FFFF_FFFF_FFFF;
    let parent_frn = u64::from_le_bytes(data[16..24].try_into().ok()?) & 0x0000_FFFF_FFFF_FFFF;

    let filetime_raw = i64::from_le_bytes(data[32..40].try_into().ok()?);
    let mtime = if filetime_raw > 0 { Some(filetime_to_unix(filetime_raw)) } else { None };

    let attributes = u32::from_le_bytes(data[52..56].try_into().ok()?);

    let name_len = u16::from_le_bytes(data[56..58].try_into().ok()?) as usize;
    let name_offset = u16::from_le_bytes(data[58..60].try_into().ok()?) as usize;
    if name_offset + name_len > data.len() || name_len == 0 {
        return None;
    }

    let name_bytes = &data[name_offset..name_offset + name_len];
    let utf16: Vec<u16> = name_bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
    let name = String::from_utf16_lossy(&utf16);

    if filter::should_skip_name(&name) {
        return None;
    }

    Some(MftRawRecord {
        frn,
        parent_frn,
        name,
        is_dir: (attributes & FILE_ATTRIBUTE_DIRECTORY) != 0,
        mtime: mtime.map(|t| t as f64),
    })
}

pub fn filetime_to_unix(filetime: i64) -> i64 {
    const FILETIME_UNIX_DIFF: i64 = 116_444_736_000_000_000;
    if filetime <= FILETIME_UNIX_DIFF {
        return 0;
    }
    (filetime - FILETIME_UNIX_DIFF) / 10_000_000
}

pub struct MftScanOutput {
    pub records: Vec<FileRecord>,
    /// FRN -> {parent, name, is_dir} for every record seen this pass, plus
    /// the journal position to resume from — persisted so the next startup
    /// can skip a full re-enumeration (see [`scan_drive_from_cache`]).
    pub dir_cache: DirCache,
}

/// Scan a single drive via the MFT. Fails fast if the volume cannot be
/// opened or its journal queried; callers fall back to [`super::fallback`].
pub fn scan_drive(drive: char, config: &ScanConfig) -> Result<MftScanOutput, CoreError> {
    let vol = volume::open_volume(drive)?;
    let journal = volume::query_usn_journal(&vol, drive)?;

    let drive_prefix = format!("{}:", drive);
    let mut resolver = PathResolver::with_capacity(&drive_prefix, 300_000);
    let mut dir_entries: Vec<(u64, Option<f64>)> = Vec::new();
    let mut file_entries: Vec<(u64, u64, String, Option<f64>)> = Vec::new();

    enumerate_mft(vol.raw(), |record| {
        if record.is_dir {
            dir_entries.push((record.frn, record.mtime));
            resolver.add_record(record.frn, record.parent_frn, record.name);
        } else {
            file_entries.push((record.frn, record.parent_frn, record.name, record.mtime));
        }
    });

    let allow_list = config.allow_list_for(drive);
    let root_frn = PathResolver::new(&drive_prefix).find_frn_by_path(&drive_prefix).unwrap_or(crate::scanner::path_resolver::NTFS_ROOT_FRN);

    let skip_names: Vec<&str> = filter::SKIP_DIRS.to_vec();
    let dir_subtree = resolver.collect_subtree_pruned(root_frn, &skip_names, &HashSet::new());

    resolver.drop_children_map();
    for &frn in &dir_subtree {
        let _ = resolver.resolve(frn);
    }
    // Snapshot the dir FRN -> (parent, name) map for the persisted DirCache
    // before dropping it; path resolution above no longer needs it.
    let dir_frn_entries = resolver.export_frn_map();
    resolver.drop_frn_map();

    let path_cache = resolver.path_cache().clone();

    let mut records = Vec::with_capacity(dir_subtree.len() + file_entries.len());
    for (frn, mtime) in &dir_entries {
        if !dir_subtree.contains(frn) {
            continue;
        }
        let Some(full_path) = path_cache.get(frn) else { continue };
        if full_path == &drive_prefix {
            continue; // root itself is implicit, not an entry
        }
        let name = filter::path_segment_name(full_path);
        if filter::should_skip_dir(name, Some(full_path.as_str()), allow_list) {
            continue;
        }
        let parent = parent_of(full_path);
        records.push(FileRecord::new_dir(name, full_path.clone(), parent, mtime.unwrap_or(0.0)));
    }

    for (_frn, parent_frn, name, mtime) in &file_entries {
        if !dir_subtree.contains(parent_frn) {
            continue;
        }
        let Some(parent_path) = path_cache.get(parent_frn) else { continue };
        let full_path = format!("{}\\{}", parent_path, name);
        if filter::should_skip_path(&full_path, allow_list) {
            continue;
        }
        let ext = crate::model::extension_of(name);
        if filter::should_skip_ext(&ext) {
            continue;
        }
        records.push(FileRecord::new_file(name, full_path, parent_path.clone(), 0, mtime.unwrap_or(0.0)));
    }

    super::metadata::fill_file_metadata(&mut records);

    let dir_cache = build_dir_cache(&journal, &dir_frn_entries, &file_entries);

    Ok(MftScanOutput { records, dir_cache })
}

/// Reconstruct a drive's directory tree and file list directly from a
/// previously persisted [`DirCache`] instead of re-enumerating the MFT,
/// when the journal hasn't wrapped since the cache was written. Returns
/// `Err` (never panics) when the cache is stale, so the caller falls back
/// to [`scan_drive`].
pub fn scan_drive_from_cache(drive: char, config: &ScanConfig, cache: &DirCache) -> Result<MftScanOutput, CoreError> {
    let vol = volume::open_volume(drive)?;
    let journal = volume::query_usn_journal(&vol, drive)?;

    if journal.journal_id != cache.volume_signature {
        return Err(CoreError::UsnWraparound { drive });
    }

    let drive_prefix = format!("{}:", drive);
    let mut resolver = PathResolver::with_capacity(&drive_prefix, cache.parent.len());
    for (&frn, &parent_frn) in &cache.parent {
        if cache.is_dir.get(&frn).copied().unwrap_or(false) {
            if let Some(name) = cache.name.get(&frn) {
                resolver.add_record(frn, parent_frn, name.clone());
            }
        }
    }

    let allow_list = config.allow_list_for(drive);
    let root_frn = resolver.find_frn_by_path(&drive_prefix).unwrap_or(crate::scanner::path_resolver::NTFS_ROOT_FRN);
    let skip_names: Vec<&str> = filter::SKIP_DIRS.to_vec();
    let dir_subtree = resolver.collect_subtree_pruned(root_frn, &skip_names, &HashSet::new());

    resolver.drop_children_map();
    for &frn in &dir_subtree {
        let _ = resolver.resolve(frn);
    }
    let path_cache = resolver.path_cache().clone();
    resolver.drop_frn_map();

    let mut records = Vec::with_capacity(cache.parent.len());
    for &frn in &dir_subtree {
        let Some(full_path) = path_cache.get(&frn) else { continue };
        if full_path == &drive_prefix {
            continue;
        }
        let name = filter::path_segment_name(full_path);
        if filter::should_skip_dir(name, Some(full_path.as_str()), allow_list) {
            continue;
        }
        let parent = parent_of(full_path);
        records.push(FileRecord::new_dir(name, full_path.clone(), parent, 0.0));
    }

    for (&frn, &parent_frn) in &cache.parent {
        if cache.is_dir.get(&frn).copied().unwrap_or(false) {
            continue;
        }
        if !dir_subtree.contains(&parent_frn) {
            continue;
        }
        let (Some(name), Some(parent_path)) = (cache.name.get(&frn), path_cache.get(&parent_frn)) else { continue };
        let full_path = format!("{}\\{}", parent_path, name);
        if filter::should_skip_path(&full_path, allow_list) {
            continue;
        }
        let ext = crate::model::extension_of(name);
        if filter::should_skip_ext(&ext) {
            continue;
        }
        records.push(FileRecord::new_file(name, full_path, parent_path.clone(), 0, 0.0));
    }

    super::metadata::fill_file_metadata(&mut records);

    // Carry the cache's own maps forward unchanged: the records above were
    // rebuilt from them, not from a fresh enumeration, so nothing new to
    // persist beyond the refreshed journal position.
    let dir_cache = DirCache {
        volume_signature: journal.journal_id,
        last_usn: journal.next_usn,
        journal_id: journal.journal_id,
        parent: cache.parent.clone(),
        name: cache.name.clone(),
        is_dir: cache.is_dir.clone(),
    };

    Ok(MftScanOutput { records, dir_cache })
}

fn build_dir_cache(
    journal: &volume::UsnJournalData,
    dir_frn_entries: &[(u64, u64, String)],
    file_entries: &[(u64, u64, String, Option<f64>)],
) -> DirCache {
    let capacity = dir_frn_entries.len() + file_entries.len();
    let mut parent = HashMap::with_capacity(capacity);
    let mut name = HashMap::with_capacity(capacity);
    let mut is_dir = HashMap::with_capacity(capacity);

    for (frn, parent_frn, entry_name) in dir_frn_entries {
        parent.insert(*frn, *parent_frn);
        name.insert(*frn, entry_name.clone());
        is_dir.insert(*frn, true);
    }
    for (frn, parent_frn, entry_name, _mtime) in file_entries {
        parent.insert(*frn, *parent_frn);
        name.insert(*frn, entry_name.clone());
        is_dir.insert(*frn, false);
    }

    DirCache { volume_signature: journal.journal_id, last_usn: journal.next_usn, journal_id: journal.journal_id, parent, name, is_dir }
}

fn parent_of(path: &str) -> String {
    match path.rfind('\\') {
        Some(pos) => path[..pos].to_string(),
        None => String::new(),
    }
}

//! USN journal poll loop: the live side of the catalog. Reads journal
//! records since the last known position, batches them into catalog
//! mutations, and emits `CoreEvent::FilesChanged`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::catalog::Catalog;
use crate::config::ScanConfig;
use crate::error::CoreResult;
use crate::events::{CoreEvent, EventSink};
use crate::model::FileRecord;

const POLL_IDLE_MAX: Duration = Duration::from_secs(2);
const POLL_BUSY: Duration = Duration::from_millis(100);
const IDLE_BACKOFF_FACTOR: f64 = 1.3;
const IDLE_BACKOFF_STEPS: u32 = 10;
const RENAME_PAIR_TIMEOUT: Duration = Duration::from_millis(500);

/// Bounds on the per-event supplemental scan fired when a directory is
/// created or restored: the journal only reports the directory's own create
/// event, never a backfill of whatever the directory already contains.
const SUPPLEMENTAL_MAX_ITEMS: usize = 200_000;
const SUPPLEMENTAL_MAX_DEPTH: usize = 15;
const SUPPLEMENTAL_MAX_DURATION: Duration = Duration::from_millis(500);

/// Handle to a running watcher thread. Dropping it does not stop the
/// thread; call [`WatcherHandle::stop`] explicitly.
pub struct WatcherHandle {
    stop_flag: Arc<AtomicBool>,
}

impl WatcherHandle {
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }
}

/// Start watching `drive` from its current journal position.
pub fn start(
    drive: char,
    catalog: Catalog,
    config: ScanConfig,
    sink: EventSink,
) -> CoreResult<WatcherHandle> {
    platform::start(drive, catalog, config, sink)
}

/// Start watching `drive`, resuming from a previously persisted USN
/// position and journal id. Returns `Err` if the journal was reset in the
/// meantime (wraparound), in which case the caller must rebuild the drive.
pub fn start_with_resume(
    drive: char,
    catalog: Catalog,
    config: ScanConfig,
    sink: EventSink,
    stored_usn: i64,
    stored_journal_id: u64,
) -> CoreResult<WatcherHandle> {
    platform::start_with_resume(drive, catalog, config, sink, stored_usn, stored_journal_id)
}

/// One journal record translated into a pending mutation, before the
/// rename-pairing and debounce steps collapse it with others.
enum PendingChange {
    Create(String, bool),
    Delete(String),
    Rename { old: String, new: String, new_is_dir: bool },
}

struct RenamePending {
    old_path: String,
    created_at: Instant,
}

fn cleanup_expired_renames(pending: &mut std::collections::HashMap<u64, RenamePending>, out: &mut Vec<PendingChange>) {
    let expired: Vec<u64> =
        pending.iter().filter(|(_, v)| v.created_at.elapsed() >= RENAME_PAIR_TIMEOUT).map(|(k, _)| *k).collect();
    for frn in expired {
        if let Some(p) = pending.remove(&frn) {
            out.push(PendingChange::Delete(p.old_path));
        }
    }
}

/// Deduplicate a batch of pending changes (last write per path wins), apply
/// each allowed one to the catalog, and report what actually changed.
fn apply_changes(catalog: &Catalog, config: &ScanConfig, drive: char, changes: Vec<PendingChange>, sink: &EventSink) {
    use std::collections::HashMap;

    if changes.is_empty() {
        return;
    }

    let mut deduped: HashMap<String, PendingChange> = HashMap::new();
    for change in changes {
        match change {
            PendingChange::Create(path, is_dir) => {
                deduped.insert(path.clone(), PendingChange::Create(path, is_dir));
            }
            PendingChange::Delete(path) => {
                deduped.insert(path.clone(), PendingChange::Delete(path));
            }
            PendingChange::Rename { old, new, new_is_dir } => {
                deduped.insert(old.clone(), PendingChange::Delete(old));
                deduped.insert(new.clone(), PendingChange::Create(new, new_is_dir));
            }
        }
    }

    let allow_list = config.allow_list_for(drive);
    let mut to_upsert: Vec<FileRecord> = Vec::new();
    let mut to_delete: Vec<String> = Vec::new();

    for (_, change) in deduped {
        match change {
            PendingChange::Create(path, is_dir) => {
                if crate::filter::should_skip_path(&path, allow_list) {
                    continue;
                }
                let name = crate::filter::path_segment_name(&path);
                if crate::filter::should_skip_name(name) {
                    continue;
                }
                if !is_dir {
                    let ext = crate::model::extension_of(name);
                    if crate::filter::should_skip_ext(&ext) {
                        continue;
                    }
                }
                match std::fs::metadata(&path) {
                    Ok(meta) => {
                        let parent = parent_of(&path);
                        if meta.is_dir() {
                            to_upsert.push(FileRecord::new_dir(name, path.clone(), parent, mtime_of(&meta)));
                            to_upsert.extend(supplemental_scan(&path, allow_list));
                        } else {
                            to_upsert.push(FileRecord::new_file(name, path.clone(), parent, meta.len(), mtime_of(&meta)));
                        }
                    }
                    Err(_) => to_delete.push(path),
                }
            }
            PendingChange::Delete(path) => to_delete.push(path),
            PendingChange::Rename { .. } => unreachable!("renames are decomposed before this point"),
        }
    }

    let mut added = 0u64;
    let mut deleted = 0u64;
    if !to_upsert.is_empty() {
        added = catalog.upsert_rows(&to_upsert).unwrap_or(0) as u64;
    }
    if !to_delete.is_empty() {
        deleted = catalog.delete_paths(&to_delete).unwrap_or(0) as u64;
    }

    if added > 0 || deleted > 0 {
        sink.emit(CoreEvent::FilesChanged { added, deleted, deleted_paths: to_delete });
    }
}

/// Bounded walk of a directory's contents at the moment it's created or
/// restored, to synthesize the child create events the journal never emits
/// for this case. Bounded by item count, depth, and wall time so a huge
/// restored tree degrades to "index what we can" instead of stalling the
/// poll loop — anything left over is still picked up by the ordinary
/// journal events its own children generate, or by the next full rebuild.
fn supplemental_scan(root: &str, allow_list: Option<&[std::path::PathBuf]>) -> Vec<FileRecord> {
    use std::sync::atomic::AtomicUsize;

    let started = Instant::now();
    let seen = AtomicUsize::new(0);
    let mut out = Vec::new();

    let walker = jwalk::WalkDir::new(root)
        .follow_links(false)
        .max_depth(SUPPLEMENTAL_MAX_DEPTH)
        .process_read_dir(move |_depth, _path, _read_dir_state, children| {
            if seen.load(Ordering::Acquire) >= SUPPLEMENTAL_MAX_ITEMS || started.elapsed() >= SUPPLEMENTAL_MAX_DURATION {
                children.clear();
                return;
            }
            children.retain(|entry_result| {
                let Ok(entry) = entry_result else { return true };
                let Some(name) = entry.file_name.to_str() else { return false };
                if crate::filter::should_skip_name(name) {
                    return false;
                }
                if entry.file_type.is_dir() {
                    let path_str = entry.path().to_string_lossy().replace('/', "\\");
                    !crate::filter::should_skip_dir(name, Some(&path_str), allow_list)
                } else {
                    true
                }
            });
            seen.fetch_add(children.len(), Ordering::AcqRel);
        });

    let root_trimmed = root.trim_end_matches(['\\', '/']);
    let deadline = Instant::now() + SUPPLEMENTAL_MAX_DURATION;

    for entry in walker.into_iter().filter_map(Result::ok) {
        if out.len() >= SUPPLEMENTAL_MAX_ITEMS || Instant::now() >= deadline {
            break;
        }
        let Some(name) = entry.file_name.to_str() else { continue };
        if crate::filter::should_skip_name(name) {
            continue;
        }
        let path = entry.path();
        let full_path = path.to_string_lossy().replace('/', "\\");
        if full_path.trim_end_matches(['\\', '/']) == root_trimmed {
            continue;
        }
        if crate::filter::should_skip_path(&full_path, allow_list) {
            continue;
        }

        let meta = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(_) => continue,
        };
        let parent = path.parent().map(|p| p.to_string_lossy().replace('/', "\\")).unwrap_or_default();

        if entry.file_type.is_dir() {
            out.push(FileRecord::new_dir(name, full_path, parent, mtime_of(&meta)));
        } else {
            let ext = crate::model::extension_of(name);
            if crate::filter::should_skip_ext(&ext) {
                continue;
            }
            out.push(FileRecord::new_file(name, full_path, parent, meta.len(), mtime_of(&meta)));
        }
    }

    out
}

fn parent_of(path: &str) -> String {
    match path.rfind(['\\', '/']) {
        Some(pos) => path[..pos].to_string(),
        None => String::new(),
    }
}

fn mtime_of(meta: &std::fs::Metadata) -> f64 {
    meta.modified().ok().and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok()).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

/// Adaptive idle backoff: 100ms busy poll, decaying by 1.3x per empty poll
/// up to a 2s ceiling, capped at 10 idle steps before holding steady.
struct IdleBackoff {
    steps: u32,
}

impl IdleBackoff {
    fn new() -> Self {
        Self { steps: 0 }
    }

    fn on_activity(&mut self) {
        self.steps = 0;
    }

    fn on_idle(&mut self) -> Duration {
        if self.steps < IDLE_BACKOFF_STEPS {
            self.steps += 1;
        }
        let scaled = POLL_BUSY.as_secs_f64() * IDLE_BACKOFF_FACTOR.powi(self.steps as i32);
        Duration::from_secs_f64(scaled.min(POLL_IDLE_MAX.as_secs_f64()))
    }
}

#[cfg(windows)]
mod platform {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::mem;

    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::System::IO::DeviceIoControl;
    use windows::Win32::System::Ioctl::FSCTL_READ_USN_JOURNAL;

    use crate::catalog::schema;
    use crate::error::CoreError;
    use crate::scanner::volume;

    const USN_REASON_FILE_CREATE: u32 = 0x0000_0100;
    const USN_REASON_FILE_DELETE: u32 = 0x0000_0200;
    const USN_REASON_RENAME_OLD_NAME: u32 = 0x0000_1000;
    const USN_REASON_RENAME_NEW_NAME: u32 = 0x0000_2000;

    #[repr(C)]
    struct ReadUsnJournalDataV0 {
        start_usn: i64,
        reason_mask: u32,
        return_only_on_close: u32,
        timeout: u64,
        bytes_to_wait_for: u64,
        usn_journal_id: u64,
    }

    struct UsnChangeRecord {
        frn: u64,
        parent_frn: u64,
        usn: i64,
        reason: u32,
        name: String,
    }

    pub fn start(drive: char, catalog: Catalog, config: ScanConfig, sink: EventSink) -> CoreResult<WatcherHandle> {
        let vol = volume::open_volume(drive)?;
        let journal = volume::query_usn_journal(&vol, drive)?;
        Ok(spawn_poll_loop(drive, catalog, config, sink, vol, journal.next_usn, journal.journal_id))
    }

    pub fn start_with_resume(
        drive: char,
        catalog: Catalog,
        config: ScanConfig,
        sink: EventSink,
        stored_usn: i64,
        stored_journal_id: u64,
    ) -> CoreResult<WatcherHandle> {
        let vol = volume::open_volume(drive)?;
        let journal = volume::query_usn_journal(&vol, drive)?;

        if journal.journal_id != stored_journal_id || stored_usn < journal.first_usn {
            return Err(CoreError::UsnWraparound { drive });
        }

        Ok(spawn_poll_loop(drive, catalog, config, sink, vol, stored_usn, journal.journal_id))
    }

    fn spawn_poll_loop(
        drive: char,
        catalog: Catalog,
        config: ScanConfig,
        sink: EventSink,
        vol: volume::VolumeHandle,
        initial_usn: i64,
        journal_id: u64,
    ) -> WatcherHandle {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let thread_stop = stop_flag.clone();

        std::thread::spawn(move || {
            poll_loop(drive, &catalog, &config, &sink, &vol, initial_usn, journal_id, &thread_stop);
        });

        WatcherHandle { stop_flag }
    }

    fn poll_loop(
        drive: char,
        catalog: &Catalog,
        config: &ScanConfig,
        sink: &EventSink,
        vol: &volume::VolumeHandle,
        initial_usn: i64,
        journal_id: u64,
        stop_flag: &AtomicBool,
    ) {
        let mut last_usn = initial_usn;
        let mut pending: Vec<PendingChange> = Vec::new();
        let mut pending_renames: HashMap<u64, RenamePending> = HashMap::new();
        let mut backoff = IdleBackoff::new();
        let mut reusable_buffer = vec![0u8; 64 * 1024];

        loop {
            if stop_flag.load(Ordering::Acquire) {
                break;
            }

            if catalog.get_stats().map(|s| s.is_building).unwrap_or(false) {
                std::thread::sleep(Duration::from_secs(1));
                continue;
            }

            let records = match read_usn_journal(vol.raw(), last_usn, journal_id, &mut reusable_buffer) {
                Ok(r) => r,
                Err(_) => {
                    std::thread::sleep(Duration::from_secs(1));
                    continue;
                }
            };

            if records.is_empty() {
                let _ = cleanup_expired_renames(&mut pending_renames, &mut pending);
                if !pending.is_empty() {
                    let batch = std::mem::take(&mut pending);
                    apply_changes(catalog, config, drive, batch, sink);
                }
                std::thread::sleep(backoff.on_idle());
                continue;
            }

            backoff.on_activity();

            for record in &records {
                last_usn = record.usn;
                let Some(parent_path) = frn_to_path(vol.raw(), record.parent_frn) else { continue };
                let full_path = format!("{}\\{}", parent_path, record.name);

                let allow_list = config.allow_list_for(drive);
                if crate::filter::should_skip_path(&full_path, allow_list) {
                    continue;
                }

                let reason = record.reason;
                if reason & (USN_REASON_RENAME_OLD_NAME | USN_REASON_RENAME_NEW_NAME) != 0 {
                    if reason & USN_REASON_RENAME_OLD_NAME != 0 {
                        cleanup_expired_renames(&mut pending_renames, &mut pending);
                        pending_renames.insert(record.frn, RenamePending { old_path: full_path, created_at: Instant::now() });
                    } else if let Some(old) = pending_renames.remove(&record.frn) {
                        let new_is_dir = std::fs::metadata(&full_path).map(|m| m.is_dir()).unwrap_or(false);
                        pending.push(PendingChange::Rename { old: old.old_path, new: full_path, new_is_dir });
                    } else {
                        let is_dir = std::fs::metadata(&full_path).map(|m| m.is_dir()).unwrap_or(false);
                        pending.push(PendingChange::Create(full_path, is_dir));
                    }
                    continue;
                }
                if reason & USN_REASON_FILE_DELETE != 0 {
                    pending.push(PendingChange::Delete(full_path));
                    continue;
                }
                if reason & USN_REASON_FILE_CREATE != 0 {
                    let is_dir = std::fs::metadata(&full_path).map(|m| m.is_dir()).unwrap_or(false);
                    pending.push(PendingChange::Create(full_path, is_dir));
                }
            }

            cleanup_expired_renames(&mut pending_renames, &mut pending);
            if !pending.is_empty() {
                let batch = std::mem::take(&mut pending);
                apply_changes(catalog, config, drive, batch, sink);
            }

            if let Ok(conn) = schema::db_connection(&catalog.get_stats().map(|s| s.db_path).unwrap_or_default()) {
                let _ = schema::set_meta(&conn, &format!("usn_last_{drive}"), &last_usn.to_string());
                let _ = schema::set_meta(&conn, &format!("usn_journal_id_{drive}"), &journal_id.to_string());
                // Watermark for a bounded catch-up pass if this drive's MFT
                // enumeration fails the next time the process starts.
                let _ = schema::set_meta(&conn, &format!("win_last_active_ts_{drive}"), &now_epoch().to_string());
            }
        }
    }

    fn now_epoch() -> i64 {
        std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
    }

    fn read_usn_journal(handle: HANDLE, start_usn: i64, journal_id: u64, buffer: &mut [u8]) -> Result<Vec<UsnChangeRecord>, CoreError> {
        let read_data = ReadUsnJournalDataV0 {
            start_usn,
            reason_mask: USN_REASON_FILE_CREATE | USN_REASON_FILE_DELETE | USN_REASON_RENAME_OLD_NAME | USN_REASON_RENAME_NEW_NAME,
            return_only_on_close: 0,
            timeout: 0,
            bytes_to_wait_for: 0,
            usn_journal_id: journal_id,
        };

        let mut bytes_returned: u32 = 0;
        let result = unsafe {
            DeviceIoControl(
                handle,
                FSCTL_READ_USN_JOURNAL,
                Some(&read_data as *const _ as *const _),
                mem::size_of::<ReadUsnJournalDataV0>() as u32,
                Some(buffer.as_mut_ptr() as *mut _),
                buffer.len() as u32,
                Some(&mut bytes_returned),
                None,
            )
        };

        if result.is_err() || bytes_returned < 8 {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        let mut offset = 8usize;
        while offset + 4 <= bytes_returned as usize {
            let record_len = u32::from_le_bytes(buffer[offset..offset + 4].try_into().unwrap()) as usize;
            if record_len < 64 || offset + record_len > bytes_returned as usize {
                break;
            }
            if let Some(record) = parse_usn_change_record(&buffer[offset..offset + record_len]) {
                records.push(record);
            }
            offset += record_len;
        }
        Ok(records)
    }

    fn parse_usn_change_record(data: &[u8]) -> Option<UsnChangeRecord> {
        if data.len() < 64 {
            return None;
        }
        let major = u16::from_le_bytes(data[4..6].try_into().ok()?);
        if major != 2 {
            return None;
        }
        let frn = u64::from_le_bytes(data[8..16].try_into().ok()?) & 0x0000_FFFF_FFFF_FFFF;
        let parent_frn = u64::from_le_bytes(data[16..24].try_into().ok()?) & 0x0000_FFFF_FFFF_FFFF;
        let usn = i64::from_le_bytes(data[24..32].try_into().ok()?);
        let reason = u32::from_le_bytes(data[40..44].try_into().ok()?);

        let name_len = u16::from_le_bytes(data[56..58].try_into().ok()?) as usize;
        let name_offset = u16::from_le_bytes(data[58..60].try_into().ok()?) as usize;
        if name_offset + name_len > data.len() || name_len == 0 {
            return None;
        }
        let name_bytes = &data[name_offset..name_offset + name_len];
        let utf16: Vec<u16> = name_bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
        let name = String::from_utf16_lossy(&utf16);
        if name.starts_with('$') {
            return None;
        }

        Some(UsnChangeRecord { frn, parent_frn, usn, reason, name })
    }

    /// Resolve a File Reference Number to a directory path via
    /// `OpenFileById` + `GetFinalPathNameByHandleW`.
    fn frn_to_path(volume_handle: HANDLE, frn: u64) -> Option<String> {
        use windows::Win32::Foundation::CloseHandle;
        use windows::Win32::Storage::FileSystem::{
            GetFinalPathNameByHandleW, OpenFileById, FILE_FLAG_BACKUP_SEMANTICS, FILE_ID_DESCRIPTOR,
            FILE_ID_DESCRIPTOR_0, FILE_ID_TYPE, FILE_NAME_NORMALIZED, FILE_SHARE_READ, FILE_SHARE_WRITE,
        };

        let file_id = FILE_ID_DESCRIPTOR {
            dwSize: mem::size_of::<FILE_ID_DESCRIPTOR>() as u32,
            Type: FILE_ID_TYPE(0),
            Anonymous: FILE_ID_DESCRIPTOR_0 { FileId: frn as i64 },
        };

        let handle = unsafe {
            OpenFileById(volume_handle, &file_id, 0, FILE_SHARE_READ | FILE_SHARE_WRITE, None, FILE_FLAG_BACKUP_SEMANTICS).ok()?
        };

        let mut buf = vec![0u16; 512];
        let len = unsafe { GetFinalPathNameByHandleW(handle, &mut buf, FILE_NAME_NORMALIZED) };
        unsafe {
            let _ = CloseHandle(handle);
        }

        if len == 0 || len as usize > buf.len() {
            return None;
        }
        let path_str = String::from_utf16_lossy(&buf[..len as usize]);
        let cleaned = path_str.strip_prefix(r"\\?\").unwrap_or(&path_str);
        Some(cleaned.to_string())
    }
}

#[cfg(not(windows))]
mod platform {
    use super::*;

    /// There is no USN journal off Windows; the watcher has nothing to
    /// poll. Returns a handle whose `stop` is a no-op.
    pub fn start(_drive: char, _catalog: Catalog, _config: ScanConfig, _sink: EventSink) -> CoreResult<WatcherHandle> {
        Ok(WatcherHandle { stop_flag: Arc::new(AtomicBool::new(true)) })
    }

    pub fn start_with_resume(
        drive: char,
        catalog: Catalog,
        config: ScanConfig,
        sink: EventSink,
        _stored_usn: i64,
        _stored_journal_id: u64,
    ) -> CoreResult<WatcherHandle> {
        start(drive, catalog, config, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supplemental_scan_picks_up_preexisting_children() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("a.txt"), b"abc").unwrap();
        std::fs::write(root.join("sub").join("b.txt"), b"xy").unwrap();
        std::fs::create_dir_all(root.join("node_modules")).unwrap();
        std::fs::write(root.join("node_modules").join("pkg.js"), b"x").unwrap();

        let root_str = root.to_string_lossy().replace('/', "\\");
        let records = supplemental_scan(&root_str, None);

        let names: Vec<&str> = records.iter().map(|r| r.filename.as_str()).collect();
        assert!(names.contains(&"a.txt"));
        assert!(names.contains(&"sub"));
        assert!(names.contains(&"b.txt"));
        assert!(!names.contains(&"node_modules"));
        assert!(!names.contains(&"pkg.js"));
    }

    #[test]
    fn idle_backoff_decays_then_caps() {
        let mut b = IdleBackoff::new();
        let first = b.on_idle();
        assert!(first >= POLL_BUSY);
        let mut last = first;
        for _ in 0..20 {
            let next = b.on_idle();
            assert!(next >= last || next == POLL_IDLE_MAX);
            last = next;
        }
        assert_eq!(last, POLL_IDLE_MAX);
    }

    #[test]
    fn idle_backoff_resets_on_activity() {
        let mut b = IdleBackoff::new();
        for _ in 0..5 {
            b.on_idle();
        }
        b.on_activity();
        assert_eq!(b.steps, 0);
    }

    #[test]
    fn rename_pair_times_out_into_delete() {
        let mut pending_renames = std::collections::HashMap::new();
        pending_renames.insert(
            1u64,
            RenamePending { old_path: "D:\\old.txt".to_string(), created_at: Instant::now() - Duration::from_secs(1) },
        );
        let mut out = Vec::new();
        cleanup_expired_renames(&mut pending_renames, &mut out);
        assert!(pending_renames.is_empty());
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], PendingChange::Delete(p) if p == "D:\\old.txt"));
    }
}

//! Persisted directory-tree cache: a per-volume FRN -> {parent, name, is_dir}
//! triple that lets a restart skip full MFT enumeration when the USN journal
//! position stored alongside it is still valid.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const MAGIC: u32 = 0x4443_4143; // "CACD" in little-endian bytes
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DirCache {
    pub volume_signature: u64,
    pub last_usn: i64,
    pub journal_id: u64,
    pub parent: HashMap<u64, u64>,
    pub name: HashMap<u64, String>,
    pub is_dir: HashMap<u64, bool>,
}

impl DirCache {
    pub fn children_of(&self, parent_frn: u64) -> Vec<u64> {
        self.parent
            .iter()
            .filter(|(_, &p)| p == parent_frn)
            .map(|(&frn, _)| frn)
            .collect()
    }
}

/// The per-drive cache file alongside the catalog database, e.g.
/// `<db_dir>/dir_cache/dir_cache_C.bin`.
pub fn path_for(db_path: &Path, drive: char) -> PathBuf {
    let base = db_path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    base.join("dir_cache").join(format!("dir_cache_{}.bin", drive.to_ascii_uppercase()))
}

/// Write the cache as a small versioned binary envelope (magic + version +
/// volume signature) wrapping a bincode-encoded payload.
pub fn save(cache: &DirCache, path: &Path) -> std::io::Result<()> {
    let payload = bincode::serialize(cache).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::File::create(path)?;
    file.write_all(&MAGIC.to_le_bytes())?;
    file.write_all(&FORMAT_VERSION.to_le_bytes())?;
    file.write_all(&cache.volume_signature.to_le_bytes())?;
    file.write_all(&payload)?;
    Ok(())
}

/// Load a previously persisted cache. A magic/version mismatch, or any I/O
/// or decode error, is treated as "no usable cache" and returns `None` so
/// the caller falls back to a full rebuild.
pub fn load(path: &Path, expected_signature: u64) -> Option<DirCache> {
    let cache = load_any(path)?;
    if cache.volume_signature != expected_signature {
        return None;
    }
    Some(cache)
}

/// Load a cache without checking its volume signature against an expected
/// value the caller would otherwise have to already know. The scanner
/// re-queries the live journal id and compares it against the loaded
/// `DirCache::volume_signature` itself (see `scanner::mft::scan_drive_from_cache`),
/// so this variant exists for callers upstream of that check, e.g. `Catalog::build`
/// deciding whether a per-drive cache file exists at all before attempting to use it.
pub fn load_any(path: &Path) -> Option<DirCache> {
    let mut file = std::fs::File::open(path).ok()?;
    let mut header = [0u8; 16];
    file.read_exact(&mut header).ok()?;

    let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let version = u32::from_le_bytes(header[4..8].try_into().unwrap());

    if magic != MAGIC || version != FORMAT_VERSION {
        return None;
    }

    let mut rest = Vec::new();
    file.read_to_end(&mut rest).ok()?;
    bincode::deserialize(&rest).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DirCache {
        let mut cache = DirCache { volume_signature: 42, last_usn: 1000, journal_id: 7, ..Default::default() };
        cache.parent.insert(100, 5);
        cache.name.insert(100, "Users".to_string());
        cache.is_dir.insert(100, true);
        cache
    }

    #[test]
    fn round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dir_cache_C.bin");
        let cache = sample();
        save(&cache, &path).unwrap();

        let loaded = load(&path, 42).unwrap();
        assert_eq!(loaded.last_usn, 1000);
        assert_eq!(loaded.name.get(&100), Some(&"Users".to_string()));
    }

    #[test]
    fn signature_mismatch_discards() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dir_cache_C.bin");
        save(&sample(), &path).unwrap();
        assert!(load(&path, 99).is_none());
    }

    #[test]
    fn corrupt_file_discards() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dir_cache_C.bin");
        std::fs::write(&path, b"not a cache file").unwrap();
        assert!(load(&path, 42).is_none());
    }

    #[test]
    fn missing_file_discards() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.bin");
        assert!(load(&path, 42).is_none());
    }

    #[test]
    fn load_any_ignores_signature() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dir_cache_C.bin");
        save(&sample(), &path).unwrap();
        let loaded = load_any(&path).unwrap();
        assert_eq!(loaded.volume_signature, 42);
    }

    #[test]
    fn path_for_is_db_sibling_uppercased() {
        let db = Path::new("C:\\ProgramData\\SearchTool\\catalog.db");
        let path = path_for(db, 'd');
        assert_eq!(path, Path::new("C:\\ProgramData\\SearchTool\\dir_cache\\dir_cache_D.bin"));
    }

    #[test]
    fn save_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dir_cache_C.bin");
        save(&sample(), &path).unwrap();
        assert!(load(&path, 42).is_some());
    }
}

use serde::{Deserialize, Serialize};

/// One cataloged filesystem entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub filename: String,
    pub filename_lower: String,
    pub full_path: String,
    pub parent_dir: String,
    pub extension: String,
    pub size: u64,
    pub mtime: f64,
    pub is_dir: bool,
}

impl FileRecord {
    pub fn new_file(name: &str, full_path: String, parent_dir: String, size: u64, mtime: f64) -> Self {
        let extension = extension_of(name);
        Self {
            filename: name.to_string(),
            filename_lower: name.to_lowercase(),
            full_path,
            parent_dir,
            extension,
            size,
            mtime,
            is_dir: false,
        }
    }

    pub fn new_dir(name: &str, full_path: String, parent_dir: String, mtime: f64) -> Self {
        Self {
            filename: name.to_string(),
            filename_lower: name.to_lowercase(),
            full_path,
            parent_dir,
            extension: String::new(),
            size: 0,
            mtime,
            is_dir: true,
        }
    }
}

/// Lowercased extension including the leading dot (`".txt"`), or empty for
/// an extensionless name.
pub fn extension_of(name: &str) -> String {
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos < name.len() - 1 => name[pos..].to_lowercase(),
        _ => String::new(),
    }
}

/// Entry kind for result rows — replaces a loose "type code" integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Folder,
    Archive,
    File,
}

impl EntryKind {
    pub fn classify(extension: &str, is_dir: bool) -> Self {
        if is_dir {
            return EntryKind::Folder;
        }
        const ARCHIVE_EXTS: &[&str] = &[".zip", ".rar", ".7z", ".tar", ".gz", ".bz2", ".xz"];
        if ARCHIVE_EXTS.contains(&extension) {
            EntryKind::Archive
        } else {
            EntryKind::File
        }
    }
}

/// One raw MFT record as produced during enumeration, before path resolution.
#[derive(Debug, Clone)]
pub struct MftRawRecord {
    pub frn: u64,
    pub parent_frn: u64,
    pub name: String,
    pub is_dir: bool,
    pub mtime: Option<f64>,
}

/// A single change observed on the USN journal (or the fallback watcher).
#[derive(Debug, Clone, PartialEq)]
pub enum UsnChange {
    Create { path: String, is_dir: bool },
    Modify { path: String, is_dir: bool },
    Delete { path: String },
    RenameOld { path: String },
    RenameNew { path: String, is_dir: bool },
}

/// Catalog-level metadata row.
#[derive(Debug, Clone, Default)]
pub struct CatalogMeta {
    pub build_time: Option<i64>,
    pub build_duration: Option<f64>,
    pub used_mft: bool,
}

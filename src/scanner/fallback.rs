//! Portable directory-walk scanner, used when raw MFT access or the USN
//! journal query fails, and as the only scan path on non-NTFS platforms
//! (which is also how this module stays unit-testable off Windows).

use jwalk::WalkDir;

use crate::config::ScanConfig;
use crate::filter;
use crate::model::FileRecord;

const JWALK_THREADS: usize = 8;

/// Recursively walk `root`, honoring the same skip predicates as the MFT
/// scanner, and emit one `FileRecord` per surviving entry.
pub fn scan_root(root: &str, config: &ScanConfig, drive: char) -> Vec<FileRecord> {
    let allow_list = config.allow_list_for(drive);
    let mut out = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .parallelism(jwalk::Parallelism::RayonNewPool(JWALK_THREADS))
        .process_read_dir(move |_depth, _path, _read_dir_state, children| {
            children.retain(|entry_result| {
                let Ok(entry) = entry_result else { return true };
                let Some(name) = entry.file_name.to_str() else { return false };
                if filter::should_skip_name(name) {
                    return false;
                }
                if entry.file_type.is_dir() {
                    let path_str = entry.path().to_string_lossy().replace('/', "\\");
                    !filter::should_skip_dir(name, Some(&path_str), allow_list)
                } else {
                    true
                }
            });
        });

    for entry in walker.into_iter().filter_map(Result::ok) {
        let name = match entry.file_name.to_str() {
            Some(n) => n,
            None => continue,
        };
        if filter::should_skip_name(name) {
            continue;
        }

        let path = entry.path();
        let full_path = path.to_string_lossy().replace('/', "\\");
        let parent = path
            .parent()
            .map(|p| p.to_string_lossy().replace('/', "\\"))
            .unwrap_or_default();

        if entry.file_type.is_dir() {
            if full_path == root {
                continue;
            }
            if filter::should_skip_dir(name, Some(&full_path), allow_list) {
                continue;
            }
            let mtime = mtime_of(&path);
            out.push(FileRecord::new_dir(name, full_path, parent, mtime));
        } else {
            if filter::should_skip_path(&full_path, allow_list) {
                continue;
            }
            let ext = crate::model::extension_of(name);
            if filter::should_skip_ext(&ext) {
                continue;
            }
            let (size, mtime) = stat_file(&path);
            out.push(FileRecord::new_file(name, full_path, parent, size, mtime));
        }
    }

    out
}

fn mtime_of(path: &std::path::Path) -> f64 {
    std::fs::metadata(path)
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn stat_file(path: &std::path::Path) -> (u64, f64) {
    match std::fs::metadata(path) {
        Ok(m) => (m.len(), mtime_of(path)),
        Err(_) => (0, 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn scans_tree_and_skips_junk() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::create_dir_all(root.join("node_modules")).unwrap();
        fs::write(root.join("a.txt"), b"abc").unwrap();
        fs::write(root.join("sub").join("b.log"), b"x").unwrap();
        fs::write(root.join("node_modules").join("pkg.js"), b"x").unwrap();

        let root_str = root.to_string_lossy().replace('/', "\\");
        let records = scan_root(&root_str, &ScanConfig::default(), 'C');

        let names: Vec<&str> = records.iter().map(|r| r.filename.as_str()).collect();
        assert!(names.contains(&"a.txt"));
        assert!(names.contains(&"sub"));
        assert!(names.contains(&"b.log"));
        assert!(!names.contains(&"node_modules"));
        assert!(!names.contains(&"pkg.js"));

        let a = records.iter().find(|r| r.filename == "a.txt").unwrap();
        assert_eq!(a.size, 3);
        assert_eq!(a.extension, ".txt");
    }

    #[test]
    fn allow_list_reinstates_otherwise_skipped_dir() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("node_modules")).unwrap();
        fs::write(root.join("node_modules").join("keep.js"), b"x").unwrap();

        let root_str = root.to_string_lossy().replace('/', "\\");
        let nm_path = root.join("node_modules").to_string_lossy().replace('/', "\\");
        let mut config = ScanConfig::default();
        config.c_drive_allow_list.push(std::path::PathBuf::from(&nm_path));

        let records = scan_root(&root_str, &config, 'C');
        let names: Vec<&str> = records.iter().map(|r| r.filename.as_str()).collect();
        assert!(names.contains(&"keep.js"));
    }
}

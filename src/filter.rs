use std::path::Path;

/// Directory names that are always skipped, unless the path falls inside an
/// active C: allow-list.
pub const SKIP_DIRS: &[&str] = &[
    "windows",
    "program files",
    "program files (x86)",
    "programdata",
    "$recycle.bin",
    "system volume information",
    "appdata",
    "node_modules",
    ".git",
    "__pycache__",
    ".cache",
    "cache",
    "tmp",
    "temp",
    ".gradle",
    ".idea",
    ".vscode",
    "target",
    "build",
    "dist",
    "site-packages",
];

/// Extensions that are never user-visible index targets.
pub const SKIP_EXTS: &[&str] = &[
    ".obj", ".o", ".pdb", ".dll", ".pyc", ".class", ".lock", ".tmp", ".bak",
];

fn cad_pattern_match(segment_lower: &str) -> bool {
    for year in 2010..=2024 {
        if segment_lower == format!("cad20{}", year % 100) {
            return true;
        }
    }
    for year in 2010..=2025 {
        if segment_lower == format!("autocad_20{}", year) {
            return true;
        }
    }
    false
}

fn is_allowed(path: &str, allow_list: Option<&[std::path::PathBuf]>) -> bool {
    match allow_list {
        None => false,
        Some(roots) => {
            let lower = path.to_lowercase();
            roots.iter().any(|root| {
                let root_lower = root.to_string_lossy().to_lowercase();
                lower == root_lower || lower.starts_with(&format!("{}\\", root_lower))
                    || lower.starts_with(&format!("{}/", root_lower))
            })
        }
    }
}

/// Decide whether a directory name (and, optionally, its full path) should be
/// pruned entirely — its whole subtree is skipped.
pub fn should_skip_dir(name: &str, path: Option<&str>, allow_list: Option<&[std::path::PathBuf]>) -> bool {
    if let Some(p) = path {
        if is_allowed(p, allow_list) {
            return false;
        }
    }
    let name_lower = name.to_lowercase();
    if cad_pattern_match(&name_lower) || name_lower.contains("tangent") {
        return true;
    }
    SKIP_DIRS.contains(&name_lower.as_str())
}

/// Decide whether a full path (file or directory) should be skipped from the
/// catalog. `allow_list`, when it matches, bypasses every other rule.
pub fn should_skip_path(path: &str, allow_list: Option<&[std::path::PathBuf]>) -> bool {
    if is_allowed(path, allow_list) {
        return false;
    }

    let lower = path.to_lowercase();
    for segment in lower.split(['\\', '/']) {
        if segment.is_empty() {
            continue;
        }
        if cad_pattern_match(segment) || segment.contains("tangent") {
            return true;
        }
        if SKIP_DIRS.contains(&segment) {
            return true;
        }
    }
    false
}

/// Files with one of `SKIP_EXTS` are dropped; directories are never checked
/// against this list.
pub fn should_skip_ext(extension: &str) -> bool {
    SKIP_EXTS.contains(&extension.to_lowercase().as_str())
}

/// Names that are never indexable regardless of predicates above: NTFS
/// metafiles (`$MFT`, `$LogFile`, ...) and dotfiles produced by the journal
/// enumerator.
pub fn should_skip_name(name: &str) -> bool {
    name.starts_with('$') || name.is_empty()
}

pub fn path_segment_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_windows_system_dirs() {
        assert!(should_skip_path("C:\\Windows\\System32", None));
        assert!(should_skip_path("C:\\Program Files\\Foo", None));
        assert!(should_skip_path("C:\\Users\\bob\\AppData\\Local\\X", None));
    }

    #[test]
    fn allow_list_bypasses_skip_dirs() {
        let allow = vec![std::path::PathBuf::from("C:\\Users\\bob\\AppData\\Roaming\\Notes")];
        assert!(!should_skip_path(
            "C:\\Users\\bob\\AppData\\Roaming\\Notes\\a.txt",
            Some(&allow)
        ));
        assert!(should_skip_path("C:\\Users\\bob\\AppData\\Local\\Other", Some(&allow)));
    }

    #[test]
    fn allow_list_only_applies_to_c_drive_caller_responsibility() {
        // filter.rs itself is drive-agnostic; callers only pass an allow list for C:.
        let allow = vec![std::path::PathBuf::from("D:\\Keep")];
        assert!(!should_skip_path("D:\\Keep\\node_modules\\x", Some(&allow)));
    }

    #[test]
    fn cad_pattern_skipped() {
        assert!(should_skip_dir("CAD2018", None, None));
        assert!(should_skip_dir("AutoCAD_2020", None, None));
    }

    #[test]
    fn tangent_substring_matches_tangential() {
        assert!(should_skip_dir("tangential_data", None, None));
        assert!(should_skip_dir("tangent", None, None));
    }

    #[test]
    fn skip_ext_case_insensitive() {
        assert!(should_skip_ext(".DLL"));
        assert!(!should_skip_ext(".txt"));
    }

    #[test]
    fn dollar_and_empty_names_skipped() {
        assert!(should_skip_name("$MFT"));
        assert!(should_skip_name(""));
        assert!(!should_skip_name("a.txt"));
    }

    #[test]
    fn should_skip_path_idempotent_and_monotone() {
        let p = "C:\\Windows\\System32\\drivers";
        assert_eq!(should_skip_path(p, None), should_skip_path(p, None));
        assert!(should_skip_path(&format!("{}\\etc", p), None));
    }
}

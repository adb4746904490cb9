//! Batch metadata fill (size/mtime) for file entries produced by a scan.
//! Worker count scales with cardinality, per the component design: 4/8/16
//! workers for <200 / <2k / >=2k entries.

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::model::FileRecord;

fn worker_count(n: usize) -> usize {
    if n < 200 {
        4
    } else if n < 2_000 {
        8
    } else {
        16
    }
}

/// Fill `size`/`mtime` in place for every file record (directories are left
/// untouched). Unreadable entries keep zeroed metadata.
pub fn fill_file_metadata(records: &mut [FileRecord]) {
    let file_count = records.iter().filter(|r| !r.is_dir).count();
    if file_count == 0 {
        return;
    }

    let pool = ThreadPoolBuilder::new()
        .num_threads(worker_count(file_count))
        .build()
        .expect("thread pool build");

    pool.install(|| {
        records.par_iter_mut().for_each(|r| {
            if r.is_dir {
                return;
            }
            if let Ok(meta) = std::fs::metadata(&r.full_path) {
                r.size = meta.len();
                r.mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0);
            }
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_scales() {
        assert_eq!(worker_count(10), 4);
        assert_eq!(worker_count(1_000), 8);
        assert_eq!(worker_count(10_000), 16);
    }

    #[test]
    fn fills_real_file_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.txt");
        std::fs::write(&file_path, b"hello").unwrap();

        let mut records = vec![FileRecord::new_file(
            "a.txt",
            file_path.to_string_lossy().into_owned(),
            dir.path().to_string_lossy().into_owned(),
            0,
            0.0,
        )];
        fill_file_metadata(&mut records);
        assert_eq!(records[0].size, 5);
        assert!(records[0].mtime > 0.0);
    }

    #[test]
    fn unreadable_entry_keeps_zero() {
        let mut records = vec![FileRecord::new_file(
            "missing.txt",
            "Z:\\does\\not\\exist\\missing.txt".into(),
            "Z:\\does\\not\\exist".into(),
            0,
            0.0,
        )];
        fill_file_metadata(&mut records);
        assert_eq!(records[0].size, 0);
        assert_eq!(records[0].mtime, 0.0);
    }
}

//! Lazy stat backfill: search results can carry `size == 0, mtime == 0`
//! rows the scanner never got metadata for (or that arrived via a watcher
//! create event skipped during a debounce). This fills them in, in place,
//! and writes the discovered values back to the catalog.

use std::time::Duration;

use rayon::prelude::*;

use crate::catalog::{Catalog, SearchHit};

const PRELOAD_CHUNK_SIZE: usize = 500;
const PRELOAD_YIELD: Duration = Duration::from_millis(5);

/// Fill in `size`/`mtime` for every hit in `page` whose metadata is still
/// pending (non-directories with `size == 0`), in parallel, and write the
/// discovered values back to the catalog.
pub fn backfill_page(catalog: &Catalog, page: &mut [SearchHit]) {
    let discovered: Vec<(usize, u64, f64)> = page
        .par_iter()
        .enumerate()
        .filter(|(_, hit)| !hit.is_dir && hit.size == 0)
        .filter_map(|(idx, hit)| stat_one(&hit.full_path).map(|(size, mtime)| (idx, size, mtime)))
        .collect();

    if discovered.is_empty() {
        return;
    }

    let mut rows_for_catalog = Vec::with_capacity(discovered.len());
    for &(idx, size, mtime) in &discovered {
        page[idx].size = size;
        page[idx].mtime = mtime;
        rows_for_catalog.push((page[idx].full_path.clone(), size, mtime));
    }

    // Write-back happens off the calling thread: the page is already filled
    // in above, so a renderer doesn't wait on these UPDATEs to land.
    let catalog = catalog.clone();
    std::thread::spawn(move || {
        let _ = write_back(&catalog, &rows_for_catalog);
    });
}

/// Background pre-loader: walks the full result set in chunks, backfilling
/// each and yielding between chunks so it never starves a newer search.
/// Returns early (without finishing) if `should_abort` starts returning true
/// — the caller uses this to cancel when a new search supersedes this one.
pub fn preload_all(catalog: &Catalog, mut hits: Vec<SearchHit>, should_abort: &(dyn Fn() -> bool + Sync)) {
    let mut offset = 0;
    while offset < hits.len() {
        if should_abort() {
            return;
        }
        let end = (offset + PRELOAD_CHUNK_SIZE).min(hits.len());
        backfill_page(catalog, &mut hits[offset..end]);
        offset = end;
        std::thread::sleep(PRELOAD_YIELD);
    }
}

fn stat_one(path: &str) -> Option<(u64, f64)> {
    let meta = std::fs::metadata(path).ok()?;
    let mtime = meta.modified().ok().and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok()).map(|d| d.as_secs_f64()).unwrap_or(0.0);
    Some((meta.len(), mtime))
}

fn write_back(catalog: &Catalog, rows: &[(String, u64, f64)]) -> crate::error::CoreResult<()> {
    for (path, size, mtime) in rows {
        let _ = catalog.update_size_mtime(path, *size, *mtime);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntryKind, FileRecord};

    fn hit_for(path: &str) -> SearchHit {
        SearchHit::from(FileRecord::new_file("f", path.to_string(), String::new(), 0, 0.0))
    }

    #[test]
    fn backfill_fills_real_file_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.bin");
        std::fs::write(&file_path, vec![0u8; 128]).unwrap();

        let db_path = dir.path().join("catalog.db");
        let catalog = Catalog::open(&db_path).unwrap();
        let path_str = file_path.to_string_lossy().to_string();
        catalog.upsert_rows(&[FileRecord::new_file("a.bin", path_str.clone(), dir.path().to_string_lossy().to_string(), 0, 0.0)]).unwrap();

        let mut page = vec![hit_for(&path_str)];
        backfill_page(&catalog, &mut page);

        assert_eq!(page[0].size, 128);
        assert!(page[0].mtime > 0.0);
    }

    #[test]
    fn backfill_skips_directories_and_already_sized_files() {
        let mut dir_hit = hit_for("D:\\t");
        dir_hit.is_dir = true;
        dir_hit.kind = EntryKind::Folder;
        let mut sized_hit = hit_for("D:\\t\\a.txt");
        sized_hit.size = 42;

        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&dir.path().join("c.db")).unwrap();

        let mut page = vec![dir_hit, sized_hit];
        backfill_page(&catalog, &mut page);

        assert_eq!(page[0].size, 0);
        assert_eq!(page[1].size, 42);
    }

    #[test]
    fn preload_all_aborts_early() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&dir.path().join("c.db")).unwrap();
        let hits: Vec<SearchHit> = (0..10).map(|i| hit_for(&format!("D:\\missing{i}.txt"))).collect();
        preload_all(&catalog, hits, &|| true);
    }
}

//! Index-backed search worker: runs a query against the catalog and streams
//! results in small batches instead of handing back one giant vector.

use std::time::Instant;

use crate::catalog::Catalog;
use crate::config::ScanConfig;
use crate::events::{CoreEvent, EventSink};

use super::ResultItem;

const BATCH_SIZE: usize = 200;

/// Run `query` against the catalog and stream results to `on_batch` in
/// batches of [`BATCH_SIZE`], emitting `CoreEvent::BatchReady` after each
/// one. Returns the total number of items streamed.
pub fn run(
    catalog: &Catalog,
    query: &str,
    scope_roots: &[String],
    limit: Option<usize>,
    config: &ScanConfig,
    sink: &EventSink,
    mut on_batch: impl FnMut(&[ResultItem]),
) -> crate::error::CoreResult<u64> {
    let started = Instant::now();
    let hits = catalog.search(query, scope_roots, limit, config)?;

    let mut total = 0u64;
    for chunk in hits.chunks(BATCH_SIZE) {
        let items: Vec<ResultItem> = chunk
            .iter()
            .map(|h| ResultItem {
                filename: h.filename.clone(),
                full_path: h.full_path.clone(),
                dir_path: h.parent_dir.clone(),
                size: h.size,
                mtime: h.mtime,
                kind: h.kind,
            })
            .collect();
        total += items.len() as u64;
        on_batch(&items);
        sink.emit(CoreEvent::BatchReady { count: items.len() as u64 });
    }

    sink.emit(CoreEvent::SearchFinished { total, elapsed_secs: started.elapsed().as_secs_f64() });
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn streams_in_batches_and_reports_total() {
        let dir = tempfile::tempdir().unwrap();
        let db_path: &Path = &dir.path().join("catalog.db");
        let catalog = Catalog::open(db_path).unwrap();

        let rows: Vec<crate::model::FileRecord> = (0..450)
            .map(|i| crate::model::FileRecord::new_file(&format!("f{i}.txt"), format!("D:\\t\\f{i}.txt"), "D:\\t".to_string(), 1, 0.0))
            .collect();
        catalog.upsert_rows(&rows).unwrap();

        let mut batches = 0;
        let sink = EventSink::none();
        let total = run(&catalog, "ext:txt", &[], None, &ScanConfig::default(), &sink, |_items| batches += 1).unwrap();

        assert_eq!(total, 450);
        assert_eq!(batches, 3); // 200 + 200 + 50
    }
}

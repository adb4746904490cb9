//! Local filesystem search engine for NTFS volumes: an MFT/USN-journal
//! scanner feeding a persistent SQLite catalog, plus a realtime walk-based
//! worker for searches that can't wait on an index build.
//!
//! This crate is the engine only — it has no UI and no opinion about where
//! `ScanConfig` comes from. An embedding application owns a [`Catalog`],
//! calls [`probe_capabilities`] and [`Catalog::build`] once at startup, then
//! drives [`watcher`] and [`search`] against it.

pub mod backfill;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod dircache;
pub mod error;
pub mod events;
pub mod filter;
pub mod model;
pub mod query;
pub mod scanner;
pub mod search;
pub mod watcher;

pub use catalog::{Catalog, SearchHit, Stats};
pub use config::{Capabilities, ScanConfig};
pub use error::{CoreError, CoreResult};
pub use events::{CoreEvent, EventSink};

/// Probe process capabilities and open (creating if necessary) the catalog
/// at `db_path`. This is the one call an embedder needs before anything
/// else in this crate is usable.
///
/// [`Capabilities::fts_available`] reflects whether this process's SQLite
/// build has FTS5 compiled in at all; it is a static, process-wide fact
/// checked once here. It's a coarser signal than [`Catalog::get_stats`]'s
/// `has_fts`, which reflects whether FTS5 table creation actually succeeded
/// for this specific catalog file — consult that one before deciding
/// whether a search can use full-text matching.
pub fn open(db_path: &std::path::Path) -> CoreResult<(Catalog, Capabilities)> {
    let caps = scanner::probe_capabilities();
    let catalog = Catalog::open(db_path)?;
    Ok((catalog, caps))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_empty_ready_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, _caps) = open(&dir.path().join("catalog.db")).unwrap();
        let stats = catalog.get_stats().unwrap();
        assert_eq!(stats.count, 0);
        assert!(!stats.is_building);
    }
}

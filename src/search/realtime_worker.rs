//! Realtime walk-based search worker: scans the filesystem directly instead
//! of consulting the catalog, for callers that need results before (or
//! without) an index build.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use regex::RegexBuilder;

use crate::config::ScanConfig;
use crate::events::{CoreEvent, EventSink};
use crate::filter;
use crate::model::EntryKind;

use super::ResultItem;

const WORKER_COUNT: usize = 16;
const BATCH_SIZE: usize = 50;
const MAX_DEPTH: usize = 15;
const SCAN_TIMEOUT: Duration = Duration::from_secs(5);

/// Selects how a realtime query's text is matched against each entry name.
/// `Auto` is the index worker's own everything-style grammar's counterpart
/// for live search: substring by default, glob once `*`/`?` show up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchStrategy {
    #[default]
    Auto,
    Fuzzy,
    Regex,
}

#[derive(Debug, Clone)]
enum MatchMode {
    Substring(String),
    Glob(String),
    Fuzzy(String),
    Regex(regex::Regex),
}

fn build_match_mode(query: &str, strategy: MatchStrategy) -> MatchMode {
    match strategy {
        MatchStrategy::Fuzzy => MatchMode::Fuzzy(query.to_lowercase()),
        MatchStrategy::Regex => match RegexBuilder::new(query).case_insensitive(true).build() {
            Ok(re) => MatchMode::Regex(re),
            Err(_) => MatchMode::Substring(query.to_lowercase()),
        },
        MatchStrategy::Auto => {
            let lower = query.to_lowercase();
            if lower.contains('*') || lower.contains('?') {
                MatchMode::Glob(lower)
            } else {
                MatchMode::Substring(lower)
            }
        }
    }
}

fn matches(mode: &MatchMode, name: &str, name_lower: &str) -> bool {
    match mode {
        MatchMode::Substring(s) => name_lower.contains(s.as_str()),
        MatchMode::Glob(pattern) => glob_matches(pattern, name_lower),
        MatchMode::Fuzzy(needle) => fuzzy_matches(needle, name_lower),
        MatchMode::Regex(re) => re.is_match(name),
    }
}

/// Subsequence match: every character of `needle` must appear in `haystack`
/// in order, not necessarily contiguously.
fn fuzzy_matches(needle: &str, haystack: &str) -> bool {
    let mut hay = haystack.chars();
    needle.chars().all(|n| hay.any(|h| h == n))
}

/// Two-pointer glob matcher supporting `*` and `?`.
fn glob_matches(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (pn, tn) = (p.len(), t.len());

    let mut px = 0usize;
    let mut tx = 0usize;
    let mut star_px = usize::MAX;
    let mut star_tx = 0usize;

    while tx < tn {
        if px < pn && (p[px] == '?' || p[px] == t[tx]) {
            px += 1;
            tx += 1;
        } else if px < pn && p[px] == '*' {
            star_px = px;
            star_tx = tx;
            px += 1;
        } else if star_px != usize::MAX {
            px = star_px + 1;
            star_tx += 1;
            tx = star_tx;
        } else {
            return false;
        }
    }
    while px < pn && p[px] == '*' {
        px += 1;
    }
    px == pn
}

/// Cooperative control handed to a running realtime search: pause/resume and
/// stop, all observed between directories.
#[derive(Clone, Default)]
pub struct Control {
    paused: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl Control {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

pub struct RealtimeResult {
    pub items: Vec<ResultItem>,
    pub timed_out: bool,
    pub directories_scanned: u64,
}

/// Walk every root in `scope_roots` with a shared work queue of pending
/// directories, matching each entry's name against `query` per `strategy`.
/// Emits `CoreEvent::BatchReady` every [`BATCH_SIZE`] matches and respects
/// `control`'s pause/stop flags between directories.
pub fn run(
    query: &str,
    scope_roots: &[String],
    strategy: MatchStrategy,
    config: &ScanConfig,
    control: &Control,
    sink: &EventSink,
) -> RealtimeResult {
    let trimmed = query.trim();
    if trimmed.is_empty() || scope_roots.is_empty() {
        return RealtimeResult { items: Vec::new(), timed_out: false, directories_scanned: 0 };
    }

    let mode = build_match_mode(trimmed, strategy);
    let deadline = Instant::now() + SCAN_TIMEOUT;

    let queue: Mutex<VecDeque<(String, usize)>> = Mutex::new(scope_roots.iter().map(|r| (r.clone(), 0)).collect());
    let results: Mutex<Vec<ResultItem>> = Mutex::new(Vec::new());
    let directories_scanned = std::sync::atomic::AtomicU64::new(0);
    let timed_out = AtomicBool::new(false);

    let drain_batch = |results: &Mutex<Vec<ResultItem>>, sink: &EventSink| {
        let mut guard = results.lock().unwrap();
        while guard.len() >= BATCH_SIZE {
            let batch: Vec<ResultItem> = guard.drain(..BATCH_SIZE).collect();
            sink.emit(CoreEvent::BatchReady { count: batch.len() as u64 });
        }
    };

    // Each worker gets its own cloned sink (`mpsc::Sender` isn't `Sync`, so a
    // shared reference can't be used to emit from multiple threads at once).
    let worker_sinks: Vec<EventSink> = (0..WORKER_COUNT).map(|_| sink.clone()).collect();

    worker_sinks.into_par_iter().for_each(|sink| loop {
        if control.stopped.load(Ordering::Acquire) {
            break;
        }
        if control.paused.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(50));
            continue;
        }
        if Instant::now() >= deadline {
            timed_out.store(true, Ordering::Release);
            break;
        }

        let next = { queue.lock().unwrap().pop_front() };
        let Some((dir, depth)) = next else { break };
        if depth > MAX_DEPTH {
            continue;
        }

        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        directories_scanned.fetch_add(1, Ordering::Relaxed);

        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else { continue };
            let name = entry.file_name().to_string_lossy().to_string();
            if filter::should_skip_name(&name) {
                continue;
            }
            let full_path = entry.path().to_string_lossy().replace('/', "\\");

            if file_type.is_dir() {
                let drive = full_path.chars().next().unwrap_or('?');
                let allow_list = config.allow_list_for(drive);
                if filter::should_skip_dir(&name, Some(&full_path), allow_list) {
                    continue;
                }
                queue.lock().unwrap().push_back((full_path.clone(), depth + 1));
            }

            if matches(&mode, &name, &name.to_lowercase()) {
                let meta = entry.metadata().ok();
                let size = meta.as_ref().map(|m| m.len()).unwrap_or(0);
                let mtime = meta
                    .as_ref()
                    .and_then(|m| m.modified().ok())
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0);
                let extension = crate::model::extension_of(&name);
                let kind = EntryKind::classify(&extension, file_type.is_dir());
                let dir_path = entry.path().parent().map(|p| p.to_string_lossy().replace('/', "\\")).unwrap_or_default();

                results.lock().unwrap().push(ResultItem { filename: name, full_path, dir_path, size, mtime, kind });
                drain_batch(&results, &sink);
            }
        }
    });

    let mut items = results.into_inner().unwrap();
    if !items.is_empty() {
        sink.emit(CoreEvent::BatchReady { count: items.len() as u64 });
    }
    items.sort_by_key(|i| i.filename.to_lowercase());

    RealtimeResult { items, timed_out: timed_out.load(Ordering::Acquire), directories_scanned: directories_scanned.load(Ordering::Acquire) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_star_prefix() {
        assert!(glob_matches("*.md", "readme.md"));
        assert!(!glob_matches("*.md", "readme.txt"));
    }

    #[test]
    fn glob_matches_question_mark() {
        assert!(glob_matches("a?c", "abc"));
        assert!(!glob_matches("a?c", "abbc"));
    }

    #[test]
    fn fuzzy_matches_out_of_order_subsequence() {
        assert!(fuzzy_matches("nme", "needle.txt"));
        assert!(!fuzzy_matches("xyz", "needle.txt"));
    }

    #[test]
    fn finds_matching_files_under_scope_roots() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("needle.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("other.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("node_modules").join("needle.txt"), b"x").unwrap();

        let root = dir.path().to_string_lossy().replace('/', "\\");
        let control = Control::default();
        let sink = EventSink::none();
        let result = run("needle", &[root], MatchStrategy::Auto, &ScanConfig::default(), &control, &sink);

        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].filename, "needle.txt");
    }

    #[test]
    fn regex_strategy_matches_pattern() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report-2024.csv"), b"x").unwrap();
        std::fs::write(dir.path().join("report-final.csv"), b"x").unwrap();

        let root = dir.path().to_string_lossy().replace('/', "\\");
        let control = Control::default();
        let sink = EventSink::none();
        let result = run(r"report-\d+\.csv", &[root], MatchStrategy::Regex, &ScanConfig::default(), &control, &sink);

        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].filename, "report-2024.csv");
    }

    #[test]
    fn fuzzy_strategy_finds_subsequence_in_live_walk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("needle.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("other.txt"), b"x").unwrap();

        let root = dir.path().to_string_lossy().replace('/', "\\");
        let control = Control::default();
        let sink = EventSink::none();
        let result = run("ndl", &[root], MatchStrategy::Fuzzy, &ScanConfig::default(), &control, &sink);

        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].filename, "needle.txt");
    }

    #[test]
    fn empty_query_returns_nothing() {
        let control = Control::default();
        let sink = EventSink::none();
        let result = run("", &["C:\\".to_string()], MatchStrategy::Auto, &ScanConfig::default(), &control, &sink);
        assert!(result.items.is_empty());
    }
}

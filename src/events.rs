use std::sync::mpsc::Sender;

/// Typed progress/status messages emitted during a build or by the watcher.
/// Replaces the GUI framework's signal surface — a caller embeds this crate
/// and drains a `Receiver<CoreEvent>` on whatever thread it likes.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    Progress { scanned: u64, indexed: u64, message: String },
    BatchReady { count: u64 },
    BuildFinished { entries: u64, used_mft: bool, duration_secs: f64 },
    FtsFinished,
    FilesChanged { added: u64, deleted: u64, deleted_paths: Vec<String> },
    SearchError { message: String },
    SearchFinished { total: u64, elapsed_secs: f64 },
}

/// Sink handed to long-running operations. `None` means the caller doesn't
/// want progress notifications; sends are best-effort (a dropped receiver
/// never aborts the operation).
#[derive(Clone, Default)]
pub struct EventSink(Option<Sender<CoreEvent>>);

impl EventSink {
    pub fn new(tx: Sender<CoreEvent>) -> Self {
        Self(Some(tx))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn emit(&self, event: CoreEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event);
        }
    }
}

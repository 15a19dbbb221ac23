use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Top class of one successful iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: String,
    pub class_index: usize,
    pub confidence: f32,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:.1}%", self.label, self.confidence * 100.0)
    }
}

#[derive(Debug, Default)]
struct BoardState {
    status: String,
    latest: Option<Classification>,
}

/// State shown to the user: a status line and the latest classification.
///
/// Only the pipeline driver writes; any thread may read. Readers get
/// whatever was published last.
#[derive(Debug, Clone, Default)]
pub struct Board {
    inner: Arc<RwLock<BoardState>>,
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> String {
        self.read().status.clone()
    }

    pub fn latest(&self) -> Option<Classification> {
        self.read().latest.clone()
    }

    /// Latest result as displayed, `"- 0.0%"` before the first one.
    pub fn latest_text(&self) -> String {
        match self.latest() {
            Some(c) => c.to_string(),
            None => "- 0.0%".to_string(),
        }
    }

    pub(crate) fn set_status(&self, status: impl Into<String>) {
        self.write().status = status.into();
    }

    pub(crate) fn publish(&self, result: Classification) {
        self.write().latest = Some(result);
    }

    pub(crate) fn clear(&self) {
        self.write().latest = None;
    }

    fn read(&self) -> RwLockReadGuard<'_, BoardState> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BoardState> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

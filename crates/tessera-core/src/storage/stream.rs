//! Streaming enumeration
//!
//! Backends expose their full-scan as a lazy, fallible iterator and hand it to
//! [`drive`], which pushes one item at a time into the consumer. The
//! consumer answers [`Flow::Stop`] to end the pass early; the iterator (and
//! any cursor it holds) is dropped before `drive` returns.
//!
//! A stored entry that cannot be parsed reaches the consumer as `Err` and the
//! pass goes on with the next entry. Any other fault ends the pass and is
//! returned to the caller. Producers never retry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::document::Document;
use crate::storage::StoreResult;

/// Consumer answer after each document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Outcome of one enumeration pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationSummary {
    /// Items handed to the consumer, unreadable ones included
    pub visited: usize,
    /// Entries delivered as `Err` because their stored state was unreadable
    pub unreadable: usize,
    /// Whether the consumer ended the pass early
    pub stopped: bool,
}

/// Push every item of `source` into `consumer` until exhausted, stopped, or
/// failed
pub fn drive<I>(
    source: I,
    consumer: &mut dyn FnMut(StoreResult<Document>) -> Flow,
) -> StoreResult<IterationSummary>
where
    I: Iterator<Item = StoreResult<Document>>,
{
    let mut summary = IterationSummary::default();
    for item in source {
        let item = match item {
            Ok(doc) => Ok(doc),
            Err(e) if e.is_unreadable_entry() => {
                summary.unreadable += 1;
                Err(e)
            }
            Err(e) => return Err(e),
        };
        summary.visited += 1;
        if consumer(item) == Flow::Stop {
            summary.stopped = true;
            break;
        }
    }
    Ok(summary)
}

/// Open-cursor bookkeeping shared by a backend and its cursors
///
/// Every enumeration holds a [`CursorGuard`]; dropping the guard releases the
/// slot, whichever way the enumeration ended.
#[derive(Debug, Clone, Default)]
pub struct CursorTracker {
    open: Arc<AtomicUsize>,
    opened_total: Arc<AtomicUsize>,
}

impl CursorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> CursorGuard {
        self.open.fetch_add(1, Ordering::SeqCst);
        self.opened_total.fetch_add(1, Ordering::SeqCst);
        CursorGuard {
            open: Arc::clone(&self.open),
        }
    }

    /// Cursors currently held
    pub fn open_cursors(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Cursors ever opened
    pub fn opened_total(&self) -> usize {
        self.opened_total.load(Ordering::SeqCst)
    }
}

/// Marks one live cursor until dropped
#[derive(Debug)]
pub struct CursorGuard {
    open: Arc<AtomicUsize>,
}

impl Drop for CursorGuard {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::EntityReference;
    use crate::storage::StoreError;

    fn doc(id: &str) -> Document {
        Document::new(EntityReference::new(id), "Thing", "v1".into())
    }

    struct Tracked<I> {
        inner: I,
        _guard: CursorGuard,
    }

    impl<I: Iterator> Iterator for Tracked<I> {
        type Item = I::Item;
        fn next(&mut self) -> Option<I::Item> {
            self.inner.next()
        }
    }

    #[test]
    fn test_drive_visits_everything() {
        let source = vec![Ok(doc("a")), Ok(doc("b")), Ok(doc("c"))].into_iter();
        let mut seen = Vec::new();

        let summary = drive(source, &mut |d| {
            seen.push(d.unwrap().identity.to_string());
            Flow::Continue
        })
        .unwrap();

        assert_eq!(seen, vec!["a", "b", "c"]);
        assert_eq!(
            summary,
            IterationSummary {
                visited: 3,
                unreadable: 0,
                stopped: false
            }
        );
    }

    #[test]
    fn test_stop_releases_cursor() {
        let tracker = CursorTracker::new();
        let source = Tracked {
            inner: (0..100).map(|i| Ok(doc(&format!("d{i}")))),
            _guard: tracker.acquire(),
        };
        assert_eq!(tracker.open_cursors(), 1);

        let summary = drive(source, &mut |_| Flow::Stop).unwrap();

        assert_eq!(summary.visited, 1);
        assert!(summary.stopped);
        assert_eq!(tracker.open_cursors(), 0);
        assert_eq!(tracker.opened_total(), 1);
    }

    #[test]
    fn test_fault_halts_and_releases() {
        let tracker = CursorTracker::new();
        let items = vec![
            Ok(doc("a")),
            Err(StoreError::Backend {
                backend: "test",
                details: "cursor lost".to_string(),
            }),
            Ok(doc("c")),
        ];
        let source = Tracked {
            inner: items.into_iter(),
            _guard: tracker.acquire(),
        };
        let mut seen = 0;

        let err = drive(source, &mut |_| {
            seen += 1;
            Flow::Continue
        })
        .unwrap_err();

        assert!(matches!(err, StoreError::Backend { .. }));
        assert_eq!(seen, 1);
        assert_eq!(tracker.open_cursors(), 0);
    }

    #[test]
    fn test_unreadable_entry_is_delivered_and_pass_continues() {
        let items = vec![
            Ok(doc("a")),
            Err(StoreError::InvalidFormat {
                source_name: "b".to_string(),
                details: "missing field `schemaVersion`".to_string(),
            }),
            Ok(doc("c")),
        ];
        let mut seen = Vec::new();
        let mut failed = Vec::new();

        let summary = drive(items.into_iter(), &mut |item| {
            match item {
                Ok(d) => seen.push(d.identity.to_string()),
                Err(e) => failed.push(e.to_string()),
            }
            Flow::Continue
        })
        .unwrap();

        assert_eq!(seen, vec!["a", "c"]);
        assert_eq!(failed.len(), 1);
        assert!(failed[0].contains("'b'"));
        assert_eq!(summary.visited, 3);
        assert_eq!(summary.unreadable, 1);
        assert!(!summary.stopped);
    }
}

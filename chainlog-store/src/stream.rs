//! Pull-based reads over a log.

use std::sync::Arc;

use crate::{Entry, LogStore};

/// A finite, restartable iterator over a log's entries.
///
/// Without an explicit end the stream follows the log's length as it is
/// at each call to `next`, and ends as soon as it catches up. It also ends
/// when the log is closed. It never waits for new entries.
#[derive(Debug)]
pub struct ReadStream {
    log: Arc<LogStore>,
    start: u64,
    next: u64,
    end: Option<u64>,
}

impl ReadStream {
    pub(crate) fn new(log: Arc<LogStore>, from: u64, to: Option<u64>) -> Self {
        Self {
            log,
            start: from,
            next: from,
            end: to,
        }
    }

    /// Index of the next entry to be yielded.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.next
    }

    /// Rewinds (or advances) the stream to `index`.
    pub fn restart(&mut self, index: u64) {
        self.start = index;
        self.next = index;
    }

    /// Rewinds to where the stream was created or last restarted.
    pub fn rewind(&mut self) {
        self.next = self.start;
    }

    fn limit(&self) -> u64 {
        let length = self.log.length();
        self.end.map_or(length, |end| end.min(length))
    }
}

impl Iterator for ReadStream {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        if self.log.is_closed() || self.next >= self.limit() {
            return None;
        }
        let entry = self.log.get(self.next).ok()?;
        self.next += 1;
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.limit().saturating_sub(self.next) as usize;
        match self.end {
            Some(_) => (0, Some(remaining)),
            None => (0, None),
        }
    }
}

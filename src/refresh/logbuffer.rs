//! In-memory refresh log: a bounded ring with monotonic sequence ids plus a
//! broadcast channel for live SSE subscribers.
//!
//! Sequence ids are independent of the buffer index, so clients can
//! reconnect with their last seen id and receive exactly the gap (or the
//! whole buffer when they fell too far behind).

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct LogLine {
    pub seq: u64,
    pub line: String,
}

struct Inner {
    next_seq: u64,
    lines: VecDeque<LogLine>,
}

pub struct LogBuffer {
    inner: Mutex<Inner>,
    tx: broadcast::Sender<LogLine>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            inner: Mutex::new(Inner {
                next_seq: 0,
                lines: VecDeque::with_capacity(capacity),
            }),
            tx,
            capacity,
        }
    }

    /// Append one line, returning its sequence id. Also mirrors the line to
    /// the tracing log.
    pub fn append(&self, line: impl Into<String>) -> u64 {
        let line = line.into();
        tracing::info!(target: "refresh", "{}", line);

        let entry = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.next_seq += 1;
            let entry = LogLine {
                seq: inner.next_seq,
                line,
            };
            if inner.lines.len() >= self.capacity {
                inner.lines.pop_front();
            }
            inner.lines.push_back(entry.clone());
            entry
        };

        // Nobody listening is fine
        let _ = self.tx.send(entry.clone());
        entry.seq
    }

    /// Buffered lines with seq greater than `since`. A `since` older than
    /// the oldest buffered id returns everything still in the buffer.
    pub fn since(&self, since: u64) -> Vec<LogLine> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .lines
            .iter()
            .filter(|l| l.seq > since)
            .cloned()
            .collect()
    }

    pub fn last_seq(&self) -> u64 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.next_seq
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogLine> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_ids_are_monotonic() {
        let buffer = LogBuffer::new(10);
        let a = buffer.append("one");
        let b = buffer.append("two");
        assert!(b > a);
        assert_eq!(buffer.last_seq(), b);
    }

    #[test]
    fn test_ring_eviction_keeps_seq_ids() {
        let buffer = LogBuffer::new(3);
        for i in 0..10 {
            buffer.append(format!("line {}", i));
        }
        let lines = buffer.since(0);
        assert_eq!(lines.len(), 3);
        // The newest three survive with their original ids
        assert_eq!(lines[0].seq, 8);
        assert_eq!(lines[2].seq, 10);
    }

    #[test]
    fn test_since_returns_gap_only() {
        let buffer = LogBuffer::new(10);
        for i in 0..5 {
            buffer.append(format!("line {}", i));
        }
        let gap = buffer.since(3);
        assert_eq!(gap.len(), 2);
        assert_eq!(gap[0].seq, 4);
        assert_eq!(gap[1].seq, 5);
    }

    #[test]
    fn test_since_older_than_buffer_returns_all_buffered() {
        let buffer = LogBuffer::new(2);
        for i in 0..6 {
            buffer.append(format!("line {}", i));
        }
        // Oldest buffered id is 5; asking since=1 yields the whole buffer
        let lines = buffer.since(1);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].seq, 5);
    }

    #[tokio::test]
    async fn test_subscribers_see_appends() {
        let buffer = LogBuffer::new(10);
        let mut rx = buffer.subscribe();
        buffer.append("hello");
        let line = rx.recv().await.expect("recv");
        assert_eq!(line.line, "hello");
        assert_eq!(line.seq, 1);
    }
}

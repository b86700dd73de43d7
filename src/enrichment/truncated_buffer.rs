//! Body buffer that keeps at most `limit` bytes but accepts everything.

use std::borrow::Cow;
use std::io;

/// Bounded content buffer.
///
/// After `N` bytes have been written it holds `min(N, limit)` of them. Writes
/// never fail and never report a short count, so a fan-out writer feeding
/// several destinations is never stopped by this one.
#[derive(Debug, Clone)]
pub struct TruncatedBuffer {
    limit: usize,
    data: Vec<u8>,
    seen: u64,
}

impl TruncatedBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            data: Vec::with_capacity(limit.min(8 * 1024)),
            seen: 0,
        }
    }

    /// Accepts all of `bytes`, retaining only what still fits.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let room = self.limit.saturating_sub(self.data.len());
        let keep = room.min(bytes.len());
        self.data.extend_from_slice(&bytes[..keep]);
        self.seen += bytes.len() as u64;
        bytes.len()
    }

    /// Bytes retained, never more than the limit.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes written in total, including discarded ones.
    pub fn total_seen(&self) -> u64 {
        self.seen
    }

    pub fn is_truncated(&self) -> bool {
        self.seen > self.data.len() as u64
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Retained bytes as text; invalid UTF-8 is replaced.
    pub fn content(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.seen = 0;
    }
}

impl io::Write for TruncatedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(TruncatedBuffer::write(self, buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

//! fixed capacity read buffer shared by the parsing and body framing paths.

use tracing::trace;

/// A byte buffer with fixed capacity and varying fill level.
///
/// Two cursors delimit the readable window: `begin` points at the first byte
/// that has not been consumed yet, `end` at the current fill level. The
/// capacity must strictly exceed the longest delimiter ever searched for, so
/// that a delimiter can straddle at most one [exhaust](ReadBuffer::exhaust)
/// boundary.
pub(crate) struct ReadBuffer {
    data: Box<[u8]>,
    begin: usize,
    end: usize,
}

impl ReadBuffer {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            begin: 0,
            end: 0,
        }
    }

    /// Amount of data ready for consumption.
    pub(crate) fn len(&self) -> usize {
        self.end - self.begin
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    pub(crate) fn capacity(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.end == self.data.len()
    }

    /// Forget all buffered data.
    pub(crate) fn clear(&mut self) {
        self.begin = 0;
        self.end = 0;
    }

    /// Move the unconsumed window to the front so the buffer can be filled up
    /// to its full capacity again.
    pub(crate) fn compact(&mut self) {
        if self.begin == 0 {
            return;
        }
        trace!("compacting buffer");
        self.data.copy_within(self.begin..self.end, 0);
        self.end -= self.begin;
        self.begin = 0;
    }

    /// Return (and consume) all buffered data.
    pub(crate) fn exhaust(&mut self) -> Vec<u8> {
        let buf = self.data[self.begin..self.end].to_vec();
        self.begin = 0;
        self.end = 0;
        buf
    }

    /// The readable window.
    pub(crate) fn chunk(&self) -> &[u8] {
        &self.data[self.begin..self.end]
    }

    /// Consume `n` bytes from the front of the readable window.
    pub(crate) fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.len());
        self.begin += n;
        if self.begin == self.end {
            self.begin = 0;
            self.end = 0;
        }
    }

    /// Unfilled tail available for a socket refill. Pair with
    /// [advance_filled](ReadBuffer::advance_filled).
    pub(crate) fn chunk_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.end..]
    }

    pub(crate) fn advance_filled(&mut self, n: usize) {
        self.end += n;
        debug_assert!(self.end <= self.data.len());
    }

    /// Search the first `max_span` bytes of the readable window for `substr`.
    /// Returns the index relative to the window start. Matches extending past
    /// the span limit are not reported.
    pub(crate) fn find_delimiter(&self, substr: &[u8], max_span: usize) -> Option<usize> {
        let window = self.chunk();
        let stop = window.len().min(max_span);
        window[..stop].windows(substr.len()).position(|w| w == substr)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn filled(data: &[u8]) -> ReadBuffer {
        let mut buf = ReadBuffer::with_capacity(16);
        buf.chunk_mut()[..data.len()].copy_from_slice(data);
        buf.advance_filled(data.len());
        buf
    }

    #[test]
    fn cursor_basics() {
        let mut buf = filled(b"hello world");
        assert_eq!(buf.len(), 11);
        assert_eq!(buf.chunk(), b"hello world");

        buf.advance(6);
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.chunk(), b"world");

        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 16);
    }

    #[test]
    fn advance_to_empty_resets_cursors() {
        let mut buf = filled(b"abc");
        buf.advance(3);
        assert!(buf.is_empty());
        assert_eq!(buf.chunk_mut().len(), 16);
    }

    #[test]
    fn compact_preserves_contents() {
        let mut buf = filled(b"0123456789abcdef");
        assert!(buf.is_full());

        buf.advance(10);
        buf.compact();
        assert_eq!(buf.chunk(), b"abcdef");
        assert_eq!(buf.chunk_mut().len(), 10);

        buf.chunk_mut()[..4].copy_from_slice(b"ghij");
        buf.advance_filled(4);
        assert_eq!(buf.chunk(), b"abcdefghij");
    }

    #[test]
    fn exhaust_returns_window_and_resets() {
        let mut buf = filled(b"abcdef");
        buf.advance(2);
        assert_eq!(buf.exhaust(), b"cdef");
        assert!(buf.is_empty());
        assert_eq!(buf.chunk_mut().len(), 16);
    }

    #[test]
    fn find_delimiter_is_span_bounded() {
        let mut buf = filled(b"abc\r\ndef");
        assert_eq!(buf.find_delimiter(b"\r\n", 16), Some(3));
        assert_eq!(buf.find_delimiter(b"\r\n", 5), Some(3));
        // a match must fit inside the span entirely
        assert_eq!(buf.find_delimiter(b"\r\n", 4), None);
        assert_eq!(buf.find_delimiter(b"\r\n", 3), None);
        assert_eq!(buf.find_delimiter(b"xy", 16), None);

        buf.advance(4);
        // indices are relative to the window start
        assert_eq!(buf.find_delimiter(b"\nd", 16), Some(0));
    }
}

//! A growable FIFO byte buffer with amortized compaction.
//!
//! Grounded on the shape of the teacher's [`buf::RingBuf`] (read/write
//! cursors over a backing array) but reworked per spec.md §3: growth
//! doubles capacity instead of wrapping, and compaction shifts unread
//! bytes back to index 0 once `read_index` crosses a third of capacity,
//! rather than treating the backing array as a true ring.

const DEFAULT_COMPACT_DIVISOR: usize = 3;

/// A single-owner, non-thread-safe FIFO byte buffer.
#[derive(Debug, Clone)]
pub struct ByteBuffer {
    data: Vec<u8>,
    read_index: usize,
    write_index: usize,
}

impl ByteBuffer {
    pub fn new(initial_capacity: usize) -> ByteBuffer {
        ByteBuffer {
            data: vec![0u8; initial_capacity],
            read_index: 0,
            write_index: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn readable(&self) -> usize {
        self.write_index - self.read_index
    }

    #[inline]
    pub fn writable(&self) -> usize {
        self.capacity() - self.write_index
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.readable() == 0
    }

    /// The unread bytes, in order.
    pub fn peek(&self) -> &[u8] {
        &self.data[self.read_index..self.write_index]
    }

    /// Appends `src` to the buffer, growing it first if needed.
    pub fn write(&mut self, src: &[u8]) {
        self.reserve(src.len());
        let start = self.write_index;
        self.data[start..start + src.len()].copy_from_slice(src);
        self.move_write_index(src.len());
    }

    /// Ensures at least `needed` writable bytes are available, growing
    /// (and compacting first) per spec.md §3's policy.
    pub fn reserve(&mut self, needed: usize) {
        if needed <= self.writable() {
            return;
        }
        self.maybe_compact();
        if needed <= self.writable() {
            return;
        }
        let doubled = self.capacity() * 2;
        let needed_total = ((self.write_index + needed) as f64 * 1.5).ceil() as usize;
        let new_capacity = doubled.max(needed_total).max(1);
        self.data.resize(new_capacity, 0);
    }

    /// Copies `min(dst.len(), readable())` bytes into `dst`, advancing the
    /// read index, and returns how many bytes were copied.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.readable());
        dst[..n].copy_from_slice(&self.data[self.read_index..self.read_index + n]);
        self.move_read_index(n);
        n
    }

    /// Consumes and returns the next `n` readable bytes, or `None` if
    /// fewer than `n` bytes are available. Does not copy beyond what the
    /// caller asked for and never panics on a short buffer.
    pub fn take(&mut self, n: usize) -> Option<Vec<u8>> {
        if n > self.readable() {
            return None;
        }
        let out = self.data[self.read_index..self.read_index + n].to_vec();
        self.move_read_index(n);
        Some(out)
    }

    /// Advances the read index by `n`, clamped to `readable()`.
    pub fn move_read_index(&mut self, n: usize) {
        let n = n.min(self.readable());
        self.read_index += n;
        if self.read_index == self.write_index {
            // Fully drained: reset cursors so future writes start at 0
            // without waiting for the compaction threshold.
            self.read_index = 0;
            self.write_index = 0;
        } else {
            self.maybe_compact();
        }
    }

    /// Advances the write index by `n`, clamped to `writable()`. Intended
    /// for callers that wrote directly into the tail via
    /// [`ByteBuffer::writable_tail`].
    pub fn move_write_index(&mut self, n: usize) {
        let n = n.min(self.writable());
        self.write_index += n;
    }

    /// A mutable view of the unwritten tail, for readers that want to
    /// `read(2)` directly into the buffer.
    pub fn writable_tail(&mut self) -> &mut [u8] {
        &mut self.data[self.write_index..]
    }

    fn maybe_compact(&mut self) {
        if self.read_index == 0 {
            return;
        }
        if self.read_index * DEFAULT_COMPACT_DIVISOR >= self.capacity() {
            self.data.copy_within(self.read_index..self.write_index, 0);
            self.write_index -= self.read_index;
            self.read_index = 0;
        }
    }
}

impl Default for ByteBuffer {
    fn default() -> ByteBuffer {
        ByteBuffer::new(128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut buf = ByteBuffer::new(8);
        buf.write(b"hello");
        assert_eq!(buf.readable(), 5);
        let mut out = [0u8; 5];
        assert_eq!(buf.read(&mut out), 5);
        assert_eq!(&out, b"hello");
        assert_eq!(buf.readable(), 0);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut buf = ByteBuffer::new(4);
        let payload = vec![7u8; 100];
        buf.write(&payload);
        assert!(buf.capacity() >= 100);
        assert_eq!(buf.readable(), 100);
        assert_eq!(buf.peek(), payload.as_slice());
    }

    #[test]
    fn compacts_once_read_index_crosses_threshold() {
        let mut buf = ByteBuffer::new(16);
        buf.write(&[1u8; 10]);
        let mut sink = [0u8; 6];
        buf.read(&mut sink); // read_index = 6, 6*3=18 >= 16 -> compacts
        assert_eq!(buf.readable(), 4);
        // after compaction, writable space should have grown back.
        assert!(buf.writable() >= 12);
    }

    #[test]
    fn invariants_hold_across_random_ops() {
        let mut buf = ByteBuffer::new(4);
        let mut model: Vec<u8> = Vec::new();
        let mut seed: u32 = 12345;
        let mut next = || {
            seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
            seed
        };
        for _ in 0..500 {
            if next() % 2 == 0 {
                let n = (next() % 37) as usize;
                let chunk: Vec<u8> = (0..n).map(|i| i as u8).collect();
                buf.write(&chunk);
                model.extend_from_slice(&chunk);
            } else {
                let n = (next() % 20) as usize;
                let taken = buf.take(n.min(model.len()));
                if let Some(bytes) = taken {
                    let expected: Vec<u8> = model.drain(..bytes.len()).collect();
                    assert_eq!(bytes, expected);
                }
            }
            assert_eq!(buf.readable(), model.len());
            assert!(buf.writable() <= buf.capacity());
        }
    }

    #[test]
    fn take_returns_none_when_insufficient() {
        let mut buf = ByteBuffer::new(8);
        buf.write(b"ab");
        assert!(buf.take(3).is_none());
        assert_eq!(buf.take(2), Some(b"ab".to_vec()));
    }
}

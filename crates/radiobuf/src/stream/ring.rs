//! Fixed-capacity circular byte store
//!
//! Pure data structure: no locking, no blocking. `SharedBuffer` wraps it in a
//! Mutex + Condvar and owns the wait logic.

/// Circular byte buffer with wrap-around copies.
///
/// `filled` is always exactly the bytes written but not yet read.
pub struct RingBuffer {
    data: Box<[u8]>,
    read_pos: usize,
    write_pos: usize,
    filled: usize,
}

impl RingBuffer {
    /// Allocate a zeroed buffer. `capacity` must be non-zero.
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
            filled: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.capacity()
    }

    /// Fraction of capacity occupied by unread bytes, in [0, 1]
    pub fn fill_level(&self) -> f64 {
        (self.filled as f64 / self.capacity() as f64).clamp(0.0, 1.0)
    }

    /// Copy as much of `src` as fits. Returns the number of bytes stored.
    pub fn write(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.free());
        if n == 0 {
            return 0;
        }

        let cap = self.capacity();
        let end_space = cap - self.write_pos;
        if n <= end_space {
            self.data[self.write_pos..self.write_pos + n].copy_from_slice(&src[..n]);
        } else {
            // Wraps: tail of the array, then the head
            self.data[self.write_pos..].copy_from_slice(&src[..end_space]);
            self.data[..n - end_space].copy_from_slice(&src[end_space..n]);
        }
        self.write_pos = (self.write_pos + n) % cap;
        self.filled += n;
        n
    }

    /// Copy up to `dest.len()` unread bytes out. Returns the number copied.
    pub fn read(&mut self, dest: &mut [u8]) -> usize {
        let n = dest.len().min(self.filled);
        if n == 0 {
            return 0;
        }

        let cap = self.capacity();
        let end_space = cap - self.read_pos;
        if n <= end_space {
            dest[..n].copy_from_slice(&self.data[self.read_pos..self.read_pos + n]);
        } else {
            dest[..end_space].copy_from_slice(&self.data[self.read_pos..]);
            dest[end_space..n].copy_from_slice(&self.data[..n - end_space]);
        }
        self.read_pos = (self.read_pos + n) % cap;
        self.filled -= n;
        n
    }
}

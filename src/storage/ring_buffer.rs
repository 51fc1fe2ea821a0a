use managed::ManagedSlice;

use crate::storage::{Empty, Full};

/// A ring buffer.
///
/// Backs the send and receive queues of a connection. Storage can be
/// borrowed or owned; the transport allocates owned storage once per
/// connection and never resizes it.
#[derive(Debug)]
pub struct RingBuffer<'a, T: 'a> {
    storage: ManagedSlice<'a, T>,
    read_at: usize,
    length: usize,
}

impl<'a, T: 'a> RingBuffer<'a, T> {
    /// Create a ring buffer with the given storage.
    ///
    /// During creation, every element in `storage` is reset.
    pub fn new<S>(storage: S) -> RingBuffer<'a, T>
    where
        S: Into<ManagedSlice<'a, T>>,
    {
        RingBuffer {
            storage: storage.into(),
            read_at: 0,
            length: 0,
        }
    }

    /// Clear the ring buffer.
    pub fn clear(&mut self) {
        self.read_at = 0;
        self.length = 0;
    }

    /// Return the maximum number of elements in the ring buffer.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Return the current number of elements in the ring buffer.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Return the number of elements that can be added to the ring buffer.
    pub fn window(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Query whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Query whether the buffer is full.
    pub fn is_full(&self) -> bool {
        self.window() == 0
    }

    fn get_idx(&self, idx: usize) -> usize {
        let len = self.capacity();
        if len > 0 {
            (self.read_at + idx) % len
        } else {
            0
        }
    }
}

impl<'a, T: Copy + 'a> RingBuffer<'a, T> {
    /// Enqueue one element, failing if the buffer is full.
    pub fn enqueue_one(&mut self, value: T) -> Result<(), Full> {
        if self.is_full() {
            return Err(Full);
        }
        let index = self.get_idx(self.length);
        self.storage[index] = value;
        self.length += 1;
        Ok(())
    }

    /// Dequeue one element, failing if the buffer is empty.
    pub fn dequeue_one(&mut self) -> Result<T, Empty> {
        if self.is_empty() {
            return Err(Empty);
        }
        let value = self.storage[self.read_at];
        self.read_at = self.get_idx(1);
        self.length -= 1;
        Ok(value)
    }

    /// Enqueue as many elements from `data` as will fit, returning how
    /// many were copied in.
    pub fn enqueue_slice(&mut self, data: &[T]) -> usize {
        let count = data.len().min(self.window());
        let mut written = 0;
        while written < count {
            let index = self.get_idx(self.length);
            // Contiguous run from the write position to whichever comes
            // first, the end of storage or the requested count.
            let run = (self.capacity() - index).min(count - written);
            self.storage[index..index + run].copy_from_slice(&data[written..written + run]);
            self.length += run;
            written += run;
        }
        count
    }

    /// Dequeue as many elements into `data` as it holds, returning how
    /// many were copied out.
    pub fn dequeue_slice(&mut self, data: &mut [T]) -> usize {
        let count = self.read_allocated(0, data);
        self.dequeue_allocated(count);
        count
    }

    /// Copy stored elements starting `offset` in from the front into
    /// `data`, without consuming them. Returns how many were copied.
    pub fn read_allocated(&self, offset: usize, data: &mut [T]) -> usize {
        if offset >= self.length {
            return 0;
        }
        let count = data.len().min(self.length - offset);
        let mut read = 0;
        while read < count {
            let index = self.get_idx(offset + read);
            let run = (self.capacity() - index).min(count - read);
            data[read..read + run].copy_from_slice(&self.storage[index..index + run]);
            read += run;
        }
        count
    }

    /// Drop `count` elements from the front.
    ///
    /// # Panics
    /// Panics if fewer than `count` elements are stored.
    pub fn dequeue_allocated(&mut self, count: usize) {
        assert!(count <= self.length, "dequeuing more than is stored");
        self.read_at = self.get_idx(count);
        self.length -= count;
    }
}

impl<'a, T: 'a> From<ManagedSlice<'a, T>> for RingBuffer<'a, T> {
    fn from(slice: ManagedSlice<'a, T>) -> RingBuffer<'a, T> {
        RingBuffer::new(slice)
    }
}

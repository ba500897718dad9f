//! Shared storage buffers
//!
//! A `StorageBuffer<T>` is the CPU stand-in for a GPU storage buffer: an array
//! of `T` laid out as 32-bit words so that parallel work groups can store to
//! disjoint elements and run atomic read-modify-write on single fields without
//! locks. `T` must be `Pod` and a whole number of words.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};

use bytemuck::Pod;

/// Fixed-length array of `T` backed by atomic words
pub struct StorageBuffer<T: Pod> {
    words: Vec<AtomicU32>,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: Pod> StorageBuffer<T> {
    const WORDS: usize = {
        assert!(
            std::mem::size_of::<T>() % 4 == 0 && std::mem::size_of::<T>() > 0,
            "storage buffer elements must be a whole number of 32-bit words"
        );
        std::mem::size_of::<T>() / 4
    };

    /// Zero-filled buffer of `len` elements
    pub fn new(len: usize) -> Self {
        let words = (0..len * Self::WORDS).map(|_| AtomicU32::new(0)).collect();
        Self {
            words,
            len,
            _marker: PhantomData,
        }
    }

    /// Buffer initialised from a slice
    pub fn from_slice(values: &[T]) -> Self {
        let buffer = Self::new(values.len());
        for (index, value) in values.iter().enumerate() {
            buffer.write(index, value);
        }
        buffer
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Load element `index` word by word
    pub fn read(&self, index: usize) -> T {
        let mut value = T::zeroed();
        let words = self.element(index);
        for (chunk, word) in bytemuck::bytes_of_mut(&mut value)
            .chunks_exact_mut(4)
            .zip(words)
        {
            chunk.copy_from_slice(&word.load(Ordering::Relaxed).to_ne_bytes());
        }
        value
    }

    /// Store element `index` word by word.
    ///
    /// Not atomic as a whole: only one lane may write a given element in a pass.
    pub fn write(&self, index: usize, value: &T) {
        let words = self.element(index);
        for (chunk, word) in bytemuck::bytes_of(value).chunks_exact(4).zip(words) {
            let bits = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            word.store(bits, Ordering::Relaxed);
        }
    }

    /// The atomic word at `byte_offset` inside element `index`.
    ///
    /// Pair with `std::mem::offset_of!` to address a single `u32` field.
    pub fn atomic(&self, index: usize, byte_offset: usize) -> &AtomicU32 {
        debug_assert!(byte_offset % 4 == 0 && byte_offset / 4 < Self::WORDS);
        &self.words[index * Self::WORDS + byte_offset / 4]
    }

    /// Zero every element
    pub fn clear(&mut self) {
        self.clear_prefix(self.len);
    }

    /// Zero the first `count` elements
    pub fn clear_prefix(&mut self, count: usize) {
        let end = count.min(self.len) * Self::WORDS;
        for word in &mut self.words[..end] {
            *word.get_mut() = 0;
        }
    }

    /// Copy the first `count` elements out
    pub fn to_vec(&self, count: usize) -> Vec<T> {
        (0..count.min(self.len)).map(|i| self.read(i)).collect()
    }

    fn element(&self, index: usize) -> &[AtomicU32] {
        let start = index * Self::WORDS;
        &self.words[start..start + Self::WORDS]
    }
}

impl<T: Pod> std::fmt::Debug for StorageBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageBuffer")
            .field("element", &std::any::type_name::<T>())
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;

    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
    struct Pair {
        a: u32,
        b: f32,
    }

    #[test]
    fn test_read_write() {
        let buffer = StorageBuffer::<Pair>::new(4);
        assert_eq!(buffer.read(2), Pair { a: 0, b: 0.0 });

        buffer.write(2, &Pair { a: 7, b: 1.5 });
        assert_eq!(buffer.read(2), Pair { a: 7, b: 1.5 });
        assert_eq!(buffer.read(1), Pair::zeroed());
    }

    #[test]
    fn test_field_atomic() {
        let buffer = StorageBuffer::from_slice(&[Pair { a: 1, b: 2.0 }; 3]);
        buffer
            .atomic(1, std::mem::offset_of!(Pair, a))
            .fetch_or(0x10, Ordering::Relaxed);
        assert_eq!(buffer.read(1).a, 0x11);
        assert_eq!(buffer.read(1).b, 2.0);
        assert_eq!(buffer.read(0).a, 1);
    }

    #[test]
    fn test_clear() {
        let mut buffer = StorageBuffer::from_slice(&[7u32, 8, 9]);
        buffer.clear_prefix(2);
        assert_eq!(buffer.to_vec(3), vec![0, 0, 9]);
        buffer.clear();
        assert_eq!(buffer.to_vec(3), vec![0, 0, 0]);
        assert_eq!(buffer.to_vec(10).len(), 3);
    }
}

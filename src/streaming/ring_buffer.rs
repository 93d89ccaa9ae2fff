//! Lock-guarded sample ring
//!
//! One producer (the mixer thread) and one consumer (the audio callback).
//! Storage is a fixed power-of-two block of `f32`, so memory use does not grow
//! with playback length. Positions are free-running counters published with
//! release/acquire ordering; the storage itself sits behind a
//! `parking_lot::Mutex`.

use crate::{Result, SidError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Largest ring accepted, in samples (512 MiB of `f32`)
const MAX_CAPACITY: usize = 512 * 1024 * 1024 / std::mem::size_of::<f32>();

/// Single-producer single-consumer sample ring
#[derive(Debug)]
pub struct RingBuffer {
    buffer: Mutex<Vec<f32>>,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
    capacity: usize,
    mask: usize,
}

impl RingBuffer {
    /// Create a ring holding at least `requested_capacity - 1` samples
    ///
    /// The capacity is rounded up to a power of two.
    pub fn new(requested_capacity: usize) -> Result<Self> {
        if requested_capacity == 0 {
            return Err(SidError::AudioDevice(
                "ring buffer capacity must be greater than 0".into(),
            ));
        }
        let capacity = requested_capacity.next_power_of_two();
        if capacity > MAX_CAPACITY {
            return Err(SidError::AudioDevice(format!(
                "ring buffer capacity {capacity} exceeds maximum {MAX_CAPACITY}"
            )));
        }
        Ok(RingBuffer {
            buffer: Mutex::new(vec![0.0; capacity]),
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            capacity,
            mask: capacity - 1,
        })
    }

    /// Storage size in samples
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples waiting to be read
    pub fn available_read(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// Free slots; one slot always stays empty
    pub fn available_write(&self) -> usize {
        self.capacity - 1 - self.available_read()
    }

    /// Copy as many samples as fit, returning how many were taken
    pub fn write(&self, samples: &[f32]) -> usize {
        let mut buf = self.buffer.lock();
        // free space is computed under the lock so a concurrent read cannot shrink it
        let write_pos = self.write_pos.load(Ordering::Acquire);
        let to_write = samples.len().min(self.available_write());
        if to_write == 0 {
            return 0;
        }

        let start = write_pos & self.mask;
        let first = to_write.min(self.capacity - start);
        buf[start..start + first].copy_from_slice(&samples[..first]);
        buf[..to_write - first].copy_from_slice(&samples[first..to_write]);
        drop(buf);

        self.write_pos
            .store(write_pos.wrapping_add(to_write), Ordering::Release);
        to_write
    }

    /// Fill `dest` from the ring, returning how many samples were read
    pub fn read(&self, dest: &mut [f32]) -> usize {
        let buf = self.buffer.lock();
        let read_pos = self.read_pos.load(Ordering::Acquire);
        let to_read = dest.len().min(self.available_read());
        if to_read == 0 {
            return 0;
        }

        let start = read_pos & self.mask;
        let first = to_read.min(self.capacity - start);
        dest[..first].copy_from_slice(&buf[start..start + first]);
        dest[first..to_read].copy_from_slice(&buf[..to_read - first]);
        drop(buf);

        self.read_pos
            .store(read_pos.wrapping_add(to_read), Ordering::Release);
        to_read
    }

    /// Discard everything waiting to be read
    pub fn flush(&self) {
        let write_pos = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(write_pos, Ordering::Release);
    }

    /// Nothing to read
    pub fn is_empty(&self) -> bool {
        self.available_read() == 0
    }

    /// No room to write
    pub fn is_full(&self) -> bool {
        self.available_write() == 0
    }

    /// Fill level, 0.0 to 1.0
    pub fn fill_percentage(&self) -> f32 {
        self.available_read() as f32 / self.capacity as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        let rb = RingBuffer::new(1000).unwrap();
        assert_eq!(rb.capacity(), 1024);
        assert!(rb.is_empty());
        assert!(!rb.is_full());
    }

    #[test]
    fn test_write_and_read() {
        let rb = RingBuffer::new(16).unwrap();
        let samples = [0.1, 0.2, 0.3, 0.4];
        assert_eq!(rb.write(&samples), 4);
        assert_eq!(rb.available_read(), 4);

        let mut dest = [0.0; 4];
        assert_eq!(rb.read(&mut dest), 4);
        assert_eq!(dest, samples);
    }

    #[test]
    fn test_wrap_around_keeps_order() {
        let rb = RingBuffer::new(16).unwrap();
        let first: Vec<f32> = (0..10).map(|i| i as f32).collect();
        assert_eq!(rb.write(&first), 10);
        let mut dest = [0.0; 8];
        assert_eq!(rb.read(&mut dest), 8);

        let second: Vec<f32> = (10..22).map(|i| i as f32).collect();
        assert_eq!(rb.write(&second), 12);

        let mut rest = [0.0; 14];
        assert_eq!(rb.read(&mut rest), 14);
        let expected: Vec<f32> = (8..22).map(|i| i as f32).collect();
        assert_eq!(rest.to_vec(), expected);
    }

    #[test]
    fn test_full_ring_rejects_writes() {
        let rb = RingBuffer::new(8).unwrap();
        assert_eq!(rb.write(&[1.0; 20]), 7);
        assert!(rb.is_full());
        assert_eq!(rb.write(&[1.0]), 0);
        assert!(rb.fill_percentage() > 0.85);
    }

    #[test]
    fn test_flush() {
        let rb = RingBuffer::new(16).unwrap();
        rb.write(&[1.0; 8]);
        rb.flush();
        assert!(rb.is_empty());
    }

    #[test]
    fn test_invalid_capacity() {
        assert!(RingBuffer::new(0).is_err());
        assert!(RingBuffer::new(MAX_CAPACITY + 1).is_err());
    }
}

//! System audio output through rodio
//!
//! A rodio [`Source`] pulls samples from the shared [`RingBuffer`] in
//! batches. An empty ring plays silence so the stream stays open until the
//! producer signals the end.

use super::RingBuffer;
use crate::{Result, SidError};
use rodio::{OutputStream, Sink, Source};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Samples fetched from the ring per lock
const BATCH: usize = 4096;

struct RingBufferSource {
    ring_buffer: Arc<RingBuffer>,
    sample_rate: u32,
    channels: u16,
    finished: Arc<AtomicBool>,
    batch: Vec<f32>,
    batch_len: usize,
    batch_pos: usize,
}

impl RingBufferSource {
    fn new(
        ring_buffer: Arc<RingBuffer>,
        sample_rate: u32,
        channels: u16,
        finished: Arc<AtomicBool>,
    ) -> Self {
        RingBufferSource {
            ring_buffer,
            sample_rate,
            channels,
            finished,
            batch: vec![0.0; BATCH],
            batch_len: 0,
            batch_pos: 0,
        }
    }
}

impl Source for RingBufferSource {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.ring_buffer.available_read().max(BATCH))
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

impl Iterator for RingBufferSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.batch_pos >= self.batch_len {
            let channels = self.channels.max(1) as usize;
            // whole frames only, so silence never splits a frame
            let frames = self.ring_buffer.available_read() / channels * channels;
            let wanted = frames.min(self.batch.len());
            let read = self.ring_buffer.read(&mut self.batch[..wanted]);
            if read == 0 {
                if self.finished.load(Ordering::Relaxed) {
                    return None;
                }
                self.batch[..channels].fill(0.0);
                self.batch_len = channels;
            } else {
                self.batch_len = read;
            }
            self.batch_pos = 0;
        }
        let sample = self.batch[self.batch_pos];
        self.batch_pos += 1;
        Some(sample)
    }
}

/// Playback on the default output device
pub struct AudioDevice {
    _stream: OutputStream,
    sink: Sink,
    finished: Arc<AtomicBool>,
}

impl AudioDevice {
    /// Open the default device and start pulling from `ring_buffer`
    pub fn new(sample_rate: u32, channels: u16, ring_buffer: Arc<RingBuffer>) -> Result<Self> {
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| SidError::AudioDevice(format!("failed to open audio stream: {e}")))?;
        let sink = Sink::try_new(&handle)
            .map_err(|e| SidError::AudioDevice(format!("failed to create audio sink: {e}")))?;

        let finished = Arc::new(AtomicBool::new(false));
        sink.append(RingBufferSource::new(
            ring_buffer,
            sample_rate,
            channels,
            Arc::clone(&finished),
        ));

        Ok(AudioDevice {
            _stream: stream,
            sink,
            finished,
        })
    }

    /// Pause output
    pub fn pause(&self) {
        self.sink.pause();
    }

    /// Resume output
    pub fn play(&self) {
        self.sink.play();
    }

    /// True unless paused
    pub fn is_playing(&self) -> bool {
        !self.sink.is_paused()
    }

    /// No more samples will be produced; the source ends once the ring drains
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }

    /// Block until the source has ended
    pub fn wait_for_finish(&self) {
        self.sink.sleep_until_end();
    }
}

impl Drop for AudioDevice {
    fn drop(&mut self) {
        self.finish();
        self.sink.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(ring: &Arc<RingBuffer>, finished: &Arc<AtomicBool>) -> RingBufferSource {
        RingBufferSource::new(Arc::clone(ring), 44_100, 2, Arc::clone(finished))
    }

    #[test]
    fn test_source_reports_format() {
        let ring = Arc::new(RingBuffer::new(BATCH).unwrap());
        let finished = Arc::new(AtomicBool::new(false));
        let source = source(&ring, &finished);
        assert_eq!(source.sample_rate(), 44_100);
        assert_eq!(source.channels(), 2);
        assert!(source.total_duration().is_none());
    }

    #[test]
    fn test_source_plays_ring_then_silence() {
        let ring = Arc::new(RingBuffer::new(BATCH).unwrap());
        let finished = Arc::new(AtomicBool::new(false));
        ring.write(&[0.25, -0.25]);
        let mut source = source(&ring, &finished);
        assert_eq!(source.next(), Some(0.25));
        assert_eq!(source.next(), Some(-0.25));
        assert_eq!(source.next(), Some(0.0));
        assert_eq!(source.next(), Some(0.0));
    }

    #[test]
    fn test_source_drains_ring_after_finish() {
        let ring = Arc::new(RingBuffer::new(BATCH).unwrap());
        let finished = Arc::new(AtomicBool::new(true));
        ring.write(&[0.5, 0.5]);
        let mut source = source(&ring, &finished);
        assert_eq!(source.next(), Some(0.5));
        assert_eq!(source.next(), Some(0.5));
        assert_eq!(source.next(), None);
    }

    #[test]
    fn test_source_ends_after_finish_and_drain() {
        let ring = Arc::new(RingBuffer::new(BATCH).unwrap());
        let finished = Arc::new(AtomicBool::new(false));
        let mut source = source(&ring, &finished);
        assert_eq!(source.next(), Some(0.0));
        assert_eq!(source.next(), Some(0.0));
        finished.store(true, Ordering::Relaxed);
        assert_eq!(source.next(), None);
    }

    #[test]
    fn test_device_when_available() {
        let ring = Arc::new(RingBuffer::new(BATCH).unwrap());
        match AudioDevice::new(44_100, 2, ring) {
            Ok(device) => {
                assert!(device.is_playing());
                device.pause();
                assert!(!device.is_playing());
                device.finish();
            }
            Err(err) => eprintln!("skipping audio device test (no backend): {err}"),
        }
    }
}

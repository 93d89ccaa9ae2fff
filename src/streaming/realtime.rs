//! Producer side of real-time playback

use super::{RingBuffer, StreamConfig, BUFFER_BACKOFF_MICROS};
use crate::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Give up after this many empty retries (~100 ms at the default backoff)
const MAX_RETRIES: u32 = 1000;

/// Producer statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaybackStats {
    /// Writes that timed out with samples left over
    pub overrun_count: usize,
    /// Samples handed to the ring
    pub samples_written: usize,
    /// Ring fill level after the last write
    pub fill_percentage: f32,
}

/// Feeds samples into the ring the audio device reads from
#[derive(Debug)]
pub struct RealtimePlayer {
    buffer: Arc<RingBuffer>,
    config: StreamConfig,
    stats: Mutex<PlaybackStats>,
}

impl RealtimePlayer {
    /// Allocate the ring for `config`
    pub fn new(config: StreamConfig) -> Result<Self> {
        Ok(RealtimePlayer {
            buffer: Arc::new(RingBuffer::new(config.ring_buffer_size)?),
            config,
            stats: Mutex::new(PlaybackStats::default()),
        })
    }

    /// Stream settings
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Write all samples, sleeping while the ring is full
    ///
    /// Returns the number written; less than `samples.len()` only if the
    /// consumer stalled for longer than the retry budget.
    pub fn write_blocking(&self, samples: &[f32]) -> usize {
        let mut remaining = samples;
        let mut total = 0;
        let mut retries = 0;

        while !remaining.is_empty() && retries < MAX_RETRIES {
            let written = self.buffer.write(remaining);
            if written == 0 {
                std::thread::sleep(Duration::from_micros(BUFFER_BACKOFF_MICROS));
                retries += 1;
                continue;
            }
            remaining = &remaining[written..];
            total += written;
            retries = 0;
        }

        let mut stats = self.stats.lock();
        stats.samples_written += total;
        stats.fill_percentage = self.buffer.fill_percentage();
        if !remaining.is_empty() {
            stats.overrun_count += 1;
            warn!(dropped = remaining.len(), "audio device stalled, samples dropped");
        }
        total
    }

    /// Current statistics
    pub fn stats(&self) -> PlaybackStats {
        *self.stats.lock()
    }

    /// Ring fill level, 0.0 to 1.0
    pub fn fill_percentage(&self) -> f32 {
        self.buffer.fill_percentage()
    }

    /// Shared handle on the ring for the audio device
    pub fn buffer(&self) -> Arc<RingBuffer> {
        Arc::clone(&self.buffer)
    }
}

impl Drop for RealtimePlayer {
    fn drop(&mut self) {
        let stats = self.stats.lock();
        debug!(
            samples = stats.samples_written,
            overruns = stats.overrun_count,
            "playback complete"
        );
    }
}

//! Audio Output & Streaming
//!
//! Real-time playback of mixer output. The mixer thread converts each driver
//! buffer to `f32` and pushes it into a fixed-size ring; a rodio source pulls
//! from the ring on the audio thread. When the ring is full the producer
//! sleeps, which paces emulation to the device clock.

pub mod audio_device;
pub mod realtime;
pub mod ring_buffer;

pub use audio_device::AudioDevice;
pub use realtime::{PlaybackStats, RealtimePlayer};
pub use ring_buffer::RingBuffer;

use crate::audio::{decode_s16le, AudioDriver};
use crate::config::AudioConfig;
use crate::Result;
use tracing::debug;

/// Producer backoff while the ring is full, in microseconds
pub const BUFFER_BACKOFF_MICROS: u64 = 100;

/// Ring and device settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Ring size in samples (all channels)
    pub ring_buffer_size: usize,
    /// Device rate in Hz
    pub sample_rate: u32,
    /// Interleaved channels
    pub channels: u16,
}

impl StreamConfig {
    /// About 90 ms of stereo at 44.1 kHz
    pub fn low_latency(sample_rate: u32, channels: u16) -> Self {
        StreamConfig {
            ring_buffer_size: 4096 * channels as usize,
            sample_rate,
            channels,
        }
    }

    /// About 370 ms at 44.1 kHz
    pub fn stable(sample_rate: u32, channels: u16) -> Self {
        StreamConfig {
            ring_buffer_size: 16384 * channels as usize,
            sample_rate,
            channels,
        }
    }

    /// Stable settings matching the mixer's output format
    pub fn for_audio(audio: &AudioConfig) -> Self {
        StreamConfig::stable(audio.sampling_rate.frequency(), audio.channels)
    }

    /// Ring latency in milliseconds
    pub fn latency_ms(&self) -> f32 {
        let frames = self.ring_buffer_size as f32 / self.channels.max(1) as f32;
        frames / self.sample_rate as f32 * 1000.0
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig::stable(44_100, 2)
    }
}

/// Mixer driver playing through the system audio device
pub struct StreamingDriver {
    player: RealtimePlayer,
    device: AudioDevice,
    scratch: Vec<f32>,
    channels: u16,
    frames: u64,
}

impl StreamingDriver {
    /// Open the default device for `config`
    pub fn new(config: StreamConfig) -> Result<Self> {
        let player = RealtimePlayer::new(config)?;
        let device = AudioDevice::new(config.sample_rate, config.channels, player.buffer())?;
        debug!(
            rate = config.sample_rate,
            channels = config.channels,
            latency_ms = config.latency_ms(),
            "streaming driver opened"
        );
        Ok(StreamingDriver {
            player,
            device,
            scratch: Vec::new(),
            channels: config.channels.max(1),
            frames: 0,
        })
    }

    /// Producer statistics
    pub fn stats(&self) -> PlaybackStats {
        self.player.stats()
    }

    /// Let the device play out what is buffered, then return
    pub fn finish(self) {
        self.device.finish();
        self.device.wait_for_finish();
    }
}

impl AudioDriver for StreamingDriver {
    fn write(&mut self, buffer: &[u8]) -> Result<()> {
        self.scratch.clear();
        self.scratch
            .extend(decode_s16le(buffer).map(|s| s as f32 / 32768.0));
        let written = self.player.write_blocking(&self.scratch);
        self.frames += (written / self.channels as usize) as u64;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }
}

impl std::fmt::Debug for StreamingDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingDriver")
            .field("channels", &self.channels)
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_stream_config_latency() {
        let config = StreamConfig::low_latency(44_100, 2);
        assert_relative_eq!(config.latency_ms(), 92.879, epsilon = 0.01);
        assert!(StreamConfig::stable(44_100, 1).latency_ms() > 300.0);
    }

    #[test]
    fn test_stream_config_for_audio() {
        let audio = AudioConfig::default();
        let config = StreamConfig::for_audio(&audio);
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.channels, audio.channels);
    }
}

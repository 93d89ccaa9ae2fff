//! Audio Drivers
//!
//! The mixer hands finished buffers of interleaved signed 16-bit little-endian
//! PCM to an [`AudioDriver`]. Drivers may block until the device has room,
//! which is how playback speed is throttled to real time.

use crate::Result;
#[cfg(feature = "wav")]
use crate::{config::AudioConfig, SidError};
#[cfg(feature = "wav")]
use std::path::Path;
use tracing::trace;

/// Sink for mixed audio
pub trait AudioDriver {
    /// Consume one buffer of interleaved s16le frames
    fn write(&mut self, buffer: &[u8]) -> Result<()>;

    /// Frames consumed so far
    fn frames_written(&self) -> u64;
}

/// Decode interleaved s16le bytes
pub fn decode_s16le(buffer: &[u8]) -> impl Iterator<Item = i16> + '_ {
    buffer
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
}

/// Collects audio in memory
#[derive(Debug, Clone)]
pub struct BufferDriver {
    channels: u16,
    bytes: Vec<u8>,
    writes: usize,
}

impl BufferDriver {
    /// Create an empty driver for `channels` interleaved channels
    pub fn new(channels: u16) -> Self {
        BufferDriver {
            channels: channels.max(1),
            bytes: Vec::new(),
            writes: 0,
        }
    }

    /// Raw bytes received
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decoded samples, interleaved
    pub fn samples(&self) -> Vec<i16> {
        decode_s16le(&self.bytes).collect()
    }

    /// Decoded samples of one channel
    pub fn channel(&self, channel: usize) -> Vec<i16> {
        self.samples()
            .into_iter()
            .skip(channel)
            .step_by(self.channels as usize)
            .collect()
    }

    /// Number of `write` calls
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Root mean square of all samples
    pub fn rms(&self) -> f64 {
        let samples = self.samples();
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum / samples.len() as f64).sqrt()
    }
}

impl AudioDriver for BufferDriver {
    fn write(&mut self, buffer: &[u8]) -> Result<()> {
        trace!(bytes = buffer.len(), "buffer driver write");
        self.bytes.extend_from_slice(buffer);
        self.writes += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        (self.bytes.len() / (2 * self.channels as usize)) as u64
    }
}

/// Writes 16-bit PCM WAV files
#[cfg(feature = "wav")]
pub struct WavDriver {
    writer: hound::WavWriter<std::io::BufWriter<std::fs::File>>,
    channels: u16,
    frames: u64,
}

#[cfg(feature = "wav")]
impl WavDriver {
    /// Create a WAV file with the rate and channel count of `config`
    pub fn create<P: AsRef<Path>>(path: P, config: &AudioConfig) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: config.channels,
            sample_rate: config.sampling_rate.frequency(),
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path.as_ref(), spec)
            .map_err(|e| SidError::AudioFile(format!("Failed to create WAV file: {}", e)))?;
        Ok(WavDriver {
            writer,
            channels: config.channels,
            frames: 0,
        })
    }

    /// Flush and close the file
    pub fn finalize(self) -> Result<()> {
        self.writer
            .finalize()
            .map_err(|e| SidError::AudioFile(format!("Failed to finalize WAV file: {}", e)))
    }
}

#[cfg(feature = "wav")]
impl AudioDriver for WavDriver {
    fn write(&mut self, buffer: &[u8]) -> Result<()> {
        let mut samples = 0u64;
        for sample in decode_s16le(buffer) {
            self.writer
                .write_sample(sample)
                .map_err(|e| SidError::AudioFile(format!("Failed to write sample: {}", e)))?;
            samples += 1;
        }
        self.frames += samples / self.channels as u64;
        trace!(frames = self.frames, "wav driver write");
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }
}

#[cfg(feature = "wav")]
impl std::fmt::Debug for WavDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavDriver")
            .field("channels", &self.channels)
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_driver_collects_frames() {
        let mut driver = BufferDriver::new(2);
        let frames: Vec<u8> = [1i16, -1, 300, -300]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        driver.write(&frames).unwrap();
        assert_eq!(driver.frames_written(), 2);
        assert_eq!(driver.samples(), vec![1, -1, 300, -300]);
        assert_eq!(driver.channel(1), vec![-1, -300]);
        assert_eq!(driver.writes(), 1);
    }

    #[cfg(feature = "wav")]
    #[test]
    fn test_wav_driver_writes_readable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let config = AudioConfig {
            channels: 1,
            ..AudioConfig::default()
        };
        let mut driver = WavDriver::create(&path, &config).unwrap();
        let bytes: Vec<u8> = (0..100i16).flat_map(|s| (s * 10).to_le_bytes()).collect();
        driver.write(&bytes).unwrap();
        assert_eq!(driver.frames_written(), 100);
        driver.finalize().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 44_100);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 100);
        assert_eq!(samples[7], 70);
    }
}

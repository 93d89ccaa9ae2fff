//! MOS 6581/8580 SID Emulator
//!
//! A cycle-accurate emulator of the MOS Technology SID sound chip in both of its
//! production revisions, driven by a two-phase discrete-event scheduler and mixed
//! to host audio through a resampling pipeline.
//!
//! # Features
//! - Cycle-accurate oscillators with hard sync, ring modulation and the noise LFSR
//! - Combined waveforms from per-revision bit-level tables
//! - ADSR envelopes including the exponential decay divider and the ADSR delay bug
//! - 6581 FET-distortion filter and 8580 linear filter
//! - Write-only register bus decay, OSC3/ENV3 and paddle readback
//! - N-chip mixer with per-chip volume, balance, delay and fades
//! - Decimating and two-pass FIR resampling with triangular dither
//! - Fake-stereo chip pairs
//!
//! # Crate feature flags
//! - `emulator` (default): Chip core, scheduler, mixer and resamplers
//! - `wav` (default): WAV file audio driver (enables optional `hound` dep)
//! - `streaming` (opt-in): Real-time audio output (enables optional `rodio` dep)
//!
//! # Quick start
//! ## Core chip only
//! ```no_run
//! use mos_sid::{ChipModel, Sid};
//! let mut chip = Sid::new(ChipModel::Mos6581);
//! chip.write(0x00, 0x25); // Voice 1 frequency lo
//! chip.write(0x01, 0x11); // Voice 1 frequency hi
//! chip.write(0x05, 0x09); // Attack/decay
//! chip.write(0x06, 0xF0); // Sustain/release
//! chip.write(0x18, 0x0F); // Volume
//! chip.write(0x04, 0x21); // Sawtooth, gate on
//! let mut samples = Vec::new();
//! chip.clock(20_000, |s| samples.push(s));
//! ```
//!
//! ## Scheduler, mixer and WAV output
//! ```no_run
//! # #[cfg(feature = "wav")]
//! # {
//! use mos_sid::audio::WavDriver;
//! use mos_sid::{EventScheduler, Sid, SidConfig, SidMixer};
//! let config = SidConfig::default();
//! let mut scheduler = EventScheduler::new();
//! let driver = WavDriver::create("out.wav", &config.audio).unwrap();
//! let mut mixer = SidMixer::new(&mut scheduler, &config, driver).unwrap();
//! mixer.add(0, Sid::new(config.chips[0].model));
//! mixer.start(&mut scheduler).unwrap();
//! mixer.write(&scheduler, 0, 0x18, 0x0F).unwrap();
//! scheduler.run_until(985_248, &mut mixer).unwrap();
//! mixer.into_driver().unwrap().finalize().unwrap();
//! # }
//! ```

#![warn(missing_docs)]

pub mod audio; // Audio Drivers
pub mod config; // Configuration
pub mod event; // Event Scheduler
pub mod fake_stereo; // Fake Stereo Adapter
pub mod mixer; // SID Mixer
pub mod resample; // Sample Rate Conversion
pub mod sid; // SID Emulation (core)
#[cfg(feature = "streaming")]
pub mod streaming; // Audio Output & Streaming
pub mod write_log; // Register Write Logs

/// Error types for SID emulator operations
#[derive(thiserror::Error, Debug)]
pub enum SidError {
    /// IO error from filesystem or device
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Resampler cannot be built for the requested rates
    #[error("Resampler error: {0}")]
    Resampler(String),

    /// Scheduler queue invariant violated
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// A chip was clocked to a point before its last clocked cycle
    #[error("Time skew: chip last clocked at cycle {last}, asked to clock to {now}")]
    TimeSkew {
        /// Cycle the chip was last clocked to
        last: u64,
        /// Cycle the chip was asked to clock to
        now: u64,
    },

    /// No chip in the requested mixer slot
    #[error("No SID chip in slot {0}")]
    NoSuchChip(usize),

    /// Error writing audio file
    #[error("Audio file write error: {0}")]
    AudioFile(String),

    /// Audio device error
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for SidError {
    /// Converts a String into `SidError::Other`.
    ///
    /// Prefer the specific variants (`SidError::Config`, `SidError::Resampler`, ...)
    /// where the failure has a known category.
    fn from(msg: String) -> Self {
        SidError::Other(msg)
    }
}

impl From<&str> for SidError {
    /// Converts a string slice into `SidError::Other`.
    fn from(msg: &str) -> Self {
        SidError::Other(msg.to_string())
    }
}

/// Result type for emulator operations
pub type Result<T> = std::result::Result<T, SidError>;

// Public API exports
pub use config::{AudioConfig, ChipConfig, CpuClock, SamplingMethod, SamplingRate, SidConfig};
pub use event::{EventContext, EventId, EventScheduler, Phase};
pub use fake_stereo::FakeStereo;
pub use mixer::SidMixer;
pub use resample::{create_resampler, Resample, Resampler};
pub use sid::{ChipModel, Sid};
#[cfg(feature = "streaming")]
pub use streaming::{AudioDevice, RealtimePlayer, RingBuffer, StreamConfig, StreamingDriver};

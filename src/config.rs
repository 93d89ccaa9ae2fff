//! Emulator Configuration
//!
//! Serde types describing the system clock, the audio pipeline and each chip
//! slot. Configurations are usually read from JSON and must pass
//! [`SidConfig::validate`] before a mixer is built from them.

use crate::sid::{ChipModel, FilterCurve, Sid};
use crate::{Result, SidError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Volume range in dB
pub const VOLUME_RANGE_DB: std::ops::RangeInclusive<f32> = -6.0..=6.0;

/// Longest per-chip delay in milliseconds
pub const MAX_DELAY_MS: u32 = 100;

/// System clock standard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuClock {
    /// 985248 Hz
    #[default]
    Pal,
    /// 1022727 Hz
    Ntsc,
}

impl CpuClock {
    /// CPU clock in Hz (crystal divided down)
    pub fn frequency(self) -> f64 {
        match self {
            CpuClock::Pal => 17_734_472.0 / 18.0,
            CpuClock::Ntsc => 14_318_180.0 / 14.0,
        }
    }
}

/// How chip output is converted to the host rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMethod {
    /// Linear interpolation, cheap
    #[default]
    Decimate,
    /// Two-pass windowed-sinc FIR, accurate
    Resample,
}

impl fmt::Display for SamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplingMethod::Decimate => write!(f, "decimate"),
            SamplingMethod::Resample => write!(f, "resample"),
        }
    }
}

impl std::str::FromStr for SamplingMethod {
    type Err = SidError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "decimate" => Ok(SamplingMethod::Decimate),
            "resample" => Ok(SamplingMethod::Resample),
            other => Err(SidError::Config(format!("unknown sampling method '{other}'"))),
        }
    }
}

/// Supported output rates
///
/// Serialized as the rate in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SamplingRate {
    /// 8 kHz
    VeryLow,
    /// 44.1 kHz
    #[default]
    Low,
    /// 48 kHz
    Medium,
    /// 96 kHz
    High,
}

impl SamplingRate {
    /// Output rate in Hz
    pub fn frequency(self) -> u32 {
        match self {
            SamplingRate::VeryLow => 8_000,
            SamplingRate::Low => 44_100,
            SamplingRate::Medium => 48_000,
            SamplingRate::High => 96_000,
        }
    }

    /// Highest frequency the resampler keeps accurate, in Hz
    pub fn middle_frequency(self) -> u32 {
        match self {
            SamplingRate::VeryLow => 3_000,
            _ => 20_000,
        }
    }
}

impl TryFrom<u32> for SamplingRate {
    type Error = SidError;

    fn try_from(hz: u32) -> Result<Self> {
        match hz {
            8_000 => Ok(SamplingRate::VeryLow),
            44_100 => Ok(SamplingRate::Low),
            48_000 => Ok(SamplingRate::Medium),
            96_000 => Ok(SamplingRate::High),
            other => Err(SidError::Config(format!(
                "unsupported sampling rate {other} Hz (use 8000, 44100, 48000 or 96000)"
            ))),
        }
    }
}

impl From<SamplingRate> for u32 {
    fn from(rate: SamplingRate) -> u32 {
        rate.frequency()
    }
}

/// Audio pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Resampling strategy
    pub sampling_method: SamplingMethod,
    /// Output rate
    pub sampling_rate: SamplingRate,
    /// 1 (mono) or 2 (interleaved stereo)
    pub channels: u16,
    /// Cycles clocked per mixer event
    pub buffer_size: usize,
    /// Frames collected before the driver is called
    pub output_buffer_frames: usize,
    /// Seed of the dither noise source
    pub dither_seed: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        AudioConfig {
            sampling_method: SamplingMethod::Decimate,
            sampling_rate: SamplingRate::Low,
            channels: 2,
            buffer_size: 4096,
            output_buffer_frames: 2048,
            dither_seed: 0,
        }
    }
}

/// One chip slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChipConfig {
    /// Revision
    pub model: ChipModel,
    /// Gain in dB, -6..6
    pub volume_db: f32,
    /// 0 = left, 0.5 = centre, 1 = right
    pub balance: f32,
    /// Delay before mixing in milliseconds, 0..100
    pub delay_ms: u32,
    /// Muted voices
    pub mute: [bool; 3],
    /// Filter enabled
    pub filter: bool,
    /// Feed the digi-boost level into EXT IN (8580 only)
    pub digi_boost: bool,
    /// Filter curve override for the revision
    pub filter_curve: Option<FilterCurve>,
}

impl Default for ChipConfig {
    fn default() -> Self {
        ChipConfig {
            model: ChipModel::Mos6581,
            volume_db: 0.0,
            balance: 0.5,
            delay_ms: 0,
            mute: [false; 3],
            filter: true,
            digi_boost: false,
            filter_curve: None,
        }
    }
}

impl ChipConfig {
    /// Default slot of the given revision
    pub fn with_model(model: ChipModel) -> Self {
        ChipConfig {
            model,
            ..ChipConfig::default()
        }
    }

    /// Build a chip with this slot's model, mutes and filter settings
    pub fn build(&self, clock: CpuClock) -> Result<Sid> {
        let mut sid = Sid::new(self.model);
        sid.set_clock_frequency(clock.frequency());
        for (voice, &muted) in self.mute.iter().enumerate() {
            sid.mute(voice, muted);
        }
        sid.enable_filter(self.filter);
        sid.set_digi_boost(self.digi_boost);
        if let Some(curve) = self.filter_curve {
            sid.set_filter_curve(curve)?;
        }
        Ok(sid)
    }
}

/// Two chip slots receiving the same writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FakeStereoConfig {
    /// Slot reads normally go to
    pub primary: usize,
    /// Slot mirroring the primary's writes
    pub secondary: usize,
    /// Reads go to the secondary when this exceeds `primary`
    pub read_from: usize,
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SidConfig {
    /// System clock
    pub clock: CpuClock,
    /// Audio pipeline
    pub audio: AudioConfig,
    /// Chip slots, indexed by slot number
    pub chips: Vec<ChipConfig>,
    /// Optional fake-stereo pairing
    pub fake_stereo: Option<FakeStereoConfig>,
}

impl Default for SidConfig {
    fn default() -> Self {
        SidConfig {
            clock: CpuClock::Pal,
            audio: AudioConfig::default(),
            chips: vec![ChipConfig::default()],
            fake_stereo: None,
        }
    }
}

impl SidConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SidConfig = serde_json::from_str(json)
            .map_err(|e| SidError::Config(format!("failed to parse configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Serialize as pretty-printed JSON
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SidError::Config(format!("failed to serialize configuration: {e}")))
    }

    /// Check ranges and cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.chips.is_empty() {
            return Err(SidError::Config("at least one chip is required".into()));
        }
        if !matches!(self.audio.channels, 1 | 2) {
            return Err(SidError::Config(format!(
                "channels must be 1 or 2, got {}",
                self.audio.channels
            )));
        }
        if self.audio.buffer_size == 0 {
            return Err(SidError::Config("buffer_size must be non-zero".into()));
        }
        if self.audio.output_buffer_frames == 0 {
            return Err(SidError::Config("output_buffer_frames must be non-zero".into()));
        }

        for (slot, chip) in self.chips.iter().enumerate() {
            if !VOLUME_RANGE_DB.contains(&chip.volume_db) {
                return Err(SidError::Config(format!(
                    "chip {slot}: volume {} dB outside -6..6",
                    chip.volume_db
                )));
            }
            if !(0.0..=1.0).contains(&chip.balance) {
                return Err(SidError::Config(format!(
                    "chip {slot}: balance {} outside 0..1",
                    chip.balance
                )));
            }
            if chip.delay_ms > MAX_DELAY_MS {
                return Err(SidError::Config(format!(
                    "chip {slot}: delay {} ms exceeds {MAX_DELAY_MS} ms",
                    chip.delay_ms
                )));
            }
        }

        if let Some(fs) = self.fake_stereo {
            let n = self.chips.len();
            if n < 2 {
                return Err(SidError::Config("fake stereo needs two chips".into()));
            }
            if fs.primary >= n || fs.secondary >= n || fs.primary == fs.secondary {
                return Err(SidError::Config(format!(
                    "fake stereo slots {} and {} must be distinct chips below {n}",
                    fs.primary, fs.secondary
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = SidConfig::default();
        config.validate().unwrap();
        assert_eq!(config.audio.sampling_rate.frequency(), 44_100);
        assert_eq!(config.audio.channels, 2);
        assert_eq!(config.chips[0].model, ChipModel::Mos6581);
    }

    #[test]
    fn test_clock_frequencies() {
        assert_relative_eq!(CpuClock::Pal.frequency(), 985_248.444, epsilon = 1e-2);
        assert_relative_eq!(CpuClock::Ntsc.frequency(), 1_022_727.143, epsilon = 1e-2);
    }

    #[test]
    fn test_parse_json() {
        let config = SidConfig::from_json_str(
            r#"{
                "clock": "ntsc",
                "audio": { "sampling_rate": 48000, "sampling_method": "resample", "channels": 1 },
                "chips": [
                    { "model": "8580", "volume_db": -3.0, "balance": 0.25, "delay_ms": 10 },
                    { "model": "MOS6581" }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.clock, CpuClock::Ntsc);
        assert_eq!(config.audio.sampling_rate, SamplingRate::Medium);
        assert_eq!(config.audio.sampling_method, SamplingMethod::Resample);
        assert_eq!(config.audio.buffer_size, 4096);
        assert_eq!(config.chips[0].model, ChipModel::Mos8580);
        assert_eq!(config.chips[1].balance, 0.5);
    }

    #[test]
    fn test_unsupported_rate_rejected() {
        let err = SidConfig::from_json_str(r#"{ "audio": { "sampling_rate": 22050 } }"#).unwrap_err();
        assert!(matches!(err, SidError::Config(_)));
    }

    #[test]
    fn test_unknown_model_rejected() {
        assert!(SidConfig::from_json_str(r#"{ "chips": [ { "model": "6582" } ] }"#).is_err());
    }

    #[test]
    fn test_range_checks() {
        let mut config = SidConfig::default();
        config.chips[0].volume_db = 7.0;
        assert!(config.validate().is_err());

        let mut config = SidConfig::default();
        config.chips[0].balance = -0.1;
        assert!(config.validate().is_err());

        let mut config = SidConfig::default();
        config.chips[0].delay_ms = 101;
        assert!(config.validate().is_err());

        let mut config = SidConfig::default();
        config.audio.channels = 3;
        assert!(config.validate().is_err());

        let mut config = SidConfig::default();
        config.chips.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fake_stereo_needs_two_chips() {
        let mut config = SidConfig::default();
        config.fake_stereo = Some(FakeStereoConfig {
            primary: 0,
            secondary: 1,
            read_from: 0,
        });
        assert!(config.validate().is_err());
        config.chips.push(ChipConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file_roundtrip() {
        let mut config = SidConfig::default();
        config.chips.push(ChipConfig::with_model(ChipModel::Mos8580));
        config.chips[1].filter_curve = Some(FilterCurve::default_for(ChipModel::Mos8580));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_json_string().unwrap().as_bytes()).unwrap();
        let loaded = SidConfig::load(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_chip_config_build() {
        let config = ChipConfig {
            model: ChipModel::Mos8580,
            mute: [false, true, false],
            filter: false,
            digi_boost: true,
            ..ChipConfig::default()
        };
        let sid = config.build(CpuClock::Ntsc).unwrap();
        assert_eq!(sid.chip_model(), ChipModel::Mos8580);
        assert!(sid.is_muted(1));
        assert!(!sid.is_muted(0));
        assert!(!sid.filter().is_enabled());
        assert!(sid.digi_boost());
        assert_relative_eq!(sid.clock_frequency(), CpuClock::Ntsc.frequency());
    }

    #[test]
    fn test_sampling_method_from_str() {
        assert_eq!("Resample".parse::<SamplingMethod>().unwrap(), SamplingMethod::Resample);
        assert!("sinc".parse::<SamplingMethod>().is_err());
    }
}

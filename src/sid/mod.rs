//! MOS 6581/8580 SID chip emulation
//!
//! The chip is modelled cycle by cycle: three voices (oscillator plus ADSR
//! envelope), the state-variable filter, the board's output RC stage and the
//! register file with its decaying bus value.
//!
//! ```text
//!  voice 1 ─┐            ┌─ LP ─┐
//!  voice 2 ─┼─ routing ──┼─ BP ─┼── volume ── external filter ── sample
//!  voice 3 ─┤            └─ HP ─┘
//!  EXT IN ──┘ (dry path bypasses the filter)
//! ```

pub mod chip;
pub mod dac;
pub mod envelope;
pub mod external_filter;
pub mod filter;
pub mod potentiometer;
pub mod registers;
pub mod voice;
pub mod wave_tables;
pub mod waveform;

pub use chip::{Sid, SidState};
pub use envelope::{EnvelopeGenerator, EnvelopeState};
pub use filter::{Filter, Filter6581, Filter8580, FilterCurve, FilterModel};
pub use registers::Register;
pub use voice::Voice;
pub use waveform::WaveformGenerator;

use serde::{Deserialize, Serialize};
use std::fmt;

/// SID chip revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChipModel {
    /// Original NMOS chip (C64 "breadbin")
    #[default]
    #[serde(rename = "MOS6581", alias = "6581")]
    Mos6581,
    /// HMOS-II revision (C64C, C128)
    #[serde(rename = "MOS8580", alias = "8580")]
    Mos8580,
}

impl ChipModel {
    /// Nonlinearity of the voice and envelope DACs
    pub fn wave_nonlinearity(self) -> f32 {
        match self {
            ChipModel::Mos6581 => 0.96,
            ChipModel::Mos8580 => 1.0,
        }
    }

    /// DC level a voice adds regardless of waveform and envelope
    pub fn voice_offset(self) -> f32 {
        match self {
            ChipModel::Mos6581 => (0x800 * 0xFF) as f32,
            ChipModel::Mos8580 => -(0x100 * 0xFF) as f32,
        }
    }
}

impl fmt::Display for ChipModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChipModel::Mos6581 => write!(f, "MOS6581"),
            ChipModel::Mos8580 => write!(f, "MOS8580"),
        }
    }
}

impl std::str::FromStr for ChipModel {
    type Err = crate::SidError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "6581" | "MOS6581" => Ok(ChipModel::Mos6581),
            "8580" | "MOS8580" => Ok(ChipModel::Mos8580),
            other => Err(crate::SidError::Config(format!(
                "unknown chip model '{other}'"
            ))),
        }
    }
}

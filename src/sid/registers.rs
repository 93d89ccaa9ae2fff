//! SID Register Definitions
//!
//! The 29 registers of the SID: seven per voice (0x00-0x14), four for the
//! filter and master volume (0x15-0x18), and four read-only registers
//! (0x19-0x1C) for the paddles and the voice 3 readback.

use bitflags::bitflags;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use std::fmt;

/// Number of voices per chip
pub const NUM_VOICES: usize = 3;

/// Size of the chip's address window (addresses are taken modulo this)
pub const ADDRESS_SPACE: u8 = 0x20;

/// Registers per voice
pub const VOICE_STRIDE: u8 = 7;

/// SID Register Address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
pub enum Register {
    /// Voice 1 frequency (low byte)
    Freq1Lo = 0x00,
    /// Voice 1 frequency (high byte)
    Freq1Hi = 0x01,
    /// Voice 1 pulse width (low byte)
    Pw1Lo = 0x02,
    /// Voice 1 pulse width (high nibble)
    Pw1Hi = 0x03,
    /// Voice 1 control
    Control1 = 0x04,
    /// Voice 1 attack/decay
    AttackDecay1 = 0x05,
    /// Voice 1 sustain/release
    SustainRelease1 = 0x06,
    /// Voice 2 frequency (low byte)
    Freq2Lo = 0x07,
    /// Voice 2 frequency (high byte)
    Freq2Hi = 0x08,
    /// Voice 2 pulse width (low byte)
    Pw2Lo = 0x09,
    /// Voice 2 pulse width (high nibble)
    Pw2Hi = 0x0A,
    /// Voice 2 control
    Control2 = 0x0B,
    /// Voice 2 attack/decay
    AttackDecay2 = 0x0C,
    /// Voice 2 sustain/release
    SustainRelease2 = 0x0D,
    /// Voice 3 frequency (low byte)
    Freq3Lo = 0x0E,
    /// Voice 3 frequency (high byte)
    Freq3Hi = 0x0F,
    /// Voice 3 pulse width (low byte)
    Pw3Lo = 0x10,
    /// Voice 3 pulse width (high nibble)
    Pw3Hi = 0x11,
    /// Voice 3 control
    Control3 = 0x12,
    /// Voice 3 attack/decay
    AttackDecay3 = 0x13,
    /// Voice 3 sustain/release
    SustainRelease3 = 0x14,
    /// Filter cutoff, bits 0-2
    FcLo = 0x15,
    /// Filter cutoff, bits 3-10
    FcHi = 0x16,
    /// Resonance (high nibble) and filter routing (low nibble)
    ResFilt = 0x17,
    /// Filter mode (high nibble) and master volume (low nibble)
    ModeVol = 0x18,
    /// Paddle X (read only)
    PotX = 0x19,
    /// Paddle Y (read only)
    PotY = 0x1A,
    /// Voice 3 oscillator readback (read only)
    Osc3 = 0x1B,
    /// Voice 3 envelope readback (read only)
    Env3 = 0x1C,
}

/// Per-voice register, relative to the voice base address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceRegister {
    /// Frequency low byte
    FreqLo,
    /// Frequency high byte
    FreqHi,
    /// Pulse width low byte
    PwLo,
    /// Pulse width high nibble
    PwHi,
    /// Control register
    Control,
    /// Attack/decay
    AttackDecay,
    /// Sustain/release
    SustainRelease,
}

impl Register {
    /// Convert a raw address to a register, if one is mapped there
    ///
    /// Addresses are mirrored every 0x20 bytes; 0x1D-0x1F are unmapped.
    pub fn from_addr(addr: u8) -> Option<Self> {
        Register::from_u8(addr % ADDRESS_SPACE)
    }

    /// Get the register address value
    pub fn addr(&self) -> u8 {
        *self as u8
    }

    /// Voice index and per-voice register for 0x00-0x14
    pub fn voice_register(&self) -> Option<(usize, VoiceRegister)> {
        let addr = self.addr();
        if addr >= VOICE_STRIDE * NUM_VOICES as u8 {
            return None;
        }
        let reg = match addr % VOICE_STRIDE {
            0 => VoiceRegister::FreqLo,
            1 => VoiceRegister::FreqHi,
            2 => VoiceRegister::PwLo,
            3 => VoiceRegister::PwHi,
            4 => VoiceRegister::Control,
            5 => VoiceRegister::AttackDecay,
            _ => VoiceRegister::SustainRelease,
        };
        Some(((addr / VOICE_STRIDE) as usize, reg))
    }

    /// Registers that read back a live value instead of the bus value
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Register::PotX | Register::PotY | Register::Osc3 | Register::Env3
        )
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some((voice, reg)) = self.voice_register() {
            return write!(f, "${:02X} (Voice {} {:?})", self.addr(), voice + 1, reg);
        }
        match self {
            Register::FcLo => write!(f, "$15 (Filter Cutoff Low)"),
            Register::FcHi => write!(f, "$16 (Filter Cutoff High)"),
            Register::ResFilt => write!(f, "$17 (Resonance / Filter Routing)"),
            Register::ModeVol => write!(f, "$18 (Filter Mode / Volume)"),
            Register::PotX => write!(f, "$19 (Paddle X)"),
            Register::PotY => write!(f, "$1A (Paddle Y)"),
            Register::Osc3 => write!(f, "$1B (Oscillator 3)"),
            Register::Env3 => write!(f, "$1C (Envelope 3)"),
            _ => write!(f, "${:02X}", self.addr()),
        }
    }
}

bitflags! {
    /// Voice control register bits (low nibble; the high nibble selects the waveform)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ControlFlags: u8 {
        /// Envelope gate
        const GATE = 0x01;
        /// Hard sync with the preceding voice
        const SYNC = 0x02;
        /// Ring modulation by the preceding voice
        const RING = 0x04;
        /// Oscillator test (reset and hold)
        const TEST = 0x08;
    }
}

impl ControlFlags {
    /// Create control flags from raw register value
    pub fn from_register(value: u8) -> Self {
        ControlFlags::from_bits_truncate(value)
    }

    /// Waveform selector (high nibble)
    #[inline]
    pub fn waveform(value: u8) -> u8 {
        value >> 4
    }
}

bitflags! {
    /// Filter routing bits (RES_FILT low nibble)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FilterRouting: u8 {
        /// Voice 1 through the filter
        const FILT1 = 0x01;
        /// Voice 2 through the filter
        const FILT2 = 0x02;
        /// Voice 3 through the filter
        const FILT3 = 0x04;
        /// External input through the filter
        const FILTEX = 0x08;
    }
}

impl FilterRouting {
    /// Create routing flags from raw register value
    pub fn from_register(value: u8) -> Self {
        FilterRouting::from_bits_truncate(value)
    }
}

bitflags! {
    /// Filter mode bits (MODE_VOL high nibble)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FilterMode: u8 {
        /// Low-pass output
        const LP = 0x10;
        /// Band-pass output
        const BP = 0x20;
        /// High-pass output
        const HP = 0x40;
        /// Disconnect voice 3 from the dry path
        const VOICE3_OFF = 0x80;
    }
}

impl FilterMode {
    /// Create mode flags from raw register value
    pub fn from_register(value: u8) -> Self {
        FilterMode::from_bits_truncate(value)
    }

    /// Voice 3 reaches the dry path while 3OFF is clear
    pub fn voice3_dry(&self) -> bool {
        !self.contains(FilterMode::VOICE3_OFF)
    }
}

//! SID chip
//!
//! Register file, bus value decay, the per-cycle clocking order and the output
//! scaling to 16-bit sample range.

use super::external_filter::ExternalFilter;
use super::filter::{Filter, FilterCurve};
use super::potentiometer::Potentiometer;
use super::registers::{Register, ADDRESS_SPACE, NUM_VOICES};
use super::voice::Voice;
use super::ChipModel;
use crate::config::CpuClock;
use crate::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Cycles a written byte stays readable on the data bus
pub const BUS_TTL: u32 = 34_000;

/// EXT IN level that makes 8580 volume writes audible
pub const INPUT_DIGI_BOOST: i32 = -0x9500;

/// Writable registers (0x00-0x18)
pub const WRITABLE_REGISTERS: usize = 0x19;

/// Scale from filter output to signed 16-bit range
const OUTPUT_SCALE: f32 = 32768.0 / (2047.0 * 255.0 * 3.0 * 2.0);

/// Register snapshot of a chip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidState {
    /// Last value written to each writable register
    pub registers: [u8; WRITABLE_REGISTERS],
    /// Byte on the data bus
    pub bus_value: u8,
    /// Cycles until the bus value decays
    pub bus_value_ttl: u32,
}

/// One emulated SID chip
#[derive(Debug, Clone)]
pub struct Sid {
    model: ChipModel,
    clock_frequency: f64,
    voices: [Voice; NUM_VOICES],
    filter: Filter,
    external_filter: ExternalFilter,
    pot_x: Potentiometer,
    pot_y: Potentiometer,
    bus_value: u8,
    bus_value_ttl: u32,
    registers: [u8; WRITABLE_REGISTERS],
    /// 8580 register writes land one cycle late
    pending_write: Option<(u8, u8)>,
    input_level: i16,
    digi_boost: bool,
    ext_in: f32,
}

impl Default for Sid {
    fn default() -> Self {
        Sid::new(ChipModel::default())
    }
}

impl Sid {
    /// Create a chip of the given revision clocked at PAL speed
    pub fn new(model: ChipModel) -> Self {
        let clock_frequency = CpuClock::default().frequency();
        let mut sid = Sid {
            model,
            clock_frequency,
            voices: [Voice::new(model), Voice::new(model), Voice::new(model)],
            filter: Filter::new(model, clock_frequency),
            external_filter: ExternalFilter::new(clock_frequency),
            pot_x: Potentiometer::default(),
            pot_y: Potentiometer::default(),
            bus_value: 0,
            bus_value_ttl: 0,
            registers: [0; WRITABLE_REGISTERS],
            pending_write: None,
            input_level: 0,
            digi_boost: false,
            ext_in: 0.0,
        };
        sid.reset();
        sid
    }

    /// Chip revision
    pub fn chip_model(&self) -> ChipModel {
        self.model
    }

    /// Switch revision, keeping register contents
    pub fn set_chip_model(&mut self, model: ChipModel) {
        self.flush_pending_write();
        if model == self.model {
            return;
        }
        debug!(from = %self.model, to = %model, "switching chip model");
        self.model = model;
        for voice in self.voices.iter_mut() {
            voice.set_chip_model(model);
        }
        self.filter.set_chip_model(model, self.clock_frequency);
        self.update_ext_in();
    }

    /// System clock in Hz, used by the filters
    pub fn set_clock_frequency(&mut self, clock_frequency: f64) {
        self.clock_frequency = clock_frequency;
        self.filter.set_clock_frequency(clock_frequency);
        self.external_filter.set_clock_frequency(clock_frequency);
    }

    /// System clock in Hz
    pub fn clock_frequency(&self) -> f64 {
        self.clock_frequency
    }

    /// Power-on reset
    pub fn reset(&mut self) {
        for voice in self.voices.iter_mut() {
            voice.reset();
        }
        self.filter.reset();
        self.external_filter.reset();
        self.bus_value = 0;
        self.bus_value_ttl = 0;
        self.registers = [0; WRITABLE_REGISTERS];
        self.pending_write = None;
    }

    /// Reset, then set the master volume register
    pub fn reset_with_volume(&mut self, volume: u8) {
        self.reset();
        self.write_register(Register::ModeVol.addr(), volume);
    }

    /// Read a register
    ///
    /// Paddles, OSC3 and ENV3 read live values. Everything else, including the
    /// unmapped 0x1D-0x1F, reads the decaying bus value.
    pub fn read(&self, addr: u8) -> u8 {
        match Register::from_addr(addr) {
            Some(Register::PotX) => self.pot_x.read(),
            Some(Register::PotY) => self.pot_y.read(),
            // voice 3 is ring-modulated by voice 2, so OSC3 reads with voice 2 as source
            Some(Register::Osc3) => self.voices[2].wave.read_osc(&self.voices[1].wave, self.model),
            Some(Register::Env3) => self.voices[2].envelope.read_env(),
            _ => self.bus_value,
        }
    }

    /// Write a register
    pub fn write(&mut self, addr: u8, value: u8) {
        let addr = addr % ADDRESS_SPACE;
        self.bus_value = value;
        self.bus_value_ttl = BUS_TTL;

        match self.model {
            ChipModel::Mos6581 => self.write_register(addr, value),
            ChipModel::Mos8580 => {
                if let Some((addr, value)) = self.pending_write.replace((addr, value)) {
                    self.write_register(addr, value);
                }
            }
        }
    }

    fn flush_pending_write(&mut self) {
        if let Some((addr, value)) = self.pending_write.take() {
            self.write_register(addr, value);
        }
    }

    fn write_register(&mut self, addr: u8, value: u8) {
        let Some(reg) = Register::from_addr(addr) else {
            return;
        };
        if reg.is_read_only() {
            return;
        }
        self.registers[reg.addr() as usize] = value;

        if let Some((voice, voice_reg)) = reg.voice_register() {
            let ring_modulator = self.voices[(voice + 2) % NUM_VOICES].wave.clone();
            self.voices[voice].write(voice_reg, value, &ring_modulator);
            return;
        }

        match reg {
            Register::FcLo => self.filter.write_fc_lo(value),
            Register::FcHi => self.filter.write_fc_hi(value),
            Register::ResFilt => self.filter.write_res_filt(value),
            Register::ModeVol => self.filter.write_mode_vol(value),
            _ => {}
        }
    }

    /// Mute or unmute a voice (0-2); out-of-range voices are ignored
    pub fn mute(&mut self, voice: usize, enable: bool) {
        if let Some(v) = self.voices.get_mut(voice) {
            v.mute(enable);
        }
    }

    /// Is the voice muted?
    pub fn is_muted(&self, voice: usize) -> bool {
        self.voices
            .get(voice)
            .map(|v| v.envelope.is_muted())
            .unwrap_or(false)
    }

    /// Enable or bypass the filter
    pub fn enable_filter(&mut self, enable: bool) {
        self.filter.enable(enable);
    }

    /// Replace the filter transfer curve of the current revision
    pub fn set_filter_curve(&mut self, curve: FilterCurve) -> Result<()> {
        self.filter.set_curve(curve)
    }

    /// Feed the digi-boost level into EXT IN (8580 only)
    pub fn set_digi_boost(&mut self, enable: bool) {
        self.digi_boost = enable;
        self.update_ext_in();
    }

    /// Is the digi-boost level active on this revision?
    pub fn digi_boost(&self) -> bool {
        self.digi_boost && self.model == ChipModel::Mos8580
    }

    /// Set the EXT IN level
    ///
    /// Voice outputs are 20 bits wide; the input is scaled up to match three
    /// voices.
    pub fn input(&mut self, value: i16) {
        self.input_level = value;
        self.update_ext_in();
    }

    fn update_ext_in(&mut self) {
        let boost = if self.digi_boost() { INPUT_DIGI_BOOST } else { 0 };
        let level = self.input_level as i32 + boost;
        self.ext_in = ((level << 4) * 3) as f32;
    }

    /// Set the paddle readings for POTX and POTY
    pub fn set_pots(&mut self, x: u8, y: u8) {
        self.pot_x.set(x);
        self.pot_y.set(y);
    }

    /// Voice by index
    pub fn voice(&self, voice: usize) -> Option<&Voice> {
        self.voices.get(voice)
    }

    /// Filter
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Byte currently held on the bus
    pub fn bus_value(&self) -> u8 {
        self.bus_value
    }

    /// Register snapshot
    pub fn state(&self) -> SidState {
        let mut registers = self.registers;
        if let Some((addr, value)) = self.pending_write {
            if let Some(slot) = registers.get_mut(addr as usize) {
                *slot = value;
            }
        }
        SidState {
            registers,
            bus_value: self.bus_value,
            bus_value_ttl: self.bus_value_ttl,
        }
    }

    /// Reset and reload a register snapshot
    pub fn restore(&mut self, state: &SidState) {
        self.reset();
        for (addr, &value) in state.registers.iter().enumerate() {
            self.write_register(addr as u8, value);
        }
        self.bus_value = state.bus_value;
        self.bus_value_ttl = state.bus_value_ttl;
    }

    fn age_bus_value(&mut self, cycles: u32) {
        if self.bus_value_ttl != 0 {
            self.bus_value_ttl = self.bus_value_ttl.saturating_sub(cycles);
            if self.bus_value_ttl == 0 {
                self.bus_value = 0;
            }
        }
    }

    #[inline]
    fn clock_oscillators(&mut self) {
        let [v0, v1, v2] = &mut self.voices;
        v0.wave.clock();
        v1.wave.clock();
        v2.wave.clock();

        // each voice syncs the next one
        v0.wave.synchronize(&mut v1.wave, &v2.wave);
        v1.wave.synchronize(&mut v2.wave, &v0.wave);
        v2.wave.synchronize(&mut v0.wave, &v1.wave);
    }

    #[inline]
    fn clock_cycle(&mut self) -> i32 {
        self.clock_oscillators();

        let [v0, v1, v2] = &mut self.voices;
        v0.envelope.clock();
        v1.envelope.clock();
        v2.envelope.clock();

        // each voice is ring-modulated by the previous one
        let voice1 = v0.output(&v2.wave);
        let voice2 = v1.output(&v0.wave);
        let voice3 = v2.output(&v1.wave);

        let filtered = self.filter.clock(voice1, voice2, voice3, self.ext_in);
        let out = self.external_filter.clock(filtered);

        self.flush_pending_write();
        (out * OUTPUT_SCALE) as i32
    }

    /// Run `cycles` cycles, passing one sample per cycle to `sink`
    pub fn clock<F: FnMut(i32)>(&mut self, cycles: u32, mut sink: F) {
        self.age_bus_value(cycles);
        for _ in 0..cycles {
            sink(self.clock_cycle());
        }
        self.filter.zero_denormals();
        self.external_filter.zero_denormals();
    }

    /// Run `cycles` cycles without producing audio
    ///
    /// Only the oscillators and envelope 3 advance, which keeps OSC3/ENV3
    /// readback meaningful for fast seeking.
    pub fn clock_silent(&mut self, cycles: u32) {
        self.age_bus_value(cycles);
        for _ in 0..cycles {
            self.clock_oscillators();
            self.voices[2].envelope.clock();
            self.flush_pending_write();
        }
    }
}

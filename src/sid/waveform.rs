//! Oscillator (waveform generator)
//!
//! 24-bit phase accumulator, 23-bit noise LFSR and the table lookup that turns
//! accumulator bits into an analog level.

use super::registers::ControlFlags;
use super::wave_tables::{wave_tables, WaveTables, TABLE_SIZE};
use super::ChipModel;

/// Accumulator mask (24 bits)
const ACCUMULATOR_MASK: u32 = 0xFF_FFFF;

/// Accumulator MSB, the sync and ring modulation source bit
const ACCUMULATOR_MSB: u32 = 0x80_0000;

/// Accumulator bit 19 clocks the noise LFSR
const NOISE_CLOCK_BIT: u32 = 0x08_0000;

/// LFSR value after reset, and the value it fades to while TEST is held
const NOISE_RESET: u32 = 0x7F_FFFC;

/// LFSR output taps, cleared when noise is combined with other waveforms
const NOISE_TAPS: u32 =
    (1 << 22) | (1 << 20) | (1 << 16) | (1 << 13) | (1 << 11) | (1 << 7) | (1 << 4) | (1 << 2);

/// Cycles the LFSR holds its state while TEST is set
const NOISE_FADE_CYCLES: u32 = 200_000;

/// Oscillator of one voice
#[derive(Clone)]
pub struct WaveformGenerator {
    tables: &'static WaveTables,
    accumulator: u32,
    accumulator_prev: u32,
    noise: u32,
    noise_ttl: u32,
    /// Last digital output, held for waveform 0 and noise
    previous: u8,
    /// Last analog output, held for waveform 0 and noise
    previous_dac: f32,
    freq: u32,
    pw: u32,
    waveform: u8,
    test: bool,
    ring: bool,
    sync: bool,
}

impl WaveformGenerator {
    /// Create an oscillator for the given chip revision
    pub fn new(model: ChipModel) -> Self {
        let mut wave = WaveformGenerator {
            tables: wave_tables(model),
            accumulator: 0,
            accumulator_prev: 0,
            noise: NOISE_RESET,
            noise_ttl: 0,
            previous: 0,
            previous_dac: 0.0,
            freq: 0,
            pw: 0,
            waveform: 0,
            test: false,
            ring: false,
            sync: false,
        };
        wave.reset();
        wave
    }

    /// Switch waveform tables to another revision
    pub fn set_chip_model(&mut self, model: ChipModel) {
        self.tables = wave_tables(model);
    }

    /// Advance one cycle
    #[inline]
    pub fn clock(&mut self) {
        // TEST holds the accumulator; only the LFSR fade is emulated
        if self.test {
            if self.noise_ttl != 0 {
                self.noise_ttl -= 1;
                if self.noise_ttl == 0 {
                    self.noise |= NOISE_RESET;
                    self.clock_noise(false);
                }
            }
            return;
        }

        self.accumulator_prev = self.accumulator;
        self.accumulator = (self.accumulator + self.freq) & ACCUMULATOR_MASK;

        if !self.accumulator_prev & self.accumulator & NOISE_CLOCK_BIT != 0 {
            self.clock_noise(true);
        }
    }

    /// Did the accumulator MSB rise during the last clock?
    #[inline]
    pub fn msb_rising(&self) -> bool {
        !self.accumulator_prev & self.accumulator & ACCUMULATOR_MSB != 0
    }

    /// SYNC bit of this voice
    #[inline]
    pub fn sync_enabled(&self) -> bool {
        self.sync
    }

    /// Hard-sync `dest` from this oscillator
    ///
    /// `source` is the oscillator that syncs this one. When this oscillator was
    /// itself synced on the same cycle its MSB rose, the destination is left
    /// alone.
    #[inline]
    pub fn synchronize(&self, dest: &mut WaveformGenerator, source: &WaveformGenerator) {
        if dest.sync && self.msb_rising() && !(self.sync && source.msb_rising()) {
            dest.accumulator = 0;
        }
    }

    /// Analog output, ring-modulated by `ring_modulator`'s accumulator MSB
    #[inline]
    pub fn output(&self, ring_modulator: &WaveformGenerator) -> f32 {
        if self.waveform == 0 || self.waveform > 7 {
            return self.previous_dac;
        }
        let (table, phase) = self.lookup(ring_modulator.accumulator, self.accumulator);
        self.tables.analog(table, phase)
    }

    fn lookup(&self, ring_accumulator: u32, accumulator: u32) -> (usize, usize) {
        let mut phase = (accumulator >> 12) as usize;
        let waveform = self.waveform as usize;
        // pulse high selects the four variants after the pulse-low tables
        let table = if waveform >= 4 && (self.test || phase as u32 >= self.pw) {
            waveform + 3
        } else {
            waveform - 1
        };
        if self.ring && ring_accumulator & ACCUMULATOR_MSB != 0 {
            phase ^= 0x800;
        }
        (table, phase & (TABLE_SIZE - 1))
    }

    /// Write frequency low byte
    pub fn write_freq_lo(&mut self, value: u8) {
        self.freq = (self.freq & 0xFF00) | value as u32;
    }

    /// Write frequency high byte
    pub fn write_freq_hi(&mut self, value: u8) {
        self.freq = ((value as u32) << 8) | (self.freq & 0xFF);
    }

    /// Write pulse width low byte
    pub fn write_pw_lo(&mut self, value: u8) {
        self.pw = (self.pw & 0xF00) | value as u32;
    }

    /// Write pulse width high nibble
    pub fn write_pw_hi(&mut self, value: u8) {
        self.pw = (((value as u32) << 8) & 0xF00) | (self.pw & 0xFF);
    }

    /// Write the control register
    pub fn write_control(&mut self, ring_modulator: &WaveformGenerator, control: u8) {
        let waveform_next = ControlFlags::waveform(control);
        let flags = ControlFlags::from_register(control);

        // switching to waveform 0 freezes the last output
        if waveform_next == 0 && (1..=7).contains(&self.waveform) {
            self.previous = self.read_osc_with(ring_modulator.accumulator, self.accumulator);
            self.previous_dac = self.output(ring_modulator);
        }

        self.waveform = waveform_next;
        self.ring = flags.contains(ControlFlags::RING) && self.waveform & 3 == 1;
        self.sync = flags.contains(ControlFlags::SYNC);

        let test_next = flags.contains(ControlFlags::TEST);
        if test_next && !self.test {
            // rising TEST: clear the accumulator, load inverted bit 19 into bit 1
            self.accumulator = 0;
            self.accumulator_prev = 0;
            let bit19 = (self.noise >> 18) & 2;
            self.noise = (self.noise & 0x7F_FFFD) | (bit19 ^ 2);
            self.noise_ttl = NOISE_FADE_CYCLES;
        } else if !test_next {
            // falling TEST shifts once
            self.clock_noise(self.test);
        }
        self.test = test_next;
    }

    /// OSC3 readback
    ///
    /// The 6581 reads the current accumulator, the 8580 the one latched a cycle
    /// earlier.
    pub fn read_osc(&self, ring_modulator: &WaveformGenerator, model: ChipModel) -> u8 {
        match model {
            ChipModel::Mos6581 => self.read_osc_with(ring_modulator.accumulator, self.accumulator),
            ChipModel::Mos8580 => {
                self.read_osc_with(ring_modulator.accumulator_prev, self.accumulator_prev)
            }
        }
    }

    fn read_osc_with(&self, ring_accumulator: u32, accumulator: u32) -> u8 {
        if self.waveform == 0 || self.waveform >= 8 {
            return self.previous;
        }
        let (table, phase) = self.lookup(ring_accumulator, accumulator);
        self.tables.digital(table, phase)
    }

    fn clock_noise(&mut self, shift: bool) {
        if shift {
            let bit0 = ((self.noise >> 22) ^ (self.noise >> 17)) & 1;
            self.noise = ((self.noise << 1) | bit0) & 0x7F_FFFF;
        }

        // combined with other waveforms, noise pulls its output taps low
        if self.waveform > 8 {
            self.noise &= 0x7F_FFFF ^ NOISE_TAPS;
        }

        if self.waveform >= 8 {
            self.previous = self.noise_output();
            let mut level = self.tables.zero_level();
            for bit in 0..8 {
                if self.previous & (1 << bit) != 0 {
                    level += self.tables.bit_weight(bit + 4);
                }
            }
            self.previous_dac = level;
        }
    }

    /// 8-bit noise output gathered from the LFSR taps
    fn noise_output(&self) -> u8 {
        let r = self.noise;
        (((r & 0x40_0000) >> 15)
            | ((r & 0x10_0000) >> 14)
            | ((r & 0x01_0000) >> 11)
            | ((r & 0x00_2000) >> 9)
            | ((r & 0x00_0800) >> 8)
            | ((r & 0x00_0080) >> 5)
            | ((r & 0x00_0010) >> 3)
            | ((r & 0x00_0004) >> 2)) as u8
    }

    /// Current accumulator value
    #[inline]
    pub fn accumulator(&self) -> u32 {
        self.accumulator
    }

    /// Current noise LFSR value
    pub fn noise_register(&self) -> u32 {
        self.noise
    }

    /// Current frequency register
    pub fn freq(&self) -> u32 {
        self.freq
    }

    /// Reset to power-on state
    pub fn reset(&mut self) {
        self.accumulator = 0;
        self.accumulator_prev = 0;
        self.previous = 0;
        self.previous_dac = 0.0;
        self.noise = NOISE_RESET;
        self.noise_ttl = 0;
        self.freq = 0;
        self.pw = 0;
        self.test = false;
        self.waveform = 0;
        self.ring = false;
        self.sync = false;
    }
}

impl std::fmt::Debug for WaveformGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaveformGenerator")
            .field("accumulator", &format_args!("{:06X}", self.accumulator))
            .field("freq", &self.freq)
            .field("pw", &self.pw)
            .field("waveform", &self.waveform)
            .field("test", &self.test)
            .field("sync", &self.sync)
            .field("ring", &self.ring)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn osc(model: ChipModel, freq: u16, control: u8) -> WaveformGenerator {
        let mut w = WaveformGenerator::new(model);
        let other = WaveformGenerator::new(model);
        w.write_freq_lo(freq as u8);
        w.write_freq_hi((freq >> 8) as u8);
        w.write_control(&other, control);
        w
    }

    #[test]
    fn test_accumulator_wraps_24_bit() {
        let mut w = osc(ChipModel::Mos6581, 0xFFFF, 0x20);
        for _ in 0..300 {
            w.clock();
        }
        assert_eq!(w.accumulator(), (0xFFFFu32 * 300) & 0xFF_FFFF);
    }

    #[test]
    fn test_test_bit_holds_accumulator() {
        let mut w = osc(ChipModel::Mos6581, 0x1000, 0x28);
        for _ in 0..100 {
            w.clock();
        }
        assert_eq!(w.accumulator(), 0);
    }

    #[test]
    fn test_noise_lfsr_clocked_by_bit19() {
        let mut w = osc(ChipModel::Mos8580, 0x8000, 0x80);
        let start = w.noise_register();
        // bit 19 rises every 16 cycles at this frequency
        for _ in 0..16 {
            w.clock();
        }
        assert_ne!(w.noise_register(), start);
    }

    #[test]
    fn test_noise_free_runs_but_holds_in_test() {
        let mut w = osc(ChipModel::Mos8580, 0x8000, 0x88);
        let held = w.noise_register();
        for _ in 0..1000 {
            w.clock();
        }
        assert_eq!(w.noise_register(), held);
    }

    #[test]
    fn test_noise_fades_to_ones_while_test_held() {
        let mut w = osc(ChipModel::Mos8580, 0x8000, 0x80);
        for _ in 0..5000 {
            w.clock();
        }
        let other = WaveformGenerator::new(ChipModel::Mos8580);
        w.write_control(&other, 0x88);
        for _ in 0..NOISE_FADE_CYCLES {
            w.clock();
        }
        assert_eq!(w.noise_register() & NOISE_RESET, NOISE_RESET);
    }

    #[test]
    fn test_test_release_resets_noise_predictably() {
        let other = WaveformGenerator::new(ChipModel::Mos8580);
        let run = || {
            let mut w = osc(ChipModel::Mos8580, 0x8000, 0x88);
            for _ in 0..NOISE_FADE_CYCLES + 10 {
                w.clock();
            }
            w.write_control(&other, 0x80);
            w.noise_register()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_sync_resets_destination() {
        let model = ChipModel::Mos6581;
        let mut src = osc(model, 0x4000, 0x20);
        let mut dest = osc(model, 0x0100, 0x22);
        let idle = WaveformGenerator::new(model);
        let mut resets = 0;
        for _ in 0..2048 {
            src.clock();
            dest.clock();
            let before = dest.accumulator();
            src.synchronize(&mut dest, &idle);
            if before != 0 && dest.accumulator() == 0 {
                resets += 1;
            }
        }
        // source MSB rises every 1024 cycles
        assert_eq!(resets, 2);
    }

    #[test]
    fn test_sync_clear_never_resets() {
        let model = ChipModel::Mos6581;
        for (fs, fd) in [(0x4000u16, 0x0100u16), (0xFFFF, 0x1234), (0x0001, 0xFFFF), (0x8000, 0x8000)] {
            let mut src = osc(model, fs, 0x20);
            let mut dest = osc(model, fd, 0x20);
            let idle = WaveformGenerator::new(model);
            let mut expected = 0u32;
            for _ in 0..5000 {
                src.clock();
                dest.clock();
                expected = (expected + fd as u32) & ACCUMULATOR_MASK;
                src.synchronize(&mut dest, &idle);
                assert_eq!(dest.accumulator(), expected);
            }
        }
    }

    #[test]
    fn test_ring_modulation_flips_triangle() {
        let model = ChipModel::Mos8580;
        let mut carrier = osc(model, 0x0000, 0x14);
        let mut modulator = osc(model, 0x8000, 0x20);
        let plain = carrier.output(&WaveformGenerator::new(model));
        // 256 cycles puts the modulator MSB high
        for _ in 0..256 {
            modulator.clock();
        }
        assert!(modulator.accumulator() & ACCUMULATOR_MSB != 0);
        carrier.clock();
        assert_ne!(carrier.output(&modulator), plain);
    }

    #[test]
    fn test_osc3_readback_sawtooth() {
        let model = ChipModel::Mos6581;
        let mut w = osc(model, 0x1000, 0x20);
        let other = WaveformGenerator::new(model);
        for _ in 0..0x100 {
            w.clock();
        }
        assert_eq!(w.accumulator(), 0x10_0000);
        assert_eq!(w.read_osc(&other, ChipModel::Mos6581), 0x10);
        // the 8580 lags by one cycle
        assert_eq!(w.read_osc(&other, ChipModel::Mos8580), 0x0F);
    }

    #[test]
    fn test_waveform_zero_holds_last_output() {
        let model = ChipModel::Mos6581;
        let mut w = osc(model, 0x2000, 0x20);
        let other = WaveformGenerator::new(model);
        for _ in 0..500 {
            w.clock();
        }
        let level = w.output(&other);
        w.write_control(&other, 0x00);
        for _ in 0..500 {
            w.clock();
        }
        assert_eq!(w.output(&other), level);
    }
}

//! ADSR Envelope Generator
//!
//! Attack counts the 8-bit level up once per rate period. Decay and release
//! count down through an extra exponential divider whose period depends on the
//! current level, which gives the chip its piecewise-exponential decay.
//!
//! Features:
//! - Rate counter that is never reset (the "ADSR delay bug")
//! - Gate-on restarts attack from the current level
//! - Level frozen at zero until the next attack
//! - Revision-dependent 8-bit output DAC
//! - Muting that only affects the DAC output

use super::dac::dac_table;

/// Rate counter periods for the 16 attack/decay/release settings
pub const ENVELOPE_PERIOD: [i32; 16] = [
    9, 32, 63, 95, 149, 220, 267, 313, 392, 977, 1954, 3126, 3907, 11720, 19532, 31251,
];

/// Length of the rate counter's LFSR sequence
const RATE_COUNTER_WRAP: i32 = 0x7FFF;

/// Envelope state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeState {
    /// Counting up to 0xFF
    Attack,
    /// Counting down to the sustain level
    DecaySustain,
    /// Counting down to zero
    Release,
}

/// ADSR envelope of one voice
#[derive(Debug, Clone)]
pub struct EnvelopeGenerator {
    rate_counter: i32,
    rate_period: i32,
    exponential_counter: u8,
    exponential_period: u8,
    level: u8,
    /// Counting frozen at zero
    hold: bool,
    state: EnvelopeState,
    gate: bool,
    attack: u8,
    decay: u8,
    sustain: u8,
    release: u8,
    muted: bool,
    dac: Vec<f32>,
    level_dac: f32,
}

impl EnvelopeGenerator {
    /// Create an envelope with the given DAC nonlinearity
    pub fn new(nonlinearity: f32) -> Self {
        let mut env = EnvelopeGenerator {
            rate_counter: 0,
            rate_period: ENVELOPE_PERIOD[0],
            exponential_counter: 0,
            exponential_period: 1,
            level: 0,
            hold: false,
            state: EnvelopeState::Release,
            gate: false,
            attack: 0,
            decay: 0,
            sustain: 0,
            release: 0,
            muted: false,
            dac: dac_table(256, nonlinearity, 8),
            level_dac: 0.0,
        };
        env.reset();
        env
    }

    /// Rebuild the output DAC for another revision
    pub fn set_nonlinearity(&mut self, nonlinearity: f32) {
        self.dac = dac_table(256, nonlinearity, 8);
        self.update_dac();
    }

    /// Advance one cycle
    #[inline]
    pub fn clock(&mut self) {
        self.rate_counter += 1;
        if self.rate_counter != self.rate_period {
            return;
        }
        self.rate_counter = 0;

        // attack bypasses the exponential divider and restarts it
        if self.state == EnvelopeState::Attack || {
            self.exponential_counter += 1;
            self.exponential_counter == self.exponential_period
        } {
            self.exponential_counter = 0;
            if self.hold {
                return;
            }

            match self.state {
                EnvelopeState::Attack => {
                    self.level = self.level.wrapping_add(1);
                    if self.level == 0xFF {
                        self.state = EnvelopeState::DecaySustain;
                        self.rate_period = ENVELOPE_PERIOD[self.decay as usize];
                    }
                }
                EnvelopeState::DecaySustain => {
                    if self.level != (self.sustain << 4) | self.sustain {
                        self.level = self.level.wrapping_sub(1);
                    }
                }
                EnvelopeState::Release => {
                    self.level = self.level.wrapping_sub(1);
                }
            }

            match self.level {
                0xFF => self.exponential_period = 1,
                0x5D => self.exponential_period = 2,
                0x36 => self.exponential_period = 4,
                0x1A => self.exponential_period = 8,
                0x0E => self.exponential_period = 16,
                0x06 => self.exponential_period = 30,
                0x00 => {
                    self.exponential_period = 1;
                    self.hold = true;
                }
                _ => {}
            }
            self.update_dac();
        }
    }

    #[inline]
    fn update_dac(&mut self) {
        self.level_dac = if self.muted {
            0.0
        } else {
            self.dac[self.level as usize]
        };
    }

    /// Write the gate bit from the control register
    pub fn write_control(&mut self, control: u8) {
        let gate_next = control & 0x01 != 0;
        if !self.gate && gate_next {
            self.state = EnvelopeState::Attack;
            self.update_rate_period(ENVELOPE_PERIOD[self.attack as usize]);
            self.hold = false;
        } else if self.gate && !gate_next {
            self.state = EnvelopeState::Release;
            self.update_rate_period(ENVELOPE_PERIOD[self.release as usize]);
        }
        self.gate = gate_next;
    }

    /// Write attack (high nibble) and decay (low nibble)
    pub fn write_attack_decay(&mut self, value: u8) {
        self.attack = value >> 4;
        self.decay = value & 0x0F;
        match self.state {
            EnvelopeState::Attack => self.update_rate_period(ENVELOPE_PERIOD[self.attack as usize]),
            EnvelopeState::DecaySustain => {
                self.update_rate_period(ENVELOPE_PERIOD[self.decay as usize])
            }
            EnvelopeState::Release => {}
        }
    }

    /// Write sustain (high nibble) and release (low nibble)
    pub fn write_sustain_release(&mut self, value: u8) {
        self.sustain = value >> 4;
        self.release = value & 0x0F;
        if self.state == EnvelopeState::Release {
            self.update_rate_period(ENVELOPE_PERIOD[self.release as usize]);
        }
    }

    /// Change the rate period the way a CPU write does
    ///
    /// The rate counter is a 15-bit LFSR. A period below the current count makes
    /// it run through the whole sequence first.
    fn update_rate_period(&mut self, period: i32) {
        if self.rate_period == period {
            return;
        }
        self.rate_period = period;
        if self.rate_period - self.rate_counter > RATE_COUNTER_WRAP {
            self.rate_counter += RATE_COUNTER_WRAP;
        }
        if self.rate_period <= self.rate_counter {
            self.rate_counter -= RATE_COUNTER_WRAP;
        }
    }

    /// ENV3 readback
    #[inline]
    pub fn read_env(&self) -> u8 {
        self.level
    }

    /// Analog envelope level
    #[inline]
    pub fn output(&self) -> f32 {
        self.level_dac
    }

    /// Current state
    pub fn state(&self) -> EnvelopeState {
        self.state
    }

    /// Silence the DAC output without touching the counters
    pub fn mute(&mut self, enable: bool) {
        self.muted = enable;
        self.update_dac();
    }

    /// Is the output muted?
    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Reset to power-on state (release, level 0)
    pub fn reset(&mut self) {
        self.level = 0;
        self.attack = 0;
        self.decay = 0;
        self.sustain = 0;
        self.release = 0;
        self.gate = false;
        self.rate_counter = 0;
        self.exponential_counter = 0;
        self.exponential_period = 1;
        self.state = EnvelopeState::Release;
        self.hold = false;
        self.rate_period = ENVELOPE_PERIOD[self.release as usize];
        self.update_dac();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock_until<F: Fn(&EnvelopeGenerator) -> bool>(env: &mut EnvelopeGenerator, done: F, limit: u32) -> Option<u32> {
        for cycle in 1..=limit {
            env.clock();
            if done(env) {
                return Some(cycle);
            }
        }
        None
    }

    /// Cycles from the first attack step to level 0xFF
    fn attack_span(env: &mut EnvelopeGenerator) -> u32 {
        let start = env.read_env();
        clock_until(env, |e| e.read_env() != start, 1_000_000).unwrap();
        clock_until(env, |e| e.read_env() == 0xFF, 10_000_000).unwrap()
    }

    #[test]
    fn test_reset_state() {
        let env = EnvelopeGenerator::new(1.0);
        assert_eq!(env.read_env(), 0);
        assert_eq!(env.state(), EnvelopeState::Release);
        assert_eq!(env.output(), 0.0);
    }

    #[test]
    fn test_attack_reaches_ff_and_decays_to_sustain() {
        let mut env = EnvelopeGenerator::new(1.0);
        env.write_attack_decay(0x00);
        env.write_sustain_release(0x80);
        env.write_control(0x01);
        clock_until(&mut env, |e| e.read_env() == 0xFF, 100_000).unwrap();
        assert_eq!(env.state(), EnvelopeState::DecaySustain);
        clock_until(&mut env, |e| e.read_env() == 0x88, 1_000_000).unwrap();
        for _ in 0..100_000 {
            env.clock();
        }
        assert_eq!(env.read_env(), 0x88);
    }

    #[test]
    fn test_attack_time_independent_of_history() {
        let attack = 0x40;
        let period = ENVELOPE_PERIOD[4] as u32;

        // fresh chip, attack from 0
        let mut fresh = EnvelopeGenerator::new(1.0);
        fresh.write_attack_decay(attack);
        fresh.write_sustain_release(0x00);
        fresh.write_control(0x01);
        let fresh_span = attack_span(&mut fresh);

        // same chip after several gate toggles, released back to zero
        let mut used = EnvelopeGenerator::new(1.0);
        used.write_attack_decay(attack);
        used.write_sustain_release(0x00);
        for _ in 0..3 {
            used.write_control(0x01);
            for _ in 0..12_345 {
                used.clock();
            }
            used.write_control(0x00);
            clock_until(&mut used, |e| e.read_env() == 0, 5_000_000).unwrap();
        }
        used.write_control(0x01);
        let used_span = attack_span(&mut used);

        assert_eq!(fresh_span, 254 * period);
        assert_eq!(used_span, fresh_span);
    }

    #[test]
    fn test_gate_on_restarts_from_current_level() {
        let mut env = EnvelopeGenerator::new(1.0);
        env.write_attack_decay(0x00);
        env.write_sustain_release(0xF9);
        env.write_control(0x01);
        clock_until(&mut env, |e| e.read_env() == 0xFF, 100_000).unwrap();
        env.write_control(0x00);
        clock_until(&mut env, |e| e.read_env() < 0xC0, 10_000_000).unwrap();
        let level = env.read_env();
        env.write_control(0x01);
        assert_eq!(env.state(), EnvelopeState::Attack);
        clock_until(&mut env, |e| e.read_env() != level, 1_000_000).unwrap();
        assert_eq!(env.read_env(), level + 1);
    }

    #[test]
    fn test_release_freezes_at_zero() {
        let mut env = EnvelopeGenerator::new(1.0);
        env.write_attack_decay(0x00);
        env.write_sustain_release(0xF0);
        env.write_control(0x01);
        clock_until(&mut env, |e| e.read_env() == 0xFF, 100_000).unwrap();
        env.write_control(0x00);
        clock_until(&mut env, |e| e.read_env() == 0, 10_000_000).unwrap();
        for _ in 0..200_000 {
            env.clock();
        }
        assert_eq!(env.read_env(), 0);
    }

    #[test]
    fn test_decay_is_slower_than_attack() {
        let mut env = EnvelopeGenerator::new(1.0);
        env.write_attack_decay(0x22);
        env.write_sustain_release(0x00);
        env.write_control(0x01);
        let up = clock_until(&mut env, |e| e.read_env() == 0xFF, 1_000_000).unwrap();
        let down = clock_until(&mut env, |e| e.read_env() == 0x00, 10_000_000).unwrap();
        assert!(down > up * 2, "decay {down} vs attack {up}");
    }

    #[test]
    fn test_mute_keeps_state() {
        let mut env = EnvelopeGenerator::new(0.96);
        env.write_attack_decay(0x00);
        env.write_sustain_release(0xF0);
        env.write_control(0x01);
        clock_until(&mut env, |e| e.read_env() == 0x80, 100_000).unwrap();
        let level = env.output();
        env.mute(true);
        assert_eq!(env.output(), 0.0);
        assert_eq!(env.read_env(), 0x80);
        for _ in 0..9 {
            env.clock();
        }
        env.mute(false);
        assert!(env.output() > level);
    }

    #[test]
    fn test_adsr_delay_bug_wraps_rate_counter() {
        let mut env = EnvelopeGenerator::new(1.0);
        env.write_attack_decay(0xF0);
        env.write_sustain_release(0x00);
        env.write_control(0x01);
        for _ in 0..1000 {
            env.clock();
        }
        // a period below the current count runs the full 15-bit sequence first
        env.write_attack_decay(0x00);
        let first = clock_until(&mut env, |e| e.read_env() != 0, 100_000).unwrap();
        assert_eq!(first as i32, RATE_COUNTER_WRAP - 1000 + ENVELOPE_PERIOD[0]);
    }
}

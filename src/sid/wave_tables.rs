//! Combined waveform tables
//!
//! The SID selects waveforms by wiring the oscillator bits of each selected
//! waveform onto a shared bus. When more than one waveform is selected the
//! drivers fight and neighbouring bits leak into each other, so combined
//! waveforms are not the AND of the pure ones. The tables here are computed
//! from a bit-level model fitted to sampled chips, once per revision.

use super::dac::kinked_dac;
use super::ChipModel;
use std::sync::OnceLock;

/// Entries per table (one per 12-bit phase)
pub const TABLE_SIZE: usize = 4096;

/// Waveforms 1-7 plus the pulse-high variants of 4-7
pub const TABLE_COUNT: usize = 11;

/// Threshold steepness of the output transistors
const SHARPNESS: f32 = 512.0;

/// Fitted model parameters of one combined waveform
#[derive(Debug, Clone, Copy)]
struct CombinedWaveformConfig {
    bias: f32,
    pulse_strength: f32,
    top_bit: f32,
    distance: f32,
    stmix: f32,
}

const fn cfg(bias: f32, pulse_strength: f32, top_bit: f32, distance: f32, stmix: f32) -> CombinedWaveformConfig {
    CombinedWaveformConfig {
        bias,
        pulse_strength,
        top_bit,
        distance,
        stmix,
    }
}

/// Waveforms 3, 5, 6, 7 and the default, per revision
const WF_CONFIG: [[CombinedWaveformConfig; 5]; 2] = [
    // 6581 (kevtris chip G)
    [
        cfg(0.880815, 0.0, 0.0, 0.3279614, 0.5999545),
        cfg(0.8924618, 2.014781, 1.003332, 0.02992322, 0.0),
        cfg(0.8646501, 1.712586, 1.137704, 0.02845423, 0.0),
        cfg(0.9527834, 1.794777, 0.0, 0.09806272, 0.7752482),
        cfg(0.5, 0.0, 1.0, 0.0, 0.0),
    ],
    // 8580 (kevtris chip V)
    [
        cfg(0.9781665, 0.0, 0.9899469, 8.087667, 0.8226412),
        cfg(0.9097769, 2.039997, 0.9584096, 0.1765447, 0.0),
        cfg(0.9231212, 2.084788, 0.9493895, 0.1712518, 0.0),
        cfg(0.9845552, 1.415612, 0.9703883, 3.68829, 0.8265008),
        cfg(0.5, 0.0, 1.0, 0.0, 0.0),
    ],
];

/// Analog and digital waveform tables of one chip revision
pub struct WaveTables {
    analog: Vec<f32>,
    digital: Vec<u8>,
    dac: [f32; 12],
}

impl WaveTables {
    /// Analog level of `table` at `phase` (12-bit)
    #[inline]
    pub fn analog(&self, table: usize, phase: usize) -> f32 {
        self.analog[table * TABLE_SIZE + phase]
    }

    /// Top 8 bits of the waveform as seen by OSC3 readback
    #[inline]
    pub fn digital(&self, table: usize, phase: usize) -> u8 {
        self.digital[table * TABLE_SIZE + phase]
    }

    /// Analog weight of oscillator bit `bit` (0-11)
    #[inline]
    pub fn bit_weight(&self, bit: usize) -> f32 {
        self.dac[bit]
    }

    /// Output level with every waveform bit low
    #[inline]
    pub fn zero_level(&self) -> f32 {
        self.analog[0]
    }

    fn build(model: ChipModel) -> Self {
        let nonlinearity = model.wave_nonlinearity();
        let mut dac = [0.0f32; 12];
        for (i, w) in dac.iter_mut().enumerate() {
            *w = kinked_dac(1 << i, nonlinearity, 12);
        }
        let wave_zero = match model {
            ChipModel::Mos6581 => -(0x380 as f32),
            ChipModel::Mos8580 => -(0x800 as f32),
        };

        let mut analog = vec![0.0f32; TABLE_COUNT * TABLE_SIZE];
        let mut digital = vec![0u8; TABLE_COUNT * TABLE_SIZE];
        let mut bits = [0.0f32; 12];
        for waveform in 1..8usize {
            for phase in 0..TABLE_SIZE {
                let accumulator = (phase as u32) << 12;
                waveform_bits(&mut bits, model, waveform, accumulator, 0x1000);
                let idx = (waveform - 1) * TABLE_SIZE + phase;
                analog[idx] = make_sample(&dac, &bits) + wave_zero;
                digital[idx] = make_digital(&bits);
                // pulse-high variants after the pulse-low ones
                if waveform >= 4 {
                    waveform_bits(&mut bits, model, waveform, accumulator, 0x000);
                    let idx = (waveform + 3) * TABLE_SIZE + phase;
                    analog[idx] = make_sample(&dac, &bits) + wave_zero;
                    digital[idx] = make_digital(&bits);
                }
            }
        }

        WaveTables {
            analog,
            digital,
            dac,
        }
    }
}

impl std::fmt::Debug for WaveTables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaveTables")
            .field("dac", &self.dac)
            .finish_non_exhaustive()
    }
}

/// Shared tables for a chip revision, computed on first use
pub fn wave_tables(model: ChipModel) -> &'static WaveTables {
    static TABLES_6581: OnceLock<WaveTables> = OnceLock::new();
    static TABLES_8580: OnceLock<WaveTables> = OnceLock::new();
    match model {
        ChipModel::Mos6581 => TABLES_6581.get_or_init(|| WaveTables::build(model)),
        ChipModel::Mos8580 => TABLES_8580.get_or_init(|| WaveTables::build(model)),
    }
}

fn make_sample(dac: &[f32; 12], bits: &[f32; 12]) -> f32 {
    bits.iter().zip(dac.iter()).map(|(b, w)| b * w).sum()
}

fn make_digital(bits: &[f32; 12]) -> u8 {
    let mut out = 0u8;
    for i in (4..12).rev() {
        out <<= 1;
        if bits[i] > 0.5 {
            out |= 1;
        }
    }
    out
}

fn populate(value: u32, bits: &mut [f32; 12]) {
    for (i, b) in bits.iter_mut().enumerate() {
        *b = if value & (1 << i) != 0 { 1.0 } else { 0.0 };
    }
}

/// Bit levels of `waveform` (1-7) at `accumulator` with pulse width `pw`
fn waveform_bits(bits: &mut [f32; 12], model: ChipModel, waveform: usize, accumulator: u32, pw: u32) {
    let phase = accumulator >> 12;

    if waveform == 4 {
        populate(if phase >= pw { 0xfff } else { 0x000 }, bits);
        return;
    }

    let revision = match model {
        ChipModel::Mos6581 => 0,
        ChipModel::Mos8580 => 1,
    };
    let config = WF_CONFIG[revision][match waveform {
        3 => 0,
        5 => 1,
        6 => 2,
        7 => 3,
        _ => 4,
    }];

    populate(phase, bits);

    // sawtooth to triangle
    if waveform & 3 == 1 {
        let top = accumulator & 0x80_0000 != 0;
        for i in (1..12).rev() {
            bits[i] = if top { 1.0 - bits[i - 1] } else { bits[i - 1] };
        }
        bits[0] = 0.0;
    }

    // sawtooth + triangle; the bottom bit is grounded through the triangle selector
    if waveform & 3 == 3 {
        bits[0] *= config.stmix;
        for i in 1..12 {
            bits[i] = bits[i - 1] * (1.0 - config.stmix) + bits[i] * config.stmix;
        }
    }

    bits[11] *= config.top_bit;

    if waveform == 3 || waveform > 4 {
        let mut distance = [0.0f32; 25];
        for i in 0..=12usize {
            let d = 1.0 / (1.0 + (i * i) as f32 * config.distance);
            distance[12 + i] = d;
            distance[12 - i] = d;
        }

        let pulse_sign: f32 = if phase >= pw { 1.0 } else { -1.0 };
        let pulse = pulse_sign * config.pulse_strength;

        let mut tmp = [0.0f32; 12];
        for (i, t) in tmp.iter_mut().enumerate() {
            let mut avg = 0.0;
            let mut n = 0.0;
            for (j, b) in bits.iter().enumerate() {
                let weight = distance[i + 12 - j];
                avg += b * weight;
                n += weight;
            }
            // pulse control bit sits just above bit 11
            if waveform > 4 {
                let weight = distance[i];
                avg += pulse * weight;
                n += weight;
            }
            *t = (bits[i] + avg / n) * 0.5;
        }
        *bits = tmp;
    }

    for b in bits.iter_mut() {
        *b = ((*b - config.bias) * SHARPNESS + 0.5).clamp(0.0, 1.0);
    }
}

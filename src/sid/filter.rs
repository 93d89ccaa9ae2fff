//! State-variable filter
//!
//! Both revisions use the same two-integrator loop. They differ in how the
//! cutoff register becomes an integrator coefficient: the 6581 filter is built
//! from FETs whose resistance depends on the signal voltage, so its
//! coefficient is looked up per cycle from the current node voltage; the 8580
//! maps the cutoff linearly and only its resonance is nonlinear.

use super::dac::kinked_dac;
use super::registers::{FilterMode, FilterRouting};
use super::ChipModel;
use crate::{Result, SidError};
use serde::{Deserialize, Serialize};

/// Integrator capacitors of the 6581
const SIDCAPS_6581: f64 = 470e-12;

/// Oscillator voltage to cutoff DAC scale
const OSC_TO_FC: f32 = 1.0 / 512.0;

/// Node voltage steps per `w0` table column
const TYPE3_W0S_RESOLUTION: f32 = 1.0 / 5e3;

/// Cutoff rows (11-bit cutoff, lowest bit not connected)
const TYPE3_ROWS: usize = 1024;

/// Node voltage columns
const TYPE3_COLUMNS: usize = 256;

/// Voice nonlinearity of the 6581 cutoff DAC
const FC_DAC_NONLINEARITY: f32 = 0.961_316_05;

/// Lowest 8580 cutoff in Hz
const FC_8580_MIN_HZ: f32 = 30.0;

/// 8580 cutoff span over the 11-bit register in Hz
const FC_8580_SPAN_HZ: f32 = 12000.0;

/// Values closer to zero than this are flushed
const DENORMAL_LIMIT: f32 = 1e-12;

/// Transfer curve parameters of a filter revision
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterCurve {
    /// 6581 FET model
    Type3 {
        /// Resistance in parallel with the FET
        base_resistance: f32,
        /// FET resistance at cutoff 0
        offset: f32,
        /// Resistance ratio per cutoff DAC step
        steepness: f32,
        /// FET resistance floor
        minimum_fet_resistance: f32,
    },
    /// 8580 linear model
    Linear {
        /// Multiplier on the nominal cutoff frequency
        cutoff_scale: f32,
        /// Multiplier on the resonance register
        resonance_factor: f32,
    },
}

impl FilterCurve {
    /// Measured defaults for a revision
    pub fn default_for(model: ChipModel) -> Self {
        match model {
            ChipModel::Mos6581 => FilterCurve::Type3 {
                base_resistance: 1_147_036.5,
                offset: 2.742_288e8,
                steepness: 1.006_663_4,
                minimum_fet_resistance: 16_125.155,
            },
            ChipModel::Mos8580 => FilterCurve::Linear {
                cutoff_scale: 1.0,
                resonance_factor: 1.0,
            },
        }
    }
}

/// Filter register file shared by both revisions
#[derive(Debug, Clone, Copy)]
pub struct FilterRegisters {
    /// 11-bit cutoff
    pub fc: u16,
    /// 4-bit resonance
    pub res: u8,
    /// RES_FILT low nibble as written
    pub routing: FilterRouting,
    /// MODE_VOL high nibble
    pub mode: FilterMode,
    /// Master volume, 0-15
    pub volume: u8,
    /// Routing applies; when false every input takes the dry path
    pub enabled: bool,
}

impl Default for FilterRegisters {
    fn default() -> Self {
        FilterRegisters {
            fc: 0,
            res: 0,
            routing: FilterRouting::empty(),
            mode: FilterMode::empty(),
            volume: 0,
            enabled: true,
        }
    }
}

impl FilterRegisters {
    /// Split the inputs into the filter input `Vi` and the dry sum `Vf`
    #[inline]
    pub fn route(&self, voice1: f32, voice2: f32, voice3: f32, ext_in: f32) -> (f32, f32) {
        let routing = if self.enabled {
            self.routing
        } else {
            FilterRouting::empty()
        };
        let mut vi = 0.0;
        let mut vf = 0.0;

        if routing.contains(FilterRouting::FILT1) {
            vi += voice1;
        } else {
            vf += voice1;
        }
        if routing.contains(FilterRouting::FILT2) {
            vi += voice2;
        } else {
            vf += voice2;
        }
        // 3OFF only disconnects the dry path
        if routing.contains(FilterRouting::FILT3) {
            vi += voice3;
        } else if self.mode.voice3_dry() {
            vf += voice3;
        }
        if routing.contains(FilterRouting::FILTEX) {
            vi += ext_in;
        } else {
            vf += ext_in;
        }
        (vi, vf)
    }

    /// Sum of the selected filter outputs
    #[inline]
    pub fn taps(&self, vlp: f32, vbp: f32, vhp: f32) -> f32 {
        let mut out = 0.0;
        if self.mode.contains(FilterMode::LP) {
            out += vlp;
        }
        if self.mode.contains(FilterMode::BP) {
            out += vbp;
        }
        if self.mode.contains(FilterMode::HP) {
            out += vhp;
        }
        out
    }

    /// Volume as a gain
    #[inline]
    pub fn gain(&self) -> f32 {
        self.volume as f32 / 15.0
    }
}

/// Revision-specific part of the filter
pub trait FilterModel {
    /// One cycle of the integrator loop, returning the mixed output
    fn clock(&mut self, regs: &FilterRegisters, voice1: f32, voice2: f32, voice3: f32, ext_in: f32) -> f32;

    /// Cutoff register changed
    fn set_cutoff(&mut self, fc: u16);

    /// Resonance register changed
    fn set_resonance(&mut self, res: u8);

    /// Replace the transfer curve
    fn set_curve_params(&mut self, curve: FilterCurve) -> Result<()>;

    /// Current transfer curve
    fn curve_params(&self) -> FilterCurve;

    /// System clock changed
    fn set_clock_frequency(&mut self, clock: f64);

    /// Clear the integrators
    fn reset(&mut self);

    /// Flush denormal integrator states to zero
    fn zero_denormals(&mut self);
}

#[inline]
fn flush(value: &mut f32) {
    if value.abs() < DENORMAL_LIMIT {
        *value = 0.0;
    }
}

/// 6581 filter with FET distortion
#[derive(Debug, Clone)]
pub struct Filter6581 {
    vhp: f32,
    vbp: f32,
    vlp: f32,
    one_div_q: f32,
    attenuation: f32,
    nonlinearity: f32,
    resonance_factor: f32,
    base_resistance: f32,
    offset: f32,
    steepness: f32,
    minimum_fet_resistance: f32,
    voice_nonlinearity: f32,
    clock_frequency: f64,
    /// `[TYPE3_ROWS][TYPE3_COLUMNS]`, row-major
    type3_w0s: Vec<f32>,
    row: usize,
    res: u8,
}

impl Filter6581 {
    /// Create with measured defaults
    pub fn new(clock_frequency: f64) -> Self {
        let mut filter = Filter6581 {
            vhp: 0.0,
            vbp: 0.0,
            vlp: 0.0,
            one_div_q: 0.0,
            attenuation: 0.64,
            nonlinearity: 3.3e6,
            resonance_factor: 1.0,
            base_resistance: 0.0,
            offset: 0.0,
            steepness: 1.0,
            minimum_fet_resistance: 0.0,
            voice_nonlinearity: FC_DAC_NONLINEARITY,
            clock_frequency,
            type3_w0s: vec![0.0; TYPE3_ROWS * TYPE3_COLUMNS],
            row: 0,
            res: 0,
        };
        filter.apply_curve(FilterCurve::default_for(ChipModel::Mos6581));
        filter.set_resonance(0);
        filter
    }

    /// Output attenuation, saturation level and resonance factor
    pub fn set_distortion(&mut self, attenuation: f32, nonlinearity: f32, resonance_factor: f32) {
        self.attenuation = attenuation;
        self.nonlinearity = nonlinearity;
        self.resonance_factor = resonance_factor;
        self.set_resonance(self.res);
    }

    /// Nonlinearity of the cutoff DAC
    pub fn set_voice_nonlinearity(&mut self, nonlinearity: f32) {
        self.voice_nonlinearity = nonlinearity;
        self.recalculate();
    }

    fn apply_curve(&mut self, curve: FilterCurve) {
        if let FilterCurve::Type3 {
            base_resistance,
            offset,
            steepness,
            minimum_fet_resistance,
        } = curve
        {
            self.base_resistance = base_resistance;
            self.offset = offset;
            self.steepness = steepness;
            self.minimum_fet_resistance = minimum_fet_resistance;
            self.recalculate();
        }
    }

    /// Integrator coefficient at node voltage `dist`
    #[inline]
    fn w0(&self, dist: f32) -> f32 {
        let column = if dist < 0.0 {
            0
        } else {
            ((dist * TYPE3_W0S_RESOLUTION) as usize).min(TYPE3_COLUMNS - 1)
        };
        self.type3_w0s[self.row * TYPE3_COLUMNS + column]
    }

    /// Distortion currently applied on top of the undistorted coefficient
    pub fn estimate_current_distortion(&self) -> f32 {
        self.w0(self.vhp) + self.w0(self.vbp) - 2.0 * self.w0(0.0)
    }

    fn recalculate(&mut self) {
        let fc_base: Vec<f32> = (0..TYPE3_ROWS as u32)
            .map(|j| {
                let kink = kinked_dac(j << 1, self.voice_nonlinearity, 11);
                self.offset / self.steepness.powf(kink)
            })
            .collect();

        let dist_base: Vec<f32> = (0..TYPE3_COLUMNS)
            .map(|i| {
                let dist = if i > 0 {
                    (i as f32 + 0.5) / TYPE3_W0S_RESOLUTION
                } else {
                    0.0
                };
                1.0 / self.steepness.powf(dist * OSC_TO_FC)
            })
            .collect();

        let one_div_caps_freq = (1.0 / (SIDCAPS_6581 * self.clock_frequency)) as f32;

        // the old table does not fit the new curve
        self.vlp = 0.0;
        self.vbp = 0.0;
        self.vhp = 0.0;

        for (j, fc) in fc_base.iter().enumerate() {
            let row = &mut self.type3_w0s[j * TYPE3_COLUMNS..(j + 1) * TYPE3_COLUMNS];
            for (w0, dist) in row.iter_mut().zip(dist_base.iter()) {
                let dynamic_resistance = self.minimum_fet_resistance + fc * dist;
                // base resistance in parallel with the FET
                let one_div_resistance = (self.base_resistance + dynamic_resistance)
                    / (self.base_resistance * dynamic_resistance);
                *w0 = one_div_caps_freq * one_div_resistance;
            }
        }
    }

    #[inline]
    fn waveshaper(&self, mut value: f32) -> f32 {
        if value > self.nonlinearity {
            value -= (value - self.nonlinearity) * 0.5;
        }
        value
    }
}

impl FilterModel for Filter6581 {
    #[inline]
    fn clock(&mut self, regs: &FilterRegisters, voice1: f32, voice2: f32, voice3: f32, ext_in: f32) -> f32 {
        let (vi, vf) = regs.route(voice1, voice2, voice3, ext_in);

        self.vlp -= self.vbp * self.w0(self.vbp);
        self.vbp -= self.vhp * self.w0(self.vhp);
        self.vhp = (self.vbp * self.one_div_q - self.vlp - vi) * self.attenuation;

        let out = vf + regs.taps(self.vlp, self.vbp, self.vhp);
        // output inverter saturation
        self.waveshaper(out * regs.gain())
    }

    fn set_cutoff(&mut self, fc: u16) {
        self.row = (fc as usize >> 1) & (TYPE3_ROWS - 1);
    }

    fn set_resonance(&mut self, res: u8) {
        self.res = res;
        self.one_div_q = 1.0 / (0.5 + self.resonance_factor * res as f32 / 18.0);
    }

    fn set_curve_params(&mut self, curve: FilterCurve) -> Result<()> {
        match curve {
            FilterCurve::Type3 { .. } => {
                self.apply_curve(curve);
                Ok(())
            }
            FilterCurve::Linear { .. } => Err(SidError::Config(
                "the 6581 filter takes a type3 curve".into(),
            )),
        }
    }

    fn curve_params(&self) -> FilterCurve {
        FilterCurve::Type3 {
            base_resistance: self.base_resistance,
            offset: self.offset,
            steepness: self.steepness,
            minimum_fet_resistance: self.minimum_fet_resistance,
        }
    }

    fn set_clock_frequency(&mut self, clock: f64) {
        if self.clock_frequency != clock {
            self.clock_frequency = clock;
            self.recalculate();
        }
    }

    fn reset(&mut self) {
        self.vhp = 0.0;
        self.vbp = 0.0;
        self.vlp = 0.0;
    }

    fn zero_denormals(&mut self) {
        flush(&mut self.vbp);
        flush(&mut self.vlp);
    }
}

/// 8580 filter: linear cutoff, nonlinear resonance
#[derive(Debug, Clone)]
pub struct Filter8580 {
    vhp: f32,
    vbp: f32,
    vlp: f32,
    w0: f32,
    one_div_q: f32,
    cutoff_scale: f32,
    resonance_factor: f32,
    clock_frequency: f64,
    fc: u16,
    res: u8,
}

impl Filter8580 {
    /// Create with nominal curve
    pub fn new(clock_frequency: f64) -> Self {
        let mut filter = Filter8580 {
            vhp: 0.0,
            vbp: 0.0,
            vlp: 0.0,
            w0: 0.0,
            one_div_q: 0.0,
            cutoff_scale: 1.0,
            resonance_factor: 1.0,
            clock_frequency,
            fc: 0,
            res: 0,
        };
        filter.set_cutoff(0);
        filter.set_resonance(0);
        filter
    }

    /// Cutoff frequency in Hz for the current register value
    pub fn cutoff_hz(&self) -> f32 {
        (FC_8580_MIN_HZ + self.fc as f32 * FC_8580_SPAN_HZ / 2047.0) * self.cutoff_scale
    }

    /// Current integrator coefficient
    pub fn w0(&self) -> f32 {
        self.w0
    }
}

impl FilterModel for Filter8580 {
    #[inline]
    fn clock(&mut self, regs: &FilterRegisters, voice1: f32, voice2: f32, voice3: f32, ext_in: f32) -> f32 {
        let (vi, vf) = regs.route(voice1, voice2, voice3, ext_in);

        self.vlp -= self.vbp * self.w0;
        self.vbp -= self.vhp * self.w0;
        self.vhp = self.vbp * self.one_div_q - self.vlp - vi;

        (vf + regs.taps(self.vlp, self.vbp, self.vhp)) * regs.gain()
    }

    fn set_cutoff(&mut self, fc: u16) {
        self.fc = fc & 0x7FF;
        self.w0 = (2.0 * std::f64::consts::PI * self.cutoff_hz() as f64 / self.clock_frequency) as f32;
    }

    fn set_resonance(&mut self, res: u8) {
        self.res = res;
        self.one_div_q = 2f32.powf((4.0 - res as f32 * self.resonance_factor) / 8.0);
    }

    fn set_curve_params(&mut self, curve: FilterCurve) -> Result<()> {
        match curve {
            FilterCurve::Linear {
                cutoff_scale,
                resonance_factor,
            } => {
                self.cutoff_scale = cutoff_scale;
                self.resonance_factor = resonance_factor;
                self.set_cutoff(self.fc);
                self.set_resonance(self.res);
                Ok(())
            }
            FilterCurve::Type3 { .. } => Err(SidError::Config(
                "the 8580 filter takes a linear curve".into(),
            )),
        }
    }

    fn curve_params(&self) -> FilterCurve {
        FilterCurve::Linear {
            cutoff_scale: self.cutoff_scale,
            resonance_factor: self.resonance_factor,
        }
    }

    fn set_clock_frequency(&mut self, clock: f64) {
        self.clock_frequency = clock;
        self.set_cutoff(self.fc);
    }

    fn reset(&mut self) {
        self.vhp = 0.0;
        self.vbp = 0.0;
        self.vlp = 0.0;
    }

    fn zero_denormals(&mut self) {
        flush(&mut self.vbp);
        flush(&mut self.vlp);
    }
}

/// Filter of the configured revision, with its register file
#[derive(Debug, Clone)]
pub struct Filter {
    regs: FilterRegisters,
    model: FilterKind,
}

#[derive(Debug, Clone)]
enum FilterKind {
    Mos6581(Box<Filter6581>),
    Mos8580(Filter8580),
}

macro_rules! dispatch {
    ($self:expr, $f:ident => $body:expr) => {
        match &mut $self.model {
            FilterKind::Mos6581($f) => $body,
            FilterKind::Mos8580($f) => $body,
        }
    };
}

impl Filter {
    /// Create the filter of `model` clocked at `clock_frequency` Hz
    pub fn new(model: ChipModel, clock_frequency: f64) -> Self {
        let model = match model {
            ChipModel::Mos6581 => FilterKind::Mos6581(Box::new(Filter6581::new(clock_frequency))),
            ChipModel::Mos8580 => FilterKind::Mos8580(Filter8580::new(clock_frequency)),
        };
        Filter {
            regs: FilterRegisters::default(),
            model,
        }
    }

    /// Revision this filter models
    pub fn chip_model(&self) -> ChipModel {
        match self.model {
            FilterKind::Mos6581(_) => ChipModel::Mos6581,
            FilterKind::Mos8580(_) => ChipModel::Mos8580,
        }
    }

    /// Swap the revision model, keeping the register file
    pub fn set_chip_model(&mut self, model: ChipModel, clock_frequency: f64) {
        if model == self.chip_model() {
            return;
        }
        let regs = self.regs;
        *self = Filter::new(model, clock_frequency);
        self.regs = regs;
        let (fc, res) = (regs.fc, regs.res);
        dispatch!(self, f => {
            f.set_cutoff(fc);
            f.set_resonance(res);
        });
    }

    /// One cycle
    #[inline]
    pub fn clock(&mut self, voice1: f32, voice2: f32, voice3: f32, ext_in: f32) -> f32 {
        let regs = &self.regs;
        match &mut self.model {
            FilterKind::Mos6581(f) => f.clock(regs, voice1, voice2, voice3, ext_in),
            FilterKind::Mos8580(f) => f.clock(regs, voice1, voice2, voice3, ext_in),
        }
    }

    /// FC_LO: cutoff bits 0-2
    pub fn write_fc_lo(&mut self, value: u8) {
        self.regs.fc = (self.regs.fc & 0x7F8) | (value as u16 & 0x007);
        let fc = self.regs.fc;
        dispatch!(self, f => f.set_cutoff(fc));
    }

    /// FC_HI: cutoff bits 3-10
    pub fn write_fc_hi(&mut self, value: u8) {
        self.regs.fc = (((value as u16) << 3) & 0x7F8) | (self.regs.fc & 0x007);
        let fc = self.regs.fc;
        dispatch!(self, f => f.set_cutoff(fc));
    }

    /// RES_FILT: resonance and routing
    pub fn write_res_filt(&mut self, value: u8) {
        self.regs.res = value >> 4;
        self.regs.routing = FilterRouting::from_register(value);
        let res = self.regs.res;
        dispatch!(self, f => f.set_resonance(res));
    }

    /// MODE_VOL: filter mode, 3OFF and master volume
    pub fn write_mode_vol(&mut self, value: u8) {
        self.regs.volume = value & 0x0F;
        self.regs.mode = FilterMode::from_register(value);
    }

    /// Route everything through the dry path when disabled
    pub fn enable(&mut self, enable: bool) {
        self.regs.enabled = enable;
    }

    /// Is routing into the filter active?
    pub fn is_enabled(&self) -> bool {
        self.regs.enabled
    }

    /// Register file
    pub fn registers(&self) -> &FilterRegisters {
        &self.regs
    }

    /// Replace the transfer curve of the active revision
    pub fn set_curve(&mut self, curve: FilterCurve) -> Result<()> {
        dispatch!(self, f => f.set_curve_params(curve))
    }

    /// Transfer curve of the active revision
    pub fn curve(&self) -> FilterCurve {
        match &self.model {
            FilterKind::Mos6581(f) => f.curve_params(),
            FilterKind::Mos8580(f) => f.curve_params(),
        }
    }

    /// System clock changed
    pub fn set_clock_frequency(&mut self, clock: f64) {
        dispatch!(self, f => f.set_clock_frequency(clock));
    }

    /// Flush denormal integrator states
    pub fn zero_denormals(&mut self) {
        dispatch!(self, f => f.zero_denormals());
    }

    /// Clear integrators and registers
    pub fn reset(&mut self) {
        let enabled = self.regs.enabled;
        self.regs = FilterRegisters {
            enabled,
            ..FilterRegisters::default()
        };
        dispatch!(self, f => {
            f.reset();
            f.set_cutoff(0);
            f.set_resonance(0);
        });
    }
}

//! Board output stage
//!
//! The C64 board follows the SID with an RC low-pass (about 16 kHz) and an AC
//! coupling high-pass (about 16 Hz). The high-pass removes the voices' DC
//! offset, so silence settles at zero.

/// Low-pass corner times 2π, in rad/s
const LOWPASS_W0: f64 = 100_000.0;

/// High-pass corner times 2π, in rad/s
const HIGHPASS_W0: f64 = 100.0;

/// RC low-pass followed by RC high-pass
#[derive(Debug, Clone)]
pub struct ExternalFilter {
    vlp: f32,
    vhp: f32,
    w0lp: f32,
    w0hp: f32,
}

impl ExternalFilter {
    /// Create a filter for a system clock in Hz
    pub fn new(clock_frequency: f64) -> Self {
        let mut filter = ExternalFilter {
            vlp: 0.0,
            vhp: 0.0,
            w0lp: 0.0,
            w0hp: 0.0,
        };
        filter.set_clock_frequency(clock_frequency);
        filter
    }

    /// Recompute coefficients for a new system clock
    pub fn set_clock_frequency(&mut self, clock_frequency: f64) {
        self.w0lp = (LOWPASS_W0 / clock_frequency) as f32;
        self.w0hp = (HIGHPASS_W0 / clock_frequency) as f32;
    }

    /// One cycle
    #[inline]
    pub fn clock(&mut self, vi: f32) -> f32 {
        self.vlp += (vi - self.vlp) * self.w0lp;
        self.vhp += (self.vlp - self.vhp) * self.w0hp;
        self.vlp - self.vhp
    }

    /// Flush denormals
    pub fn zero_denormals(&mut self) {
        if self.vhp.abs() < 1e-12 {
            self.vhp = 0.0;
        }
        if self.vlp.abs() < 1e-12 {
            self.vlp = 0.0;
        }
    }

    /// Clear state
    pub fn reset(&mut self) {
        self.vlp = 0.0;
        self.vhp = 0.0;
    }
}

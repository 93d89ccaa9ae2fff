//! Sample Rate Conversion
//!
//! The chips produce one sample per system cycle (about 1 MHz). The resamplers
//! here bring that down to the host rate. All of them take one input sample at
//! a time and report when an output sample is ready:
//!
//! ```text
//! for each cycle:
//!     if resampler.input(sample) {
//!         emit(resampler.output());
//!     }
//! ```
//!
//! Ratios are kept in 22.10 fixed point, so an output phase is a value in
//! `0..1024` between two input samples.

use crate::config::SamplingMethod;
use crate::{Result, SidError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Sample ring length of the FIR resampler (power of two)
const RINGSIZE: usize = 2048;

/// Output resolution the FIR is designed for
const BITS: i32 = 16;

/// Fixed-point unit of the cycles-per-sample ratio
const FIXED_ONE: i32 = 1 << 10;

/// Input level above which samples are soft clipped
const SOFT_CLIP_THRESHOLD: i32 = 28_000;

/// Acceptable error of the Bessel series
const I0E: f64 = 1e-6;

/// Common contract of all resamplers
pub trait Resample {
    /// Feed one input sample; true when a new output sample is ready
    fn input(&mut self, sample: i32) -> bool;

    /// Most recent output sample
    fn output(&self) -> i32;

    /// Forget all history
    fn reset(&mut self);
}

/// Ratio of input to output rate in 22.10 fixed point
fn fixed_ratio(clock_frequency: f64, sampling_frequency: f64) -> i32 {
    (clock_frequency / sampling_frequency * FIXED_ONE as f64) as i32
}

/// Linear interpolation between successive inputs ("decimate")
///
/// The ratio is truncated to 22.10 fixed point, so the output rate is a hair
/// above nominal.
#[derive(Debug, Clone)]
pub struct ZeroOrderResampler {
    cached_sample: i32,
    cycles_per_sample: i32,
    sample_offset: i32,
    output_value: i32,
}

impl ZeroOrderResampler {
    /// Create a resampler from `clock_frequency` to `sampling_frequency`
    pub fn new(clock_frequency: f64, sampling_frequency: f64) -> Self {
        ZeroOrderResampler {
            cached_sample: 0,
            cycles_per_sample: fixed_ratio(clock_frequency, sampling_frequency),
            sample_offset: 0,
            output_value: 0,
        }
    }

    /// Input samples per output sample, 22.10 fixed point
    pub fn cycles_per_sample(&self) -> i32 {
        self.cycles_per_sample
    }
}

impl Resample for ZeroOrderResampler {
    #[inline]
    fn input(&mut self, sample: i32) -> bool {
        let mut ready = false;
        if self.sample_offset < FIXED_ONE {
            self.output_value = self.cached_sample
                + ((self.sample_offset * (sample - self.cached_sample)) >> 10);
            ready = true;
            self.sample_offset += self.cycles_per_sample;
        }
        self.sample_offset -= FIXED_ONE;
        self.cached_sample = sample;
        ready
    }

    #[inline]
    fn output(&self) -> i32 {
        self.output_value
    }

    fn reset(&mut self) {
        self.cached_sample = 0;
        self.sample_offset = 0;
        self.output_value = 0;
    }
}

/// Zeroth order modified Bessel function of the first kind
fn i0(x: f64) -> f64 {
    let mut sum = 1.0;
    let mut u = 1.0;
    let mut n = 1.0;
    let halfx = x / 2.0;
    loop {
        let temp = halfx / n;
        u *= temp * temp;
        sum += u;
        n += 1.0;
        if u < I0E * sum {
            break;
        }
    }
    sum
}

/// Compress samples approaching the 16-bit limits instead of wrapping
#[inline]
fn soft_clip(x: i32) -> i16 {
    if x.abs() < SOFT_CLIP_THRESHOLD {
        return x as i16;
    }
    let t = SOFT_CLIP_THRESHOLD as f64 / 32768.0;
    let a = 1.0 - t;
    let b = 1.0 / a;
    let value = (x.abs() - SOFT_CLIP_THRESHOLD) as f64 / 32768.0;
    let value = (t + a * (b * value).tanh()) * 32768.0;
    (value.min(i16::MAX as f64) as i16) * x.signum() as i16
}

/// Windowed-sinc coefficient table, `fir_res` phases of `fir_n` taps
#[derive(Debug)]
struct FirTable {
    fir_n: usize,
    fir_res: usize,
    taps: Vec<i16>,
}

impl FirTable {
    #[inline]
    fn phase(&self, index: usize) -> &[i16] {
        &self.taps[index * self.fir_n..(index + 1) * self.fir_n]
    }
}

type FirKey = (usize, usize, u64, u64);

/// Tables are expensive to build and rate combinations few, so they are shared
fn fir_cache() -> &'static Mutex<HashMap<FirKey, Arc<FirTable>>> {
    static CACHE: OnceLock<Mutex<HashMap<FirKey, Arc<FirTable>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Kaiser-windowed sinc FIR with interpolated sub-phases
///
/// Based on J. O. Smith's bandlimited interpolation: the filter is stored for
/// `fir_res` fractional phases and the output is interpolated between the two
/// nearest, which keeps tables small without losing accuracy.
#[derive(Debug, Clone)]
pub struct SincResampler {
    fir: Arc<FirTable>,
    /// Mirrored ring so any `fir_n` window is contiguous
    sample: Vec<i16>,
    sample_index: usize,
    cycles_per_sample: i32,
    sample_offset: i32,
    output_value: i32,
}

impl SincResampler {
    /// Build a resampler accurate up to `highest_accurate_frequency`
    pub fn new(
        clock_frequency: f64,
        sampling_frequency: f64,
        highest_accurate_frequency: f64,
    ) -> Result<Self> {
        if 2.0 * highest_accurate_frequency / sampling_frequency > 0.95 {
            return Err(SidError::Resampler(format!(
                "passband of {highest_accurate_frequency} Hz is too wide for {sampling_frequency} Hz; \
                 raise the sampling rate or lower the passband"
            )));
        }

        // 16 bits -> -96 dB stopband attenuation
        let a = -20.0 * (1.0 / (1 << BITS) as f64).log10();
        // transition band as a fraction of the output rate
        let dw = (1.0 - 2.0 * highest_accurate_frequency / sampling_frequency) * PI * 2.0;
        // Kaiser window parameters, as in MATLAB's kaiserord
        let beta = 0.1102 * (a - 8.7);
        let i0_beta = i0(beta);
        let cycles_per_sample_d = clock_frequency / sampling_frequency;

        // the filter order equals the number of zero crossings, so it must be even
        let mut n = ((a - 7.95) / (2.285 * dw) + 0.5) as usize;
        n += n & 1;

        // odd filter length, symmetric about x = 0
        let fir_n = ((n as f64 * cycles_per_sample_d) as usize + 1) | 1;
        if fir_n >= RINGSIZE {
            return Err(SidError::Resampler(format!(
                "FIR ring buffer would overflow ({fir_n} taps for {clock_frequency} Hz -> {sampling_frequency} Hz)"
            )));
        }

        // interpolation error is bound by 1.234 / L^2
        let fir_res = ((1.234 * (1 << BITS) as f64).sqrt() / cycles_per_sample_d).ceil() as usize;

        let key = (fir_n, fir_res, beta.to_bits(), cycles_per_sample_d.to_bits());
        let fir = {
            let mut cache = fir_cache().lock();
            cache
                .entry(key)
                .or_insert_with(|| {
                    debug!(fir_n, fir_res, ratio = cycles_per_sample_d, "building sinc table");
                    Arc::new(build_fir(fir_n, fir_res, beta, i0_beta, cycles_per_sample_d))
                })
                .clone()
        };

        Ok(SincResampler {
            fir,
            sample: vec![0; RINGSIZE * 2],
            sample_index: 0,
            cycles_per_sample: fixed_ratio(clock_frequency, sampling_frequency),
            sample_offset: 0,
            output_value: 0,
        })
    }

    /// Input samples per output sample, 22.10 fixed point
    pub fn cycles_per_sample(&self) -> i32 {
        self.cycles_per_sample
    }

    /// Filter length in taps
    pub fn taps(&self) -> usize {
        self.fir.fir_n
    }

    #[inline]
    fn convolve(samples: &[i16], coefficients: &[i16]) -> i32 {
        let sum: i64 = samples
            .iter()
            .zip(coefficients)
            .map(|(&s, &c)| s as i64 * c as i64)
            .sum();
        ((sum + (1 << 14)) >> 15) as i32
    }

    #[inline]
    fn fir(&self, subcycle: i32) -> i32 {
        let fir_n = self.fir.fir_n;
        let fir_res = self.fir.fir_res as i32;

        // nearest table at or below the phase
        let mut table = ((subcycle * fir_res) >> 10) as usize;
        let table_offset = (subcycle * fir_res) & 0x3FF;

        // the fir_n most recent samples plus one in case the phase wraps
        let mut start = self.sample_index + RINGSIZE - fir_n - 1;

        let v1 = Self::convolve(&self.sample[start..start + fir_n], self.fir.phase(table));

        // next table; past the last one use the first with the previous sample
        table += 1;
        if table == self.fir.fir_res {
            table = 0;
            start += 1;
        }
        let v2 = Self::convolve(&self.sample[start..start + fir_n], self.fir.phase(table));

        v1 + ((table_offset * (v2 - v1)) >> 10)
    }
}

fn build_fir(fir_n: usize, fir_res: usize, beta: f64, i0_beta: f64, cycles_per_sample: f64) -> FirTable {
    // cutoff at the output Nyquist frequency
    let wc = PI;
    let scale = 32768.0 * wc / cycles_per_sample / PI;
    let half = (fir_n / 2) as f64;

    let mut taps = Vec::with_capacity(fir_n * fir_res);
    for i in 0..fir_res {
        let j_phase = i as f64 / fir_res as f64 + half;
        for j in 0..fir_n {
            let x = j as f64 - j_phase;
            let xt = x / half;
            let kaiser = if xt.abs() < 1.0 {
                i0(beta * (1.0 - xt * xt).sqrt()) / i0_beta
            } else {
                0.0
            };
            let wt = wc * x / cycles_per_sample;
            let sinc = if wt.abs() >= 1e-8 { wt.sin() / wt } else { 1.0 };
            taps.push((scale * sinc * kaiser) as i16);
        }
    }
    FirTable { fir_n, fir_res, taps }
}

impl Resample for SincResampler {
    #[inline]
    fn input(&mut self, sample: i32) -> bool {
        let mut ready = false;
        let clipped = soft_clip(sample);
        self.sample[self.sample_index] = clipped;
        self.sample[self.sample_index + RINGSIZE] = clipped;
        self.sample_index = (self.sample_index + 1) & (RINGSIZE - 1);

        if self.sample_offset < FIXED_ONE {
            self.output_value = self.fir(self.sample_offset);
            ready = true;
            self.sample_offset += self.cycles_per_sample;
        }
        self.sample_offset -= FIXED_ONE;
        ready
    }

    #[inline]
    fn output(&self) -> i32 {
        self.output_value
    }

    fn reset(&mut self) {
        self.sample.fill(0);
        self.sample_index = 0;
        self.sample_offset = 0;
        self.output_value = 0;
    }
}

/// Two sinc stages through an intermediate rate
///
/// The wide transition band of the first stage keeps its filter short; the
/// second, narrow stage then runs at a much lower input rate. The intermediate
/// rate minimizing total work is
/// `2*f_pass + sqrt(2*f_pass*clock*(rate - 2*f_pass)/rate)` (L. Ganier).
///
/// Each stage truncates its ratio to 22.10 fixed point, so the output runs
/// slightly fast of the nominal rate and the surplus grows with input length
/// (about 33 extra samples per 3M PAL cycles at 48 kHz).
#[derive(Debug, Clone)]
pub struct TwoPassSincResampler {
    stage1: SincResampler,
    stage2: SincResampler,
}

impl TwoPassSincResampler {
    /// Build both stages
    pub fn new(
        clock_frequency: f64,
        sampling_frequency: f64,
        highest_accurate_frequency: f64,
    ) -> Result<Self> {
        let half_freq = highest_accurate_frequency.min(sampling_frequency * 0.45);
        let intermediate = 2.0 * half_freq
            + (2.0 * half_freq * clock_frequency * (sampling_frequency - 2.0 * half_freq)
                / sampling_frequency)
                .sqrt();
        debug!(intermediate, "two-pass resampler");
        Ok(TwoPassSincResampler {
            stage1: SincResampler::new(clock_frequency, intermediate, highest_accurate_frequency)?,
            stage2: SincResampler::new(intermediate, sampling_frequency, highest_accurate_frequency)?,
        })
    }
}

impl Resample for TwoPassSincResampler {
    #[inline]
    fn input(&mut self, sample: i32) -> bool {
        self.stage1.input(sample) && self.stage2.input(self.stage1.output())
    }

    #[inline]
    fn output(&self) -> i32 {
        self.stage2.output()
    }

    fn reset(&mut self) {
        self.stage1.reset();
        self.stage2.reset();
    }
}

/// Resampler selected by [`SamplingMethod`]
#[derive(Debug, Clone)]
pub enum Resampler {
    /// Decimate
    ZeroOrder(ZeroOrderResampler),
    /// Resample
    TwoPassSinc(Box<TwoPassSincResampler>),
}

impl Resample for Resampler {
    #[inline]
    fn input(&mut self, sample: i32) -> bool {
        match self {
            Resampler::ZeroOrder(r) => r.input(sample),
            Resampler::TwoPassSinc(r) => r.input(sample),
        }
    }

    #[inline]
    fn output(&self) -> i32 {
        match self {
            Resampler::ZeroOrder(r) => r.output(),
            Resampler::TwoPassSinc(r) => r.output(),
        }
    }

    fn reset(&mut self) {
        match self {
            Resampler::ZeroOrder(r) => r.reset(),
            Resampler::TwoPassSinc(r) => r.reset(),
        }
    }
}

/// Build the resampler for a sampling method
pub fn create_resampler(
    clock_frequency: f64,
    method: SamplingMethod,
    sampling_frequency: f64,
    highest_accurate_frequency: f64,
) -> Result<Resampler> {
    if clock_frequency <= 0.0 || sampling_frequency <= 0.0 || sampling_frequency > clock_frequency {
        return Err(SidError::Resampler(format!(
            "cannot resample {clock_frequency} Hz to {sampling_frequency} Hz"
        )));
    }
    Ok(match method {
        SamplingMethod::Decimate => {
            Resampler::ZeroOrder(ZeroOrderResampler::new(clock_frequency, sampling_frequency))
        }
        SamplingMethod::Resample => Resampler::TwoPassSinc(Box::new(TwoPassSincResampler::new(
            clock_frequency,
            sampling_frequency,
            highest_accurate_frequency,
        )?)),
    })
}

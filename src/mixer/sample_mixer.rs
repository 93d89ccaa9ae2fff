//! Per-chip sample path
//!
//! Every cycle sample of one chip goes through a delay line, the fade gain and
//! the balanced left/right volumes before it is added to the mix.

/// Fixed-point unity for volumes and fade gain
pub const VOLUME_ONE: i32 = 1 << 10;

/// How balance is turned into left/right gains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panning {
    /// A single chip: both sides at full volume
    Mono,
    /// `1 - b` and `b`; keeps a fake-stereo pair mono-compatible
    Linear,
    /// `sqrt(2(1 - b))` and `sqrt(2b)`: constant power across the field
    EqualPower,
}

impl Panning {
    /// Left and right gains for `volume` at `balance` (0 = left, 1 = right)
    pub fn gains(self, volume: i32, balance: f32) -> (i32, i32) {
        let balance = balance.clamp(0.0, 1.0);
        let (left, right) = match self {
            Panning::Mono => return (volume, volume),
            Panning::Linear => (1.0 - balance, balance),
            Panning::EqualPower => ((2.0 * (1.0 - balance)).sqrt(), (2.0 * balance).sqrt()),
        };
        (
            (volume as f32 * left) as i32,
            (volume as f32 * right) as i32,
        )
    }
}

/// Fixed-point gain for a level in dB
///
/// One decibel step is a twelfth of a decade, matching the hardware players'
/// volume sliders.
pub fn volume_from_db(db: f32) -> i32 {
    (10f64.powf(db as f64 / 12.0) * VOLUME_ONE as f64) as i32
}

/// Ring of past samples
#[derive(Debug, Clone, Default)]
pub struct DelayLine {
    buffer: Vec<i32>,
    position: usize,
}

impl DelayLine {
    /// Delay by `cycles` samples; zero passes samples straight through
    pub fn new(cycles: usize) -> Self {
        DelayLine {
            buffer: vec![0; cycles],
            position: 0,
        }
    }

    /// Delay in samples
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True when samples pass straight through
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Push `sample`, return the one pushed `len()` samples ago
    #[inline]
    pub fn process(&mut self, sample: i32) -> i32 {
        if self.buffer.is_empty() {
            return sample;
        }
        let delayed = std::mem::replace(&mut self.buffer[self.position], sample);
        self.position += 1;
        if self.position == self.buffer.len() {
            self.position = 0;
        }
        delayed
    }

    /// Forget the held samples
    pub fn clear(&mut self) {
        self.buffer.fill(0);
        self.position = 0;
    }
}

/// Linear gain ramp measured in cycles
#[derive(Debug, Clone)]
pub struct Fade {
    gain: i32,
    target: i32,
    step_cycles: u64,
    countdown: u64,
}

impl Default for Fade {
    fn default() -> Self {
        Fade {
            gain: VOLUME_ONE,
            target: VOLUME_ONE,
            step_cycles: 1,
            countdown: 1,
        }
    }
}

impl Fade {
    /// Ramp from silence to unity over `cycles`
    pub fn fade_in(&mut self, cycles: u64) {
        self.gain = 0;
        self.start(VOLUME_ONE, cycles);
    }

    /// Ramp from the current gain to silence over `cycles`
    ///
    /// A fade-out started from a partial gain still lasts `cycles`.
    pub fn fade_out(&mut self, cycles: u64) {
        self.start(0, cycles);
    }

    fn start(&mut self, target: i32, cycles: u64) {
        self.target = target;
        if cycles == 0 {
            self.gain = target;
        }
        // spread the remaining distance, not a full 0..1024 ramp, over `cycles`
        let distance = (target - self.gain).unsigned_abs().max(1) as u64;
        self.step_cycles = (cycles / distance).max(1);
        self.countdown = self.step_cycles;
    }

    /// Current gain, 0..=1024
    pub fn gain(&self) -> i32 {
        self.gain
    }

    /// True while the gain is still moving
    pub fn is_active(&self) -> bool {
        self.gain != self.target
    }

    /// Advance one cycle and return the gain for it
    #[inline]
    pub fn clock(&mut self) -> i32 {
        if self.gain != self.target {
            self.countdown -= 1;
            if self.countdown == 0 {
                self.countdown = self.step_cycles;
                self.gain += (self.target - self.gain).signum();
            }
        }
        self.gain
    }

    /// Back to unity gain
    pub fn reset(&mut self) {
        *self = Fade::default();
    }
}

/// Delay, fade and balanced volume of one chip
#[derive(Debug, Clone, Default)]
pub struct SampleMixer {
    volume_left: i32,
    volume_right: i32,
    delay: DelayLine,
    fade: Fade,
}

impl SampleMixer {
    /// Unity volume on both sides, no delay, no fade
    pub fn new() -> Self {
        SampleMixer {
            volume_left: VOLUME_ONE,
            volume_right: VOLUME_ONE,
            ..SampleMixer::default()
        }
    }

    /// Set the balanced left and right gains (1024 = unity)
    pub fn set_volume(&mut self, left: i32, right: i32) {
        self.volume_left = left;
        self.volume_right = right;
    }

    /// Balanced left and right gains
    pub fn volume(&self) -> (i32, i32) {
        (self.volume_left, self.volume_right)
    }

    /// Delay in cycles; the held samples are dropped when it changes
    pub fn set_delay(&mut self, cycles: usize) {
        if cycles != self.delay.len() {
            self.delay = DelayLine::new(cycles);
        }
    }

    /// Delay in cycles
    pub fn delay(&self) -> usize {
        self.delay.len()
    }

    /// Fade gain state
    pub fn fade(&self) -> &Fade {
        &self.fade
    }

    /// Start a fade-in lasting `cycles`
    pub fn fade_in(&mut self, cycles: u64) {
        self.fade.fade_in(cycles);
    }

    /// Start a fade-out lasting `cycles`
    pub fn fade_out(&mut self, cycles: u64) {
        self.fade.fade_out(cycles);
    }

    /// Left and right contributions of one cycle sample, scaled by 1024
    #[inline]
    pub fn process(&mut self, sample: i32) -> (i64, i64) {
        let sample = self.delay.process(sample) as i64;
        let gain = self.fade.clock() as i64;
        (
            (sample * self.volume_left as i64 * gain) >> 10,
            (sample * self.volume_right as i64 * gain) >> 10,
        )
    }

    /// Clear the delay line and stop any fade
    pub fn reset(&mut self) {
        self.delay.clear();
        self.fade.reset();
    }
}

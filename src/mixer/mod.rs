//! SID Mixer
//!
//! Owns every chip slot and turns their per-cycle output into host audio.
//! A single scheduler event ("MixerAudio") fires every `buffer_size` cycles:
//! it clocks each chip to the present, sums the balanced contributions of all
//! chips per cycle, optionally boxcar-averages `2^n` cycles for fast forward,
//! resamples to the output rate, dithers and hands interleaved s16le frames to
//! the [`AudioDriver`].
//!
//! Register accesses go through the mixer so each chip is clocked up to the
//! access time first; the samples produced on the way land in the same cycle
//! buffers the event drains.

mod dither;
mod sample_mixer;

pub use dither::TriangularDither;
pub use sample_mixer::{volume_from_db, DelayLine, Fade, Panning, SampleMixer, VOLUME_ONE};

use crate::audio::AudioDriver;
use crate::config::{SidConfig, MAX_DELAY_MS, VOLUME_RANGE_DB};
use crate::event::{EventContext, EventId, EventScheduler, Phase};
use crate::resample::{create_resampler, Resample, Resampler};
use crate::sid::Sid;
use crate::{Result, SidError};
use tracing::{debug, trace};

/// Highest fast-forward shift (32x)
pub const MAX_FAST_FORWARD: u32 = 5;

/// Name of the mixer's scheduler event
pub const MIXER_EVENT: &str = "MixerAudio";

/// One mixer input
#[derive(Debug)]
struct ChipSlot {
    sid: Sid,
    mixer: SampleMixer,
    volume_db: f32,
    balance: f32,
    delay_ms: u32,
    /// Cycle the chip has been clocked up to
    last_clocked: u64,
}

/// Per-cycle left/right sums of all chips since the last mixer event
#[derive(Debug, Default)]
struct CycleBuffers {
    left: Vec<i64>,
    right: Vec<i64>,
}

impl CycleBuffers {
    fn with_capacity(cycles: usize) -> Self {
        CycleBuffers {
            left: vec![0; cycles],
            right: vec![0; cycles],
        }
    }

    fn ensure(&mut self, cycles: usize) {
        if self.left.len() < cycles {
            self.left.resize(cycles, 0);
            self.right.resize(cycles, 0);
        }
    }

    fn clear(&mut self, cycles: usize) {
        let cycles = cycles.min(self.left.len());
        self.left[..cycles].fill(0);
        self.right[..cycles].fill(0);
    }
}

/// Clock one slot up to `now`
///
/// With buffers, every cycle sample is added at its offset from `mix_time`;
/// without, the samples are dropped (mixer stopped).
fn clock_slot(
    slot: &mut ChipSlot,
    buffers: Option<&mut CycleBuffers>,
    mix_time: u64,
    now: u64,
) -> Result<()> {
    if now < slot.last_clocked {
        return Err(SidError::TimeSkew {
            last: slot.last_clocked,
            now,
        });
    }
    let mut remaining = now - slot.last_clocked;
    let mut pos = slot.last_clocked.saturating_sub(mix_time) as usize;
    let ChipSlot { sid, mixer, .. } = &mut *slot;
    match buffers {
        Some(buffers) => {
            buffers.ensure(pos + remaining as usize);
            while remaining > 0 {
                let cycles = remaining.min(u32::MAX as u64) as u32;
                sid.clock(cycles, |sample| {
                    let (left, right) = mixer.process(sample);
                    buffers.left[pos] += left;
                    buffers.right[pos] += right;
                    pos += 1;
                });
                remaining -= cycles as u64;
            }
        }
        None => {
            while remaining > 0 {
                let cycles = remaining.min(u32::MAX as u64) as u32;
                sid.clock(cycles, |_| {});
                remaining -= cycles as u64;
            }
        }
    }
    slot.last_clocked = now;
    Ok(())
}

/// Delay in cycles for a delay in milliseconds
fn delay_cycles(clock_frequency: f64, delay_ms: u32) -> usize {
    (clock_frequency / 1000.0 * delay_ms as f64) as usize
}

/// N-chip mixer driven by the event scheduler
pub struct SidMixer<D: AudioDriver> {
    event: EventId,
    running: bool,
    clock_frequency: f64,
    config: SidConfig,
    slots: Vec<Option<ChipSlot>>,
    fake_stereo: bool,

    buffers: CycleBuffers,
    buffer_size: usize,
    /// Cycle the cycle buffers start at
    mix_time: u64,

    fast_forward: u32,
    ff_left: i64,
    ff_right: i64,
    ff_count: u32,

    resampler_left: Resampler,
    resampler_right: Resampler,
    dither: TriangularDither,

    channels: u16,
    output: Vec<u8>,
    output_capacity: usize,
    driver: D,
}

impl<D: AudioDriver> SidMixer<D> {
    /// Build a mixer for a validated configuration
    ///
    /// Registers the mixer event with `scheduler` and builds both resamplers.
    /// Chips are added separately with [`SidMixer::add`].
    pub fn new(scheduler: &mut EventScheduler, config: &SidConfig, driver: D) -> Result<Self> {
        config.validate()?;
        let audio = &config.audio;
        let clock_frequency = config.clock.frequency();
        let rate = audio.sampling_rate.frequency() as f64;
        let pass = audio.sampling_rate.middle_frequency() as f64;
        let resampler_left = create_resampler(clock_frequency, audio.sampling_method, rate, pass)?;
        let resampler_right = resampler_left.clone();
        debug!(
            method = %audio.sampling_method,
            rate,
            clock = clock_frequency,
            channels = audio.channels,
            "mixer resamplers built"
        );

        let output_capacity = audio.output_buffer_frames * audio.channels as usize * 2;
        Ok(SidMixer {
            event: scheduler.register(MIXER_EVENT),
            running: false,
            clock_frequency,
            config: config.clone(),
            slots: Vec::new(),
            fake_stereo: config.fake_stereo.is_some(),
            buffers: CycleBuffers::with_capacity(audio.buffer_size),
            buffer_size: audio.buffer_size,
            mix_time: 0,
            fast_forward: 0,
            ff_left: 0,
            ff_right: 0,
            ff_count: 0,
            resampler_left,
            resampler_right,
            dither: TriangularDither::new(audio.dither_seed),
            channels: audio.channels,
            output: Vec::with_capacity(output_capacity),
            output_capacity,
            driver,
        })
    }

    /// Handle of the mixer event
    pub fn event_id(&self) -> EventId {
        self.event
    }

    /// True between [`SidMixer::start`] and [`SidMixer::stop`]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Configuration the mixer was built from
    pub fn config(&self) -> &SidConfig {
        &self.config
    }

    /// Put a chip in slot `sid_num`, returning the chip it replaces
    ///
    /// Volume, balance and delay come from the configured slot of the same
    /// number, or the defaults if the configuration has fewer slots. The chip
    /// starts at the current mix position.
    pub fn add(&mut self, sid_num: usize, mut sid: Sid) -> Option<Sid> {
        sid.set_clock_frequency(self.clock_frequency);
        let settings = self.config.chips.get(sid_num).cloned().unwrap_or_default();
        let slot = ChipSlot {
            sid,
            mixer: SampleMixer::new(),
            volume_db: settings.volume_db,
            balance: settings.balance,
            delay_ms: settings.delay_ms,
            last_clocked: self.mix_time,
        };
        if self.slots.len() <= sid_num {
            self.slots.resize_with(sid_num + 1, || None);
        }
        let replaced = self.slots[sid_num].replace(slot).map(|old| old.sid);
        debug!(sid_num, replaced = replaced.is_some(), "chip added to mixer");
        self.update_volumes();
        replaced
    }

    /// Take the chip out of slot `sid_num`
    pub fn remove(&mut self, sid_num: usize) -> Option<Sid> {
        let removed = self.slots.get_mut(sid_num)?.take()?;
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        debug!(sid_num, "chip removed from mixer");
        self.update_volumes();
        Some(removed.sid)
    }

    /// Number of occupied slots
    pub fn chip_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Chip in slot `sid_num`
    pub fn chip(&self, sid_num: usize) -> Option<&Sid> {
        self.slots.get(sid_num)?.as_ref().map(|slot| &slot.sid)
    }

    /// Mutable chip in slot `sid_num`
    ///
    /// The chip is not clocked to the present first; use
    /// [`SidMixer::write`] for register writes.
    pub fn chip_mut(&mut self, sid_num: usize) -> Option<&mut Sid> {
        self.slots.get_mut(sid_num)?.as_mut().map(|slot| &mut slot.sid)
    }

    /// Per-chip sample path of slot `sid_num`
    pub fn sample_mixer(&self, sid_num: usize) -> Option<&SampleMixer> {
        self.slots.get(sid_num)?.as_ref().map(|slot| &slot.mixer)
    }

    fn slot_mut(&mut self, sid_num: usize) -> Result<&mut ChipSlot> {
        self.slots
            .get_mut(sid_num)
            .and_then(Option::as_mut)
            .ok_or(SidError::NoSuchChip(sid_num))
    }

    /// Arm the mixer event at the current cycle, PHI2
    ///
    /// Chips are first brought to the present with their output dropped, so
    /// mixing starts with aligned, empty buffers.
    pub fn start(&mut self, scheduler: &mut EventScheduler) -> Result<()> {
        let now = scheduler.time(Phase::Phi2);
        for slot in self.slots.iter_mut().flatten() {
            clock_slot(slot, None, self.mix_time, now)?;
        }
        self.buffers.clear(self.buffers.left.len());
        self.mix_time = now;
        self.running = true;
        scheduler.schedule(self.event, 0, Phase::Phi2);
        debug!(cycle = now, "mixer started");
        Ok(())
    }

    /// Cancel the mixer event
    pub fn stop(&mut self, scheduler: &mut EventScheduler) {
        scheduler.cancel(self.event);
        self.running = false;
        debug!("mixer stopped");
    }

    /// Clock every chip up to the scheduler's present
    pub fn clock_chips(&mut self, scheduler: &EventScheduler) -> Result<()> {
        let now = scheduler.time(Phase::Phi2);
        let running = self.running;
        for slot in self.slots.iter_mut().flatten() {
            let buffers = running.then_some(&mut self.buffers);
            clock_slot(slot, buffers, self.mix_time, now)?;
        }
        Ok(())
    }

    fn clock_to_now(&mut self, scheduler: &EventScheduler, sid_num: usize) -> Result<&mut ChipSlot> {
        let now = scheduler.time(Phase::Phi2);
        let mix_time = self.mix_time;
        let running = self.running;
        let slot = self
            .slots
            .get_mut(sid_num)
            .and_then(Option::as_mut)
            .ok_or(SidError::NoSuchChip(sid_num))?;
        let buffers = running.then_some(&mut self.buffers);
        clock_slot(slot, buffers, mix_time, now)?;
        Ok(slot)
    }

    /// Read a register of slot `sid_num` at the scheduler's present
    pub fn read(&mut self, scheduler: &EventScheduler, sid_num: usize, addr: u8) -> Result<u8> {
        let slot = self.clock_to_now(scheduler, sid_num)?;
        Ok(slot.sid.read(addr))
    }

    /// Write a register of slot `sid_num` at the scheduler's present
    pub fn write(
        &mut self,
        scheduler: &EventScheduler,
        sid_num: usize,
        addr: u8,
        value: u8,
    ) -> Result<()> {
        let slot = self.clock_to_now(scheduler, sid_num)?;
        slot.sid.write(addr, value);
        Ok(())
    }

    /// Set the volume of slot `sid_num` in dB (-6..6)
    pub fn set_volume(&mut self, sid_num: usize, volume_db: f32) -> Result<()> {
        if !VOLUME_RANGE_DB.contains(&volume_db) {
            return Err(SidError::Config(format!(
                "volume {volume_db} dB outside -6..6"
            )));
        }
        self.slot_mut(sid_num)?.volume_db = volume_db;
        self.update_volumes();
        Ok(())
    }

    /// Set the balance of slot `sid_num` (0 = left, 0.5 = centre, 1 = right)
    pub fn set_balance(&mut self, sid_num: usize, balance: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&balance) {
            return Err(SidError::Config(format!("balance {balance} outside 0..1")));
        }
        self.slot_mut(sid_num)?.balance = balance;
        self.update_volumes();
        Ok(())
    }

    /// Set the delay of slot `sid_num` in milliseconds (0..100)
    pub fn set_delay(&mut self, sid_num: usize, delay_ms: u32) -> Result<()> {
        if delay_ms > MAX_DELAY_MS {
            return Err(SidError::Config(format!(
                "delay {delay_ms} ms exceeds {MAX_DELAY_MS} ms"
            )));
        }
        self.slot_mut(sid_num)?.delay_ms = delay_ms;
        self.update_volumes();
        Ok(())
    }

    /// Switch linear (fake-stereo) panning on or off
    pub fn set_fake_stereo(&mut self, enable: bool) {
        self.fake_stereo = enable;
        self.update_volumes();
    }

    /// True when fake-stereo panning is active
    pub fn is_fake_stereo(&self) -> bool {
        self.fake_stereo
    }

    /// Panning law for the current chip count
    pub fn panning(&self) -> Panning {
        match (self.chip_count(), self.fake_stereo) {
            (0 | 1, _) => Panning::Mono,
            (_, true) => Panning::Linear,
            (_, false) => Panning::EqualPower,
        }
    }

    fn update_volumes(&mut self) {
        let panning = self.panning();
        let clock_frequency = self.clock_frequency;
        for slot in self.slots.iter_mut().flatten() {
            let (left, right) = panning.gains(volume_from_db(slot.volume_db), slot.balance);
            slot.mixer.set_volume(left, right);
            let delay = match panning {
                Panning::Mono => 0,
                _ => delay_cycles(clock_frequency, slot.delay_ms),
            };
            slot.mixer.set_delay(delay);
        }
        trace!(?panning, chips = self.chip_count(), "mixer volumes updated");
    }

    /// Ramp every chip up from silence over `seconds`
    pub fn fade_in(&mut self, seconds: f32) {
        let cycles = (seconds.max(0.0) as f64 * self.clock_frequency) as u64;
        for slot in self.slots.iter_mut().flatten() {
            slot.mixer.fade_in(cycles);
        }
        debug!(seconds, cycles, "fade in");
    }

    /// Ramp every chip down to silence over `seconds`
    pub fn fade_out(&mut self, seconds: f32) {
        let cycles = (seconds.max(0.0) as f64 * self.clock_frequency) as u64;
        for slot in self.slots.iter_mut().flatten() {
            slot.mixer.fade_out(cycles);
        }
        debug!(seconds, cycles, "fade out");
    }

    /// Double the playback speed; false once the maximum is reached
    pub fn fast_forward(&mut self) -> bool {
        if self.fast_forward >= MAX_FAST_FORWARD {
            return false;
        }
        self.fast_forward += 1;
        self.clear_fast_forward();
        debug!(factor = 1u32 << self.fast_forward, "fast forward");
        true
    }

    /// Back to normal speed
    pub fn normal_speed(&mut self) {
        if self.fast_forward != 0 {
            debug!("normal speed");
        }
        self.fast_forward = 0;
        self.clear_fast_forward();
    }

    /// True while the fast-forward shift is non-zero
    pub fn is_fast_forward(&self) -> bool {
        self.fast_forward != 0
    }

    /// Current fast-forward shift
    pub fn fast_forward_shift(&self) -> u32 {
        self.fast_forward
    }

    fn clear_fast_forward(&mut self) {
        self.ff_left = 0;
        self.ff_right = 0;
        self.ff_count = 0;
    }

    /// Audio driver
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Mutable audio driver
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Hand any partial output buffer to the driver and return it
    pub fn into_driver(mut self) -> Result<D> {
        self.flush()?;
        Ok(self.driver)
    }

    /// Hand any partial output buffer to the driver
    pub fn flush(&mut self) -> Result<()> {
        if !self.output.is_empty() {
            self.driver.write(&self.output)?;
            self.output.clear();
        }
        Ok(())
    }

    fn mix(&mut self, scheduler: &mut EventScheduler) -> Result<()> {
        let now = scheduler.time(Phase::Phi2);
        for slot in self.slots.iter_mut().flatten() {
            clock_slot(slot, Some(&mut self.buffers), self.mix_time, now)?;
        }

        let cycles = if self.chip_count() == 0 {
            0
        } else {
            now.saturating_sub(self.mix_time) as usize
        };
        self.buffers.ensure(cycles);

        let shift = self.fast_forward;
        let block = 1u32 << shift;
        for pos in 0..cycles {
            self.ff_left += self.buffers.left[pos];
            self.ff_right += self.buffers.right[pos];
            self.ff_count += 1;
            if self.ff_count == block {
                let left = (self.ff_left >> (10 + shift)) as i32;
                let right = (self.ff_right >> (10 + shift)) as i32;
                self.clear_fast_forward();
                self.output_frame(left, right)?;
            }
        }

        self.buffers.clear(cycles);
        self.mix_time = now;
        scheduler.schedule(self.event, self.buffer_size as u64, Phase::Phi2);
        Ok(())
    }

    #[inline]
    fn output_frame(&mut self, left: i32, right: i32) -> Result<()> {
        if self.channels == 1 {
            if !self.resampler_left.input((left + right) >> 1) {
                return Ok(());
            }
            let dither = self.dither.next_value();
            push_sample(&mut self.output, self.resampler_left.output() + dither);
        } else {
            let ready = self.resampler_left.input(left);
            self.resampler_right.input(right);
            if !ready {
                return Ok(());
            }
            let dither = self.dither.next_value();
            push_sample(&mut self.output, self.resampler_left.output() + dither);
            push_sample(&mut self.output, self.resampler_right.output() + dither);
        }

        if self.output.len() >= self.output_capacity {
            self.driver.write(&self.output)?;
            self.output.clear();
        }
        Ok(())
    }
}

#[inline]
fn push_sample(output: &mut Vec<u8>, value: i32) {
    let sample = value.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
    output.extend_from_slice(&sample.to_le_bytes());
}

impl<D: AudioDriver> EventContext for SidMixer<D> {
    fn handle_event(&mut self, scheduler: &mut EventScheduler, event: EventId) -> Result<()> {
        if event != self.event {
            return Err(SidError::Scheduler(format!(
                "mixer received foreign event '{}'",
                scheduler.name(event)
            )));
        }
        self.mix(scheduler)
    }
}

impl<D: AudioDriver> std::fmt::Debug for SidMixer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidMixer")
            .field("running", &self.running)
            .field("chips", &self.chip_count())
            .field("mix_time", &self.mix_time)
            .field("fast_forward", &self.fast_forward)
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::BufferDriver;
    use crate::config::{ChipConfig, SamplingMethod};
    use crate::sid::ChipModel;

    /// 440 Hz at the PAL clock
    const A4: u16 = 7493;

    fn config(channels: u16, chips: usize) -> SidConfig {
        let mut config = SidConfig::default();
        config.audio.channels = channels;
        config.chips = (0..chips).map(|_| ChipConfig::default()).collect();
        config
    }

    fn build(config: &SidConfig) -> (EventScheduler, SidMixer<BufferDriver>) {
        let mut scheduler = EventScheduler::new();
        let driver = BufferDriver::new(config.audio.channels);
        let mut mixer = SidMixer::new(&mut scheduler, config, driver).unwrap();
        for (slot, chip) in config.chips.iter().enumerate() {
            mixer.add(slot, chip.build(config.clock).unwrap());
        }
        (scheduler, mixer)
    }

    fn play(mixer: &mut SidMixer<BufferDriver>, scheduler: &EventScheduler, sid_num: usize) {
        let writes = [
            (0x00, A4 as u8),
            (0x01, (A4 >> 8) as u8),
            (0x05, 0x22),
            (0x06, 0xF8),
            (0x18, 0x0F),
            (0x04, 0x11),
        ];
        for (addr, value) in writes {
            mixer.write(scheduler, sid_num, addr, value).unwrap();
        }
    }

    fn render(config: &SidConfig, cycles: u64, ff: u32) -> BufferDriver {
        let (mut scheduler, mut mixer) = build(config);
        mixer.start(&mut scheduler).unwrap();
        for _ in 0..ff {
            mixer.fast_forward();
        }
        play(&mut mixer, &scheduler, 0);
        scheduler.run_until(cycles, &mut mixer).unwrap();
        mixer.into_driver().unwrap()
    }

    fn rising_crossings(samples: &[i16]) -> usize {
        samples.windows(2).filter(|w| w[0] < 0 && w[1] >= 0).count()
    }

    #[test]
    fn test_end_to_end_tone() {
        let mut config = config(1, 1);
        config.chips[0].filter = false;
        let driver = render(&config, 1_000_000, 0);
        let samples = driver.samples();
        assert!(samples.len() > 44_000, "frames {}", samples.len());
        assert!(driver.rms() > 500.0, "rms {}", driver.rms());

        // last half second, after the attack and the DC blocker settled
        let tail = &samples[samples.len() - 22_050..];
        let crossings = rising_crossings(tail);
        assert!((215..=225).contains(&crossings), "crossings {crossings}");
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let mut config = config(2, 1);
        config.audio.sampling_method = SamplingMethod::Decimate;
        config.audio.dither_seed = 1234;
        let first = render(&config, 200_000, 0);
        let second = render(&config, 200_000, 0);
        assert!(!first.bytes().is_empty());
        assert_eq!(first.bytes(), second.bytes());
    }

    #[test]
    fn test_fast_forward_divides_frame_count() {
        let config = config(1, 1);
        let normal = render(&config, 1_000_000, 0).frames_written() as i64;
        let fast = render(&config, 1_000_000, 3).frames_written() as i64;
        assert!((fast - normal / 8).abs() <= 2, "normal {normal}, fast {fast}");
    }

    #[test]
    fn test_fast_forward_limits() {
        let (_, mut mixer) = build(&config(2, 1));
        assert!(!mixer.is_fast_forward());
        for _ in 0..MAX_FAST_FORWARD {
            assert!(mixer.fast_forward());
        }
        assert!(!mixer.fast_forward());
        assert_eq!(mixer.fast_forward_shift(), MAX_FAST_FORWARD);
        mixer.normal_speed();
        assert!(!mixer.is_fast_forward());
    }

    #[test]
    fn test_balance_hard_left() {
        let mut config = config(2, 2);
        config.chips[0].balance = 0.0;
        config.chips[1].balance = 1.0;
        let (mut scheduler, mut mixer) = build(&config);
        assert_eq!(mixer.panning(), Panning::EqualPower);
        mixer.start(&mut scheduler).unwrap();
        play(&mut mixer, &scheduler, 0);
        scheduler.run_until(300_000, &mut mixer).unwrap();
        let driver = mixer.into_driver().unwrap();

        let left = driver.channel(0);
        let right = driver.channel(1);
        assert!(left.iter().any(|s| s.abs() > 1_000));
        assert!(right.iter().all(|s| s.abs() <= 1));
    }

    fn render_three_chips(remove_at: Option<u64>) -> BufferDriver {
        let (mut scheduler, mut mixer) = build(&config(2, 3));
        mixer.start(&mut scheduler).unwrap();
        play(&mut mixer, &scheduler, 0);
        // slot 1 runs a gated sawtooth at master volume 0
        for (addr, value) in [(0x01, 0x30), (0x06, 0xF0), (0x04, 0x21)] {
            mixer.write(&scheduler, 1, addr, value).unwrap();
        }
        // slot 2: pulse an octave below slot 0
        for (addr, value) in [
            (0x00, (A4 / 2) as u8),
            (0x01, ((A4 / 2) >> 8) as u8),
            (0x03, 0x08),
            (0x06, 0xF0),
            (0x18, 0x0F),
            (0x04, 0x41),
        ] {
            mixer.write(&scheduler, 2, addr, value).unwrap();
        }

        if let Some(cycle) = remove_at {
            scheduler.run_until(cycle, &mut mixer).unwrap();
            // buffer the window so far for every chip before the removal
            mixer.clock_chips(&scheduler).unwrap();
            assert!(mixer.remove(1).is_some());
            // an interior hole stays in place
            assert_eq!(mixer.slots.len(), 3);
            assert_eq!(mixer.chip_count(), 2);
            assert_eq!(mixer.panning(), Panning::EqualPower);
        }
        scheduler.run_until(300_000, &mut mixer).unwrap();

        if remove_at.is_some() {
            assert!(mixer.remove(2).is_some());
            assert_eq!(mixer.slots.len(), 1);
            assert!(mixer.chip(0).is_some());
        }
        mixer.into_driver().unwrap()
    }

    #[test]
    fn test_removing_a_chip_keeps_others_in_flight() {
        // 102_000 lies inside a mix window (events fire every 4096 cycles)
        let removed = render_three_chips(Some(102_000));
        let kept = render_three_chips(None);
        assert!(removed.rms() > 500.0, "rms {}", removed.rms());
        assert_eq!(removed.frames_written(), kept.frames_written());
        // the silent chip contributed nothing, so nothing may change
        assert_eq!(removed.bytes(), kept.bytes());
    }

    #[test]
    fn test_single_chip_is_mono_without_delay() {
        let mut config = config(2, 2);
        config.chips[0].delay_ms = 10;
        config.chips[1].delay_ms = 20;
        let (_, mut mixer) = build(&config);
        let clock = config.clock.frequency();
        assert_eq!(mixer.sample_mixer(0).unwrap().delay(), delay_cycles(clock, 10));
        assert_eq!(mixer.sample_mixer(1).unwrap().delay(), delay_cycles(clock, 20));

        assert!(mixer.remove(1).is_some());
        assert_eq!(mixer.chip_count(), 1);
        assert_eq!(mixer.panning(), Panning::Mono);
        assert_eq!(mixer.sample_mixer(0).unwrap().delay(), 0);
        assert_eq!(mixer.sample_mixer(0).unwrap().volume(), (1024, 1024));
        assert!(mixer.remove(1).is_none());
    }

    #[test]
    fn test_fake_stereo_uses_linear_panning() {
        let (_, mut mixer) = build(&config(2, 2));
        mixer.set_fake_stereo(true);
        assert_eq!(mixer.panning(), Panning::Linear);
        assert_eq!(mixer.sample_mixer(0).unwrap().volume(), (512, 512));
    }

    #[test]
    fn test_setters_validate_ranges() {
        let (_, mut mixer) = build(&config(2, 2));
        assert!(mixer.set_volume(0, 7.0).is_err());
        assert!(mixer.set_balance(0, 1.5).is_err());
        assert!(mixer.set_delay(0, 101).is_err());
        mixer.set_volume(1, 6.0).unwrap();
        mixer.set_balance(1, 0.0).unwrap();
        let (left, right) = mixer.sample_mixer(1).unwrap().volume();
        assert!(left > 1024);
        assert_eq!(right, 0);
        assert!(matches!(mixer.set_volume(5, 0.0), Err(SidError::NoSuchChip(5))));
    }

    #[test]
    fn test_missing_chip_is_an_error() {
        let (scheduler, mut mixer) = build(&config(2, 1));
        assert!(matches!(
            mixer.write(&scheduler, 3, 0x18, 0x0F),
            Err(SidError::NoSuchChip(3))
        ));
        assert!(matches!(mixer.read(&scheduler, 1, 0x1B), Err(SidError::NoSuchChip(1))));
    }

    #[test]
    fn test_clocking_backwards_is_time_skew() {
        let (mut scheduler, mut mixer) = build(&config(2, 1));
        scheduler.run_until(1_000, &mut mixer).unwrap();
        mixer.write(&scheduler, 0, 0x18, 0x0F).unwrap();

        let earlier = EventScheduler::new();
        match mixer.write(&earlier, 0, 0x18, 0x00) {
            Err(SidError::TimeSkew { last, now }) => {
                assert_eq!(last, 1_000);
                assert_eq!(now, 0);
            }
            other => panic!("expected time skew, got {other:?}"),
        }
    }

    #[test]
    fn test_fade_out_ends_in_silence() {
        let config = config(1, 1);
        let (mut scheduler, mut mixer) = build(&config);
        mixer.start(&mut scheduler).unwrap();
        play(&mut mixer, &scheduler, 0);
        mixer.fade_out(0.05);
        scheduler.run_until(300_000, &mut mixer).unwrap();
        let samples = mixer.into_driver().unwrap().samples();

        assert!(samples[..2_205].iter().any(|s| s.abs() > 100));
        let tail = &samples[samples.len() - 5_000..];
        assert!(tail.iter().all(|s| s.abs() <= 1));
    }

    #[test]
    fn test_fade_in_starts_silent() {
        let config = config(1, 1);
        let (mut scheduler, mut mixer) = build(&config);
        mixer.start(&mut scheduler).unwrap();
        play(&mut mixer, &scheduler, 0);
        mixer.fade_in(1.0);
        assert_eq!(mixer.sample_mixer(0).unwrap().fade().gain(), 0);
        scheduler.run_until(100_000, &mut mixer).unwrap();
        let gain = mixer.sample_mixer(0).unwrap().fade().gain();
        assert!(gain > 0 && gain < 1024, "gain {gain}");
    }

    #[test]
    fn test_replacing_a_chip_returns_old_one() {
        let (_, mut mixer) = build(&config(2, 1));
        let old = mixer.add(0, Sid::new(ChipModel::Mos8580));
        assert_eq!(old.map(|sid| sid.chip_model()), Some(ChipModel::Mos6581));
        assert_eq!(mixer.chip(0).unwrap().chip_model(), ChipModel::Mos8580);
        assert_eq!(mixer.chip_count(), 1);
    }

    #[test]
    fn test_stopped_mixer_produces_nothing() {
        let (mut scheduler, mut mixer) = build(&config(2, 1));
        mixer.start(&mut scheduler).unwrap();
        mixer.stop(&mut scheduler);
        assert!(!scheduler.is_pending(mixer.event_id()));
        play(&mut mixer, &scheduler, 0);
        scheduler.run_until(100_000, &mut mixer).unwrap();
        mixer.write(&scheduler, 0, 0x18, 0x00).unwrap();
        assert_eq!(mixer.into_driver().unwrap().frames_written(), 0);
    }

    #[test]
    fn test_foreign_event_is_rejected() {
        let (mut scheduler, mut mixer) = build(&config(2, 1));
        let other = scheduler.register("Other");
        scheduler.schedule(other, 0, Phase::Phi1);
        assert!(matches!(
            scheduler.run_until(10, &mut mixer),
            Err(SidError::Scheduler(_))
        ));
    }

    #[test]
    fn test_driver_receives_full_buffers() {
        let mut config = config(2, 1);
        config.audio.output_buffer_frames = 256;
        let driver = render(&config, 200_000, 0);
        // every write but the final flush is a full buffer
        assert!(driver.writes() > 1);
        assert_eq!(driver.frames_written() as usize / 256, driver.writes() - 1);
    }
}

//! mos-sid command line player
//!
//! Renders either a built-in arpeggio or a CSV register-write log through
//! the emulator, to a WAV file or (with the `streaming` feature) to the
//! speakers.

use anyhow::{anyhow, bail, Context, Result};
use mos_sid::audio::AudioDriver;
use mos_sid::write_log::{WriteLog, WriteLogPlayer};
use mos_sid::{
    ChipModel, EventContext, EventId, EventScheduler, FakeStereo, Phase, SamplingMethod,
    SamplingRate, SidConfig, SidMixer,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Demo length without `--seconds`
const DEFAULT_SECONDS: f64 = 10.0;

/// Silence rendered after the last logged write
const LOG_TAIL_SECONDS: f64 = 1.0;

const USAGE: &str = "\
Usage:
  mos-sid [options]

Options:
  --model <6581|8580>        Chip revision for every slot
  --rate <hz>                8000, 44100, 48000 or 96000
  --method <decimate|resample>
  --seconds <n>              Length to render
  --config <file.json>       Emulator configuration
  --log <writes.csv>         Replay a register write log (cycle,chip,addr,value)
  --wav <out.wav>            Write a WAV file (default mos-sid.wav)
  --play                     Play through the default audio device
  --fast-forward <0..5>      Render 2^n times faster
  -h, --help                 Show this help

Without --log a built-in arpeggio is played.
Set RUST_LOG=debug for emulator diagnostics.
";

#[derive(Debug, Default)]
struct Options {
    model: Option<ChipModel>,
    rate: Option<SamplingRate>,
    method: Option<SamplingMethod>,
    seconds: Option<f64>,
    config: Option<PathBuf>,
    log: Option<PathBuf>,
    wav: Option<PathBuf>,
    play: bool,
    fast_forward: u32,
}

/// Parse arguments; `None` when help was requested
fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Option<Options>> {
    let mut options = Options::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value.to_string())),
            _ => (arg.clone(), None),
        };
        let mut value = || {
            inline
                .clone()
                .or_else(|| args.next())
                .ok_or_else(|| anyhow!("{flag} requires a value"))
        };
        match flag.as_str() {
            "-h" | "--help" => return Ok(None),
            "--play" => options.play = true,
            "--model" => options.model = Some(value()?.parse()?),
            "--rate" => {
                let hz: u32 = value()?.parse().context("--rate expects a number")?;
                options.rate = Some(SamplingRate::try_from(hz)?);
            }
            "--method" => options.method = Some(value()?.parse()?),
            "--seconds" => {
                let seconds: f64 = value()?.parse().context("--seconds expects a number")?;
                if seconds.is_nan() || seconds <= 0.0 {
                    bail!("--seconds must be positive");
                }
                options.seconds = Some(seconds);
            }
            "--config" => options.config = Some(value()?.into()),
            "--log" => options.log = Some(value()?.into()),
            "--wav" => options.wav = Some(value()?.into()),
            "--fast-forward" => {
                options.fast_forward = value()?.parse().context("--fast-forward expects 0..5")?;
            }
            other => bail!("unknown argument '{other}'\n\n{USAGE}"),
        }
    }
    Ok(Some(options))
}

fn build_config(options: &Options) -> Result<SidConfig> {
    let mut config = match &options.config {
        Some(path) => SidConfig::load(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => SidConfig::default(),
    };
    if let Some(model) = options.model {
        for chip in &mut config.chips {
            chip.model = model;
        }
    }
    if let Some(rate) = options.rate {
        config.audio.sampling_rate = rate;
    }
    if let Some(method) = options.method {
        config.audio.sampling_method = method;
    }
    config.validate()?;
    Ok(config)
}

/// C major arpeggio on voice 1 over a triangle bass, with a filter sweep
struct Arpeggio {
    event: EventId,
    frame_cycles: u64,
    clock_frequency: f64,
    frame: u64,
}

impl Arpeggio {
    const NOTES: [f64; 4] = [261.63, 329.63, 392.00, 523.25];
    const BASS: [f64; 2] = [65.41, 98.00];
    const FRAMES_PER_NOTE: u64 = 6;

    fn new(scheduler: &mut EventScheduler, clock_frequency: f64) -> Self {
        Arpeggio {
            event: scheduler.register("Arpeggio"),
            frame_cycles: (clock_frequency / 50.0) as u64,
            clock_frequency,
            frame: 0,
        }
    }

    fn freq_register(&self, hz: f64) -> u16 {
        (hz * 16_777_216.0 / self.clock_frequency).round().min(65_535.0) as u16
    }

    /// Register writes for the next 50 Hz frame
    fn next_frame(&mut self) -> Vec<(u8, u8)> {
        let mut writes = Vec::new();
        if self.frame == 0 {
            writes.extend_from_slice(&[
                (0x02, 0x00),
                (0x03, 0x08),
                (0x05, 0x0A),
                (0x06, 0xA9),
                (0x0C, 0x08),
                (0x0D, 0xC8),
                (0x17, 0xF1),
                (0x18, 0x1F),
            ]);
        }
        if self.frame % Self::FRAMES_PER_NOTE == 0 {
            let step = (self.frame / Self::FRAMES_PER_NOTE) as usize;
            let note = self.freq_register(Self::NOTES[step % Self::NOTES.len()]);
            writes.extend_from_slice(&[
                (0x04, 0x40),
                (0x00, note as u8),
                (0x01, (note >> 8) as u8),
                (0x04, 0x41),
            ]);
            if step % Self::NOTES.len() == 0 {
                let bass = self.freq_register(Self::BASS[(step / Self::NOTES.len()) % 2]);
                writes.extend_from_slice(&[
                    (0x0B, 0x10),
                    (0x07, bass as u8),
                    (0x08, (bass >> 8) as u8),
                    (0x0B, 0x11),
                ]);
            }
        }
        // triangle sweep of the cutoff over 200 frames
        let phase = self.frame % 200;
        let sweep = if phase < 100 { phase } else { 200 - phase };
        writes.push((0x16, (0x10 + sweep * 2) as u8));
        self.frame += 1;
        writes
    }
}

enum Source {
    Demo(Arpeggio),
    Log(WriteLogPlayer),
}

/// Everything the scheduler drives
struct Session<D: AudioDriver> {
    mixer: SidMixer<D>,
    source: Source,
    fake_stereo: Option<FakeStereo>,
}

impl<D: AudioDriver> Session<D> {
    fn write(&mut self, scheduler: &EventScheduler, addr: u8, value: u8) -> mos_sid::Result<()> {
        match &self.fake_stereo {
            Some(pair) => pair.write(&mut self.mixer, scheduler, addr, value),
            None => self.mixer.write(scheduler, 0, addr, value),
        }
    }
}

impl<D: AudioDriver> EventContext for Session<D> {
    fn handle_event(&mut self, scheduler: &mut EventScheduler, event: EventId) -> mos_sid::Result<()> {
        if event == self.mixer.event_id() {
            return self.mixer.handle_event(scheduler, event);
        }
        match &mut self.source {
            Source::Demo(arpeggio) if event == arpeggio.event => {
                let writes = arpeggio.next_frame();
                let frame_cycles = arpeggio.frame_cycles;
                let event = arpeggio.event;
                for (addr, value) in writes {
                    self.write(scheduler, addr, value)?;
                }
                scheduler.schedule(event, frame_cycles, Phase::Phi2);
                Ok(())
            }
            Source::Log(player) if event == player.event_id() => {
                player.fire(scheduler, &mut self.mixer, self.fake_stereo.as_ref())
            }
            _ => Err(mos_sid::SidError::Scheduler(format!(
                "unexpected event '{}'",
                scheduler.name(event)
            ))),
        }
    }
}

/// Run the session for the requested length and hand back the driver
fn render<D: AudioDriver>(config: &SidConfig, options: &Options, driver: D) -> Result<D> {
    let mut scheduler = EventScheduler::new();
    let mut mixer = SidMixer::new(&mut scheduler, config, driver)?;
    for (slot, chip) in config.chips.iter().enumerate() {
        mixer.add(slot, chip.build(config.clock)?);
    }
    let fake_stereo = config.fake_stereo.as_ref().map(FakeStereo::from_config);
    if let Some(pair) = &fake_stereo {
        pair.attach(&mut mixer)?;
    }
    for _ in 0..options.fast_forward {
        if !mixer.fast_forward() {
            break;
        }
    }

    let clock_frequency = config.clock.frequency();
    let (source, default_seconds) = match &options.log {
        Some(path) => {
            let log = WriteLog::load(path)
                .with_context(|| format!("failed to read write log {}", path.display()))?;
            if let Some(chip) = log.max_chip().filter(|&c| mixer.chip(c).is_none()) {
                bail!("write log addresses chip {chip} but only {} configured", config.chips.len());
            }
            let seconds = log.last_cycle().unwrap_or(0) as f64 / clock_frequency + LOG_TAIL_SECONDS;
            (Source::Log(WriteLogPlayer::new(&mut scheduler, log)), seconds)
        }
        None => (
            Source::Demo(Arpeggio::new(&mut scheduler, clock_frequency)),
            DEFAULT_SECONDS,
        ),
    };

    let mut session = Session {
        mixer,
        source,
        fake_stereo,
    };
    session.mixer.start(&mut scheduler)?;
    match &mut session.source {
        Source::Demo(arpeggio) => scheduler.schedule(arpeggio.event, 0, Phase::Phi2),
        Source::Log(player) => player.start(&mut scheduler),
    }

    let seconds = options.seconds.unwrap_or(default_seconds);
    let cycles = (seconds * clock_frequency) as u64;
    info!(
        seconds,
        cycles,
        chips = config.chips.len(),
        rate = config.audio.sampling_rate.frequency(),
        "rendering"
    );
    scheduler.run_until(cycles, &mut session)?;
    let driver = session.mixer.into_driver()?;
    info!(frames = driver.frames_written(), "done");
    Ok(driver)
}

#[cfg(feature = "streaming")]
fn play(config: &SidConfig, options: &Options) -> Result<()> {
    use mos_sid::{StreamConfig, StreamingDriver};
    let driver = StreamingDriver::new(StreamConfig::for_audio(&config.audio))
        .context("failed to open audio device")?;
    let driver = render(config, options, driver)?;
    driver.finish();
    Ok(())
}

#[cfg(not(feature = "streaming"))]
fn play(_config: &SidConfig, _options: &Options) -> Result<()> {
    bail!("--play requires the \"streaming\" feature; rebuild with `--features streaming`")
}

#[cfg(feature = "wav")]
fn write_wav(config: &SidConfig, options: &Options) -> Result<()> {
    use mos_sid::audio::WavDriver;
    let path = options
        .wav
        .clone()
        .unwrap_or_else(|| PathBuf::from("mos-sid.wav"));
    let driver = WavDriver::create(&path, &config.audio)
        .with_context(|| format!("failed to create {}", path.display()))?;
    render(config, options, driver)?.finalize()?;
    info!(path = %path.display(), "wav written");
    Ok(())
}

#[cfg(not(feature = "wav"))]
fn write_wav(_config: &SidConfig, _options: &Options) -> Result<()> {
    bail!("WAV output requires the \"wav\" feature")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let Some(options) = parse_args(std::env::args().skip(1))? else {
        print!("{USAGE}");
        return Ok(());
    };
    let config = build_config(&options)?;

    if options.play {
        play(&config, &options)?;
        if options.wav.is_none() {
            return Ok(());
        }
    }
    write_wav(&config, &options)
}

//! Fake Stereo Adapter
//!
//! Pairs two mixer slots that sit behind one register address. Every write
//! lands on both chips with the same byte at the same cycle, so with
//! different balance (or different revisions) a mono tune is spread across
//! the stereo field. Reads come from exactly one of the two chips.

use crate::audio::AudioDriver;
use crate::config::FakeStereoConfig;
use crate::event::EventScheduler;
use crate::mixer::SidMixer;
use crate::{Result, SidError};
use tracing::debug;

/// Two mixer slots receiving the same writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeStereo {
    primary: usize,
    secondary: usize,
    read_from: usize,
}

impl FakeStereo {
    /// Pair `primary` with `secondary`
    ///
    /// Reads go to the primary unless `read_from` is greater than `primary`.
    pub fn new(primary: usize, secondary: usize, read_from: usize) -> Self {
        FakeStereo {
            primary,
            secondary,
            read_from,
        }
    }

    /// Pair described by a configuration block
    pub fn from_config(config: &FakeStereoConfig) -> Self {
        FakeStereo::new(config.primary, config.secondary, config.read_from)
    }

    /// Check both slots are populated and switch the mixer to linear panning
    pub fn attach<D: AudioDriver>(&self, mixer: &mut SidMixer<D>) -> Result<()> {
        if self.primary == self.secondary {
            return Err(SidError::Config(format!(
                "fake stereo needs two distinct slots, got {} twice",
                self.primary
            )));
        }
        for slot in [self.primary, self.secondary] {
            if mixer.chip(slot).is_none() {
                return Err(SidError::NoSuchChip(slot));
            }
        }
        mixer.set_fake_stereo(true);
        debug!(
            primary = self.primary,
            secondary = self.secondary,
            read = self.read_slot(),
            "fake stereo attached"
        );
        Ok(())
    }

    /// Slot mirrored from
    pub fn primary(&self) -> usize {
        self.primary
    }

    /// Slot mirrored to
    pub fn secondary(&self) -> usize {
        self.secondary
    }

    /// Slot that serves reads
    pub fn read_slot(&self) -> usize {
        if self.read_from <= self.primary {
            self.primary
        } else {
            self.secondary
        }
    }

    /// Write `value` to both chips
    pub fn write<D: AudioDriver>(
        &self,
        mixer: &mut SidMixer<D>,
        scheduler: &EventScheduler,
        addr: u8,
        value: u8,
    ) -> Result<()> {
        mixer.write(scheduler, self.primary, addr, value)?;
        mixer.write(scheduler, self.secondary, addr, value)
    }

    /// Read from the configured read chip only
    pub fn read<D: AudioDriver>(
        &self,
        mixer: &mut SidMixer<D>,
        scheduler: &EventScheduler,
        addr: u8,
    ) -> Result<u8> {
        mixer.read(scheduler, self.read_slot(), addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::BufferDriver;
    use crate::config::{ChipConfig, SidConfig};
    use crate::mixer::Panning;

    fn stereo_mixer() -> (EventScheduler, SidMixer<BufferDriver>) {
        let mut config = SidConfig::default();
        config.chips = vec![ChipConfig::default(), ChipConfig::default()];
        config.fake_stereo = Some(FakeStereoConfig {
            primary: 0,
            secondary: 1,
            read_from: 0,
        });
        let mut scheduler = EventScheduler::new();
        let mut mixer =
            SidMixer::new(&mut scheduler, &config, BufferDriver::new(2)).unwrap();
        for (slot, chip) in config.chips.iter().enumerate() {
            mixer.add(slot, chip.build(config.clock).unwrap());
        }
        (scheduler, mixer)
    }

    #[test]
    fn test_writes_reach_both_chips() {
        let (mut scheduler, mut mixer) = stereo_mixer();
        let pair = FakeStereo::new(0, 1, 0);
        pair.attach(&mut mixer).unwrap();
        assert_eq!(mixer.panning(), Panning::Linear);

        mixer.start(&mut scheduler).unwrap();
        for (addr, value) in [(0x0E, 0x00), (0x0F, 0x10), (0x12, 0x21), (0x18, 0x0F)] {
            pair.write(&mut mixer, &scheduler, addr, value).unwrap();
        }
        scheduler.run_until(50_000, &mut mixer).unwrap();
        mixer.clock_chips(&scheduler).unwrap();

        let a = mixer.chip(0).unwrap();
        let b = mixer.chip(1).unwrap();
        assert_eq!(a.state(), b.state());
        assert_eq!(a.read(0x1B), b.read(0x1B));
        assert_ne!(a.voice(2).unwrap().wave.accumulator(), 0);
        assert_eq!(
            a.voice(2).unwrap().wave.accumulator(),
            b.voice(2).unwrap().wave.accumulator()
        );
    }

    #[test]
    fn test_reads_come_from_one_chip() {
        let (scheduler, mut mixer) = stereo_mixer();
        // distinguishable bus values
        mixer.write(&scheduler, 0, 0x00, 0xAA).unwrap();
        mixer.write(&scheduler, 1, 0x00, 0x55).unwrap();

        let primary_reads = FakeStereo::new(0, 1, 0);
        assert_eq!(primary_reads.read_slot(), 0);
        assert_eq!(primary_reads.read(&mut mixer, &scheduler, 0x1D).unwrap(), 0xAA);

        let secondary_reads = FakeStereo::new(0, 1, 1);
        assert_eq!(secondary_reads.read_slot(), 1);
        assert_eq!(secondary_reads.read(&mut mixer, &scheduler, 0x1D).unwrap(), 0x55);
    }

    #[test]
    fn test_attach_requires_both_chips() {
        let (_, mut mixer) = stereo_mixer();
        assert!(matches!(
            FakeStereo::new(0, 2, 0).attach(&mut mixer),
            Err(SidError::NoSuchChip(2))
        ));
        assert!(FakeStereo::new(1, 1, 0).attach(&mut mixer).is_err());
    }

    #[test]
    fn test_from_config() {
        let pair = FakeStereo::from_config(&FakeStereoConfig {
            primary: 1,
            secondary: 0,
            read_from: 2,
        });
        assert_eq!(pair.primary(), 1);
        assert_eq!(pair.secondary(), 0);
        assert_eq!(pair.read_slot(), 0);
    }
}
